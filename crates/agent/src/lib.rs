//! Conversational pipeline - intent recognition through action dispatch
//!
//! This crate turns free-form actor utterances into executed commands:
//! - Recognizes intent from natural language without calling a model
//! - Resolves fuzzy entity references against a directory pool
//! - Remembers recent exchanges per actor for pronoun follow-ups
//! - Asks at most one clarifying question at a time when references are
//!   ambiguous or an action needs confirmation
//! - Dispatches validated intents to registered capability handlers
//! - Routes unrecognized utterances to an admission-controlled AI queue
//!
//! # Architecture
//!
//! The pipeline is a fixed cascade:
//! 1. **Recognition** (`recognize`) - utterance text → scored `Intent`
//! 2. **Resolution** (`resolve`) - slot tokens → directory candidates
//! 3. **Clarification** (`clarify`) - one open question per actor
//! 4. **Execution** (`executor`) - validated intent → capability handler
//! 5. **AI fallback** (`scheduler`, `llm`) - everything below the
//!    confidence floor, gated by per-model rpm/tpm/rpd budgets
//!
//! # Key Types
//!
//! - `Runtime` - the orchestrator (see `runtime` module)
//! - `CapabilityHandler` - pluggable trait for command side effects
//! - `CompletionClient` - pluggable trait for the model provider
//!
//! # Determinism Principle
//!
//! The model is strictly a fallback. Recognition, resolution, admission
//! control, and permission checks are deterministic and never consult it.

pub mod clarify;
pub mod context;
pub mod executor;
pub mod llm;
pub mod recognize;
pub mod render;
pub mod resolve;
pub mod runtime;
pub mod scheduler;
