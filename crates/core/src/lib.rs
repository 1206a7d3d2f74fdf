pub mod config;
pub mod domain;
pub mod errors;
pub mod snapshot;

pub use config::{
    AppConfig, ClarificationPolicy, ConfigError, ConfigOverrides, LoadOptions, LogFormat,
    ModelLimits, PipelineConfig,
};
pub use domain::clarify::{ClarifyQuestion, ClarifyState, PendingClarification};
pub use domain::context::ContextEntry;
pub use domain::permission::PermissionLevel;
pub use domain::entity::{Candidate, EntityId, EntityKind, EntityRecord, ResolvedSlot};
pub use domain::intent::{Intent, IntentKind, SlotMap};
pub use domain::job::{AiJob, AiJobState, JobId, JobPriority, JobTransitionError, BACKOFF_STEPS};
pub use domain::utterance::{ActorId, ContextId, Utterance};
pub use errors::PipelineError;
pub use snapshot::{NoopSnapshotSink, SnapshotSink, StateSnapshot};
