pub mod clarify;
pub mod context;
pub mod permission;
pub mod entity;
pub mod intent;
pub mod job;
pub mod utterance;
