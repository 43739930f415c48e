pub mod commands;
pub mod types;

pub use commands::LifecycleEvent;
pub use types::{Message, MessageStatus, Provenance, Reply};
