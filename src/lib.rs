pub mod clock;
pub mod common;
pub mod config;
pub mod error;
pub mod legacy;
pub mod normalize;
pub mod repository;
pub mod roster;
pub mod scheduler;
pub mod storage;

pub use common::{LifecycleEvent, Message, MessageStatus, Provenance, Reply};
pub use error::{BoardError, BoardResult, ErrorKind};
pub use legacy::LegacyFacade;
pub use repository::{BoardStatus, ClearReport, MessageRepository, SharedRepository};
pub use roster::{RosterClient, Student};
pub use scheduler::BackupScheduler;
