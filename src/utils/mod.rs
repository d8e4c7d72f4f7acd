//! Hub metadata lookup and task name handling.

mod hub;
mod tasks;

pub use hub::{HubMetadataClient, ModelMetadataService, DEFAULT_ENDPOINT};
pub use tasks::{is_seq2seq_task, normalize_task, TASK_ALIASES};
