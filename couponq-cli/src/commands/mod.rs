//! CLI commands

pub mod jobs;
pub mod worker;

pub use jobs::{DlqCommand, JobsCommand};
pub use worker::WorkerCommand;
