//! The `utils` module provides the pieces shared by every component of
//! `topicbroker`: the crate-wide error type, logging setup, the task group
//! that ties background tasks to a component's stop, and the single-shot
//! completion used as a rendezvous between tasks.

pub mod completion;
pub mod error;
pub mod logging;
pub mod tasks;

pub use completion::Completion;
pub use error::{Error, Result};
pub use tasks::TaskGroup;

#[cfg(test)]
mod tests;
