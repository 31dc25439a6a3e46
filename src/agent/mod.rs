//! Agent construction and execution.

pub mod factory;
pub mod runnable;

pub use factory::{AgentFactory, AgentRunOptions};
pub use runnable::{AgentUpdate, RunnableAgent};
