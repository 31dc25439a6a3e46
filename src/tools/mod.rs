//! Tool system for function calling.

pub mod arguments;
pub mod collection;
pub mod frontend;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use collection::{ToolCollection, ToolScope, ToolScopeCollection};
pub use frontend::FrontendTool;
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::ToolParameters;
