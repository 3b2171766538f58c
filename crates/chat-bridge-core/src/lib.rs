pub mod ai;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod session;
pub mod state;
pub mod tool_request;

// Re-export main types for convenience
pub use ai::{ChatBackend, ChatRequest, GenerationOptions, OllamaClient};
pub use command::{parse, Command, SummarizeRequest};
pub use error::{BridgeError, PayloadError, Result};
pub use protocol::{LineWriter, Outbound};
pub use session::{Flow, Session};
pub use state::{ChatMessage, ChatRole, History, SessionConfig};
pub use tool_request::ToolRequest;
