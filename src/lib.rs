//! # OpenAgent Core
//!
//! The agent execution core for a tool-using conversational agent: the
//! iteration loop that drives an LLM through tool dispatch and a
//! reasoning-guarded reply gate, conversation-history persistence, and the
//! SSE transport that exposes it over HTTP.
//!
//! ## Architecture
//!
//! - **model**: the conversation data model — messages, sessions, content blocks
//! - **history**: ordered persistence and projection back into LLM-chat shape
//! - **files**: read-only access to uploaded files and their rendered pages
//! - **llm**: the streaming chat-completion client contract and its OpenRouter
//!   implementation
//! - **tools**: the tool contract and the name → executor registry
//! - **agent**: the iteration loop itself, its retry state machine, and the
//!   events it emits
//! - **transport**: the axum SSE endpoint that turns an `AgentLoop` run into
//!   a wire-level response
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use openagent_core::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Construct an `AgentLoop` from a `HistoryStore`, `FileStore`,
//!     // `LLMClient`, and `ToolRegistry`, then call `.run(request)`.
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod error;
pub mod files;
pub mod history;
pub mod llm;
pub mod model;
pub mod tools;
pub mod transport;

// Re-export commonly used items
pub use error::{Error, Result};
pub use model::{ContentBlock, Message, Role, Session};

/// Crate version, from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, from Cargo.toml.
pub const NAME: &str = env!("CARGO_PKG_NAME");
