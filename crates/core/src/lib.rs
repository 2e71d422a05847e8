//! # reasonflow core
//!
//! Domain types, capability traits, and error definitions for the reasonflow
//! streaming reasoning engine. This crate carries no framework dependencies:
//! it defines the model every other crate implements against.
//!
//! ## Capabilities
//!
//! The reasoning loop never talks to a network or a process directly. It
//! consumes two injected capabilities:
//! - [`Provider`]: the generation capability (batch or streaming text)
//! - [`Tool`], collected in a [`ToolRegistry`]: the tool capability
//!
//! Both are traits so tests and alternative backends can be swapped in
//! without touching the loop.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Conversation, ConversationId, Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, StreamReceiver, Usage};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolRegistry, ToolResult, ToolResultStream};
