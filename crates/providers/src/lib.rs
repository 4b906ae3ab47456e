//! Provider abstraction for agent runtimes.
//!
//! A provider is treated as a streaming event source: each run yields
//! `text_delta | tool_call | tool_result | permission_request | finish |
//! error` events. Provider internals (SDK wire formats, auth flows) live
//! behind [`AgentProvider`] / [`AgentSession`].

pub mod metadata;
pub mod registry;
pub mod scripted;
pub mod traits;

pub use metadata::MetadataModel;
pub use registry::ProviderRegistry;
pub use scripted::ScriptedProvider;
pub use traits::{AgentPrompt, AgentProvider, AgentSession};
