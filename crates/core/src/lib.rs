//! # Taskloom Core
//!
//! Domain types, traits, and error definitions for the Taskloom
//! task-execution engine. This crate has **no framework dependencies**; it
//! defines the seams that the engines (agent loop, plan-and-execute,
//! workflow orchestrator) are written against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`Provider`]: the reasoning (model completion) service
//! - [`Tool`]: an invocable capability held by the [`ToolRegistry`]
//! - [`Retriever`]: the retrieval / search service
//! - [`HttpClient`]: outbound HTTP
//!
//! Implementations live in their respective crates and are injected at
//! composition time, so tests can swap in scripted fakes.

pub mod agent;
pub mod error;
pub mod event;
pub mod http;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::ExhaustionPolicy;
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use http::{HttpClient, HttpRequest, HttpResponse};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use retrieval::{Retriever, SearchHit};
pub use tool::{Tool, ToolCallRecord, ToolInfo, ToolOutcome, ToolParameter, ToolRegistry};
