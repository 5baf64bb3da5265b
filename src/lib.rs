//! Dynamic agent handler registry and A2A task execution router.
//!
//! The crate keeps a live, concurrently-accessed table mapping agent
//! identities to protocol request handlers, synchronizes that table with a
//! declaratively-managed agent inventory, and multiplexes inbound A2A
//! requests to the right handler while driving each invocation's task
//! lifecycle (synchronous and streaming).

pub mod a2a;
pub mod client;
pub mod errors;
pub mod processor;
pub mod registrar;
pub mod registry;
pub mod server;
pub mod tasks;

// Re-export the key routing types for easier access
pub use registrar::Registrar;
pub use registry::{AgentKey, HandlerRegistry, RequestHandler};

// Re-export key error types for easier access
pub use errors::{RouterError, RouterResult};
