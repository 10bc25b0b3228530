//! The relay daemon.
//!
//! A long-running HTTP server that:
//! - Holds the Ollama client and the session store
//! - Streams generations back to the browser as server-sent events
//! - Records every completed exchange in the session store

pub mod error;
pub mod handlers;
pub mod llm;
pub mod relay;
pub mod server;

pub use server::DaemonServer;
