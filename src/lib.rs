//! Agent Dispatch Library
//!
//! Execution graph for agent plans, a multi-backend operation dispatcher and a
//! conversation indexer. The `agent-dispatch` binary in `src/main.rs` serves
//! the dispatcher over HTTP and offers a small CLI.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod graph;
pub mod indexer;
