//! API module
//!
//! HTTP handlers exposing the dispatcher to orchestrators running in other
//! processes.

pub mod operations;

pub use operations::*;
