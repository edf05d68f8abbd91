//! Library crate exposing the orchestrator and controller internals
//!
//! The binary wires these together; integration tests drive them directly.

pub mod bus;
pub mod config;
pub mod confirmation;
pub mod controller;
pub mod coordinator;
pub mod fanout;
pub mod orchestrator;
pub mod runtime;
pub mod scenario;
