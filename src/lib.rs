#![forbid(unsafe_code, reason = "It shoudn't be needed")]

//! Construction of causal execution graphs from kernel trace events.
//!
//! A [`provider::GraphProvider`] consumes scheduler, interrupt and network
//! tracepoints in timestamp order and builds a [`graph::Graph`]: one
//! horizontal timeline of state segments per worker, with vertical edges
//! wherever one worker caused another to run.

pub mod events_common;
pub mod graph;
pub mod handlers;
pub mod layout;
pub mod model;
pub mod provider;
