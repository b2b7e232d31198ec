//! Promwise daemon library
//!
//! Composes the metrics gateway and the reasoning client into the agent
//! pipelines and serves them over HTTP.

pub mod agent;
pub mod metrics;
pub mod routes;
pub mod server;
