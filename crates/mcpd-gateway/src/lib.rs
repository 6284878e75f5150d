//! HTTP surface for the mcpd daemon.
//!
//! Every request to the proxied surface is converted into the pipeline's
//! wire shape, run through the request flow, handed to the downstream
//! handler, and its captured response run through the response flow. The
//! daemon's own health endpoints sit next to the proxied routes and do
//! not traverse the pipeline.

pub mod middleware;
pub mod router;

pub use middleware::pipeline_middleware;
pub use router::router;
