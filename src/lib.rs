//! DLP Gateway — outbound mail inspection and routing.

pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extract;
pub mod policy;
pub mod relay;
pub mod routing;
pub mod scoring;
pub mod session;
pub mod smtp;
