//! Edge API gateway library.
//!
//! Request pipeline: correlation ID, public-path check, bearer token
//! authentication, identity key, route lookup, per-route rate limiting,
//! authorization, then forwarding to a healthy upstream instance.

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod policy;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
