//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, ordered pipeline)
//!     → actuator.rs (gateway-served health and info)
//!     → forward.rs (rewrite, send to upstream instance)
//!     → Send to client
//! ```

pub mod actuator;
pub mod forward;
pub mod server;

pub use forward::Forwarder;
pub use server::{AppState, HttpServer, Runtime, ServerError};
