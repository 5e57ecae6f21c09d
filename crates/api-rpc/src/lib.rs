//! JSON-RPC API Layer
//!
//! Implements the JSON-RPC 2.0 server for the run queue daemon: `queue.*` methods for
//! producers and consumers, `admin.*` methods for operators.

pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use rate_limiter::{OrgRateLimiter, RateLimitConfig};
pub use server::{RpcServer, RpcServerConfig};
