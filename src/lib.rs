//! Remote call agent
//!
//! JSON-RPC and plain HTTP calls against a backend, with every outcome
//! settled as a typed value or a classified [`CallError`].

pub mod agent;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod util;

pub use agent::{
    AgentConfig, CallAgent, CallOptions, HttpMethod, RemoteBody, RequestOverlay, ResponseBodyType,
};
pub use error::CallError;
pub use transport::{HttpTransport, Transport};
