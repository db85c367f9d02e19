//! Asaas v3 platform integration
//!
//! Implements the core [`RemoteSource`](billsync_core::RemoteSource) port on
//! top of the rate-limited [`HttpClient`](crate::http::HttpClient).

pub mod client;
pub mod types;

pub use client::AsaasClient;
pub use types::ListEnvelope;
