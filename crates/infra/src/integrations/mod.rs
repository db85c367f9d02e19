//! External platform integrations

pub mod asaas;

pub use asaas::AsaasClient;
