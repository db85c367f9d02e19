//! Customer and charge synchronization
//!
//! Data flows orchestrator → fetcher → [`ports::RemoteSource`], then
//! orchestrator → synchronizer / reconciler → repositories, with the run log
//! written at the start and end of every run.

pub mod annotations;
pub mod fetcher;
pub mod orchestrator;
pub mod ports;
pub mod reconciler;
pub mod synchronizer;
