#![warn(missing_docs)]

//! blockctl HTTP surface: axum router for the volume API, request context
//! middleware, configuration, CLI and the background revert worker.

pub mod api;
pub mod cli;
pub mod config;
pub mod security;
pub mod worker;

pub use api::{ApiFault, ApiRequest, VolumeApi};
pub use config::ApiConfig;
pub use worker::{run_revert_worker, ChannelDispatcher, NoopExecutor, RevertExecutor};
