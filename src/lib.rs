mod inference;
mod model_service;
mod ort_service;
mod persistence;
mod routes;
mod server;
mod telemetry;
#[cfg(test)]
mod testing;

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod storage;
pub mod validation;

pub use app::start_app;
