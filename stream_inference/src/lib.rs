mod codec;
mod inference_service;
mod model_service;
mod ort_service;
mod registry;
mod server;
mod smoothing;
mod state;

pub mod cli;
pub mod config;
pub mod error;

pub use server::start_server;
