pub mod admin;
pub mod common;
pub mod config;
pub mod server;

pub type Error = crate::common::error::NegotiatorError;
pub type Result<T> = std::result::Result<T, Error>;

pub const NEGOTIATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
