pub mod assemble;
pub mod auth;
pub mod build;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod image;
pub mod layout;
pub mod manifest;
pub mod platform;
pub mod resolve;
pub mod runner;
pub mod sbom;
pub mod service;
pub mod tools;

pub use error::{Error, Result};
