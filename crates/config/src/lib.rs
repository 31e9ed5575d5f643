//! Configuration module for pixel-slicer
//!
//! Handles loading configuration from TOML files and environment variable overrides,
//! and validates the declared image and video outputs.

pub mod config;
pub mod media;

pub use config::*;
pub use media::*;
