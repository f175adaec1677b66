//! lumen-core: shared plumbing for the lumen workspace
//!
//! Holds the crate-boundary error type and the configuration file loader
//! used by the classification crate and the command line tool.

pub mod config;
pub mod error;

pub use config::{load_config, parse_config, render_config, ConfigFormat};
pub use error::{Error, Result};
