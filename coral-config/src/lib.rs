//! Configuration loading for the Coral music server.
//!
//! Scanner tuning comes from a file, inline JSON or built-in defaults
//! ([`ScannerConfig::load_from_env`]); process settings such as the database
//! URL come from the environment and an optional `.env` file
//! ([`Config::from_env`]).

mod env;
mod scanner;

pub use env::{Config, DEFAULT_ARTWORK_DIR};
pub use scanner::{ScannerConfig, ScannerConfigSource};
