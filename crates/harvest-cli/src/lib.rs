//! Harvest CLI — run a JSON selector schema over a URL or an HTML file.

pub mod config;

pub use config::{load_schema, load_source, parse_delay, resolve_timeout_ms, resolve_user_agent};
