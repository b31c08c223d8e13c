pub mod config;
pub mod error;
pub mod redact;
pub mod sanitize;
pub mod security;
pub mod shutdown;
pub mod types;
