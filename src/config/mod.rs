//! Configuration and settings management.
//!
//! Settings come from `MAILROUND_*` environment variables, optionally seeded
//! from a `.env` file, and are validated before the scheduler starts.

mod env;
mod settings;

pub use env::{parse_bool, parse_rounds};
pub use settings::{ConfigError, MailCredentials, ServerSettings, Settings, StatusLogSettings};
