//! Domain types for the mailround probe.
//!
//! This module contains the identifiers, status events and server kinds shared
//! by the round trip task, the status log and the configuration layer.

mod server;
mod status;
mod types;

pub use server::ServerKind;
pub use status::{epoch_seconds, StatusEvent, StatusKind};
pub use types::{CorrelationId, RoundPair};
