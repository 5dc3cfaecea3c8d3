//! mailround - A synthetic monitoring probe for mail delivery
//!
//! This crate sends correlated test mails through outbound servers, watches
//! inbound mailboxes for them and records every step in a signed status log.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;
