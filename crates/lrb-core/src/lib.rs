//! Core domain + relay logic for the lab relay bot (Discord ⇄ Slack).
//!
//! This crate is framework-agnostic. Discord and Slack live behind the
//! [`ports::PlatformPort`] trait, implemented in adapter crates.

pub mod config;
pub mod correlation;
pub mod domain;
pub mod emoji;
pub mod errors;
pub mod formatting;
pub mod inbound;
pub mod logging;
pub mod ports;
pub mod relay;
pub mod status;

pub use errors::{Error, Result};
