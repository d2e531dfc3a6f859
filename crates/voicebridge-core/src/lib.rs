//! Core types, config, errors, and session model for VoiceBridge.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
