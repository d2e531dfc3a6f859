//! Session-paired streaming relay.
//!
//! The relay hosts two duplex WebSocket channels per session (one per call
//! leg), gates traffic until both legs are attached, streams each
//! utterance through the translation adapter to the counterpart leg, and
//! tears the pair down together on any terminal condition.

pub mod dispatcher;
pub mod readiness;
pub mod registry;
pub mod server;
pub mod state;
pub mod teardown;

pub use registry::{NewSessionRequest, SessionRegistry};
pub use server::start_relay;
pub use state::RelayState;
