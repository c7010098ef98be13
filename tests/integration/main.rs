//! Integration test binary: all integration tests in one binary.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod config_roundtrip;
mod control_channel;
mod speech_session;
