//! Structured logging for fire-server.
//!
//! JSON log lines on stdout, filtered by `RUST_LOG` when set and by
//! `FIRE_LOG_LEVEL` otherwise. Certificate material and key bytes never appear
//! in any log field.

pub mod init;

pub use init::init;
