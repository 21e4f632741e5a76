//! `cat` for NATS subjects.
//!
//! Publishes stdin (or an inline message) to a subject, or subscribes to a
//! subject and copies what arrives to stdout. Each module focuses on one
//! concern:
//!
//! - [`cli`] declares the command-line flags.
//! - [`config`] turns parsed flags into a validated [`config::Config`] and
//!   picks the run [`config::Mode`].
//! - [`framing`] splits stdin into messages and writes payloads back out,
//!   line by line or as raw bytes.
//! - [`transport`] is the seam to the message bus, with a core NATS client
//!   in [`transport::nats`].
//! - [`dispatch`] drives one mode from connect to close.
//!
//! Integration tests drive [`dispatch`] against a recording transport and
//! against an in-process NATS protocol server.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod transport;
