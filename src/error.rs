//! Error types for Sockshade
//!
//! This module defines the custom error types used throughout the application,
//! plus the classification helpers the relay uses to tell a real failure apart
//! from a designed termination (forced expiry or shutdown).

use std::io;
use thiserror::Error;

/// Main error type for Sockshade operations
#[derive(Error, Debug)]
pub enum SockshadeError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cipher selection or key error
    #[error("Cipher error: {0}")]
    Cipher(String),
}

/// SOCKS5 specific errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// No acceptable authentication method
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Invalid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),
}

/// Marker carried inside the `io::Error` produced when a watched resource is
/// force-closed by the shutdown signal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("closed on cancellation")]
pub struct Cancelled;

impl Cancelled {
    /// Build the `io::Error` reported by reads and writes on a closed resource
    pub fn io_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, Cancelled)
    }
}

/// Whether the error is timeout-class (the relay's forced expiry produces these)
pub fn is_timeout(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::TimedOut
}

/// Whether the error was produced by a watched resource closing on shutdown
pub fn is_cancelled(err: &io::Error) -> bool {
    err.get_ref().map_or(false, |inner| inner.is::<Cancelled>())
}

/// Errors that signal a designed termination rather than a failure
pub fn is_benign(err: &io::Error) -> bool {
    is_timeout(err) || is_cancelled(err)
}
