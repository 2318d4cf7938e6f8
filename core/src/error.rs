//! Error types for the Consul client.
//!
//! # Design
//! Failure statuses are data, not errors: the `*_with_status` facade calls
//! return them as `Status` values. Only the throwing facade calls turn a
//! failure status into `ConsulError`, and they split it two ways.
//! `NotFound` gets a dedicated variant because callers frequently
//! distinguish "the key does not exist" from "the server returned an
//! unexpected status". Every other failure lands in `BadStatus` with the
//! full `Status` and raw body for debugging.
//!
//! `ParamError` covers programmer errors in composing parameters and is
//! raised before any request is sent. `TransportError` covers failures to
//! construct a transport (bad TLS material); request-time transport
//! failures are reported as a `Status` instead.

use std::path::PathBuf;

use crate::http::Status;
use crate::params::ParamName;

/// Errors from composing request parameters.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    /// The name is not part of the parameter vocabulary.
    #[error("unknown parameter `{0}`")]
    UnknownName(String),

    /// The value has the wrong type for the parameter.
    #[error("parameter `{name}` expects a {expected} value")]
    TypeMismatch {
        name: ParamName,
        expected: &'static str,
    },

    /// A blocking query was given only part of its wait/index pair.
    #[error("blocking query is missing {missing}")]
    IncompleteBlockingQuery { missing: &'static str },

    /// The parameter exists but is not accepted here.
    #[error("parameter `{name}` is not allowed in {context}")]
    NotAllowed {
        name: ParamName,
        context: &'static str,
    },

    #[error("unknown consistency mode `{0}`")]
    UnknownConsistency(String),
}

/// Errors from setting up a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to read {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable PEM data in {}: {reason}", .path.display())]
    InvalidPem { path: PathBuf, reason: String },

    /// A client certificate was configured without its key, or the reverse.
    #[error("client certificate and client key must be configured together")]
    IncompleteClientIdentity,

    #[error("password-protected client keys are not supported by this transport")]
    EncryptedKeyUnsupported,
}

/// Errors returned by the throwing `Consul` calls.
#[derive(Debug, thiserror::Error)]
pub enum ConsulError {
    /// The server returned 404: the requested resource does not exist.
    #[error("resource not found")]
    NotFound { status: Status, body: String },

    /// Any other failure status, including transport failures.
    #[error("bad status {status}: {body}")]
    BadStatus { status: Status, body: String },

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ConsulError {
    /// The status behind a `NotFound` or `BadStatus` error.
    pub fn status(&self) -> Option<Status> {
        match self {
            ConsulError::NotFound { status, .. } | ConsulError::BadStatus { status, .. } => Some(status.clone()),
            ConsulError::Param(_) | ConsulError::Transport(_) => None,
        }
    }

    /// The raw response body behind a `NotFound` or `BadStatus` error.
    pub fn body(&self) -> Option<&str> {
        match self {
            ConsulError::NotFound { body, .. } | ConsulError::BadStatus { body, .. } => Some(body.as_str()),
            ConsulError::Param(_) | ConsulError::Transport(_) => None,
        }
    }
}
