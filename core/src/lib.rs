//! Blocking client core for a Consul-style HTTP API.
//!
//! # Overview
//! Application code issues GET/PUT/DELETE against resource paths such as
//! `/v1/kv/foo`, optionally qualified by named parameters (datacenter, ACL
//! token, consistency mode, blocking query, tag filter). The result is
//! either the response body or a classified error.
//!
//! # Design
//! - `Params` is a closed, typed parameter vocabulary rendered into the
//!   query string; misspelled names fail before anything is sent.
//! - `HttpTransport` is the network seam. `UreqTransport` is the reference
//!   implementation; tests substitute in-memory doubles.
//! - `Consul` merges its dc/token defaults into every call and offers a
//!   status-returning and an error-returning form of each operation.
//! - Failure statuses are data until the caller picks the error-returning
//!   form; only then do they become `ConsulError::NotFound` or
//!   `ConsulError::BadStatus`.

pub mod client;
pub mod error;
pub mod http;
pub mod params;
pub mod transport;
pub mod types;

pub use client::{ClientConfig, Consul, ConsulBuilder, DEFAULT_ADDRESS};
pub use error::{ConsulError, ParamError, TransportError};
pub use http::{Response, ResponseHeaders, Status};
pub use params::{make_url, ParamName, ParamValue, Params};
pub use transport::{HttpTransport, KeyPassword, TlsSettings, UreqTransport};
pub use types::{BlockFor, Consistency};
