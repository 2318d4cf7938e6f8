//! Pluggable HTTP transport.
//!
//! # Design
//! `HttpTransport` is the only seam between the client and the network. It
//! receives a path with its query already rendered, performs exactly one
//! request, and reports the outcome as data: a `Status`, the headers (for
//! GET), and the body. Connection failures, TLS failures and timeouts
//! become a `Status::TRANSPORT_FAILURE` status instead of an error, so
//! callers see every outcome through the same shape. An unreadable body
//! keeps a failure code and only downgrades a success. Redirects are
//! returned as-is.
//!
//! Methods take `&self` and the trait requires `Send + Sync`, so a facade
//! can be shared between threads and an implementation that is not
//! reentrant must bring its own locking.
//!
//! `UreqTransport` is the reference implementation, built on `ureq`.
//! TLS material is described by `TlsSettings`, which the caller owns and
//! lends to the transport only while it is being constructed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;
use ureq::tls::{ClientCert, PemItem, PrivateKey, RootCerts, TlsConfig};

use crate::error::TransportError;
use crate::http::{ResponseHeaders, Status};

/// Executes requests against one server address.
pub trait HttpTransport: Send + Sync {
    /// The address every request path is resolved against.
    fn base_address(&self) -> &str;

    /// Returns `(status, headers, body)`.
    fn get(&self, path: &str) -> (Status, ResponseHeaders, String);

    /// Returns `(status, body)`.
    fn put(&self, path: &str, body: &str) -> (Status, String);

    /// Returns `(status, body)`.
    fn delete(&self, path: &str) -> (Status, String);
}

/// Password protecting a client key. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct KeyPassword(String);

impl KeyPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyPassword(<redacted>)")
    }
}

/// Client-side TLS material, all PEM files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TlsSettings {
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub client_key_password: Option<KeyPassword>,
    /// CA bundle used instead of the built-in web roots.
    pub ca_cert: Option<PathBuf>,
}

impl TlsSettings {
    pub fn is_empty(&self) -> bool {
        self.client_cert.is_none()
            && self.client_key.is_none()
            && self.client_key_password.is_none()
            && self.ca_cert.is_none()
    }
}

/// Blocking transport backed by a `ureq` agent.
pub struct UreqTransport {
    address: String,
    base_url: String,
    agent: ureq::Agent,
}

impl UreqTransport {
    /// Plain HTTP transport without a timeout.
    pub fn new(address: &str) -> Self {
        Self::from_agent(address, agent_config().build().new_agent(), false)
    }

    /// Transport with optional TLS material and a global per-request
    /// timeout. Blocking queries must use a wait shorter than `timeout`.
    pub fn with_options(
        address: &str,
        tls: Option<&TlsSettings>,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let mut config = agent_config().timeout_global(timeout);
        let tls = tls.filter(|settings| !settings.is_empty());
        if let Some(settings) = tls {
            config = config.tls_config(tls_config(settings)?);
        }
        Ok(Self::from_agent(address, config.build().new_agent(), tls.is_some()))
    }

    fn from_agent(address: &str, agent: ureq::Agent, secure: bool) -> Self {
        let address = address.trim_end_matches('/').to_string();
        let base_url = if address.contains("://") {
            address.clone()
        } else if secure {
            format!("https://{address}")
        } else {
            format!("http://{address}")
        };
        Self {
            address,
            base_url,
            agent,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl HttpTransport for UreqTransport {
    fn base_address(&self) -> &str {
        &self.address
    }

    fn get(&self, path: &str) -> (Status, ResponseHeaders, String) {
        read_response("GET", self.agent.get(&self.url(path)).call())
    }

    fn put(&self, path: &str, body: &str) -> (Status, String) {
        let (status, _, body) = read_response("PUT", self.agent.put(&self.url(path)).send(body.as_bytes()));
        (status, body)
    }

    fn delete(&self, path: &str) -> (Status, String) {
        let (status, _, body) = read_response("DELETE", self.agent.delete(&self.url(path)).call());
        (status, body)
    }
}

/// Statuses come back as data and redirects are returned, not followed, so
/// every call is exactly one request.
fn agent_config() -> ureq::config::ConfigBuilder<ureq::typestate::AgentScope> {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
}

fn read_response(
    method: &str,
    result: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
) -> (Status, ResponseHeaders, String) {
    let mut response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(method, error = %e, "request failed before a response arrived");
            return (Status::transport_failure(e.to_string()), ResponseHeaders::new(), String::new());
        }
    };

    let code = response.status();
    let status = match code.canonical_reason() {
        Some(reason) => Status::with_message(code.as_u16(), reason),
        None => Status::new(code.as_u16()),
    };
    let headers: ResponseHeaders = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    match response.body_mut().read_to_string() {
        Ok(body) => (status, headers, body),
        Err(e) => {
            warn!(method, code = status.code(), error = %e, "response body unreadable");
            let message = format!("unreadable response body: {e}");
            // A failure code is still the server's answer; only a success
            // without a usable body is downgraded.
            let status = if status.success() {
                Status::transport_failure(message)
            } else {
                Status::with_message(status.code(), message)
            };
            (status, headers, String::new())
        }
    }
}

fn tls_config(settings: &TlsSettings) -> Result<TlsConfig, TransportError> {
    if settings.client_key_password.is_some() {
        return Err(TransportError::EncryptedKeyUnsupported);
    }

    let mut builder = TlsConfig::builder();
    match (&settings.client_cert, &settings.client_key) {
        (Some(cert), Some(key)) => {
            let chain = read_certificates(cert)?;
            let key = read_private_key(key)?;
            builder = builder.client_cert(Some(ClientCert::new_with_certs(&chain, key)));
        }
        (None, None) => {}
        _ => return Err(TransportError::IncompleteClientIdentity),
    }
    if let Some(ca) = &settings.ca_cert {
        let roots = read_certificates(ca)?;
        builder = builder.root_certs(RootCerts::new_with_certs(&roots));
    }
    Ok(builder.build())
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|source| TransportError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

fn read_certificates(path: &Path) -> Result<Vec<ureq::tls::Certificate<'static>>, TransportError> {
    let pem = read_pem(path)?;
    let mut certs = Vec::new();
    for item in ureq::tls::parse_pem(&pem) {
        match item {
            Ok(PemItem::Certificate(cert)) => certs.push(cert.to_owned()),
            Ok(_) => {}
            Err(e) => {
                return Err(TransportError::InvalidPem {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }
    if certs.is_empty() {
        return Err(TransportError::InvalidPem {
            path: path.to_path_buf(),
            reason: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKey<'static>, TransportError> {
    let pem = read_pem(path)?;
    PrivateKey::from_pem(&pem).map_err(|e| TransportError::InvalidPem {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::{SocketAddr, TcpListener};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    /// Answers every connection with the same raw response, counting the
    /// requests it reads.
    fn canned_server(response: &'static [u8]) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap_or(0) > 0 {
                    if line == "\r\n" {
                        break;
                    }
                    line.clear();
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = stream.write_all(response);
                let _ = stream.flush();
            }
        });
        (addr, hits)
    }

    #[test]
    fn bare_address_gets_http_scheme() {
        let transport = UreqTransport::new("127.0.0.1:8500");
        assert_eq!(transport.base_address(), "127.0.0.1:8500");
        assert_eq!(transport.url("/v1/kv/foo"), "http://127.0.0.1:8500/v1/kv/foo");
    }

    #[test]
    fn explicit_scheme_is_kept_and_trailing_slash_stripped() {
        let transport = UreqTransport::new("https://consul.example:8501/");
        assert_eq!(transport.base_address(), "https://consul.example:8501");
        assert_eq!(transport.url("/v1/status/leader"), "https://consul.example:8501/v1/status/leader");
    }

    #[test]
    fn empty_tls_settings_stay_plain_http() {
        let settings = TlsSettings::default();
        let transport = UreqTransport::with_options("localhost:8500", Some(&settings), None).unwrap();
        assert_eq!(transport.url("/"), "http://localhost:8500/");
    }

    #[test]
    fn key_password_is_rejected_and_redacted() {
        let settings = TlsSettings {
            client_key_password: Some(KeyPassword::new("hunter2")),
            ..TlsSettings::default()
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
        let err = UreqTransport::with_options("localhost:8501", Some(&settings), None)
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::EncryptedKeyUnsupported));
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let settings = TlsSettings {
            client_cert: Some(PathBuf::from("client.pem")),
            ..TlsSettings::default()
        };
        let err = UreqTransport::with_options("localhost:8501", Some(&settings), None)
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::IncompleteClientIdentity));
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let settings = TlsSettings {
            ca_cert: Some(PathBuf::from("/nonexistent/consul-ca.pem")),
            ..TlsSettings::default()
        };
        let err = UreqTransport::with_options("localhost:8501", Some(&settings), None)
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::ReadFile { .. }));
    }

    #[test]
    fn connection_refused_is_a_failure_status() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = UreqTransport::new(&addr.to_string());
        let (status, headers, body) = transport.get("/v1/kv/foo");
        assert_eq!(status.code(), Status::TRANSPORT_FAILURE);
        assert!(!status.success());
        assert!(status.message().is_some());
        assert!(headers.is_empty());
        assert!(body.is_empty());
    }

    #[test]
    fn redirects_are_returned_not_followed() {
        let (addr, hits) = canned_server(
            b"HTTP/1.1 307 Temporary Redirect\r\nLocation: /v1/kv/other\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let transport = UreqTransport::new(&addr.to_string());

        let (status, headers, body) = transport.get("/v1/kv/foo");
        assert_eq!(status.code(), 307);
        assert!(!status.success());
        assert_eq!(headers.get("location"), Some("/v1/kv/other"));
        assert!(body.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let with_options = UreqTransport::with_options(&addr.to_string(), None, Some(Duration::from_secs(5))).unwrap();
        let (status, _) = with_options.delete("/v1/kv/foo");
        assert_eq!(status.code(), 307);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn undecodable_body_keeps_failure_code() {
        let (addr, _) = canned_server(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\nConnection: close\r\n\r\n\xff\xfe",
        );
        let transport = UreqTransport::new(&addr.to_string());
        let (status, _, body) = transport.get("/v1/kv/foo");
        assert_eq!(status.code(), Status::NOT_FOUND);
        assert!(status.message().unwrap().contains("unreadable response body"));
        assert!(body.is_empty());
    }

    #[test]
    fn undecodable_not_found_body_is_still_not_found() {
        let (addr, _) = canned_server(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\nConnection: close\r\n\r\n\xff\xfe",
        );
        let consul = crate::Consul::with_transport(UreqTransport::new(&addr.to_string()), crate::Params::new()).unwrap();
        let err = consul.get("/v1/kv/foo", &crate::Params::new()).unwrap_err();
        assert!(matches!(err, crate::ConsulError::NotFound { .. }));
        assert_eq!(err.status().map(|s| s.code()), Some(Status::NOT_FOUND));
    }

    #[test]
    fn undecodable_success_body_is_a_failure_status() {
        let (addr, _) = canned_server(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: 2\r\nConnection: close\r\n\r\n\xff\xfe",
        );
        let transport = UreqTransport::new(&addr.to_string());
        let (status, _, body) = transport.get("/v1/kv/foo?raw");
        assert_eq!(status.code(), Status::TRANSPORT_FAILURE);
        assert!(!status.success());
        assert!(body.is_empty());
    }
}
