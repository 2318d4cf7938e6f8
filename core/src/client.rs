//! The `Consul` request facade.
//!
//! # Design
//! `Consul` owns one transport and a set of default parameters (dc and
//! token). Both are fixed at construction. Every call merges the call-site
//! `Params` over the defaults, renders the URL, and hands it to the
//! transport. There is no state between calls.
//!
//! Each operation comes in two forms. The `*_with_status` form never fails:
//! it returns the transport's `Status` next to the body. The plain form
//! calls it and converts a failure status into `ConsulError::NotFound`
//! (404) or `ConsulError::BadStatus` (everything else), keeping the body in
//! both.
//!
//! `Consul` is deliberately not `Clone`; it owns its transport exclusively.
//! Share it by reference or behind an `Arc`.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ConsulError, ParamError};
use crate::http::{Response, Status};
use crate::params::{make_url, ParamName, Params};
use crate::transport::{HttpTransport, KeyPassword, TlsSettings, UreqTransport};

/// Address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8500";

/// Parameters a facade may carry as defaults.
const DEFAULT_PARAMS: [ParamName; 2] = [ParamName::Dc, ParamName::Token];

/// Client for a Consul-style HTTP API.
pub struct Consul {
    transport: Box<dyn HttpTransport>,
    defaults: Params,
}

impl std::fmt::Debug for Consul {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consul")
            .field("address", &self.address())
            .field("defaults", &self.defaults.names().collect::<Vec<_>>())
            .finish()
    }
}

impl Consul {
    /// Client for `address` over plain HTTP with no defaults.
    pub fn new(address: &str) -> Self {
        Self {
            transport: Box::new(UreqTransport::new(address)),
            defaults: Params::new(),
        }
    }

    pub fn builder<'a>() -> ConsulBuilder<'a> {
        ConsulBuilder::default()
    }

    /// Client over an arbitrary transport. `defaults` may only contain dc
    /// and token.
    pub fn with_transport(
        transport: impl HttpTransport + 'static,
        defaults: Params,
    ) -> Result<Self, ParamError> {
        defaults.restrict_to(&DEFAULT_PARAMS, "client defaults")?;
        Ok(Self {
            transport: Box::new(transport),
            defaults,
        })
    }

    pub fn address(&self) -> &str {
        self.transport.base_address()
    }

    pub fn defaults(&self) -> &Params {
        &self.defaults
    }

    /// The URL (path and query) a call with `params` would request.
    pub fn url(&self, path: &str, params: &Params) -> String {
        make_url(path, &params.merged_over(&self.defaults))
    }

    pub fn get_with_status(&self, path: &str, params: &Params) -> (Status, Response<String>) {
        let url = self.url(path, params);
        debug!(method = "GET", route = route(path), "consul request");
        let (status, headers, body) = self.transport.get(&url);
        log_status("GET", path, &status);
        (status, Response::new(body, headers))
    }

    pub fn put_with_status(&self, path: &str, body: &str, params: &Params) -> (Status, String) {
        let url = self.url(path, params);
        debug!(method = "PUT", route = route(path), len = body.len(), "consul request");
        let (status, body) = self.transport.put(&url, body);
        log_status("PUT", path, &status);
        (status, body)
    }

    pub fn delete_with_status(&self, path: &str, params: &Params) -> (Status, String) {
        let url = self.url(path, params);
        debug!(method = "DELETE", route = route(path), "consul request");
        let (status, body) = self.transport.delete(&url);
        log_status("DELETE", path, &status);
        (status, body)
    }

    /// GET returning the body and the response headers, e.g. to read the
    /// index for the next blocking query.
    pub fn get_with_headers(&self, path: &str, params: &Params) -> Result<Response<String>, ConsulError> {
        let (status, response) = self.get_with_status(path, params);
        if status.success() {
            return Ok(response);
        }
        Err(status_error(status, response.into_data()))
    }

    pub fn get(&self, path: &str, params: &Params) -> Result<String, ConsulError> {
        self.get_with_headers(path, params).map(Response::into_data)
    }

    pub fn put(&self, path: &str, body: &str, params: &Params) -> Result<String, ConsulError> {
        let (status, body) = self.put_with_status(path, body, params);
        check_status(status, body)
    }

    pub fn delete(&self, path: &str, params: &Params) -> Result<String, ConsulError> {
        let (status, body) = self.delete_with_status(path, params);
        check_status(status, body)
    }
}

/// The path without its query string, which may carry a token.
fn route(path: &str) -> &str {
    path.split_once('?').map_or(path, |(route, _)| route)
}

fn log_status(method: &str, path: &str, status: &Status) {
    if !status.success() {
        debug!(method, route = route(path), %status, "consul request failed");
    }
}

/// Pass the body through on success, otherwise classify the failure.
fn check_status(status: Status, body: String) -> Result<String, ConsulError> {
    if status.success() {
        return Ok(body);
    }
    Err(status_error(status, body))
}

fn status_error(status: Status, body: String) -> ConsulError {
    if status.is_not_found() {
        return ConsulError::NotFound { status, body };
    }
    ConsulError::BadStatus { status, body }
}

/// Client settings as they appear in a config file or the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub address: Option<String>,
    pub datacenter: Option<String>,
    pub token: Option<String>,
    #[serde(flatten)]
    pub tls: TlsSettings,
    pub timeout_ms: Option<u64>,
}

impl ClientConfig {
    /// Read `CONSUL_HTTP_ADDR`, `CONSUL_HTTP_TOKEN`, `CONSUL_DATACENTER`,
    /// `CONSUL_CACERT`, `CONSUL_CLIENT_CERT`, `CONSUL_CLIENT_KEY` and
    /// `CONSUL_CLIENT_KEY_PASSWORD`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with a custom variable source. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Self {
            address: var("CONSUL_HTTP_ADDR"),
            datacenter: var("CONSUL_DATACENTER"),
            token: var("CONSUL_HTTP_TOKEN"),
            tls: TlsSettings {
                client_cert: var("CONSUL_CLIENT_CERT").map(Into::into),
                client_key: var("CONSUL_CLIENT_KEY").map(Into::into),
                client_key_password: var("CONSUL_CLIENT_KEY_PASSWORD").map(KeyPassword::new),
                ca_cert: var("CONSUL_CACERT").map(Into::into),
            },
            timeout_ms: None,
        }
    }
}

/// Builder for a `Consul` over `UreqTransport`.
#[derive(Default)]
pub struct ConsulBuilder<'a> {
    address: Option<String>,
    defaults: Params,
    tls: Option<&'a TlsSettings>,
    timeout: Option<Duration>,
}

impl<'a> ConsulBuilder<'a> {
    pub fn from_config(config: &'a ClientConfig) -> Self {
        let mut builder = Self {
            address: config.address.clone(),
            tls: Some(&config.tls),
            timeout: config.timeout_ms.map(Duration::from_millis),
            ..Self::default()
        };
        if let Some(dc) = &config.datacenter {
            builder = builder.dc(dc.as_str());
        }
        if let Some(token) = &config.token {
            builder = builder.token(token.as_str());
        }
        builder
    }

    /// Server address, `host:port` or a full base URL. Defaults to
    /// `DEFAULT_ADDRESS`.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Default datacenter for every call.
    pub fn dc(mut self, dc: impl Into<String>) -> Self {
        self.defaults = self.defaults.dc(dc);
        self
    }

    /// Default ACL token for every call.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.defaults = self.defaults.token(token);
        self
    }

    /// Default parameters given by name; only dc and token are accepted.
    pub fn defaults(mut self, params: Params) -> Result<Self, ParamError> {
        params.restrict_to(&DEFAULT_PARAMS, "client defaults")?;
        self.defaults = params.merged_over(&self.defaults);
        Ok(self)
    }

    /// TLS material, borrowed only until `build` returns.
    pub fn tls(mut self, settings: &'a TlsSettings) -> Self {
        self.tls = Some(settings);
        self
    }

    /// Overall per-request timeout. Must exceed any blocking-query wait.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Consul, ConsulError> {
        let address = self.address.as_deref().unwrap_or(DEFAULT_ADDRESS);
        let transport = UreqTransport::with_options(address, self.tls, self.timeout)?;
        Ok(Consul {
            transport: Box::new(transport),
            defaults: self.defaults,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Consistency;

    fn client() -> Consul {
        Consul::builder().dc("west").token("T1").build().unwrap()
    }

    #[test]
    fn builder_defaults_to_loopback() {
        let consul = Consul::builder().build().unwrap();
        assert_eq!(consul.address(), DEFAULT_ADDRESS);
        assert_eq!(consul.address(), "127.0.0.1:8500");
        assert!(consul.defaults().is_empty());
    }

    #[test]
    fn url_merges_defaults() {
        let consul = client();
        assert_eq!(consul.url("/v1/kv/foo", &Params::new()), "/v1/kv/foo?dc=west&token=T1");
        assert_eq!(
            consul.url("/v1/kv/foo", &Params::new().dc("east")),
            "/v1/kv/foo?dc=east&token=T1"
        );
        assert_eq!(
            consul.url("/v1/kv/foo", &Params::new().token("T2").consistency(Consistency::Stale)),
            "/v1/kv/foo?dc=west&token=T2&stale"
        );
    }

    #[test]
    fn builder_rejects_non_default_params() {
        let err = Consul::builder()
            .defaults(Params::new().consistency(Consistency::Stale))
            .err()
            .unwrap();
        assert!(matches!(err, ParamError::NotAllowed { name: ParamName::Consistency, .. }));

        let builder = Consul::builder().defaults(Params::new().dc("dc9")).unwrap();
        let consul = builder.build().unwrap();
        assert_eq!(consul.url("/x", &Params::new()), "/x?dc=dc9");
    }

    #[test]
    fn config_from_lookup() {
        let config = ClientConfig::from_lookup(|key| match key {
            "CONSUL_HTTP_ADDR" => Some("10.0.0.5:8500".to_string()),
            "CONSUL_HTTP_TOKEN" => Some("abc".to_string()),
            "CONSUL_DATACENTER" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.address.as_deref(), Some("10.0.0.5:8500"));
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.datacenter, None);
        assert!(config.tls.is_empty());

        let consul = ConsulBuilder::from_config(&config).build().unwrap();
        assert_eq!(consul.address(), "10.0.0.5:8500");
        assert_eq!(consul.url("/v1/kv/a", &Params::new()), "/v1/kv/a?token=abc");
    }

    #[test]
    fn config_deserializes_from_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"address":"consul:8501","datacenter":"dc2","ca_cert":"/etc/consul/ca.pem","timeout_ms":1500}"#,
        )
        .unwrap();
        assert_eq!(config.address.as_deref(), Some("consul:8501"));
        assert_eq!(config.datacenter.as_deref(), Some("dc2"));
        assert_eq!(config.tls.ca_cert.as_deref(), Some(std::path::Path::new("/etc/consul/ca.pem")));
        assert_eq!(config.timeout_ms, Some(1500));
    }

    #[test]
    fn debug_does_not_print_token() {
        let output = format!("{:?}", client());
        assert!(!output.contains("T1"));
        assert!(output.contains("127.0.0.1:8500"));
    }
}
