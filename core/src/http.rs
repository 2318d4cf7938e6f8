//! Response-side data shared by every transport.
//!
//! # Design
//! A transport reports the outcome of one exchange as a `Status` plus plain
//! owned data (`ResponseHeaders`, `String` body). The facade decides whether
//! a `Status` is an error; transports never do. Header lookup is
//! case-insensitive because HTTP/1.1 servers and proxies do not agree on
//! header casing.

use std::fmt;
use std::time::Duration;

/// Outcome of one request: an HTTP-like code and an optional reason text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: u16,
    message: Option<String>,
}

impl Status {
    /// Code used when no HTTP response was received at all (connection
    /// refused, DNS or TLS failure, timeout, unreadable body).
    pub const TRANSPORT_FAILURE: u16 = 0;

    /// The distinguished "resource absent" code.
    pub const NOT_FOUND: u16 = 404;

    pub fn new(code: u16) -> Self {
        Self { code, message: None }
    }

    pub fn with_message(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// A failure that never reached (or never completed) an HTTP exchange.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::with_message(Self::TRANSPORT_FAILURE, message)
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// True for 2xx codes. Every other code, including `TRANSPORT_FAILURE`,
    /// is a failure.
    pub fn success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Self::NOT_FOUND
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new(Self::TRANSPORT_FAILURE)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} {message}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

const INDEX_HEADER: &str = "X-Consul-Index";
const KNOWN_LEADER_HEADER: &str = "X-Consul-KnownLeader";
const LAST_CONTACT_HEADER: &str = "X-Consul-LastContact";

/// Response headers as received, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    entries: Vec<(String, String)>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The index to pass back as the minimum index of a blocking query.
    pub fn index(&self) -> Option<u64> {
        self.get(INDEX_HEADER)?.trim().parse().ok()
    }

    pub fn known_leader(&self) -> Option<bool> {
        match self.get(KNOWN_LEADER_HEADER)?.trim() {
            v if v.eq_ignore_ascii_case("true") => Some(true),
            v if v.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Time since the answering server last heard from the leader. The
    /// header carries whole milliseconds.
    pub fn last_contact(&self) -> Option<Duration> {
        self.get(LAST_CONTACT_HEADER)?
            .trim()
            .parse()
            .ok()
            .map(Duration::from_millis)
    }
}

impl FromIterator<(String, String)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A decoded body together with the headers it arrived with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response<T> {
    data: T,
    headers: ResponseHeaders,
}

impl<T> Response<T> {
    pub fn new(data: T, headers: ResponseHeaders) -> Self {
        Self { data, headers }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn into_parts(self) -> (T, ResponseHeaders) {
        (self.data, self.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_2xx_is_success() {
        assert!(Status::new(200).success());
        assert!(Status::new(204).success());
        assert!(!Status::new(199).success());
        assert!(!Status::new(301).success());
        assert!(!Status::new(404).success());
        assert!(!Status::new(500).success());
        assert!(!Status::transport_failure("connection refused").success());
    }

    #[test]
    fn not_found_is_a_failure() {
        let status = Status::new(404);
        assert!(status.is_not_found());
        assert!(!status.success());
        assert!(!Status::new(410).is_not_found());
    }

    #[test]
    fn status_display_includes_message() {
        assert_eq!(Status::with_message(500, "Internal Server Error").to_string(), "500 Internal Server Error");
        assert_eq!(Status::new(200).to_string(), "200");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut headers = ResponseHeaders::new();
        headers.insert("x-consul-index", "42");
        assert_eq!(headers.get("X-Consul-Index"), Some("42"));
        assert_eq!(headers.get("X-CONSUL-INDEX"), Some("42"));
        assert_eq!(headers.get("Content-Type"), None);
    }

    #[test]
    fn typed_consul_headers() {
        let headers: ResponseHeaders = vec![
            ("X-Consul-Index".to_string(), "1234".to_string()),
            ("X-Consul-KnownLeader".to_string(), "true".to_string()),
            ("X-Consul-LastContact".to_string(), "15".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(headers.index(), Some(1234));
        assert_eq!(headers.known_leader(), Some(true));
        assert_eq!(headers.last_contact(), Some(Duration::from_millis(15)));
    }

    #[test]
    fn malformed_consul_headers_are_absent() {
        let mut headers = ResponseHeaders::new();
        headers.insert("X-Consul-Index", "abc");
        headers.insert("X-Consul-KnownLeader", "maybe");
        assert_eq!(headers.index(), None);
        assert_eq!(headers.known_leader(), None);
        assert_eq!(headers.last_contact(), None);
    }

    #[test]
    fn response_into_parts() {
        let mut headers = ResponseHeaders::new();
        headers.insert("X-Consul-Index", "7");
        let response = Response::new("bar".to_string(), headers);
        assert_eq!(response.data(), "bar");
        let (data, headers) = response.into_parts();
        assert_eq!(data, "bar");
        assert_eq!(headers.index(), Some(7));
    }
}
