//! Named, typed request parameters and their query-string rendering.
//!
//! # Design
//! The vocabulary is the closed enum `ParamName`; every name has one value
//! kind and one rendering rule. `Params` is an ordered list of
//! `(ParamName, ParamValue)` pairs built by chaining setters. The typed
//! setters (`dc`, `token`, ...) cannot fail. `Params::set` checks the value
//! kind, and the string-keyed `Params::with_named` also checks the name, so
//! a misspelled name fails before any request is built rather than being
//! dropped or sent as-is.
//!
//! Duplicates: every name except `tag` keeps a single value, last write
//! wins, at the position of the first write. `tag` is repeatable; each
//! distinct value is kept once, in insertion order.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::ParamError;
use crate::types::{BlockFor, Consistency};

/// Everything except RFC 3986 unreserved characters is escaped in values.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// The parameter vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamName {
    Dc,
    Token,
    Consistency,
    BlockFor,
    Tag,
}

impl ParamName {
    pub const ALL: [ParamName; 5] = [
        ParamName::Dc,
        ParamName::Token,
        ParamName::Consistency,
        ParamName::BlockFor,
        ParamName::Tag,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParamName::Dc => "dc",
            ParamName::Token => "token",
            ParamName::Consistency => "consistency",
            ParamName::BlockFor => "block_for",
            ParamName::Tag => "tag",
        }
    }

    /// Whether repeated values accumulate instead of replacing each other.
    pub fn is_repeatable(self) -> bool {
        matches!(self, ParamName::Tag)
    }

    fn accepts(self, value: &ParamValue) -> bool {
        matches!(
            (self, value),
            (ParamName::Dc | ParamName::Token | ParamName::Tag, ParamValue::Text(_))
                | (ParamName::Consistency, ParamValue::Consistency(_))
                | (ParamName::BlockFor, ParamValue::BlockFor(_))
        )
    }

    fn expected_kind(self) -> &'static str {
        match self {
            ParamName::Dc | ParamName::Token | ParamName::Tag => "string",
            ParamName::Consistency => "consistency",
            ParamName::BlockFor => "blocking-query",
        }
    }
}

impl FromStr for ParamName {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ParamError::UnknownName(s.to_string()))
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameter value; which variant is valid depends on the `ParamName`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    Consistency(Consistency),
    BlockFor(BlockFor),
}

impl ParamValue {
    /// Append this value's query fragment for `name`, if it renders one.
    fn render(&self, name: ParamName, out: &mut Vec<String>) {
        match self {
            ParamValue::Text(text) if text.is_empty() => {}
            ParamValue::Text(text) => {
                out.push(format!("{}={}", name.as_str(), utf8_percent_encode(text, QUERY_VALUE)));
            }
            ParamValue::Consistency(mode) => {
                if let Some(flag) = mode.flag() {
                    out.push(flag.to_string());
                }
            }
            ParamValue::BlockFor(block) => {
                out.push(format!("wait={}ms", block.wait_millis()));
                out.push(format!("index={}", block.index()));
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<Consistency> for ParamValue {
    fn from(value: Consistency) -> Self {
        ParamValue::Consistency(value)
    }
}

impl From<BlockFor> for ParamValue {
    fn from(value: BlockFor) -> Self {
        ParamValue::BlockFor(value)
    }
}

/// An ordered set of request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(ParamName, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dc(self, dc: impl Into<String>) -> Self {
        self.with(ParamName::Dc, ParamValue::Text(dc.into()))
    }

    pub fn token(self, token: impl Into<String>) -> Self {
        self.with(ParamName::Token, ParamValue::Text(token.into()))
    }

    pub fn consistency(self, mode: Consistency) -> Self {
        self.with(ParamName::Consistency, ParamValue::Consistency(mode))
    }

    pub fn block_for(self, wait: Duration, index: u64) -> Self {
        self.with(ParamName::BlockFor, ParamValue::BlockFor(BlockFor::new(wait, index)))
    }

    pub fn tag(self, tag: impl Into<String>) -> Self {
        self.with(ParamName::Tag, ParamValue::Text(tag.into()))
    }

    /// Set `name` to `value`, checking that the value kind fits the name.
    pub fn set(mut self, name: ParamName, value: impl Into<ParamValue>) -> Result<Self, ParamError> {
        let value = value.into();
        if !name.accepts(&value) {
            return Err(ParamError::TypeMismatch {
                name,
                expected: name.expected_kind(),
            });
        }
        self.insert(name, value);
        Ok(self)
    }

    /// Set a parameter by its wire name, e.g. `"dc"` or `"consistency"`.
    pub fn with_named(self, name: &str, value: impl Into<ParamValue>) -> Result<Self, ParamError> {
        let name: ParamName = name.parse()?;
        self.set(name, value)
    }

    /// The current value of a single-valued parameter, or the first value of
    /// a repeatable one.
    pub fn get(&self, name: ParamName) -> Option<&ParamValue> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn get_all(&self, name: ParamName) -> impl Iterator<Item = &ParamValue> {
        self.entries.iter().filter(move |(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: ParamName) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = ParamName> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail with `NotAllowed` if any parameter falls outside `allowed`.
    pub fn restrict_to(&self, allowed: &[ParamName], context: &'static str) -> Result<(), ParamError> {
        match self.names().find(|name| !allowed.contains(name)) {
            Some(name) => Err(ParamError::NotAllowed { name, context }),
            None => Ok(()),
        }
    }

    /// `self` applied over `defaults`: a name set in both takes the value
    /// from `self`, names set in only one side are kept.
    pub fn merged_over(&self, defaults: &Params) -> Params {
        let mut merged = defaults.clone();
        for (name, value) in &self.entries {
            merged.insert(*name, value.clone());
        }
        merged
    }

    /// The rendered query string without a leading `?`. Empty when nothing
    /// renders.
    pub fn query(&self) -> String {
        let mut fragments = Vec::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            value.render(*name, &mut fragments);
        }
        fragments.join("&")
    }

    fn with(mut self, name: ParamName, value: ParamValue) -> Self {
        self.insert(name, value);
        self
    }

    fn insert(&mut self, name: ParamName, value: ParamValue) {
        if name.is_repeatable() {
            if !self.entries.iter().any(|(n, v)| *n == name && *v == value) {
                self.entries.push((name, value));
            }
            return;
        }
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }
}

/// Append the rendered parameters to `path`. A path that already carries a
/// query is extended with `&`.
pub fn make_url(path: &str, params: &Params) -> String {
    let query = params.query();
    if query.is_empty() {
        return path.to_string();
    }
    let separator = match path.find('?') {
        Some(pos) if pos + 1 == path.len() || path.ends_with('&') => "",
        Some(_) => "&",
        None => "?",
    };
    format!("{path}{separator}{query}")
}
