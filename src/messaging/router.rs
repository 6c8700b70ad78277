//! # Routing Table
//!
//! Maps a message type to the handler that processes it.
//!
//! ## Pattern Matching Rules
//!
//! - **Exact**: `"package"` matches only `"package"`
//! - **Prefix**: a pattern ending in `.` matches any type starting with it,
//!   so `"dmoj.events."` matches `"dmoj.events.foo"` but not `"dmoj.eventsfoo"`
//! - **Glob**: a pattern containing `*` compiles to an anchored regex where
//!   `*` matches any run of characters, so `"hooks.*"` matches
//!   `"hooks.execute"` but not `"hooks"`
//! - **Regex**: an explicit regular expression, used as given
//!
//! ## Precedence
//!
//! Entries are scanned in registration order and the first match wins.
//! There is no specificity ranking: a catch-all registered first shadows
//! everything registered after it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use regex::Regex;

use super::context::DispatchContext;
use super::envelope::Envelope;
use super::errors::{MessagingError, MessagingResult};
use crate::constants::{ROUTE_SEPARATOR, ROUTE_WILDCARD};

/// Future returned by a message handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = MessagingResult<()>> + Send>>;

/// Message handler function type
///
/// Handlers receive the normalized envelope and the dispatch context used to
/// settle the delivery. An `Err` return that leaves the delivery unsettled is
/// treated as an implicit `nack`.
pub type MessageHandler = Arc<dyn Fn(Envelope, DispatchContext) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Envelope, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingResult<()>> + Send + 'static,
{
    Arc::new(move |envelope, context| Box::pin(f(envelope, context)))
}

/// A compiled route pattern
#[derive(Debug, Clone)]
pub enum RoutePattern {
    Exact(String),
    Prefix(String),
    Glob { source: String, compiled: Regex },
    Regex(Regex),
}

impl RoutePattern {
    /// Classify a string pattern.
    ///
    /// A wildcard anywhere makes it a glob; otherwise a trailing separator
    /// makes it a prefix; anything else is an exact match.
    pub fn parse(pattern: &str) -> MessagingResult<Self> {
        if pattern.is_empty() {
            return Err(MessagingError::invalid_pattern(
                pattern,
                "Pattern cannot be empty",
            ));
        }

        if pattern.contains(ROUTE_WILDCARD) {
            let body = pattern
                .split(ROUTE_WILDCARD)
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let compiled = Regex::new(&format!("^{body}$"))
                .map_err(|e| MessagingError::invalid_pattern(pattern, e.to_string()))?;
            return Ok(Self::Glob {
                source: pattern.to_string(),
                compiled,
            });
        }

        if pattern.ends_with(ROUTE_SEPARATOR) {
            return Ok(Self::Prefix(pattern.to_string()));
        }

        Ok(Self::Exact(pattern.to_string()))
    }

    /// Compile an explicit regular expression pattern
    pub fn regex(expression: &str) -> MessagingResult<Self> {
        Regex::new(expression)
            .map(Self::Regex)
            .map_err(|e| MessagingError::invalid_pattern(expression, e.to_string()))
    }

    /// Check whether a message type matches this pattern
    pub fn matches(&self, message_type: &str) -> bool {
        match self {
            Self::Exact(pattern) => pattern == message_type,
            Self::Prefix(prefix) => message_type.starts_with(prefix.as_str()),
            Self::Glob { compiled, .. } => compiled.is_match(message_type),
            Self::Regex(regex) => regex.is_match(message_type),
        }
    }

    /// The pattern as it was registered
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(pattern) | Self::Prefix(pattern) => pattern,
            Self::Glob { source, .. } => source,
            Self::Regex(regex) => regex.as_str(),
        }
    }

    /// Short name of the pattern kind for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::Prefix(_) => "prefix",
            Self::Glob { .. } => "glob",
            Self::Regex(_) => "regex",
        }
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.as_str())
    }
}

impl TryFrom<&str> for RoutePattern {
    type Error = MessagingError;

    fn try_from(pattern: &str) -> Result<Self, Self::Error> {
        Self::parse(pattern)
    }
}

impl From<Regex> for RoutePattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

/// One `(pattern, handler)` registration
#[derive(Clone)]
pub struct RouteEntry {
    pub pattern: RoutePattern,
    pub handler: MessageHandler,
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Ordered list of routes resolved by a single first-match scan
#[derive(Default, Clone)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a route. Later registrations never outrank earlier ones.
    pub fn register(&mut self, pattern: RoutePattern, handler: MessageHandler) {
        self.entries.push(RouteEntry { pattern, handler });
    }

    /// Resolve the handler of the first entry whose pattern matches
    pub fn resolve(&self, message_type: &str) -> Option<MessageHandler> {
        self.resolve_entry(message_type)
            .map(|entry| entry.handler.clone())
    }

    /// Resolve the first matching entry
    pub fn resolve_entry(&self, message_type: &str) -> Option<&RouteEntry> {
        self.entries
            .iter()
            .find(|entry| entry.pattern.matches(message_type))
    }

    /// Registered patterns in scan order
    pub fn patterns(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.pattern.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("patterns", &self.patterns())
            .finish()
    }
}
