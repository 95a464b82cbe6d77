use crate::error::ChannelResult;
use async_trait::async_trait;
use ptymux_types::{ChannelKind, ReadOutput};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

/// Common surface of every singleton channel.
///
/// Opening is variant specific (a command line, an address, a device) and
/// lives on each concrete type. Everything after that is uniform.
#[async_trait]
pub trait Channel: Send {
    fn kind(&self) -> ChannelKind;

    /// Write `data`, returning the number of bytes handed to the OS
    async fn send(&mut self, data: &str) -> ChannelResult<usize>;

    /// Return whatever arrives within `timeout`. Never fails on silence.
    async fn read(&mut self, timeout: Duration) -> ChannelResult<ReadOutput>;

    /// Release every handle. Calling it on a closed channel is a no-op.
    async fn close(&mut self) -> ChannelResult<()>;

    /// Handles are held and, for child-backed channels, the child still runs
    fn is_active(&mut self) -> bool;

    /// Variant metadata for status reports
    fn describe(&self) -> Value;
}

/// Append a newline unless the payload already ends with one
pub fn ensure_line_terminated(data: &str) -> Cow<'_, str> {
    if data.ends_with('\n') {
        Cow::Borrowed(data)
    } else {
        Cow::Owned(format!("{}\n", data))
    }
}

/// Decode received bytes as UTF-8, falling back to lowercase hex
pub fn decode_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => hex::encode(bytes),
    }
}

/// Environment variables layered over the server's own environment when a
/// child is spawned. The server process environment is never modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Layer `other` on top of this overlay
    pub fn extend(&mut self, other: &EnvOverlay) {
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl FromIterator<(String, String)> for EnvOverlay {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}
