//! Manager configuration values.
//!
//! These are plain data: hosts can embed them in their own config files (all
//! types here are serde-compatible) and hand them to the manager builder.

use serde::{Deserialize, Serialize};

/// Locking discipline used for descriptor critical sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locking {
    /// No locks at all. Only valid when every registry and descriptor
    /// operation is serialized onto one logical thread; the manager pins
    /// itself to the first calling thread and fails fast on violation.
    SingleThread,
    /// Mutex-backed critical sections for genuinely concurrent use.
    #[default]
    MultiThread,
}

impl Locking {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single_thread" | "single-thread" | "single" => Some(Self::SingleThread),
            "multi_thread" | "multi-thread" | "multi" => Some(Self::MultiThread),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SingleThread => "single_thread",
            Self::MultiThread => "multi_thread",
        }
    }
}

/// What to do with a capture whose owner the id resolver does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmanagedPolicy {
    /// Track the capture through an ad-hoc weak handle. The owner is restored
    /// as long as it is alive, but never survives replacement (there is no
    /// logical id to re-bind through).
    #[default]
    Allow,
    /// Fail `wrap` when a capture resolves to no id. Useful for hosts that
    /// want every capture to go through the managed registry.
    Deny,
}

impl UnmanagedPolicy {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// Configuration for one callback manager instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Locking discipline, selected once per manager.
    #[serde(default)]
    pub locking: Locking,
    /// Policy for captures the resolver does not recognize.
    #[serde(default)]
    pub unmanaged_captures: UnmanagedPolicy,
}

impl ManagerConfig {
    /// Configuration for a manager serialized onto one logical thread.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self {
            locking: Locking::SingleThread,
            ..Self::default()
        }
    }

    /// Configuration for a manager shared across threads.
    #[must_use]
    pub fn multi_threaded() -> Self {
        Self {
            locking: Locking::MultiThread,
            ..Self::default()
        }
    }
}
