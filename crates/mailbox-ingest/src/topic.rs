//! Topic classification and subscription filters.
//!
//! The frame carries no event-type tag. The kind of event is derived from the
//! topic the frame was published on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Base topic every mailbox device publishes under.
pub const BASE_TOPIC: &str = "home/mailbox";

/// Default subscription: everything below [`BASE_TOPIC`].
pub const DEFAULT_SUBSCRIPTION: &str = "home/mailbox/#";

/// Event kind derived from a topic string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicClass {
    Status,
    MailDropped,
    MailCollected,
}

impl TopicClass {
    /// Classify a raw topic. Returns `None` for topics that carry no telemetry.
    ///
    /// Rules are checked in order: `/status` suffix, then
    /// `/events/mail_dropped`, then `/events/mail_collected` anywhere in the
    /// topic.
    pub fn classify(topic: &str) -> Option<Self> {
        if topic.ends_with("/status") {
            Some(Self::Status)
        } else if topic.contains("/events/mail_dropped") {
            Some(Self::MailDropped)
        } else if topic.contains("/events/mail_collected") {
            Some(Self::MailCollected)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::MailDropped => "mail_dropped",
            Self::MailCollected => "mail_collected",
        }
    }
}

impl fmt::Display for TopicClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MQTT-style subscription filter with `+` and `#` wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    filter: String,
}

impl TopicFilter {
    /// Validate and build a filter.
    pub fn new(filter: impl Into<String>) -> Result<Self> {
        let filter = filter.into();
        validate(&filter)?;
        Ok(Self { filter })
    }

    /// Whether `topic` falls under this filter.
    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(topic, &self.filter)
    }

    pub fn as_str(&self) -> &str {
        &self.filter
    }
}

impl Default for TopicFilter {
    fn default() -> Self {
        Self {
            filter: DEFAULT_SUBSCRIPTION.to_string(),
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filter)
    }
}

fn validate(filter: &str) -> Result<()> {
    let invalid = |reason| IngestError::InvalidFilter {
        filter: filter.to_string(),
        reason,
    };

    if filter.is_empty() {
        return Err(invalid("filter must not be empty"));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (idx, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || idx != last) {
            return Err(invalid("'#' must be the whole last level"));
        }
        if level.contains('+') && *level != "+" {
            return Err(invalid("'+' must be a whole level"));
        }
    }
    Ok(())
}

fn topic_matches(topic: &str, filter: &str) -> bool {
    // Wildcards at the first level never match system topics.
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut levels = topic.split('/');
    for pattern in filter.split('/') {
        match pattern {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}
