use regex::Regex;
use std::fmt;

use crate::error::{Error, Result};

/// Name of a single topic
///
/// Always non-empty; construction fails otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicName(String);

impl TopicName {
    /// Create a topic name, rejecting empty or blank strings
    ///
    /// # Example
    ///
    /// ```
    /// use topic_relay::types::TopicName;
    ///
    /// let topic = TopicName::new("org.chicago.cta.stations").unwrap();
    /// assert_eq!(topic.as_str(), "org.chicago.cta.stations");
    /// assert!(TopicName::new("  ").is_err());
    /// ```
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::ValidationError(
                "Topic name must not be empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Subscription target: one topic, or every topic matching a regular expression
///
/// A leading `^` marks a regular expression, matching the convention broker
/// clients use for pattern subscriptions.
#[derive(Debug, Clone)]
pub enum TopicPattern {
    Exact(TopicName),
    Regex { source: String, regex: Regex },
}

impl TopicPattern {
    /// Parse a subscription string
    ///
    /// # Example
    ///
    /// ```
    /// use topic_relay::types::TopicPattern;
    ///
    /// let pattern = TopicPattern::parse("^org.chicago.cta.station.arrivals.*").unwrap();
    /// assert!(pattern.matches("org.chicago.cta.station.arrivals.clark"));
    /// assert!(!pattern.matches("org.chicago.cta.turnstile"));
    /// ```
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.starts_with('^') {
            let regex = Regex::new(pattern).map_err(|e| {
                Error::ValidationError(format!("Invalid topic pattern '{}': {}", pattern, e))
            })?;
            Ok(TopicPattern::Regex {
                source: pattern.to_string(),
                regex,
            })
        } else {
            Ok(TopicPattern::Exact(TopicName::new(pattern)?))
        }
    }

    /// Whether a concrete topic name is covered by this subscription
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Exact(name) => name.as_str() == topic,
            TopicPattern::Regex { regex, .. } => regex.is_match(topic),
        }
    }

    /// The subscription string as given
    pub fn as_str(&self) -> &str {
        match self {
            TopicPattern::Exact(name) => name.as_str(),
            TopicPattern::Regex { source, .. } => source,
        }
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
