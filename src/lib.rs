use const_format::formatcp;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, convert::Infallible, fmt, str::FromStr};

// Directory where batch inputs can be found
const DATA_DIR: &str = "./data";

/// Default parquet file holding the raw interaction records
pub const EVENTS_INPUT: &str = formatcp!("{}/interactions.parquet", DATA_DIR);

/// Prefix put before every key written to the sink
pub const KEY_PREFIX: &str = "rec:sys:";

/// Expiry applied to every published list, in seconds
pub const DEFAULT_EXPIRE_SECONDS: u64 = 86400;

const USER_SEGMENT: &str = "user:";
const ITEM_SEGMENT: &str = "item:";
const POPULAR_SEGMENT: &str = "global:popular";

/// Key of the global popularity list under the default prefix
pub const POPULAR_KEY: &str = formatcp!("{}{}", KEY_PREFIX, POPULAR_SEGMENT);

/// An identifier coming from outside the system, for users and items alike.
///
/// Integers sort before strings, integers numerically and strings lexicographically. Integer
/// ids keep their integer form all the way to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    Int(i64),
    Text(String),
}

impl ExternalId {
    /// Reads an id as an integer only when the text is that integer's own spelling, so
    /// "7" is `Int(7)` but "007" and "+7" stay text. Parsing a displayed id gives it back.
    pub fn parse(value: &str) -> ExternalId {
        match value.parse::<i64>() {
            Ok(number) if number.to_string() == value => ExternalId::Int(number),
            _ => ExternalId::Text(String::from(value)),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ExternalId::Int(value) => Some(*value),
            ExternalId::Text(_) => None,
        }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Int(value) => write!(f, "{}", value),
            ExternalId::Text(value) => write!(f, "{}", value),
        }
    }
}

impl FromStr for ExternalId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ExternalId::parse(s))
    }
}

impl From<i64> for ExternalId {
    fn from(value: i64) -> Self {
        ExternalId::Int(value)
    }
}

impl From<i32> for ExternalId {
    fn from(value: i32) -> Self {
        ExternalId::Int(i64::from(value))
    }
}

impl From<&str> for ExternalId {
    fn from(value: &str) -> Self {
        ExternalId::Text(String::from(value))
    }
}

impl From<String> for ExternalId {
    fn from(value: String) -> Self {
        ExternalId::Text(value)
    }
}

/// Builds the keys under which each list kind is stored in the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkKeys {
    prefix: Cow<'static, str>,
}

impl SinkKeys {
    pub const fn new() -> Self {
        SinkKeys {
            prefix: Cow::Borrowed(KEY_PREFIX),
        }
    }

    pub fn with_prefix(prefix: impl Into<Cow<'static, str>>) -> Self {
        SinkKeys {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}user:{user_id}:history`
    pub fn history(&self, user_id: &ExternalId) -> String {
        format!("{}{}{}:history", self.prefix, USER_SEGMENT, user_id)
    }

    /// `{prefix}user:{user_id}:discovery`
    pub fn discovery(&self, user_id: &ExternalId) -> String {
        format!("{}{}{}:discovery", self.prefix, USER_SEGMENT, user_id)
    }

    /// `{prefix}item:{item_id}:related`
    pub fn related(&self, item_id: &ExternalId) -> String {
        format!("{}{}{}:related", self.prefix, ITEM_SEGMENT, item_id)
    }

    /// `{prefix}global:popular`
    pub fn popular(&self) -> String {
        format!("{}{}", self.prefix, POPULAR_SEGMENT)
    }
}

impl Default for SinkKeys {
    fn default() -> Self {
        Self::new()
    }
}
