//! Player status reply parsing
//!
//! A status reply echoes the request tokens, then carries a flat stream of
//! alternating key/value tokens. A few server-defined keys open a nested block
//! instead of taking a value (`remoteMeta` for streamed metadata); the block
//! runs until its terminator key or the end of the reply. Some keys repeat
//! once per playlist entry and are collected into lists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{LmsError, Result};

/// A key that opens a nested record instead of taking a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedBlock {
    pub key: String,
    pub terminator: String,
}

impl NestedBlock {
    pub fn new(key: impl Into<String>, terminator: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            terminator: terminator.into(),
        }
    }
}

/// Server-version specific key sets used by [`parse_status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSchema {
    #[serde(default = "default_nested_blocks")]
    pub nested_blocks: Vec<NestedBlock>,
    /// Keys accumulated into lists at the top level (one entry per playlist item)
    #[serde(default = "default_list_keys")]
    pub list_keys: Vec<String>,
}

fn default_nested_blocks() -> Vec<NestedBlock> {
    vec![NestedBlock::new("remoteMeta", "remoteMeta_end")]
}

fn default_list_keys() -> Vec<String> {
    ["playlist index", "id", "title", "artist", "album"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for StatusSchema {
    fn default() -> Self {
        Self {
            nested_blocks: default_nested_blocks(),
            list_keys: default_list_keys(),
        }
    }
}

impl StatusSchema {
    fn block(&self, key: &str) -> Option<&NestedBlock> {
        self.nested_blocks.iter().find(|b| b.key == key)
    }

    fn is_list_key(&self, key: &str) -> bool {
        self.list_keys.iter().any(|k| k == key)
    }
}

/// One status field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusValue {
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<StatusValue>),
    Record(PlayerInfo),
}

impl StatusValue {
    /// Numbers stay numbers, everything else is text.
    ///
    /// A token only becomes a number when the number prints back as the
    /// same text, so `"007"`, `"+5"` and `"1.50"` stay strings.
    pub fn from_token(token: &str) -> Self {
        if let Ok(n) = token.parse::<i64>() {
            if n.to_string() == token {
                return Self::Integer(n);
            }
        }
        match token.parse::<f64>() {
            Ok(f) if f.is_finite() && f.to_string() == token => Self::Float(f),
            _ => Self::Text(token.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StatusValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&PlayerInfo> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }
}

/// Status snapshot of one player.
///
/// Keys are exactly those the server returned; a missing key means the field
/// does not apply to the player's current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PlayerInfo {
    fields: BTreeMap<String, StatusValue>,
}

impl PlayerInfo {
    pub fn get(&self, key: &str) -> Option<&StatusValue> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(StatusValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(StatusValue::as_i64)
    }

    pub fn nested(&self, key: &str) -> Option<&PlayerInfo> {
        self.get(key).and_then(StatusValue::as_record)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StatusValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First occurrence wins for scalar fields
    fn insert_first(&mut self, key: &str, value: StatusValue) {
        self.fields.entry(key.to_string()).or_insert(value);
    }

    fn push(&mut self, key: &str, value: StatusValue) {
        // A nested block that already claimed the key is kept as is
        if let StatusValue::List(items) = self
            .fields
            .entry(key.to_string())
            .or_insert_with(|| StatusValue::List(Vec::new()))
        {
            items.push(value);
        }
    }
}

/// Parse a decoded status reply.
///
/// `echo_len` leading tokens echo the request and are skipped; the caller has
/// already verified them against the request.
pub fn parse_status(reply: &[String], echo_len: usize, schema: &StatusSchema) -> Result<PlayerInfo> {
    let body = reply.get(echo_len..).ok_or_else(|| {
        LmsError::protocol(format!(
            "status reply has {} tokens, shorter than its {}-token echo",
            reply.len(),
            echo_len
        ))
    })?;

    let mut pos = 0;
    parse_record(body, &mut pos, schema, None, true)
}

fn parse_record(
    tokens: &[String],
    pos: &mut usize,
    schema: &StatusSchema,
    terminator: Option<&str>,
    top_level: bool,
) -> Result<PlayerInfo> {
    let mut record = PlayerInfo::default();

    while let Some(key) = tokens.get(*pos) {
        *pos += 1;

        if Some(key.as_str()) == terminator {
            break;
        }

        if let Some(block) = schema.block(key) {
            let nested = parse_record(tokens, pos, schema, Some(&block.terminator), false)?;
            record.insert_first(key, StatusValue::Record(nested));
            continue;
        }

        let raw = tokens.get(*pos).ok_or_else(|| {
            LmsError::protocol(format!("status key '{}' has no value", key))
        })?;
        *pos += 1;

        let value = StatusValue::from_token(raw);
        if top_level && schema.is_list_key(key) {
            record.push(key, value);
        } else {
            record.insert_first(key, value);
        }
    }

    Ok(record)
}
