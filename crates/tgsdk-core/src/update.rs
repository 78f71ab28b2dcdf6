use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{errors::Error, Result};

/// One event from the service's update stream.
///
/// [`Update::normalize`] renames every `"from"` key in the payload to
/// `"sender"` before the typed view is built — recursively, because
/// forwarded and reply-to messages embed their own `from` at deeper levels.
/// The renamed raw value stays available for generic access via
/// [`Update::find_all`].
#[derive(Clone, Debug)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    raw: Value,
}

/// Typed view over a message payload. Fields the SDK does not model are
/// retained in `extra`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub sender: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Update {
    /// Normalize a raw update record.
    ///
    /// Fails with [`Error::MalformedUpdate`] when `update_id` is missing or
    /// not an integer, or when a present `message` does not match the typed
    /// shape. A missing `message` is not an error; such updates are consumed
    /// but never dispatched.
    pub fn normalize(mut raw: Value) -> Result<Self> {
        rename_sender_keys(&mut raw);

        let update_id = raw
            .get("update_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::MalformedUpdate("update_id missing or not an integer".to_string())
            })?;

        let message = match raw.get("message") {
            Some(m) => Some(
                serde_json::from_value(m.clone())
                    .map_err(|e| Error::MalformedUpdate(format!("message: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            update_id,
            message,
            raw,
        })
    }

    /// Raw update payload, after the `from` → `sender` rename.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Every value stored under `key` anywhere in the update, pre-order.
    ///
    /// An object carrying `key` directly contributes that value and is not
    /// searched further for the same key: a message matching `"sender"`
    /// hides the sender of its own `reply_to_message`. Arrays are traversed
    /// element-wise.
    pub fn find_all(&self, key: &str) -> Vec<&Value> {
        let mut out = Vec::new();
        collect(&self.raw, key, &mut out);
        out
    }
}

impl Message {
    /// Leading `/command` of the text, with any `@botname` suffix stripped.
    pub fn command(&self) -> Option<&str> {
        let text = self.text.as_deref()?.trim();
        if !text.starts_with('/') {
            return None;
        }
        let cmd = text.split_whitespace().next()?;
        cmd.split('@').next()
    }

    /// Message text with any leading command removed.
    ///
    /// `"/weather london"` yields `"london"`, `"/weather"` yields `None`,
    /// plain text is returned trimmed.
    pub fn text_body(&self) -> Option<&str> {
        let text = self.text.as_deref()?.trim();
        if text.is_empty() {
            return None;
        }
        if !text.starts_with('/') {
            return Some(text);
        }
        match text.split_once(char::is_whitespace) {
            Some((_, rest)) if !rest.trim().is_empty() => Some(rest.trim()),
            _ => None,
        }
    }
}

fn rename_sender_keys(node: &mut Value) {
    match node {
        Value::Object(map) => {
            if let Some(v) = map.remove("from") {
                map.insert("sender".to_string(), v);
            }
            for v in map.values_mut() {
                rename_sender_keys(v);
            }
        }
        Value::Array(items) => {
            for v in items {
                rename_sender_keys(v);
            }
        }
        _ => {}
    }
}

fn collect<'a>(node: &'a Value, key: &str, out: &mut Vec<&'a Value>) {
    match node {
        Value::Object(map) => {
            if let Some(v) = map.get(key) {
                out.push(v);
            } else {
                for v in map.values() {
                    collect(v, key, out);
                }
            }
        }
        Value::Array(items) => {
            for v in items {
                collect(v, key, out);
            }
        }
        _ => {}
    }
}
