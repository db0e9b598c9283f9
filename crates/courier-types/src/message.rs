//! Transport-level message envelopes.
//!
//! An [`IncomingMessage`] is owned by the receive path for the duration of a
//! single pipeline invocation. An [`OutgoingMessage`] is created fresh for
//! every dispatch and carries its own copy of the headers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::headers;

/// Ordered string-to-string header map.
pub type Headers = BTreeMap<String, String>;

/// A message as handed to the pipeline by a message pump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl IncomingMessage {
    pub fn new(message_id: impl Into<String>, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            headers,
            body,
        }
    }

    /// Look up a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// The address the sender wants replies to go to, if any.
    pub fn reply_to_address(&self) -> Option<&str> {
        self.header(headers::REPLY_TO_ADDRESS)
    }

    /// Whether this is an infrastructure message without a logical body.
    pub fn is_control_message(&self) -> bool {
        self.header(headers::CONTROL_MESSAGE)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// First logical type listed in the enclosed-message-types header.
    pub fn enclosed_message_type(&self) -> Option<&str> {
        self.header(headers::ENCLOSED_MESSAGE_TYPES)
            .and_then(|types| types.split(';').next())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// A message about to be dispatched by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message_id: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(message_id: impl Into<String>, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            headers,
            body,
        }
    }

    /// Build an outgoing copy of a received message. Headers are cloned,
    /// so later changes on either side never leak into the other.
    pub fn from_incoming(message: &IncomingMessage) -> Self {
        Self::new(
            message.message_id.clone(),
            message.headers.clone(),
            message.body.clone(),
        )
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Why a message is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageIntent {
    Send,
    Publish,
    Subscribe,
    Unsubscribe,
    Reply,
}

impl MessageIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "Send",
            Self::Publish => "Publish",
            Self::Subscribe => "Subscribe",
            Self::Unsubscribe => "Unsubscribe",
            Self::Reply => "Reply",
        }
    }
}

impl fmt::Display for MessageIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Send" => Ok(Self::Send),
            "Publish" => Ok(Self::Publish),
            "Subscribe" => Ok(Self::Subscribe),
            "Unsubscribe" => Ok(Self::Unsubscribe),
            "Reply" => Ok(Self::Reply),
            other => Err(format!("unknown message intent '{other}'")),
        }
    }
}
