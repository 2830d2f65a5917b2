//! Write path: session write requests to `set` commands
//!
//! Writes never touch the mirror. The new value comes back through the
//! matching subscription once the device has applied it.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::ClientMessageError;
use crate::mirror::ChannelRef;
use crate::protocol::{ClientMessage, Command};

/// Property family a session can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Gain,
    Pan,
    Solo,
    Mute,
}

impl WriteKind {
    /// Upstream property written on an input
    pub fn input_property(&self) -> &'static str {
        match self {
            WriteKind::Gain => "FaderLevelTapered",
            WriteKind::Pan => "Pan",
            WriteKind::Solo => "Solo",
            WriteKind::Mute => "Mute",
        }
    }

    /// Upstream property written on a send, when it differs from the input one
    pub fn send_property(&self) -> Option<&'static str> {
        match self {
            WriteKind::Gain => Some("GainTapered"),
            WriteKind::Mute => Some("Bypass"),
            WriteKind::Pan | WriteKind::Solo => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Gain => "Gain",
            WriteKind::Pan => "Pan",
            WriteKind::Solo => "Solo",
            WriteKind::Mute => "Mute",
        }
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteKind {
    type Err = ClientMessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Gain" => Ok(WriteKind::Gain),
            "Pan" => Ok(WriteKind::Pan),
            "Solo" => Ok(WriteKind::Solo),
            "Mute" => Ok(WriteKind::Mute),
            other => Err(ClientMessageError::UnknownType(other.to_string())),
        }
    }
}

/// Validated write request
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub kind: WriteKind,
    pub target: ChannelRef,
    pub value: Value,
}

impl WriteRequest {
    pub fn new(kind: WriteKind, target: ChannelRef, value: Value) -> Self {
        Self { kind, target, value }
    }

    /// Decode and validate a raw session message
    pub fn parse(text: &str) -> Result<Self, ClientMessageError> {
        let msg: ClientMessage = serde_json::from_str(text)?;
        let kind = msg.kind.parse()?;
        Ok(Self::new(kind, msg.target(), msg.value))
    }

    pub fn command(&self) -> Command {
        set_value(
            &self.target,
            &self.value,
            self.kind.input_property(),
            self.kind.send_property(),
        )
    }
}

/// Build the `set` command for a property of an input or send.
///
/// Bare inputs use `input_key`; sends use `send_key`, falling back to
/// `input_key` when the property has the same name on both.
pub fn set_value(
    target: &ChannelRef,
    value: &Value,
    input_key: &str,
    send_key: Option<&str>,
) -> Command {
    let property = match target.send_id {
        None => input_key,
        Some(_) => send_key.unwrap_or(input_key),
    };
    Command::set(target.property_path(property), value)
}
