//! Session (browser) message types
//!
//! Sessions receive a `Devices` snapshot on join and one `Input` message per
//! mirrored state change. They send write requests tagged with the property
//! family they touch (`Gain`, `Pan`, `Solo`, `Mute`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mirror::{ChannelRef, Device, InputType};

/// Message pushed to every session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Full mirror snapshot, sent once on join
    Devices { devices: Vec<Device> },
    /// A single mirrored field changed
    Input(InputChange),
}

/// Change notification for one field of an input or send
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputChange {
    pub device_id: String,
    pub input_type: InputType,
    pub input_id: String,
    pub send_id: Option<String>,
    /// Mirror field name (`gain`, `gainTapered`, `pan`, `mute`, `solo`)
    pub key: &'static str,
    pub value: Value,
}

impl InputChange {
    pub fn new(target: &ChannelRef, key: &'static str, value: Value) -> Self {
        Self {
            device_id: target.device_id.clone(),
            input_type: target.input_type,
            input_id: target.input_id.clone(),
            send_id: target.send_id.clone(),
            key,
            value,
        }
    }
}

/// Write request received from a session, before its type is validated
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub device_id: String,
    pub input_type: InputType,
    pub input_id: String,
    #[serde(default)]
    pub send_id: Option<String>,
    pub value: Value,
}

impl ClientMessage {
    pub fn target(&self) -> ChannelRef {
        ChannelRef {
            device_id: self.device_id.clone(),
            input_type: self.input_type,
            input_id: self.input_id.clone(),
            send_id: self.send_id.clone(),
        }
    }
}
