//! Mirrored entity types
//!
//! Field names serialize in camelCase, which is the shape the browser UI
//! expects in the `Devices` snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::MirrorError;
use crate::protocol::join_path;

/// Channel category on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Inputs,
    Auxs,
}

impl InputType {
    /// Discovery order
    pub const ALL: [InputType; 2] = [InputType::Inputs, InputType::Auxs];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Inputs => "inputs",
            InputType::Auxs => "auxs",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputType {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inputs" => Ok(InputType::Inputs),
            "auxs" => Ok(InputType::Auxs),
            other => Err(MirrorError::UnknownInputType(other.to_string())),
        }
    }
}

/// Mirrored field that a subscription can update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Gain,
    GainTapered,
    Pan,
    Mute,
    Solo,
}

impl Field {
    /// Key used in change notifications
    pub fn key(&self) -> &'static str {
        match self {
            Field::Gain => "gain",
            Field::GainTapered => "gainTapered",
            Field::Pan => "pan",
            Field::Mute => "mute",
            Field::Solo => "solo",
        }
    }
}

/// Address of an input, or of a send when `send_id` is set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub device_id: String,
    pub input_type: InputType,
    pub input_id: String,
    pub send_id: Option<String>,
}

impl ChannelRef {
    pub fn input(
        device_id: impl Into<String>,
        input_type: InputType,
        input_id: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            input_type,
            input_id: input_id.into(),
            send_id: None,
        }
    }

    pub fn send(
        device_id: impl Into<String>,
        input_type: InputType,
        input_id: impl Into<String>,
        send_id: impl Into<String>,
    ) -> Self {
        Self {
            send_id: Some(send_id.into()),
            ..Self::input(device_id, input_type, input_id)
        }
    }

    /// Address of the owning input
    pub fn owner(&self) -> ChannelRef {
        Self::input(self.device_id.clone(), self.input_type, self.input_id.clone())
    }

    /// Path of this channel (`/devices/1/inputs/3[/sends/2]`)
    pub fn path(&self) -> String {
        let mut segments = vec![
            "devices",
            self.device_id.as_str(),
            self.input_type.as_str(),
            self.input_id.as_str(),
        ];
        if let Some(send_id) = &self.send_id {
            segments.push("sends");
            segments.push(send_id);
        }
        join_path(segments)
    }

    /// Path of a property of this channel
    pub fn property_path(&self, property: &str) -> String {
        format!("{}/{}", self.path(), property)
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A controllable mixing unit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub online: bool,
    pub inputs: Vec<Input>,
}

impl Device {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>, online: bool) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            online,
            inputs: Vec::new(),
        }
    }
}

/// A mixing channel (input or aux) of a device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub input_id: String,
    pub name: String,
    /// Fader level in dB
    pub gain: f64,
    /// Normalized fader level (0-1)
    pub gain_tapered: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan: Option<f64>,
    pub mute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solo: Option<bool>,
    pub sends: Vec<ChannelSend>,
    pub input_type: InputType,
}

impl Input {
    pub fn apply(&mut self, field: Field, value: &Value) -> Result<(), MirrorError> {
        match field {
            Field::Gain => self.gain = number(field, value)?,
            Field::GainTapered => self.gain_tapered = number(field, value)?,
            Field::Pan => self.pan = optional_number(field, value)?,
            Field::Mute => self.mute = boolean(field, value)?,
            Field::Solo => self.solo = optional_boolean(field, value)?,
        }
        Ok(())
    }
}

/// A per-input mix-bus send
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSend {
    pub send_id: String,
    pub name: String,
    pub gain: f64,
    pub gain_tapered: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan: Option<f64>,
    /// Upstream correlation id, distinct from `send_id`
    pub id: String,
    /// Mirrors the upstream `Bypass` property
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    /// Sends never expose solo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solo: Option<bool>,
}

impl ChannelSend {
    pub fn apply(&mut self, field: Field, value: &Value) -> Result<(), MirrorError> {
        match field {
            Field::Gain => self.gain = number(field, value)?,
            Field::GainTapered => self.gain_tapered = number(field, value)?,
            Field::Pan => self.pan = optional_number(field, value)?,
            Field::Mute => self.mute = optional_boolean(field, value)?,
            Field::Solo => return Err(MirrorError::UnsupportedField(field.key())),
        }
        Ok(())
    }
}

fn mismatch(field: Field, value: &Value) -> MirrorError {
    MirrorError::TypeMismatch {
        field: field.key(),
        value: value.clone(),
    }
}

fn number(field: Field, value: &Value) -> Result<f64, MirrorError> {
    value.as_f64().ok_or_else(|| mismatch(field, value))
}

fn boolean(field: Field, value: &Value) -> Result<bool, MirrorError> {
    value.as_bool().ok_or_else(|| mismatch(field, value))
}

fn optional_number(field: Field, value: &Value) -> Result<Option<f64>, MirrorError> {
    match value {
        Value::Null => Ok(None),
        other => number(field, other).map(Some),
    }
}

fn optional_boolean(field: Field, value: &Value) -> Result<Option<bool>, MirrorError> {
    match value {
        Value::Null => Ok(None),
        other => boolean(field, other).map(Some),
    }
}
