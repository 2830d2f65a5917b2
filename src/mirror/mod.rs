//! In-memory mirror of the upstream device tree
//!
//! The mirror is monotonic while a connection is alive: devices, inputs and
//! sends are only ever added, and afterwards only their scalar fields change.

mod types;

use serde_json::Value;
use thiserror::Error;

pub use types::{ChannelRef, ChannelSend, Device, Field, Input, InputType};

/// Mirror lookup and mutation errors
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelRef),

    #[error("device '{0}' already mirrored")]
    DuplicateDevice(String),

    #[error("channel {0} already mirrored")]
    DuplicateChannel(ChannelRef),

    #[error("unknown input type '{0}'")]
    UnknownInputType(String),

    #[error("field '{field}' cannot hold {value}")]
    TypeMismatch { field: &'static str, value: Value },

    #[error("field '{0}' is not mirrored for sends")]
    UnsupportedField(&'static str),
}

/// The mirrored device hierarchy
#[derive(Debug, Default)]
pub struct Mirror {
    devices: Vec<Device>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    fn device_mut(&mut self, device_id: &str) -> Result<&mut Device, MirrorError> {
        self.devices
            .iter_mut()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| MirrorError::UnknownDevice(device_id.to_string()))
    }

    /// Input addressed by `channel` (its `send_id` is ignored)
    pub fn input(&self, channel: &ChannelRef) -> Option<&Input> {
        self.device(&channel.device_id)?
            .inputs
            .iter()
            .find(|i| i.input_type == channel.input_type && i.input_id == channel.input_id)
    }

    fn input_mut(&mut self, channel: &ChannelRef) -> Result<&mut Input, MirrorError> {
        self.device_mut(&channel.device_id)?
            .inputs
            .iter_mut()
            .find(|i| i.input_type == channel.input_type && i.input_id == channel.input_id)
            .ok_or_else(|| MirrorError::UnknownChannel(channel.owner()))
    }

    /// Send addressed by `channel`
    pub fn send(&self, channel: &ChannelRef) -> Option<&ChannelSend> {
        let send_id = channel.send_id.as_deref()?;
        self.input(channel)?
            .sends
            .iter()
            .find(|s| s.send_id == send_id)
    }

    pub fn insert_device(&mut self, device: Device) -> Result<(), MirrorError> {
        if self.device(&device.device_id).is_some() {
            return Err(MirrorError::DuplicateDevice(device.device_id));
        }
        self.devices.push(device);
        Ok(())
    }

    pub fn insert_input(&mut self, device_id: &str, input: Input) -> Result<(), MirrorError> {
        let channel = ChannelRef::input(device_id, input.input_type, input.input_id.clone());
        if self.input(&channel).is_some() {
            return Err(MirrorError::DuplicateChannel(channel));
        }
        self.device_mut(device_id)?.inputs.push(input);
        Ok(())
    }

    /// Add a send under the input addressed by `owner`
    pub fn insert_send(
        &mut self,
        owner: &ChannelRef,
        send: ChannelSend,
    ) -> Result<(), MirrorError> {
        let input = self.input_mut(owner)?;
        if input.sends.iter().any(|s| s.send_id == send.send_id) {
            return Err(MirrorError::DuplicateChannel(ChannelRef::send(
                owner.device_id.clone(),
                owner.input_type,
                owner.input_id.clone(),
                send.send_id,
            )));
        }
        input.sends.push(send);
        Ok(())
    }

    /// Write a subscription value into the field it is bound to
    pub fn apply(
        &mut self,
        target: &ChannelRef,
        field: Field,
        value: &Value,
    ) -> Result<(), MirrorError> {
        let input = self.input_mut(target)?;
        match &target.send_id {
            None => input.apply(field, value),
            Some(send_id) => input
                .sends
                .iter_mut()
                .find(|s| &s.send_id == send_id)
                .ok_or_else(|| MirrorError::UnknownChannel(target.clone()))?
                .apply(field, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(input_type: InputType, id: &str) -> Input {
        Input {
            input_id: id.to_string(),
            name: format!("Ch {}", id),
            gain: 0.0,
            gain_tapered: 0.5,
            pan: Some(0.0),
            mute: false,
            solo: Some(false),
            sends: Vec::new(),
            input_type,
        }
    }

    fn send(id: &str) -> ChannelSend {
        ChannelSend {
            send_id: id.to_string(),
            name: format!("Send {}", id),
            gain: -20.0,
            gain_tapered: 0.3,
            pan: None,
            id: format!("corr-{}", id),
            mute: Some(false),
            solo: None,
        }
    }

    fn populated() -> Mirror {
        let mut mirror = Mirror::new();
        mirror.insert_device(Device::new("1", "Console A", true)).unwrap();
        mirror.insert_input("1", input(InputType::Inputs, "0")).unwrap();
        mirror.insert_input("1", input(InputType::Auxs, "0")).unwrap();
        mirror
            .insert_send(&ChannelRef::input("1", InputType::Inputs, "0"), send("0"))
            .unwrap();
        mirror
    }

    #[test]
    fn test_input_ids_are_scoped_by_type() {
        let mirror = populated();
        let device = mirror.device("1").unwrap();
        assert_eq!(device.inputs.len(), 2);
        assert!(mirror.input(&ChannelRef::input("1", InputType::Auxs, "0")).is_some());
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut mirror = populated();
        assert!(matches!(
            mirror.insert_device(Device::new("1", "Again", false)),
            Err(MirrorError::DuplicateDevice(_))
        ));
        assert!(matches!(
            mirror.insert_input("1", input(InputType::Inputs, "0")),
            Err(MirrorError::DuplicateChannel(_))
        ));
        assert!(matches!(
            mirror.insert_send(&ChannelRef::input("1", InputType::Inputs, "0"), send("0")),
            Err(MirrorError::DuplicateChannel(_))
        ));
    }

    #[test]
    fn test_insert_under_unknown_parent_fails() {
        let mut mirror = populated();
        assert!(matches!(
            mirror.insert_input("9", input(InputType::Inputs, "0")),
            Err(MirrorError::UnknownDevice(_))
        ));
        assert!(matches!(
            mirror.insert_send(&ChannelRef::input("1", InputType::Inputs, "5"), send("0")),
            Err(MirrorError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_apply_to_send_leaves_owner_untouched() {
        let mut mirror = populated();
        let owner = ChannelRef::input("1", InputType::Inputs, "0");
        let before = mirror.input(&owner).unwrap().clone();

        let target = ChannelRef::send("1", InputType::Inputs, "0", "0");
        mirror.apply(&target, Field::Mute, &json!(true)).unwrap();

        let after = mirror.input(&owner).unwrap();
        assert_eq!(after.mute, before.mute);
        assert_eq!(mirror.send(&target).unwrap().mute, Some(true));
    }

    #[test]
    fn test_apply_to_unknown_send_fails() {
        let mut mirror = populated();
        let target = ChannelRef::send("1", InputType::Inputs, "0", "7");
        assert!(matches!(
            mirror.apply(&target, Field::Gain, &json!(-3.0)),
            Err(MirrorError::UnknownChannel(_))
        ));
    }
}
