//! Device tree discovery
//!
//! Walks `/devices` depth-first through the engine handle, one `get` at a
//! time, creating mirror entities and registering their subscriptions as it
//! goes. A branch that fails (missing property, duplicate id) is logged and
//! skipped; only a dead engine stops the walk.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::handle::EngineHandle;
use super::registry::Binding;
use super::DiscoveryError;
use crate::mirror::{ChannelRef, ChannelSend, Device, Field, Input, InputType};
use crate::protocol::join_path;

/// Input properties subscribed after creation, with the field each one feeds
const INPUT_SUBSCRIPTIONS: [(&str, Field); 5] = [
    ("FaderLevel", Field::Gain),
    ("FaderLevelTapered", Field::GainTapered),
    ("Pan", Field::Pan),
    ("Mute", Field::Mute),
    ("Solo", Field::Solo),
];

const SEND_SUBSCRIPTIONS: [(&str, Field); 4] = [
    ("Gain", Field::Gain),
    ("GainTapered", Field::GainTapered),
    ("Pan", Field::Pan),
    ("Bypass", Field::Mute),
];

/// Counters reported once discovery finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub devices: usize,
    pub inputs: usize,
    pub hidden: usize,
    pub sends: usize,
    /// Branches skipped because of an error
    pub failed: usize,
}

pub struct DeviceTreeBuilder {
    engine: EngineHandle,
    summary: DiscoverySummary,
}

impl DeviceTreeBuilder {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            summary: DiscoverySummary::default(),
        }
    }

    /// Discover every device and return the counters
    pub async fn run(mut self) -> Result<DiscoverySummary, DiscoveryError> {
        self.get_devices().await?;
        info!(
            devices = self.summary.devices,
            inputs = self.summary.inputs,
            sends = self.summary.sends,
            hidden = self.summary.hidden,
            failed = self.summary.failed,
            "Discovery complete"
        );
        Ok(self.summary)
    }

    pub async fn get_devices(&mut self) -> Result<(), DiscoveryError> {
        let devices = self.engine.get(join_path(["devices"])).await?;
        for device_id in child_ids(&devices) {
            let result = self.get_device(&device_id).await;
            self.settle(&join_path(["devices", device_id.as_str()]), result)?;
        }
        Ok(())
    }

    pub async fn get_device(&mut self, device_id: &str) -> Result<(), DiscoveryError> {
        let path = join_path(["devices", device_id]);
        let node = self.engine.get(path.as_str()).await?;
        let props = Properties::new(&path, &node);

        let device = Device::new(
            device_id,
            props.string("DeviceName")?,
            props.boolean("DeviceOnline")?,
        );
        info!("Found device {} '{}' (online: {})", device_id, device.name, device.online);
        self.engine.add_device(device).await?;
        self.summary.devices += 1;

        for input_type in InputType::ALL {
            self.get_inputs(device_id, input_type).await?;
        }
        Ok(())
    }

    pub async fn get_inputs(
        &mut self,
        device_id: &str,
        input_type: InputType,
    ) -> Result<(), DiscoveryError> {
        let inputs = self
            .engine
            .get(join_path(["devices", device_id, input_type.as_str()]))
            .await?;
        for input_id in child_ids(&inputs) {
            let channel = ChannelRef::input(device_id, input_type, input_id);
            let result = self.get_input(&channel).await;
            self.settle(&channel.path(), result)?;
        }
        Ok(())
    }

    pub async fn get_input(&mut self, channel: &ChannelRef) -> Result<(), DiscoveryError> {
        let path = channel.path();
        let node = self.engine.get(path.as_str()).await?;
        let props = Properties::new(&path, &node);

        if props.is_hidden() {
            debug!("Skipping hidden channel {}", path);
            self.summary.hidden += 1;
            return Ok(());
        }

        let input = Input {
            input_id: channel.input_id.clone(),
            name: props.string("Name")?,
            gain: props.number("FaderLevel")?,
            gain_tapered: props.number("FaderLevelTapered")?,
            pan: props.optional_number("Pan")?,
            mute: props.boolean("Mute")?,
            solo: props.optional_boolean("Solo")?,
            sends: Vec::new(),
            input_type: channel.input_type,
        };
        debug!("Found {} '{}'", path, input.name);
        self.engine.add_input(&channel.device_id, input).await?;
        self.summary.inputs += 1;

        self.subscribe_all(channel, &INPUT_SUBSCRIPTIONS)?;
        self.get_sends(channel).await
    }

    pub async fn get_sends(&mut self, owner: &ChannelRef) -> Result<(), DiscoveryError> {
        let sends = self.engine.get(format!("{}/sends", owner.path())).await?;
        for send_id in child_ids(&sends) {
            let channel = ChannelRef::send(
                owner.device_id.as_str(),
                owner.input_type,
                owner.input_id.as_str(),
                send_id,
            );
            let result = self.get_send(&channel).await;
            self.settle(&channel.path(), result)?;
        }
        Ok(())
    }

    pub async fn get_send(&mut self, channel: &ChannelRef) -> Result<(), DiscoveryError> {
        let path = channel.path();
        let node = self.engine.get(path.as_str()).await?;
        let props = Properties::new(&path, &node);

        let send = ChannelSend {
            send_id: channel.send_id.clone().unwrap_or_default(),
            name: props.string("Name")?,
            gain: props.number("Gain")?,
            gain_tapered: props.number("GainTapered")?,
            pan: props.optional_number("Pan")?,
            id: props.identifier("ID")?,
            mute: props.optional_boolean("Bypass")?,
            solo: None,
        };
        debug!("Found {} '{}'", path, send.name);
        self.engine.add_send(&channel.owner(), send).await?;
        self.summary.sends += 1;

        self.subscribe_all(channel, &SEND_SUBSCRIPTIONS)
    }

    fn subscribe_all(
        &self,
        channel: &ChannelRef,
        properties: &[(&str, Field)],
    ) -> Result<(), DiscoveryError> {
        for (property, field) in properties {
            self.engine.subscribe(
                channel.property_path(property),
                vec![Binding::new(channel.clone(), *field)],
            )?;
        }
        Ok(())
    }

    /// Turn a failed branch into a warning unless the engine itself is gone
    fn settle(
        &mut self,
        path: &str,
        result: Result<(), DiscoveryError>,
    ) -> Result<(), DiscoveryError> {
        match result {
            Err(e) if !e.is_fatal() => {
                warn!("Skipping {}: {}", path, e);
                self.summary.failed += 1;
                Ok(())
            }
            other => other,
        }
    }
}

/// Child keys of a collection node, integer-like keys ascending first, then
/// the remaining keys in upstream order. A missing `children` map is empty.
pub fn child_ids(node: &Value) -> Vec<String> {
    let Some(children) = node.get("children").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut indexed: Vec<(u32, &String)> = Vec::new();
    let mut named: Vec<&String> = Vec::new();
    for key in children.keys() {
        match array_index(key) {
            Some(index) => indexed.push((index, key)),
            None => named.push(key),
        }
    }
    indexed.sort_by_key(|(index, _)| *index);

    indexed
        .into_iter()
        .map(|(_, key)| key)
        .chain(named)
        .cloned()
        .collect()
}

fn array_index(key: &str) -> Option<u32> {
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse::<u32>().ok().filter(|index| *index < u32::MAX)
}

/// Accessor for `properties.<Name>.value` of a discovery node
struct Properties<'a> {
    path: &'a str,
    node: &'a Value,
}

impl<'a> Properties<'a> {
    fn new(path: &'a str, node: &'a Value) -> Self {
        Self { path, node }
    }

    fn value(&self, property: &str) -> Option<&'a Value> {
        self.node.get("properties")?.get(property)?.get("value")
    }

    fn required(&self, property: &'static str) -> Result<&'a Value, DiscoveryError> {
        self.value(property).ok_or_else(|| DiscoveryError::MissingProperty {
            path: self.path.to_string(),
            property,
        })
    }

    fn invalid(&self, property: &'static str, value: &Value) -> DiscoveryError {
        DiscoveryError::InvalidProperty {
            path: self.path.to_string(),
            property,
            value: value.clone(),
        }
    }

    fn string(&self, property: &'static str) -> Result<String, DiscoveryError> {
        let value = self.required(property)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(property, value))
    }

    fn number(&self, property: &'static str) -> Result<f64, DiscoveryError> {
        let value = self.required(property)?;
        value.as_f64().ok_or_else(|| self.invalid(property, value))
    }

    fn boolean(&self, property: &'static str) -> Result<bool, DiscoveryError> {
        let value = self.required(property)?;
        value.as_bool().ok_or_else(|| self.invalid(property, value))
    }

    /// String or numeric id, kept as text
    fn identifier(&self, property: &'static str) -> Result<String, DiscoveryError> {
        match self.required(property)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(self.invalid(property, other)),
        }
    }

    fn optional_number(&self, property: &'static str) -> Result<Option<f64>, DiscoveryError> {
        match self.value(property) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_f64().map(Some).ok_or_else(|| self.invalid(property, value)),
        }
    }

    fn optional_boolean(&self, property: &'static str) -> Result<Option<bool>, DiscoveryError> {
        match self.value(property) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_bool().map(Some).ok_or_else(|| self.invalid(property, value)),
        }
    }

    fn is_hidden(&self) -> bool {
        self.value("ChannelHidden").and_then(Value::as_bool) == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_ids_follow_object_key_order() {
        let node = json!({"children": {"b": {}, "10": {}, "a": {}, "2": {}, "01": {}}});
        assert_eq!(child_ids(&node), vec!["2", "10", "b", "a", "01"]);
    }

    #[test]
    fn test_child_ids_without_children() {
        assert!(child_ids(&json!({})).is_empty());
        assert!(child_ids(&json!({"children": null})).is_empty());
        assert!(child_ids(&json!(null)).is_empty());
    }

    #[test]
    fn test_required_properties() {
        let node = json!({"properties": {
            "Name": {"value": "Kick"},
            "FaderLevel": {"value": -6.5},
            "Mute": {"value": "yes"},
            "ID": {"value": 17}
        }});
        let props = Properties::new("/devices/1/inputs/0", &node);

        assert_eq!(props.string("Name").unwrap(), "Kick");
        assert_eq!(props.number("FaderLevel").unwrap(), -6.5);
        assert_eq!(props.identifier("ID").unwrap(), "17");
        assert!(matches!(
            props.boolean("Mute"),
            Err(DiscoveryError::InvalidProperty { property: "Mute", .. })
        ));
        assert!(matches!(
            props.string("DeviceName"),
            Err(DiscoveryError::MissingProperty { property: "DeviceName", .. })
        ));
    }

    #[test]
    fn test_optional_properties_absent_or_null() {
        let node = json!({"properties": {"Pan": {"value": null}, "Solo": {"value": true}}});
        let props = Properties::new("/p", &node);

        assert_eq!(props.optional_number("Pan").unwrap(), None);
        assert_eq!(props.optional_boolean("Solo").unwrap(), Some(true));
        assert_eq!(props.optional_boolean("Bypass").unwrap(), None);
    }

    #[test]
    fn test_hidden_only_when_true() {
        let hidden = json!({"properties": {"ChannelHidden": {"value": true}}});
        let shown = json!({"properties": {"ChannelHidden": {"value": false}}});
        assert!(Properties::new("/p", &hidden).is_hidden());
        assert!(!Properties::new("/p", &shown).is_hidden());
        assert!(!Properties::new("/p", &json!({})).is_hidden());
    }

    #[test]
    fn test_missing_property_is_not_fatal() {
        let err = DiscoveryError::MissingProperty {
            path: "/devices/1".into(),
            property: "DeviceName",
        };
        assert!(!err.is_fatal());
        assert!(DiscoveryError::Engine(crate::engine::EngineError::Closed).is_fatal());
    }
}
