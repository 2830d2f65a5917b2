//! Subscription registry
//!
//! Maps the response path of a subscription (`<path>/value`) to the mirror
//! fields it updates. Entries accumulate for the lifetime of the connection.

use std::collections::HashMap;

use crate::mirror::{ChannelRef, Field};
use crate::protocol::response_path;

/// One mirror field fed by a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub target: ChannelRef,
    pub field: Field,
}

impl Binding {
    pub fn new(target: ChannelRef, field: Field) -> Self {
        Self { target, field }
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, Vec<Binding>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bindings` under the response path of `path` and return that
    /// response path. Existing bindings are kept.
    pub fn register(&mut self, path: &str, bindings: impl IntoIterator<Item = Binding>) -> String {
        let key = response_path(path);
        self.entries.entry(key.clone()).or_default().extend(bindings);
        key
    }

    /// Bindings for an inbound frame path, in registration order
    pub fn bindings(&self, path: &str) -> &[Binding] {
        self.entries.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of subscribed response paths
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::InputType;

    #[test]
    fn test_register_keys_by_response_path() {
        let mut registry = SubscriptionRegistry::new();
        let target = ChannelRef::input("1", InputType::Inputs, "0");
        let key = registry.register(
            "/devices/1/inputs/0/Mute",
            [Binding::new(target.clone(), Field::Mute)],
        );

        assert_eq!(key, "/devices/1/inputs/0/Mute/value");
        assert_eq!(registry.bindings(&key), &[Binding::new(target, Field::Mute)]);
        assert!(registry.bindings("/devices/1/inputs/0/Mute").is_empty());
    }

    #[test]
    fn test_registrations_accumulate_in_order() {
        let mut registry = SubscriptionRegistry::new();
        let a = Binding::new(ChannelRef::input("1", InputType::Inputs, "0"), Field::Gain);
        let b = Binding::new(ChannelRef::input("1", InputType::Inputs, "0"), Field::GainTapered);

        registry.register("/x", [a.clone()]);
        registry.register("/x", [b.clone()]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.bindings("/x/value"), &[a, b]);
    }
}
