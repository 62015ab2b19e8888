//! Policy action bitmask, effect, and statement types.
//!
//! `PolicyAction` travels on the wire as either a bare string (exactly one
//! action) or an array of names in declaration order. Decoding accepts both
//! forms. Unrecognized action names are dropped rather than rejected, which
//! keeps older clients readable but can hide a typo such as `"raed"`;
//! `arcanum-perms` validation reports such names separately.

use ciborium::value::Value;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::canonical::{Canonical, CanonicalMap};

/// A set of CRUD/list actions.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PolicyAction(u8);

impl PolicyAction {
    pub const CREATE: Self = Self(1 << 0);
    pub const READ: Self = Self(1 << 1);
    pub const UPDATE: Self = Self(1 << 2);
    pub const DELETE: Self = Self(1 << 3);
    pub const LIST: Self = Self(1 << 4);

    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b1_1111);

    /// Every single action paired with its wire name, in declaration order.
    pub const NAMED: [(PolicyAction, &'static str); 5] = [
        (Self::CREATE, "create"),
        (Self::READ, "read"),
        (Self::UPDATE, "update"),
        (Self::DELETE, "delete"),
        (Self::LIST, "list"),
    ];

    /// Build from raw bits. Bits outside the five actions are discarded.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(action, _)| *action)
    }

    /// Names of the actions present, in declaration order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(action, _)| self.contains(*action))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for PolicyAction {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PolicyAction {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicyAction({})", self)
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(", "))
    }
}

impl Serialize for PolicyAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names = self.names();
        if names.len() == 1 {
            return serializer.serialize_str(names[0]);
        }
        let mut seq = serializer.serialize_seq(Some(names.len()))?;
        for name in names {
            seq.serialize_element(name)?;
        }
        seq.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActionWire {
    One(String),
    Many(Vec<String>),
}

/// Collect the bits for `names`, reporting the ones that did not match.
pub fn decode_action_names<'a, I>(names: I) -> (PolicyAction, Vec<String>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut action = PolicyAction::NONE;
    let mut unknown = Vec::new();
    for name in names {
        match PolicyAction::from_name(name) {
            Some(bit) => action |= bit,
            None => unknown.push(name.to_string()),
        }
    }
    (action, unknown)
}

impl<'de> Deserialize<'de> for PolicyAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = ActionWire::deserialize(deserializer).map_err(|_| {
            de::Error::custom("policy action must be a string or an array of strings")
        })?;
        let (action, _unknown) = match &wire {
            ActionWire::One(name) => decode_action_names([name.as_str()]),
            ActionWire::Many(names) => decode_action_names(names.iter().map(String::as_str)),
        };
        Ok(action)
    }
}

/// Whether a matching statement grants or refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

impl PolicyEffect {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyEffect::Allow => "allow",
            PolicyEffect::Deny => "deny",
        }
    }
}

impl fmt::Display for PolicyEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One allow/deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub effect: PolicyEffect,
    pub action: PolicyAction,
    pub resource: String,
}

impl PolicyStatement {
    pub fn allow(action: PolicyAction, resource: impl Into<String>) -> Self {
        Self {
            effect: PolicyEffect::Allow,
            action,
            resource: resource.into(),
        }
    }

    pub fn deny(action: PolicyAction, resource: impl Into<String>) -> Self {
        Self {
            effect: PolicyEffect::Deny,
            action,
            resource: resource.into(),
        }
    }
}

// The action mask is encoded as its integer bits so the preimage does not
// depend on the single-vs-array wire choice.
impl Canonical for PolicyStatement {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .int("action", i64::from(self.action.bits()))
            .text("effect", self.effect.as_str())
            .text("resource", &self.resource)
            .build()
    }
}

/// The named statement list carried by a `Policy` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    pub description: String,
    pub statements: Vec<PolicyStatement>,
}

impl Canonical for PolicyDocument {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .text("description", &self.description)
            .text("name", &self.name)
            .value(
                "statements",
                Value::Array(self.statements.iter().map(|s| s.canonical_value()).collect()),
            )
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_action_is_bare_string() {
        let json = serde_json::to_string(&PolicyAction::READ).unwrap();
        assert_eq!(json, "\"read\"");
    }

    #[test]
    fn test_multiple_actions_follow_declaration_order() {
        let action = PolicyAction::LIST | PolicyAction::READ;
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, "[\"read\",\"list\"]");
    }

    #[test]
    fn test_empty_action_is_empty_array() {
        let json = serde_json::to_string(&PolicyAction::NONE).unwrap();
        assert_eq!(json, "[]");
    }

    #[test]
    fn test_every_subset_roundtrips() {
        for bits in 0..32u8 {
            let action = PolicyAction::from_bits(bits);
            let json = serde_json::to_string(&action).unwrap();
            let back: PolicyAction = serde_json::from_str(&json).unwrap();
            assert_eq!(back, action, "subset {:05b} via {}", bits, json);
        }
    }

    #[test]
    fn test_decode_ignores_unknown_names() {
        let action: PolicyAction = serde_json::from_str("[\"read\",\"raed\",\"list\"]").unwrap();
        assert_eq!(action, PolicyAction::READ | PolicyAction::LIST);

        let none: PolicyAction = serde_json::from_str("\"destroy\"").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_decode_rejects_non_string() {
        assert!(serde_json::from_str::<PolicyAction>("3").is_err());
    }

    #[test]
    fn test_display() {
        let action = PolicyAction::CREATE | PolicyAction::READ;
        assert_eq!(action.to_string(), "create, read");
    }

    #[test]
    fn test_effect_wire_values() {
        assert_eq!(serde_json::to_string(&PolicyEffect::Allow).unwrap(), "\"allow\"");
        assert_eq!(serde_json::to_string(&PolicyEffect::Deny).unwrap(), "\"deny\"");
        assert!(serde_json::from_str::<PolicyEffect>("true").is_err());
    }

    #[test]
    fn test_decode_action_names_reports_unknown() {
        let (action, unknown) = decode_action_names(["update", "nope"]);
        assert_eq!(action, PolicyAction::UPDATE);
        assert_eq!(unknown, vec!["nope".to_string()]);
    }
}
