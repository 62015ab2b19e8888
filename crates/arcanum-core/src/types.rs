//! Strong type definitions: identifiers, type tags and timestamps.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{CoreError, Result};

/// Leading byte of every identifier. Bumped only if the derivation changes.
pub const ID_VERSION: u8 = 0x01;

/// Length of the truncated Blake3 digest carried in an identifier.
pub const ID_HASH_LEN: usize = 16;

/// Total identifier width: version byte, type tag, truncated digest.
pub const ID_LEN: usize = 2 + ID_HASH_LEN;

/// Single-byte type tags. Part of the identifier preimage; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ObjectType {
    User = 0x01,
    Service = 0x03,
    Project = 0x04,
    Environment = 0x05,
    PublicKey = 0x06,
    PrivateKey = 0x07,
    Claim = 0x08,
    Keyring = 0x09,
    KeyringMember = 0x0a,
    Credential = 0x0b,
    Org = 0x0d,
    Membership = 0x0e,
    Team = 0x0f,
    Policy = 0x11,
    PolicyAttachment = 0x12,
    OrgInvite = 0x13,
}

impl ObjectType {
    /// Every tag, in tag order.
    pub const ALL: [ObjectType; 16] = [
        ObjectType::User,
        ObjectType::Service,
        ObjectType::Project,
        ObjectType::Environment,
        ObjectType::PublicKey,
        ObjectType::PrivateKey,
        ObjectType::Claim,
        ObjectType::Keyring,
        ObjectType::KeyringMember,
        ObjectType::Credential,
        ObjectType::Org,
        ObjectType::Membership,
        ObjectType::Team,
        ObjectType::Policy,
        ObjectType::PolicyAttachment,
        ObjectType::OrgInvite,
    ];

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.to_u8() == tag)
    }

    /// Lowercase name used in logs and store indexes.
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::User => "user",
            ObjectType::Service => "service",
            ObjectType::Project => "project",
            ObjectType::Environment => "environment",
            ObjectType::PublicKey => "public_key",
            ObjectType::PrivateKey => "private_key",
            ObjectType::Claim => "claim",
            ObjectType::Keyring => "keyring",
            ObjectType::KeyringMember => "keyring_member",
            ObjectType::Credential => "credential",
            ObjectType::Org => "org",
            ObjectType::Membership => "membership",
            ObjectType::Team => "team",
            ObjectType::Policy => "policy",
            ObjectType::PolicyAttachment => "policy_attachment",
            ObjectType::OrgInvite => "org_invite",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An 18-byte content-addressed identifier.
///
/// Layout: `[ID_VERSION, type tag, blake3(type tag || canonical body)[..16]]`.
/// Two objects with the same type and canonical body always share an
/// identifier, which makes creation idempotent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(pub [u8; ID_LEN]);

impl Identifier {
    /// Derive the identifier for a canonical body of the given type.
    pub fn derive(object_type: ObjectType, canonical: &[u8]) -> Self {
        let tag = object_type.to_u8();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[tag]);
        hasher.update(canonical);
        let digest = hasher.finalize();

        let mut bytes = [0u8; ID_LEN];
        bytes[0] = ID_VERSION;
        bytes[1] = tag;
        bytes[2..].copy_from_slice(&digest.as_bytes()[..ID_HASH_LEN]);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// The type tag embedded in the identifier.
    pub fn object_type(&self) -> Result<ObjectType> {
        ObjectType::from_u8(self.0[1]).ok_or(CoreError::UnknownObjectType(self.0[1]))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; ID_LEN] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.to_hex())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Identifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Identifier {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> std::result::Result<Self, Self::Error> {
        let arr: [u8; ID_LEN] = slice.try_into()?;
        Ok(Self(arr))
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// UTC Unix milliseconds. The only timestamp representation in canonical bytes.
pub type Timestamp = i64;

/// Current UTC time in Unix milliseconds.
pub fn now_millis() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Serde helpers that carry byte strings as hex on the wire.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_hex_roundtrip() {
        let id = Identifier::derive(ObjectType::Org, b"body");
        let recovered = Identifier::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_identifier_layout() {
        let id = Identifier::derive(ObjectType::Keyring, b"body");
        assert_eq!(id.0[0], ID_VERSION);
        assert_eq!(id.object_type().unwrap(), ObjectType::Keyring);
    }

    #[test]
    fn test_identifier_depends_on_type_tag() {
        let a = Identifier::derive(ObjectType::Project, b"same");
        let b = Identifier::derive(ObjectType::Service, b"same");
        assert_ne!(a.0[2..], b.0[2..]);
    }

    #[test]
    fn test_unknown_tag() {
        let mut id = Identifier::derive(ObjectType::Org, b"x");
        id.0[1] = 0x02;
        assert!(matches!(id.object_type(), Err(CoreError::UnknownObjectType(0x02))));
    }

    #[test]
    fn test_type_tags_are_stable() {
        let tags: Vec<u8> = ObjectType::ALL.iter().map(|t| t.to_u8()).collect();
        assert_eq!(
            tags,
            vec![
                0x01, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0d, 0x0e, 0x0f,
                0x11, 0x12, 0x13
            ]
        );
    }
}
