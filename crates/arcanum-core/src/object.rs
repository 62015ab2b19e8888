//! Typed object bodies and the closed [`Object`] sum type.
//!
//! Every persisted entity is one of the variants below. Bodies are immutable
//! once identified: an update is a new body whose `previous` points at the
//! identifier it supersedes.
//!
//! Each body carries an explicit `schema_version`, set by its constructor.
//! It travels in the envelope's `version` field and is not part of the
//! canonical preimage.

use ciborium::value::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical::{canonical_bytes, Canonical, CanonicalMap};
use crate::claim::Claim;
use crate::error::{CoreError, Result};
use crate::invite::OrgInvite;
use crate::pathexp::PathExp;
use crate::policy::PolicyDocument;
use crate::types::{hex_bytes, Identifier, ObjectType, Timestamp};

/// Current schema version for every body type.
pub const SCHEMA_V1: u32 = 1;

pub(crate) fn schema_v1() -> u32 {
    SCHEMA_V1
}

/// Behavior shared by every object body.
pub trait Body:
    Canonical + Clone + Serialize + DeserializeOwned + Into<Object> + TryFrom<Object, Error = CoreError>
{
    const TYPE: ObjectType;

    fn schema_version(&self) -> u32;

    /// Canonical bytes of this body.
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_bytes(self)
    }

    /// Content-addressed identifier of this body.
    fn identifier(&self) -> Result<Identifier> {
        Ok(Identifier::derive(Self::TYPE, &self.canonical_bytes()?))
    }
}

// ---------------------------------------------------------------------------
// Principals and org scoping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPassword {
    pub salt: String,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    pub alg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMaster {
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    pub alg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub username: String,
    pub name: String,
    pub email: String,
    pub state: String,
    pub password: Option<UserPassword>,
    pub master: Option<UserMaster>,
}

impl User {
    pub fn new(username: &str, name: &str, email: &str, state: &str) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            username: username.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            state: state.to_string(),
            password: None,
            master: None,
        }
    }
}

impl Canonical for User {
    fn canonical_value(&self) -> Value {
        let password = self.password.as_ref().map(|p| {
            CanonicalMap::new()
                .text("alg", &p.alg)
                .text("salt", &p.salt)
                .bytes("value", &p.value)
                .build()
        });
        let master = self.master.as_ref().map(|m| {
            CanonicalMap::new()
                .text("alg", &m.alg)
                .bytes("value", &m.value)
                .build()
        });
        CanonicalMap::new()
            .text("email", &self.email)
            .opt_value("master", master)
            .text("name", &self.name)
            .opt_value("password", password)
            .text("state", &self.state)
            .text("username", &self.username)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub name: String,
}

impl Org {
    pub fn new(name: &str) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            name: name.to_string(),
        }
    }
}

impl Canonical for Org {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new().text("name", &self.name).build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub name: String,
    pub org_id: Identifier,
}

impl Project {
    pub fn new(name: &str, org_id: Identifier) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            name: name.to_string(),
            org_id,
        }
    }
}

impl Canonical for Project {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .text("name", &self.name)
            .id("org_id", &self.org_id)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub name: String,
    pub org_id: Identifier,
    pub project_id: Identifier,
}

impl Service {
    pub fn new(name: &str, org_id: Identifier, project_id: Identifier) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            name: name.to_string(),
            org_id,
            project_id,
        }
    }
}

impl Canonical for Service {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .text("name", &self.name)
            .id("org_id", &self.org_id)
            .id("project_id", &self.project_id)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub name: String,
    pub org_id: Identifier,
    pub project_id: Identifier,
}

impl Environment {
    pub fn new(name: &str, org_id: Identifier, project_id: Identifier) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            name: name.to_string(),
            org_id,
            project_id,
        }
    }
}

impl Canonical for Environment {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .text("name", &self.name)
            .id("org_id", &self.org_id)
            .id("project_id", &self.project_id)
            .build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamType {
    System,
    User,
}

impl TeamType {
    pub fn as_str(self) -> &'static str {
        match self {
            TeamType::System => "system",
            TeamType::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub name: String,
    pub org_id: Identifier,
    #[serde(rename = "type")]
    pub team_type: TeamType,
}

impl Team {
    pub fn new(name: &str, org_id: Identifier, team_type: TeamType) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            name: name.to_string(),
            org_id,
            team_type,
        }
    }
}

impl Canonical for Team {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .text("name", &self.name)
            .id("org_id", &self.org_id)
            .text("type", self.team_type.as_str())
            .build()
    }
}

/// Links a principal to a team. Both must belong to `org_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub org_id: Identifier,
    pub owner_id: Identifier,
    pub team_id: Identifier,
}

impl Membership {
    pub fn new(org_id: Identifier, owner_id: Identifier, team_id: Identifier) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            org_id,
            owner_id,
            team_id,
        }
    }
}

impl Canonical for Membership {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .id("org_id", &self.org_id)
            .id("owner_id", &self.owner_id)
            .id("team_id", &self.team_id)
            .build()
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Signing,
    Encryption,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Signing => "signing",
            KeyType::Encryption => "encryption",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyValue {
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub alg: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub key: PublicKeyValue,
    pub org_id: Identifier,
    pub owner_id: Identifier,
    #[serde(rename = "type")]
    pub key_type: KeyType,
}

impl PublicKey {
    pub fn new(
        org_id: Identifier,
        owner_id: Identifier,
        key_type: KeyType,
        alg: &str,
        key: Vec<u8>,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            alg: alg.to_string(),
            created_at,
            expires_at,
            key: PublicKeyValue { value: key },
            org_id,
            owner_id,
            key_type,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

impl Canonical for PublicKey {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .text("alg", &self.alg)
            .timestamp("created_at", self.created_at)
            .timestamp("expires_at", self.expires_at)
            .value("key", CanonicalMap::new().bytes("value", &self.key.value).build())
            .id("org_id", &self.org_id)
            .id("owner_id", &self.owner_id)
            .text("type", self.key_type.as_str())
            .build()
    }
}

/// Private key bytes sealed under a key-encryption key. Never plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKeyValue {
    pub alg: String,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub key: PrivateKeyValue,
    pub org_id: Identifier,
    pub owner_id: Identifier,
    #[serde(with = "hex_bytes")]
    pub pnonce: Vec<u8>,
    pub public_key_id: Identifier,
}

impl PrivateKey {
    pub fn new(
        org_id: Identifier,
        owner_id: Identifier,
        public_key_id: Identifier,
        key: PrivateKeyValue,
        pnonce: Vec<u8>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            key,
            org_id,
            owner_id,
            pnonce,
            public_key_id,
        }
    }
}

impl Canonical for PrivateKey {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .value(
                "key",
                CanonicalMap::new()
                    .text("alg", &self.key.alg)
                    .bytes("value", &self.key.value)
                    .build(),
            )
            .id("org_id", &self.org_id)
            .id("owner_id", &self.owner_id)
            .bytes("pnonce", &self.pnonce)
            .id("public_key_id", &self.public_key_id)
            .build()
    }
}

// ---------------------------------------------------------------------------
// Keyrings and credentials
// ---------------------------------------------------------------------------

/// One generation of the symmetric secret scope for a path expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyring {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub created_at: Timestamp,
    pub org_id: Identifier,
    pub pathexp: PathExp,
    pub previous: Option<Identifier>,
    pub project_id: Identifier,
    pub version: u32,
}

impl Keyring {
    pub fn new(
        org_id: Identifier,
        project_id: Identifier,
        pathexp: PathExp,
        previous: Option<Identifier>,
        version: u32,
        created_at: Timestamp,
    ) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            created_at,
            org_id,
            pathexp,
            previous,
            project_id,
            version,
        }
    }
}

impl Canonical for Keyring {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .timestamp("created_at", self.created_at)
            .id("org_id", &self.org_id)
            .text("pathexp", &self.pathexp.to_string())
            .opt_id("previous", self.previous.as_ref())
            .id("project_id", &self.project_id)
            .int("version", i64::from(self.version))
            .build()
    }
}

/// A keyring master secret wrapped for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringMemberKey {
    pub alg: String,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringMember {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub created_at: Timestamp,
    /// Public encryption key the secret is wrapped under.
    pub encrypting_key_id: Identifier,
    pub key: KeyringMemberKey,
    pub keyring_id: Identifier,
    pub org_id: Identifier,
    pub owner_id: Identifier,
    pub project_id: Identifier,
    /// Signing key of the principal that authorized the grant.
    pub public_key_id: Identifier,
}

impl KeyringMember {
    pub fn new(
        keyring_id: Identifier,
        keyring: &Keyring,
        owner_id: Identifier,
        encrypting_key_id: Identifier,
        public_key_id: Identifier,
        key: KeyringMemberKey,
        created_at: Timestamp,
    ) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            created_at,
            encrypting_key_id,
            key,
            keyring_id,
            org_id: keyring.org_id,
            owner_id,
            project_id: keyring.project_id,
            public_key_id,
        }
    }
}

impl Canonical for KeyringMember {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .timestamp("created_at", self.created_at)
            .id("encrypting_key_id", &self.encrypting_key_id)
            .value(
                "key",
                CanonicalMap::new()
                    .text("alg", &self.key.alg)
                    .bytes("nonce", &self.key.nonce)
                    .bytes("value", &self.key.value)
                    .build(),
            )
            .id("keyring_id", &self.keyring_id)
            .id("org_id", &self.org_id)
            .id("owner_id", &self.owner_id)
            .id("project_id", &self.project_id)
            .id("public_key_id", &self.public_key_id)
            .build()
    }
}

/// Ciphertext of a credential value under its keyring's master secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialValue {
    pub alg: String,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

/// A named secret. A `None` value marks the credential as unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub credential: Option<CredentialValue>,
    pub keyring_id: Identifier,
    pub name: String,
    /// Per-credential key derivation input; unique within a keyring.
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    pub org_id: Identifier,
    pub pathexp: PathExp,
    pub previous: Option<Identifier>,
    pub project_id: Identifier,
    pub version: u32,
}

impl Credential {
    pub fn new(
        keyring_id: Identifier,
        keyring: &Keyring,
        name: &str,
        nonce: Vec<u8>,
        credential: Option<CredentialValue>,
        previous: Option<Identifier>,
        version: u32,
    ) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            credential,
            keyring_id,
            name: name.to_string(),
            nonce,
            org_id: keyring.org_id,
            pathexp: keyring.pathexp.clone(),
            previous,
            project_id: keyring.project_id,
            version,
        }
    }

    pub fn is_unset(&self) -> bool {
        self.credential.is_none()
    }
}

impl Canonical for Credential {
    fn canonical_value(&self) -> Value {
        let value = self.credential.as_ref().map(|c| {
            CanonicalMap::new()
                .text("alg", &c.alg)
                .bytes("nonce", &c.nonce)
                .bytes("value", &c.value)
                .build()
        });
        CanonicalMap::new()
            .opt_value("credential", value)
            .id("keyring_id", &self.keyring_id)
            .text("name", &self.name)
            .bytes("nonce", &self.nonce)
            .id("org_id", &self.org_id)
            .text("pathexp", &self.pathexp.to_string())
            .opt_id("previous", self.previous.as_ref())
            .id("project_id", &self.project_id)
            .int("version", i64::from(self.version))
            .build()
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    #[serde(rename = "type")]
    pub policy_type: String,
    pub previous: Option<Identifier>,
    pub org_id: Identifier,
    pub policy: PolicyDocument,
}

impl Policy {
    pub fn new(
        org_id: Identifier,
        policy_type: &str,
        policy: PolicyDocument,
        previous: Option<Identifier>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            policy_type: policy_type.to_string(),
            previous,
            org_id,
            policy,
        }
    }
}

impl Canonical for Policy {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .id("org_id", &self.org_id)
            .value("policy", self.policy.canonical_value())
            .opt_id("previous", self.previous.as_ref())
            .text("type", &self.policy_type)
            .build()
    }
}

/// Attaches a policy to a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAttachment {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub owner_id: Identifier,
    pub policy_id: Identifier,
    pub org_id: Identifier,
}

impl PolicyAttachment {
    pub fn new(org_id: Identifier, owner_id: Identifier, policy_id: Identifier) -> Self {
        Self {
            schema_version: SCHEMA_V1,
            owner_id,
            policy_id,
            org_id,
        }
    }
}

impl Canonical for PolicyAttachment {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .id("org_id", &self.org_id)
            .id("owner_id", &self.owner_id)
            .id("policy_id", &self.policy_id)
            .build()
    }
}

// ---------------------------------------------------------------------------
// The closed sum type
// ---------------------------------------------------------------------------

macro_rules! objects {
    ($($variant:ident($body:ty)),* $(,)?) => {
        /// Any persisted object, dispatched by type tag.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum Object {
            $($variant($body),)*
        }

        impl Object {
            pub fn object_type(&self) -> ObjectType {
                match self {
                    $(Object::$variant(_) => ObjectType::$variant,)*
                }
            }

            pub fn schema_version(&self) -> u32 {
                match self {
                    $(Object::$variant(body) => body.schema_version,)*
                }
            }

            /// Decode a JSON body using the type tag carried by its identifier.
            pub fn from_json(object_type: ObjectType, body: serde_json::Value) -> Result<Self> {
                let decoded = match object_type {
                    $(ObjectType::$variant => serde_json::from_value::<$body>(body).map(Object::$variant),)*
                };
                decoded.map_err(|e| CoreError::Decoding(format!("{} body: {}", object_type, e)))
            }
        }

        // Untagged: the type travels in the envelope identifier.
        impl Serialize for Object {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                match self {
                    $(Object::$variant(body) => body.serialize(serializer),)*
                }
            }
        }

        impl Canonical for Object {
            fn canonical_value(&self) -> Value {
                match self {
                    $(Object::$variant(body) => body.canonical_value(),)*
                }
            }
        }

        $(
            impl Body for $body {
                const TYPE: ObjectType = ObjectType::$variant;

                fn schema_version(&self) -> u32 {
                    self.schema_version
                }
            }

            impl From<$body> for Object {
                fn from(body: $body) -> Self {
                    Object::$variant(body)
                }
            }

            impl TryFrom<Object> for $body {
                type Error = CoreError;

                fn try_from(object: Object) -> Result<Self> {
                    match object {
                        Object::$variant(body) => Ok(body),
                        other => Err(CoreError::Decoding(format!(
                            "expected {}, found {}",
                            ObjectType::$variant,
                            other.object_type()
                        ))),
                    }
                }
            }
        )*
    };
}

objects! {
    User(User),
    Service(Service),
    Project(Project),
    Environment(Environment),
    PublicKey(PublicKey),
    PrivateKey(PrivateKey),
    Claim(Claim),
    Keyring(Keyring),
    KeyringMember(KeyringMember),
    Credential(Credential),
    Org(Org),
    Membership(Membership),
    Team(Team),
    Policy(Policy),
    PolicyAttachment(PolicyAttachment),
    OrgInvite(OrgInvite),
}

impl Object {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_bytes(self)
    }

    pub fn identifier(&self) -> Result<Identifier> {
        Ok(Identifier::derive(self.object_type(), &self.canonical_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyAction, PolicyStatement};

    fn org_id() -> Identifier {
        Org::new("acme").identifier().unwrap()
    }

    #[test]
    fn test_org_golden_bytes() {
        // {"name": "acme"}
        let bytes = Org::new("acme").canonical_bytes().unwrap();
        assert_eq!(hex::encode(bytes), "a1646e616d656461636d65");
    }

    #[test]
    fn test_identical_bodies_share_identifier() {
        let a = Project::new("web", org_id());
        let b = Project::new("web", org_id());
        assert_eq!(a.identifier().unwrap(), b.identifier().unwrap());
    }

    #[test]
    fn test_field_change_changes_identifier() {
        let a = Project::new("web", org_id());
        let b = Project::new("api", org_id());
        assert_ne!(a.identifier().unwrap(), b.identifier().unwrap());
    }

    #[test]
    fn test_service_and_environment_differ_by_tag() {
        let project = Project::new("web", org_id()).identifier().unwrap();
        let svc = Service::new("prod", org_id(), project).identifier().unwrap();
        let env = Environment::new("prod", org_id(), project).identifier().unwrap();
        assert_ne!(svc, env);
        assert_eq!(svc.object_type().unwrap(), ObjectType::Service);
        assert_eq!(env.object_type().unwrap(), ObjectType::Environment);
    }

    #[test]
    fn test_schema_version_excluded_from_identity() {
        let a = Org::new("acme");
        let mut b = Org::new("acme");
        b.schema_version = 2;
        assert_eq!(a.identifier().unwrap(), b.identifier().unwrap());
    }

    #[test]
    fn test_null_previous_is_encoded() {
        let pathexp = PathExp::new("acme", "web", "*", "*", "*", "*").unwrap();
        let project = Project::new("web", org_id()).identifier().unwrap();
        let first = Keyring::new(org_id(), project, pathexp.clone(), None, 1, 1_000);
        let bytes = first.canonical_bytes().unwrap();
        // "previous" followed directly by the null marker
        let pos = bytes.windows(8).position(|w| w == b"previous").unwrap();
        assert_eq!(bytes[pos + 8], 0xf6);
    }

    #[test]
    fn test_object_json_dispatch() {
        let team = Team::new("owners", org_id(), TeamType::System);
        let object: Object = team.clone().into();
        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["type"], "system");
        assert!(json.get("schema_version").is_none());

        let decoded = Object::from_json(ObjectType::Team, json).unwrap();
        assert_eq!(decoded.schema_version(), SCHEMA_V1);
        assert_eq!(Team::try_from(decoded).unwrap(), team);
    }

    #[test]
    fn test_wrong_variant_downcast() {
        let object: Object = Org::new("acme").into();
        assert!(matches!(Team::try_from(object), Err(CoreError::Decoding(_))));
    }

    #[test]
    fn test_policy_identity_covers_statements() {
        let doc = |action| PolicyDocument {
            name: "readers".into(),
            description: String::new(),
            statements: vec![PolicyStatement::allow(action, "/acme/web/*/*/*/*/*")],
        };
        let a = Policy::new(org_id(), "user", doc(PolicyAction::READ), None);
        let b = Policy::new(org_id(), "user", doc(PolicyAction::READ | PolicyAction::LIST), None);
        assert_ne!(a.identifier().unwrap(), b.identifier().unwrap());
    }

    #[test]
    fn test_unset_credential() {
        let pathexp = PathExp::new("acme", "web", "*", "*", "*", "*").unwrap();
        let project = Project::new("web", org_id()).identifier().unwrap();
        let keyring = Keyring::new(org_id(), project, pathexp, None, 1, 1_000);
        let keyring_id = keyring.identifier().unwrap();
        let cred = Credential::new(keyring_id, &keyring, "DB_URL", vec![7; 24], None, None, 1);
        assert!(cred.is_unset());
        assert_eq!(cred.pathexp, keyring.pathexp);
        let json = serde_json::to_value(&cred).unwrap();
        assert!(json["credential"].is_null());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_encoding_is_deterministic(name in "[a-z0-9-]{1,24}", org in any::<[u8; 18]>()) {
                let a = Project::new(&name, Identifier::from_bytes(org));
                let b = Project::new(&name, Identifier::from_bytes(org));
                prop_assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
                prop_assert_eq!(a.identifier().unwrap(), b.identifier().unwrap());
            }

            #[test]
            fn prop_name_change_changes_identifier(
                name in "[a-z]{1,24}",
                suffix in "[a-z]{1,4}",
                org in any::<[u8; 18]>(),
            ) {
                let org = Identifier::from_bytes(org);
                let a = Project::new(&name, org);
                let b = Project::new(&format!("{}{}", name, suffix), org);
                prop_assert_ne!(a.identifier().unwrap(), b.identifier().unwrap());
            }
        }
    }
}
