//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use arcanum::{Vault, VaultConfig};
use arcanum_core::{Identifier, ObjectType, PathExp};
use arcanum_perms::{KeyEncryptionKey, PrincipalKeys, ScopeKey};
use arcanum_store::MemoryStore;

/// An identifier with a chosen type tag and every digest byte set to `fill`.
pub fn fixed_id(object_type: ObjectType, fill: u8) -> Identifier {
    let mut bytes = [fill; 18];
    bytes[0] = arcanum_core::types::ID_VERSION;
    bytes[1] = object_type.to_u8();
    Identifier::from_bytes(bytes)
}

/// A vault over a memory store, scoped to one org and project.
pub struct TestVault {
    pub vault: Vault<MemoryStore>,
    pub org_id: Identifier,
    pub project_id: Identifier,
    pub kek: KeyEncryptionKey,
}

impl TestVault {
    /// Vault with the default configuration.
    pub async fn new() -> Self {
        Self::with_config(VaultConfig::default()).await
    }

    pub async fn with_config(config: VaultConfig) -> Self {
        let vault = Vault::open(MemoryStore::new(), config)
            .await
            .expect("memory vault opens");
        Self {
            vault,
            org_id: Identifier::derive(ObjectType::Org, b"acme"),
            project_id: Identifier::derive(ObjectType::Project, b"web"),
            kek: KeyEncryptionKey::derive("arcanum-testkit", b"fixture"),
        }
    }

    /// Principal identifier for a user name.
    pub fn user_id(&self, name: &str) -> Identifier {
        Identifier::derive(ObjectType::User, name.as_bytes())
    }

    /// Generate and store keypairs for user `name`.
    pub async fn principal(&self, name: &str) -> PrincipalKeys {
        self.vault
            .generate_keypairs(self.org_id, self.user_id(name), &self.kek)
            .await
            .expect("keypairs generate")
            .keys
    }

    /// The path expression used by [`TestVault::keyring`].
    pub fn pathexp(&self) -> PathExp {
        PathExp::new("acme", "web", "prod", "*", "*", "*").expect("valid path expression")
    }

    /// Create the fixture keyring with `creator` as its only member.
    pub async fn keyring(&self, creator: &PrincipalKeys) -> ScopeKey {
        let pathexp = self.pathexp();
        self.vault
            .create_keyring(self.org_id, self.project_id, pathexp.clone(), creator)
            .await
            .expect("keyring creates");
        ScopeKey::new(self.project_id, &pathexp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_id_layout() {
        let id = fixed_id(ObjectType::Team, 0x33);
        assert_eq!(id.as_bytes()[0], 0x01);
        assert_eq!(id.object_type().unwrap(), ObjectType::Team);
        assert!(id.as_bytes()[2..].iter().all(|b| *b == 0x33));
    }

    #[tokio::test]
    async fn test_fixture_principals_are_distinct() {
        let fixture = TestVault::new().await;
        let alice = fixture.principal("alice").await;
        let bob = fixture.principal("bob").await;

        assert_ne!(alice.owner_id, bob.owner_id);
        assert_ne!(alice.signing_key_id, bob.signing_key_id);
        assert_eq!(
            fixture.vault.list_keypairs(&fixture.org_id, None).await.unwrap().len(),
            4
        );
    }

    #[tokio::test]
    async fn test_fixture_keyring() {
        let fixture = TestVault::new().await;
        let alice = fixture.principal("alice").await;
        let scope = fixture.keyring(&alice).await;
        assert_eq!(fixture.vault.members(&scope).await.unwrap(), vec![alice.owner_id]);
    }
}
