//! Keyring and credential operations on the Vault.
//!
//! Every write moves the scope's head through `Store::swap_keyring_head`
//! while the arena lock is held. Losing the race reloads the arena and
//! fails with `StaleGeneration`; the caller decides whether to retry.

use arcanum_core::{
    now_millis, Credential, Envelope, Identifier, Keyring, KeyringMember, PathExp, PolicyAction,
};
use arcanum_perms::{
    add_member, create_keyring, encryption_recipient, rotate_keyring, unwrap_member,
    write_credential, Generation, KeyringArena, MasterSecret, PermsError, PlannedGeneration,
    PrincipalKeys, Recipient, ScopeKey,
};
use arcanum_store::{HeadSwap, Store};
use zeroize::Zeroizing;

use crate::directory::KeySnapshot;
use crate::error::{Result, VaultError};
use crate::vault::Vault;

impl<S: Store> Vault<S> {
    /// Rebuild the keyring cache from the store.
    pub async fn reload(&self) -> Result<()> {
        let arena = self.load_arena().await?;
        *self.arena.lock().await = arena;
        Ok(())
    }

    async fn load_arena(&self) -> Result<KeyringArena> {
        let keys = self.keys().await?;
        let keyrings = self.load_bodies::<Keyring>(&keys).await?;
        let members = self.load_bodies::<KeyringMember>(&keys).await?;
        let credentials = self.load_bodies::<Credential>(&keys).await?;
        tracing::debug!(
            keyrings = keyrings.len(),
            members = members.len(),
            credentials = credentials.len(),
            "loaded keyring cache"
        );
        Ok(KeyringArena::restore(keyrings, members, credentials))
    }

    /// Create the first generation of a scope, with `creator` as its only
    /// member.
    pub async fn create_keyring(
        &self,
        org_id: Identifier,
        project_id: Identifier,
        pathexp: PathExp,
        creator: &PrincipalKeys,
    ) -> Result<Identifier> {
        let mut arena = self.arena.lock().await;
        let keys = self.keys().await?;
        self.ensure_usable(&keys, &creator.signing_key_id)?;
        self.ensure_usable(&keys, &creator.encryption_key_id)?;

        let planned = create_keyring(&arena, org_id, project_id, pathexp, creator, now_millis())?;
        self.commit(&mut arena, planned).await
    }

    /// Owners holding a member row in the current generation of `scope`.
    pub async fn members(&self, scope: &ScopeKey) -> Result<Vec<Identifier>> {
        let arena = self.arena.lock().await;
        let generation = current(&arena, scope)?;
        Ok(generation.members().map(|(_, m)| m.owner_id).collect())
    }

    /// Grant `recipient_id` access to the current generation of `scope`.
    ///
    /// The recipient's newest usable encryption key receives the wrapped
    /// master secret. `granter` must itself be a member.
    pub async fn share(
        &self,
        scope: &ScopeKey,
        recipient_id: &Identifier,
        granter: &PrincipalKeys,
    ) -> Result<Envelope> {
        let mut arena = self.arena.lock().await;
        let keys = self.keys().await?;
        self.ensure_usable(&keys, &granter.signing_key_id)?;

        let generation = current(&arena, scope)?;
        let keyring_id = generation.keyring_id;
        if generation.member_for(recipient_id).is_some() {
            return Err(PermsError::DuplicateMember {
                keyring_id,
                owner_id: *recipient_id,
            }
            .into());
        }
        let master = self.master_for(generation, granter, &keys)?;
        let recipient = self.resolve_recipient(&keys, &generation.keyring.org_id, recipient_id)?;
        let envelope = add_member(
            keyring_id,
            &generation.keyring,
            &master,
            &recipient,
            granter,
            now_millis(),
        )?;
        let member: KeyringMember = envelope.body_as()?;

        self.advance(&mut arena, scope, keyring_id, &envelope).await?;
        arena.add_member(scope, envelope.id, member)?;
        tracing::info!(scope = %scope, owner_id = %recipient_id, granted_by = %granter.owner_id, "shared keyring");
        Ok(envelope)
    }

    /// Rotate `scope` to a new generation readable only by `owners`.
    ///
    /// Every set credential is carried over, re-encrypted under the new
    /// master secret.
    pub async fn rotate(
        &self,
        scope: &ScopeKey,
        owners: &[Identifier],
        rotator: &PrincipalKeys,
    ) -> Result<Identifier> {
        let mut arena = self.arena.lock().await;
        let keys = self.keys().await?;
        let org_id = current(&arena, scope)?.keyring.org_id;
        let recipients = owners
            .iter()
            .map(|owner| self.resolve_recipient(&keys, &org_id, owner))
            .collect::<Result<Vec<_>>>()?;
        self.rotate_locked(&mut arena, &keys, scope, &recipients, rotator)
            .await
    }

    /// Remove `owner_id` from `scope` by rotating to a generation that
    /// excludes them.
    ///
    /// Remaining members without a usable encryption key are dropped from
    /// the new generation.
    pub async fn remove_member(
        &self,
        scope: &ScopeKey,
        owner_id: &Identifier,
        rotator: &PrincipalKeys,
    ) -> Result<Identifier> {
        let mut arena = self.arena.lock().await;
        let keys = self.keys().await?;
        let generation = current(&arena, scope)?;
        if generation.member_for(owner_id).is_none() {
            return Err(VaultError::NotAMember {
                keyring_id: generation.keyring_id,
                owner_id: *owner_id,
            });
        }

        let org_id = generation.keyring.org_id;
        let mut recipients = Vec::new();
        for (_, member) in generation.members() {
            if member.owner_id == *owner_id {
                continue;
            }
            match self.resolve_recipient(&keys, &org_id, &member.owner_id) {
                Ok(recipient) => recipients.push(recipient),
                Err(e) => {
                    tracing::warn!(scope = %scope, owner_id = %member.owner_id, error = %e, "dropping member without usable key");
                }
            }
        }

        let keyring_id = self
            .rotate_locked(&mut arena, &keys, scope, &recipients, rotator)
            .await?;
        tracing::info!(scope = %scope, removed = %owner_id, keyring_id = %keyring_id, "removed keyring member");
        Ok(keyring_id)
    }

    async fn rotate_locked(
        &self,
        arena: &mut KeyringArena,
        keys: &KeySnapshot,
        scope: &ScopeKey,
        recipients: &[Recipient],
        rotator: &PrincipalKeys,
    ) -> Result<Identifier> {
        self.ensure_usable(keys, &rotator.signing_key_id)?;
        let master = self.master_for(current(arena, scope)?, rotator, keys)?;
        let planned = rotate_keyring(arena, scope, &master, recipients, rotator, now_millis())?;
        self.commit(arena, planned).await
    }

    /// Store a new value for credential `name`.
    pub async fn set_credential(
        &self,
        scope: &ScopeKey,
        name: &str,
        value: &[u8],
        writer: &PrincipalKeys,
    ) -> Result<Envelope> {
        self.write(scope, name, Some(value), writer).await
    }

    /// Record credential `name` as unset. Its history is kept.
    pub async fn unset_credential(
        &self,
        scope: &ScopeKey,
        name: &str,
        writer: &PrincipalKeys,
    ) -> Result<Envelope> {
        self.write(scope, name, None, writer).await
    }

    async fn write(
        &self,
        scope: &ScopeKey,
        name: &str,
        value: Option<&[u8]>,
        writer: &PrincipalKeys,
    ) -> Result<Envelope> {
        let mut arena = self.arena.lock().await;
        let keys = self.keys().await?;
        self.ensure_usable(&keys, &writer.signing_key_id)?;

        let generation = current(&arena, scope)?;
        let existing = generation.credential(name).map(|(_, c)| !c.is_unset());
        let action = match (value, existing) {
            (None, None) => return Err(PermsError::CredentialNotFound(name.to_string()).into()),
            (None, Some(_)) => PolicyAction::DELETE,
            (Some(_), Some(true)) => PolicyAction::UPDATE,
            (Some(_), _) => PolicyAction::CREATE,
        };
        self.check_policy(generation, writer, action, name).await?;

        let mut master = self.master_for(generation, writer, &keys)?;
        let envelope = write_credential(generation, &mut master, name, value, writer)?;
        let credential: Credential = envelope.body_as()?;
        let keyring_id = generation.keyring_id;

        self.advance(&mut arena, scope, keyring_id, &envelope).await?;
        arena.put_credential(scope, envelope.id, credential)?;
        Ok(envelope)
    }

    /// Decrypt credential `name` for `reader`.
    ///
    /// Returns `None` if the credential is unset. Fails with `KeyRevoked`
    /// once the reader's encryption key, or the key that granted their
    /// membership, has been revoked.
    pub async fn get_credential(
        &self,
        scope: &ScopeKey,
        name: &str,
        reader: &PrincipalKeys,
    ) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let arena = self.arena.lock().await;
        let keys = self.keys().await?;
        let generation = current(&arena, scope)?;
        let (_, credential) = generation
            .credential(name)
            .ok_or_else(|| PermsError::CredentialNotFound(name.to_string()))?;
        self.check_policy(generation, reader, PolicyAction::READ, name)
            .await?;

        let master = self.master_for(generation, reader, &keys)?;
        Ok(master.decrypt_credential(credential)?)
    }

    /// Latest version of every credential in the current generation,
    /// unset ones included.
    pub async fn list_credentials(&self, scope: &ScopeKey) -> Result<Vec<(Identifier, Credential)>> {
        let arena = self.arena.lock().await;
        Ok(current(&arena, scope)?.credentials().cloned().collect())
    }

    fn resolve_recipient(
        &self,
        keys: &KeySnapshot,
        org_id: &Identifier,
        owner_id: &Identifier,
    ) -> Result<Recipient> {
        let now = self.config.reject_expired_keys.then(now_millis);
        let (key_id, key) = keys
            .encryption_key(org_id, owner_id, now)
            .ok_or(VaultError::NoEncryptionKey(*owner_id))?;
        Ok(Recipient {
            owner_id: *owner_id,
            encryption_key_id: *key_id,
            public_key: encryption_recipient(key_id, key)?,
        })
    }

    fn master_for(
        &self,
        generation: &Generation,
        principal: &PrincipalKeys,
        keys: &KeySnapshot,
    ) -> Result<MasterSecret> {
        let (_, member) = generation
            .member_for(&principal.owner_id)
            .ok_or(VaultError::NotAMember {
                keyring_id: generation.keyring_id,
                owner_id: principal.owner_id,
            })?;
        let master = unwrap_member(member, principal, keys)?;
        if self.config.reject_expired_keys {
            self.ensure_usable(keys, &principal.encryption_key_id)?;
        }
        Ok(master)
    }

    async fn check_policy(
        &self,
        generation: &Generation,
        principal: &PrincipalKeys,
        action: PolicyAction,
        name: &str,
    ) -> Result<()> {
        if !self.config.enforce_policies {
            return Ok(());
        }
        let resource = format!("{}/{}", generation.keyring.pathexp, name);
        self.require(&generation.keyring.org_id, &principal.owner_id, action, &resource)
            .await
    }

    /// Persist `envelope` while confirming the head of `scope` is still
    /// `keyring_id`.
    async fn advance(
        &self,
        arena: &mut KeyringArena,
        scope: &ScopeKey,
        keyring_id: Identifier,
        envelope: &Envelope,
    ) -> Result<()> {
        let swap = self
            .store
            .swap_keyring_head(&scope.to_string(), Some(keyring_id), keyring_id, std::slice::from_ref(envelope))
            .await?;
        self.settle(arena, scope, Some(keyring_id), swap).await
    }

    async fn commit(&self, arena: &mut KeyringArena, planned: PlannedGeneration) -> Result<Identifier> {
        let PlannedGeneration {
            expected,
            generation,
            envelopes,
            ..
        } = planned;
        let scope = generation.scope();
        let keyring_id = generation.keyring_id;

        let swap = self
            .store
            .swap_keyring_head(&scope.to_string(), expected, keyring_id, &envelopes)
            .await?;
        self.settle(arena, &scope, expected, swap).await?;
        arena.commit(expected, generation)?;
        Ok(keyring_id)
    }

    async fn settle(
        &self,
        arena: &mut KeyringArena,
        scope: &ScopeKey,
        expected: Option<Identifier>,
        swap: HeadSwap,
    ) -> Result<()> {
        match swap {
            HeadSwap::Swapped => Ok(()),
            HeadSwap::Stale { actual } => {
                tracing::warn!(scope = %scope, ?expected, ?actual, "keyring head moved, reloading");
                *arena = self.load_arena().await?;
                Err(PermsError::StaleGeneration { expected, actual }.into())
            }
        }
    }
}

fn current<'a>(arena: &'a KeyringArena, scope: &ScopeKey) -> Result<&'a Generation> {
    arena
        .current(scope)
        .ok_or_else(|| PermsError::KeyringNotFound(scope.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use arcanum_core::{ObjectType, PolicyDocument, PolicyEffect, PolicyStatement};
    use arcanum_perms::KeyEncryptionKey;
    use arcanum_store::MemoryStore;

    fn org() -> Identifier {
        Identifier::derive(ObjectType::Org, b"acme")
    }

    fn project() -> Identifier {
        Identifier::derive(ObjectType::Project, b"web")
    }

    fn pathexp() -> PathExp {
        PathExp::new("acme", "web", "prod", "*", "*", "*").unwrap()
    }

    async fn vault(config: VaultConfig) -> Vault<MemoryStore> {
        Vault::open(MemoryStore::new(), config).await.unwrap()
    }

    async fn principal(vault: &Vault<MemoryStore>, name: &[u8]) -> PrincipalKeys {
        let owner = Identifier::derive(ObjectType::User, name);
        vault
            .generate_keypairs(org(), owner, &KeyEncryptionKey::generate())
            .await
            .unwrap()
            .keys
    }

    #[tokio::test]
    async fn test_set_and_get_credential() {
        let vault = vault(VaultConfig::default()).await;
        let alice = principal(&vault, b"alice").await;
        vault
            .create_keyring(org(), project(), pathexp(), &alice)
            .await
            .unwrap();
        let scope = ScopeKey::new(project(), &pathexp());

        vault
            .set_credential(&scope, "DB_PASSWORD", b"hunter2", &alice)
            .await
            .unwrap();
        let value = vault
            .get_credential(&scope, "DB_PASSWORD", &alice)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.as_slice(), b"hunter2");

        vault
            .unset_credential(&scope, "DB_PASSWORD", &alice)
            .await
            .unwrap();
        assert!(vault
            .get_credential(&scope, "DB_PASSWORD", &alice)
            .await
            .unwrap()
            .is_none());
        let listed = vault.list_credentials(&scope).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.version, 2);
    }

    #[tokio::test]
    async fn test_second_create_is_stale() {
        let vault = vault(VaultConfig::default()).await;
        let alice = principal(&vault, b"alice").await;
        vault
            .create_keyring(org(), project(), pathexp(), &alice)
            .await
            .unwrap();
        let err = vault
            .create_keyring(org(), project(), pathexp(), &alice)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::Permission(PermsError::StaleGeneration { .. })
        ));
    }

    #[tokio::test]
    async fn test_share_then_read() {
        let vault = vault(VaultConfig::default()).await;
        let alice = principal(&vault, b"alice").await;
        let bob = principal(&vault, b"bob").await;
        vault
            .create_keyring(org(), project(), pathexp(), &alice)
            .await
            .unwrap();
        let scope = ScopeKey::new(project(), &pathexp());
        vault
            .set_credential(&scope, "API_KEY", b"k-123", &alice)
            .await
            .unwrap();

        let err = vault
            .get_credential(&scope, "API_KEY", &bob)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotAMember { .. }));

        vault.share(&scope, &bob.owner_id, &alice).await.unwrap();
        let value = vault
            .get_credential(&scope, "API_KEY", &bob)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.as_slice(), b"k-123");

        let err = vault.share(&scope, &bob.owner_id, &alice).await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::Permission(PermsError::DuplicateMember { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_member_rotates() {
        let vault = vault(VaultConfig::default()).await;
        let alice = principal(&vault, b"alice").await;
        let bob = principal(&vault, b"bob").await;
        let first = vault
            .create_keyring(org(), project(), pathexp(), &alice)
            .await
            .unwrap();
        let scope = ScopeKey::new(project(), &pathexp());
        vault.share(&scope, &bob.owner_id, &alice).await.unwrap();
        vault
            .set_credential(&scope, "API_KEY", b"k-123", &alice)
            .await
            .unwrap();

        let second = vault
            .remove_member(&scope, &bob.owner_id, &alice)
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(vault.members(&scope).await.unwrap(), vec![alice.owner_id]);

        let value = vault
            .get_credential(&scope, "API_KEY", &alice)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.as_slice(), b"k-123");
        assert!(matches!(
            vault.get_credential(&scope, "API_KEY", &bob).await,
            Err(VaultError::NotAMember { .. })
        ));
    }

    #[tokio::test]
    async fn test_reload_restores_arena() {
        let vault = vault(VaultConfig::default()).await;
        let alice = principal(&vault, b"alice").await;
        vault
            .create_keyring(org(), project(), pathexp(), &alice)
            .await
            .unwrap();
        let scope = ScopeKey::new(project(), &pathexp());
        vault
            .set_credential(&scope, "TOKEN", b"abc", &alice)
            .await
            .unwrap();

        vault.reload().await.unwrap();
        let value = vault
            .get_credential(&scope, "TOKEN", &alice)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.as_slice(), b"abc");
    }

    #[tokio::test]
    async fn test_enforced_policy_gates_reads() {
        let config = VaultConfig {
            enforce_policies: true,
            ..VaultConfig::default()
        };
        let vault = vault(config).await;
        let alice = principal(&vault, b"alice").await;
        vault
            .create_keyring(org(), project(), pathexp(), &alice)
            .await
            .unwrap();
        let scope = ScopeKey::new(project(), &pathexp());

        let err = vault
            .set_credential(&scope, "TOKEN", b"abc", &alice)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized { .. }));

        let team = Identifier::derive(ObjectType::Team, b"devs");
        vault
            .create(
                arcanum_core::Membership::new(org(), alice.owner_id, team),
                &alice,
            )
            .await
            .unwrap();
        let document = PolicyDocument {
            name: "devs-write".to_string(),
            description: String::new(),
            statements: vec![PolicyStatement {
                effect: PolicyEffect::Allow,
                action: PolicyAction::CREATE | PolicyAction::READ,
                resource: "/acme/web/prod/*/*/*/*".to_string(),
            }],
        };
        let policy = vault
            .create_policy(org(), document, None, &alice)
            .await
            .unwrap();
        vault
            .attach_policy(org(), team, policy.id, &alice)
            .await
            .unwrap();

        vault
            .set_credential(&scope, "TOKEN", b"abc", &alice)
            .await
            .unwrap();
        assert!(vault
            .get_credential(&scope, "TOKEN", &alice)
            .await
            .unwrap()
            .is_some());
    }
}
