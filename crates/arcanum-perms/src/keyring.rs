//! Keyring generations and the arena that tracks them.
//!
//! A keyring scope is a `(project, path expression)` pair. Each scope owns a
//! list of generations; the last one is current. Changing who can read a
//! scope never edits a generation in place:
//!
//! - adding a member appends one `KeyringMember` row to the current generation
//! - removing a member rotates to a new generation with a fresh master
//!   secret, re-encrypting every live credential for the remaining members
//!
//! Writers race through [`KeyringArena::commit`], a compare-and-swap on the
//! current generation's identifier. A planned rotation is built completely
//! before it is committed, so a failure at any step leaves the arena as it
//! was and the caller retries from scratch.

use arcanum_core::{
    Credential, Envelope, Identifier, Keyring, KeyringMember, PathExp, Timestamp,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::error::{PermsError, Result};
use crate::keypair::PrincipalKeys;
use crate::master::MasterSecret;
use crate::member::{add_member, Recipient};

/// Index key for a keyring scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey {
    pub project_id: Identifier,
    pub pathexp: String,
}

impl ScopeKey {
    pub fn new(project_id: Identifier, pathexp: &PathExp) -> Self {
        Self {
            project_id,
            pathexp: pathexp.to_string(),
        }
    }

    pub fn of(keyring: &Keyring) -> Self {
        Self::new(keyring.project_id, &keyring.pathexp)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project_id, self.pathexp)
    }
}

/// One keyring generation with its member rows and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub keyring_id: Identifier,
    pub keyring: Keyring,
    /// Member rows keyed by owner. At most one per principal.
    members: BTreeMap<Identifier, (Identifier, KeyringMember)>,
    /// Latest version of each credential, keyed by name.
    credentials: BTreeMap<String, (Identifier, Credential)>,
}

impl Generation {
    pub fn new(keyring_id: Identifier, keyring: Keyring) -> Self {
        Self {
            keyring_id,
            keyring,
            members: BTreeMap::new(),
            credentials: BTreeMap::new(),
        }
    }

    pub fn scope(&self) -> ScopeKey {
        ScopeKey::of(&self.keyring)
    }

    pub fn member_for(&self, owner_id: &Identifier) -> Option<&(Identifier, KeyringMember)> {
        self.members.get(owner_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &(Identifier, KeyringMember)> {
        self.members.values()
    }

    pub fn credential(&self, name: &str) -> Option<&(Identifier, Credential)> {
        self.credentials.get(name)
    }

    pub fn credentials(&self) -> impl Iterator<Item = &(Identifier, Credential)> {
        self.credentials.values()
    }

    fn insert_member(&mut self, id: Identifier, member: KeyringMember) -> Result<()> {
        if member.keyring_id != self.keyring_id {
            return Err(PermsError::StaleGeneration {
                expected: Some(self.keyring_id),
                actual: Some(member.keyring_id),
            });
        }
        if self.members.contains_key(&member.owner_id) {
            return Err(PermsError::DuplicateMember {
                keyring_id: self.keyring_id,
                owner_id: member.owner_id,
            });
        }
        self.members.insert(member.owner_id, (id, member));
        Ok(())
    }

    fn insert_credential(&mut self, id: Identifier, credential: Credential) -> Result<()> {
        if credential.keyring_id != self.keyring_id {
            return Err(PermsError::StaleGeneration {
                expected: Some(self.keyring_id),
                actual: Some(credential.keyring_id),
            });
        }
        let head = self.credentials.get(&credential.name).map(|(id, _)| *id);
        let carried_over = credential
            .previous
            .map_or(false, |prev| !self.credentials.values().any(|(id, _)| *id == prev));
        // Either a fresh version of the current head, or the first version in
        // this generation carried over from the previous one.
        if credential.previous != head && !(head.is_none() && carried_over) {
            return Err(PermsError::StaleGeneration {
                expected: head,
                actual: credential.previous,
            });
        }
        self.credentials.insert(credential.name.clone(), (id, credential));
        Ok(())
    }
}

/// Every keyring generation, indexed by scope.
#[derive(Debug, Default)]
pub struct KeyringArena {
    scopes: HashMap<ScopeKey, Vec<Generation>>,
}

impl KeyringArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, scope: &ScopeKey) -> Option<&Generation> {
        self.scopes.get(scope).and_then(|gens| gens.last())
    }

    pub fn head(&self, scope: &ScopeKey) -> Option<Identifier> {
        self.current(scope).map(|g| g.keyring_id)
    }

    pub fn generations(&self, scope: &ScopeKey) -> &[Generation] {
        self.scopes.get(scope).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scopes(&self) -> impl Iterator<Item = &ScopeKey> {
        self.scopes.keys()
    }

    fn current_mut(&mut self, scope: &ScopeKey, keyring_id: &Identifier) -> Result<&mut Generation> {
        let current = self
            .scopes
            .get_mut(scope)
            .and_then(|gens| gens.last_mut())
            .ok_or_else(|| PermsError::KeyringNotFound(scope.to_string()))?;
        if current.keyring_id != *keyring_id {
            return Err(PermsError::StaleGeneration {
                expected: Some(*keyring_id),
                actual: Some(current.keyring_id),
            });
        }
        Ok(current)
    }

    /// Install `generation` as current if the scope's head is still `expected`.
    pub fn commit(&mut self, expected: Option<Identifier>, generation: Generation) -> Result<()> {
        let scope = generation.scope();
        let actual = self.head(&scope);
        if actual != expected || generation.keyring.previous != expected {
            return Err(PermsError::StaleGeneration { expected, actual });
        }
        tracing::info!(
            scope = %scope,
            keyring_id = %generation.keyring_id,
            version = generation.keyring.version,
            members = generation.members.len(),
            "committed keyring generation"
        );
        self.scopes.entry(scope).or_default().push(generation);
        Ok(())
    }

    /// Record a member row on the current generation of `scope`.
    pub fn add_member(&mut self, scope: &ScopeKey, id: Identifier, member: KeyringMember) -> Result<()> {
        let keyring_id = member.keyring_id;
        self.current_mut(scope, &keyring_id)?.insert_member(id, member)
    }

    /// Record a credential version on the current generation of `scope`.
    pub fn put_credential(&mut self, scope: &ScopeKey, id: Identifier, credential: Credential) -> Result<()> {
        let keyring_id = credential.keyring_id;
        self.current_mut(scope, &keyring_id)?.insert_credential(id, credential)
    }

    /// Rebuild the arena from persisted bodies, e.g. after loading a store.
    ///
    /// Keyrings are ordered by version within each scope; members and
    /// credentials attach to the generation named by their `keyring_id`.
    /// For credentials, the highest version of each name wins.
    pub fn restore(
        keyrings: Vec<(Identifier, Keyring)>,
        members: Vec<(Identifier, KeyringMember)>,
        credentials: Vec<(Identifier, Credential)>,
    ) -> Self {
        let mut by_id: HashMap<Identifier, Generation> = keyrings
            .into_iter()
            .map(|(id, keyring)| (id, Generation::new(id, keyring)))
            .collect();

        for (id, member) in members {
            if let Some(gen) = by_id.get_mut(&member.keyring_id) {
                gen.members.entry(member.owner_id).or_insert((id, member));
            }
        }
        for (id, credential) in credentials {
            if let Some(gen) = by_id.get_mut(&credential.keyring_id) {
                let newer = gen
                    .credentials
                    .get(&credential.name)
                    .map_or(true, |(_, existing)| credential.version > existing.version);
                if newer {
                    gen.credentials.insert(credential.name.clone(), (id, credential));
                }
            }
        }

        let mut scopes: HashMap<ScopeKey, Vec<Generation>> = HashMap::new();
        for gen in by_id.into_values() {
            scopes.entry(gen.scope()).or_default().push(gen);
        }
        for gens in scopes.values_mut() {
            gens.sort_by_key(|g| g.keyring.version);
        }
        Self { scopes }
    }
}

/// A new generation, fully built and signed, waiting to be committed.
pub struct PlannedGeneration {
    /// Head the plan was built against; pass to [`KeyringArena::commit`].
    pub expected: Option<Identifier>,
    pub generation: Generation,
    pub master: MasterSecret,
    /// Keyring, member and credential envelopes to persist.
    pub envelopes: Vec<Envelope>,
}

impl fmt::Debug for PlannedGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedGeneration")
            .field("expected", &self.expected)
            .field("keyring_id", &self.generation.keyring_id)
            .field("envelopes", &self.envelopes.len())
            .finish()
    }
}

/// Start the first generation of a scope with `creator` as its only member.
pub fn create_keyring(
    arena: &KeyringArena,
    org_id: Identifier,
    project_id: Identifier,
    pathexp: PathExp,
    creator: &PrincipalKeys,
    now: Timestamp,
) -> Result<PlannedGeneration> {
    let scope = ScopeKey::new(project_id, &pathexp);
    if let Some(actual) = arena.head(&scope) {
        return Err(PermsError::StaleGeneration {
            expected: None,
            actual: Some(actual),
        });
    }
    let keyring = Keyring::new(org_id, project_id, pathexp, None, 1, now);
    plan(keyring, None, None, &[Recipient::of(creator)], creator, now)
}

/// Rotate `scope` to a new generation readable only by `recipients`.
///
/// `current_master` must be the current generation's master secret; it is
/// used to re-encrypt every set credential under the new secret.
pub fn rotate_keyring(
    arena: &KeyringArena,
    scope: &ScopeKey,
    current_master: &MasterSecret,
    recipients: &[Recipient],
    rotator: &PrincipalKeys,
    now: Timestamp,
) -> Result<PlannedGeneration> {
    let current = arena
        .current(scope)
        .ok_or_else(|| PermsError::KeyringNotFound(scope.to_string()))?;
    let keyring = Keyring::new(
        current.keyring.org_id,
        current.keyring.project_id,
        current.keyring.pathexp.clone(),
        Some(current.keyring_id),
        current.keyring.version + 1,
        now,
    );
    plan(
        keyring,
        Some(current),
        Some(current_master),
        recipients,
        rotator,
        now,
    )
}

fn plan(
    keyring: Keyring,
    current: Option<&Generation>,
    current_master: Option<&MasterSecret>,
    recipients: &[Recipient],
    granter: &PrincipalKeys,
    now: Timestamp,
) -> Result<PlannedGeneration> {
    let mut seen = HashSet::new();
    let keyring_env = Envelope::seal(keyring.clone(), &granter.signing, Some(granter.signing_key_id))?;
    let keyring_id = keyring_env.id;
    for recipient in recipients {
        if !seen.insert(recipient.owner_id) {
            return Err(PermsError::DuplicateMember {
                keyring_id,
                owner_id: recipient.owner_id,
            });
        }
    }

    let expected = keyring.previous;
    let mut generation = Generation::new(keyring_id, keyring);
    let mut master = MasterSecret::generate();
    let mut envelopes = vec![keyring_env];

    for recipient in recipients {
        let env = add_member(keyring_id, &generation.keyring, &master, recipient, granter, now)?;
        let member: KeyringMember = env.body_as()?;
        generation.insert_member(env.id, member)?;
        envelopes.push(env);
    }

    if let (Some(current), Some(current_master)) = (current, current_master) {
        for (old_id, old) in current.credentials() {
            let Some(plaintext) = current_master.decrypt_credential(old)? else {
                continue;
            };
            let nonce = MasterSecret::credential_nonce();
            let value = master.encrypt_credential(&nonce, &plaintext)?;
            let credential = Credential::new(
                keyring_id,
                &generation.keyring,
                &old.name,
                nonce.to_vec(),
                Some(value),
                Some(*old_id),
                old.version + 1,
            );
            let env = Envelope::seal(credential.clone(), &granter.signing, Some(granter.signing_key_id))?;
            generation.insert_credential(env.id, credential)?;
            envelopes.push(env);
        }
    }

    Ok(PlannedGeneration {
        expected,
        generation,
        master,
        envelopes,
    })
}

/// Seal a new version of credential `name` in the current generation.
///
/// `value = None` records an unset credential.
pub fn write_credential(
    generation: &Generation,
    master: &mut MasterSecret,
    name: &str,
    value: Option<&[u8]>,
    writer: &PrincipalKeys,
) -> Result<Envelope> {
    let head = generation.credential(name);
    let nonce = MasterSecret::credential_nonce();
    let sealed = value
        .map(|plaintext| master.encrypt_credential(&nonce, plaintext))
        .transpose()?;
    let credential = Credential::new(
        generation.keyring_id,
        &generation.keyring,
        name,
        nonce.to_vec(),
        sealed,
        head.map(|(id, _)| *id),
        head.map_or(1, |(_, c)| c.version + 1),
    );
    let env = Envelope::seal(credential, &writer.signing, Some(writer.signing_key_id))?;
    tracing::debug!(
        keyring_id = %generation.keyring_id,
        credential_id = %env.id,
        name,
        unset = value.is_none(),
        "sealed credential version"
    );
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::{generate_keypairs, KeyEncryptionKey};
    use crate::member::unwrap_member;
    use arcanum_core::{ObjectType, TrustedKeys};

    fn org() -> Identifier {
        Identifier::derive(ObjectType::Org, b"acme")
    }

    fn project() -> Identifier {
        Identifier::derive(ObjectType::Project, b"web")
    }

    fn pathexp() -> PathExp {
        PathExp::new("acme", "web", "*", "*", "*", "*").unwrap()
    }

    fn principal(name: &[u8]) -> PrincipalKeys {
        generate_keypairs(
            org(),
            Identifier::derive(ObjectType::User, name),
            &KeyEncryptionKey::generate(),
            0,
            i64::MAX,
        )
        .unwrap()
        .keys
    }

    fn created(arena: &mut KeyringArena, alice: &PrincipalKeys) -> (ScopeKey, MasterSecret) {
        let planned = create_keyring(arena, org(), project(), pathexp(), alice, 1).unwrap();
        let scope = planned.generation.scope();
        arena.commit(planned.expected, planned.generation).unwrap();
        (scope, planned.master)
    }

    fn member_env(
        arena: &KeyringArena,
        scope: &ScopeKey,
        master: &MasterSecret,
        who: &PrincipalKeys,
        granter: &PrincipalKeys,
    ) -> Envelope {
        let gen = arena.current(scope).unwrap();
        add_member(gen.keyring_id, &gen.keyring, master, &Recipient::of(who), granter, 2).unwrap()
    }

    #[test]
    fn test_create_commits_first_generation() {
        let alice = principal(b"alice");
        let mut arena = KeyringArena::new();
        let (scope, master) = created(&mut arena, &alice);

        let gen = arena.current(&scope).unwrap();
        assert_eq!(gen.keyring.version, 1);
        assert!(gen.keyring.previous.is_none());
        let (_, member) = gen.member_for(&alice.owner_id).unwrap();
        let recovered = unwrap_member(member, &alice, &TrustedKeys::new()).unwrap();
        assert_eq!(recovered.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_second_create_is_stale() {
        let alice = principal(b"alice");
        let mut arena = KeyringArena::new();
        created(&mut arena, &alice);
        assert!(matches!(
            create_keyring(&arena, org(), project(), pathexp(), &alice, 5),
            Err(PermsError::StaleGeneration { expected: None, .. })
        ));
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let alice = principal(b"alice");
        let bob = principal(b"bob");
        let mut arena = KeyringArena::new();
        let (scope, master) = created(&mut arena, &alice);

        let first = member_env(&arena, &scope, &master, &bob, &alice);
        arena.add_member(&scope, first.id, first.body_as().unwrap()).unwrap();

        let second = member_env(&arena, &scope, &master, &bob, &alice);
        assert!(matches!(
            arena.add_member(&scope, second.id, second.body_as().unwrap()),
            Err(PermsError::DuplicateMember { .. })
        ));
    }

    #[test]
    fn test_concurrent_rotations_one_wins() {
        let alice = principal(b"alice");
        let bob = principal(b"bob");
        let mut arena = KeyringArena::new();
        let (scope, master) = created(&mut arena, &alice);

        let a = rotate_keyring(&arena, &scope, &master, &[Recipient::of(&alice)], &alice, 10).unwrap();
        let b = rotate_keyring(&arena, &scope, &master, &[Recipient::of(&bob)], &alice, 11).unwrap();

        arena.commit(a.expected, a.generation).unwrap();
        assert!(matches!(
            arena.commit(b.expected, b.generation),
            Err(PermsError::StaleGeneration { .. })
        ));
        assert_eq!(arena.generations(&scope).len(), 2);
    }

    #[test]
    fn test_member_on_old_generation_is_stale() {
        let alice = principal(b"alice");
        let bob = principal(b"bob");
        let mut arena = KeyringArena::new();
        let (scope, master) = created(&mut arena, &alice);
        let old_member = member_env(&arena, &scope, &master, &bob, &alice);

        let rotated = rotate_keyring(&arena, &scope, &master, &[Recipient::of(&alice)], &alice, 10).unwrap();
        arena.commit(rotated.expected, rotated.generation).unwrap();

        assert!(matches!(
            arena.add_member(&scope, old_member.id, old_member.body_as().unwrap()),
            Err(PermsError::StaleGeneration { .. })
        ));
    }

    #[test]
    fn test_rotation_reencrypts_credentials_for_remaining_members() {
        let alice = principal(b"alice");
        let bob = principal(b"bob");
        let mut arena = KeyringArena::new();
        let (scope, mut master) = created(&mut arena, &alice);

        let gen = arena.current(&scope).unwrap().clone();
        let set = write_credential(&gen, &mut master, "DB_PASSWORD", Some(b"hunter2"), &alice).unwrap();
        arena.put_credential(&scope, set.id, set.body_as().unwrap()).unwrap();
        let gen = arena.current(&scope).unwrap().clone();
        let unset = write_credential(&gen, &mut master, "OLD_TOKEN", None, &alice).unwrap();
        arena.put_credential(&scope, unset.id, unset.body_as().unwrap()).unwrap();

        let rotated = rotate_keyring(&arena, &scope, &master, &[Recipient::of(&bob)], &alice, 10).unwrap();
        // keyring + one member + one live credential
        assert_eq!(rotated.envelopes.len(), 3);
        let new_master_bytes = *rotated.master.as_bytes();
        arena.commit(rotated.expected, rotated.generation).unwrap();

        let current = arena.current(&scope).unwrap();
        assert_eq!(current.keyring.version, 2);
        assert!(current.member_for(&alice.owner_id).is_none());
        assert!(current.credential("OLD_TOKEN").is_none());

        let (_, member) = current.member_for(&bob.owner_id).unwrap();
        let bob_master = unwrap_member(member, &bob, &TrustedKeys::new()).unwrap();
        assert_eq!(bob_master.as_bytes(), &new_master_bytes);

        let (_, cred) = current.credential("DB_PASSWORD").unwrap();
        assert_eq!(cred.version, 2);
        assert_eq!(cred.previous, Some(set.id));
        let plaintext = bob_master.decrypt_credential(cred).unwrap().unwrap();
        assert_eq!(&plaintext[..], b"hunter2");

        // The old generation is kept intact as history.
        let old = &arena.generations(&scope)[0];
        assert!(old.member_for(&alice.owner_id).is_some());
        assert!(master.decrypt_credential(cred).is_err());
    }

    #[test]
    fn test_stale_credential_write_rejected() {
        let alice = principal(b"alice");
        let mut arena = KeyringArena::new();
        let (scope, mut master) = created(&mut arena, &alice);

        let gen = arena.current(&scope).unwrap().clone();
        let a = write_credential(&gen, &mut master, "API_KEY", Some(b"one"), &alice).unwrap();
        let b = write_credential(&gen, &mut master, "API_KEY", Some(b"two"), &alice).unwrap();
        arena.put_credential(&scope, a.id, a.body_as().unwrap()).unwrap();
        assert!(matches!(
            arena.put_credential(&scope, b.id, b.body_as().unwrap()),
            Err(PermsError::StaleGeneration { .. })
        ));
    }

    #[test]
    fn test_restore_rebuilds_generations() {
        let alice = principal(b"alice");
        let mut arena = KeyringArena::new();
        let (scope, master) = created(&mut arena, &alice);
        let rotated = rotate_keyring(&arena, &scope, &master, &[Recipient::of(&alice)], &alice, 10).unwrap();
        arena.commit(rotated.expected, rotated.generation).unwrap();

        let mut keyrings = Vec::new();
        let mut members = Vec::new();
        for gen in arena.generations(&scope) {
            keyrings.push((gen.keyring_id, gen.keyring.clone()));
            members.extend(gen.members().cloned());
        }
        keyrings.reverse();

        let restored = KeyringArena::restore(keyrings, members, Vec::new());
        assert_eq!(restored.generations(&scope), arena.generations(&scope));
    }
}
