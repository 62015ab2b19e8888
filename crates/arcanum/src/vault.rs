//! The Vault: the operations the transport layer calls.
//!
//! The Vault brings together verified storage, the keyring engine, policy
//! evaluation and the invite state machine. Keyring and credential
//! operations live in `keyrings.rs`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arcanum_core::{
    now_millis, Body, Claim, ClaimChain, ClaimType, CoreError, Envelope, Identifier, InviteCode,
    InviteState, KeyDirectory, KeyType, Membership, Object, ObjectType, OrgInvite, Policy,
    PolicyAction, PolicyAttachment, PolicyDocument, PolicyStatement, PrivateKey, PublicKey,
};
use arcanum_perms::{
    evaluate, generate_keypairs, validate, Decision, GeneratedKeypairs, KeyEncryptionKey,
    KeyringArena, KeypairResult, PrincipalKeys,
};
use arcanum_store::{InsertResult, Store};
use tokio::sync::Mutex;

use crate::config::VaultConfig;
use crate::directory::{verify_integrity, verify_stored, KeySnapshot};
use crate::error::{Result, VaultError};

/// Policy type recorded on policies created through the Vault.
pub const USER_POLICY: &str = "user";

/// The main Vault struct.
pub struct Vault<S: Store> {
    pub(crate) store: Arc<S>,
    pub(crate) config: VaultConfig,
    /// Cache of keyring generations. Writers hold the lock across the store
    /// compare-and-swap so cache and store move together.
    pub(crate) arena: Mutex<KeyringArena>,
    /// Held while a new invite or policy version is checked and stored, so a
    /// version is superseded at most once.
    pub(crate) chains: Mutex<()>,
}

impl<S: Store> Vault<S> {
    /// Open a vault over `store`, loading the keyring cache.
    pub async fn open(store: S, config: VaultConfig) -> Result<Self> {
        let vault = Self {
            store: Arc::new(store),
            config,
            arena: Mutex::new(KeyringArena::new()),
            chains: Mutex::new(()),
        };
        vault.reload().await?;
        Ok(vault)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    /// Every stored public key and claim, integrity-checked when configured.
    pub async fn keys(&self) -> Result<KeySnapshot> {
        let key_envs = self.store.list_by_type(ObjectType::PublicKey).await?;
        let claim_envs = self.store.list_by_type(ObjectType::Claim).await?;

        let keys = key_envs
            .iter()
            .map(|env| Ok((env.id, env.body_as::<PublicKey>()?)))
            .collect::<Result<Vec<_>>>()?;
        let claims = claim_envs
            .iter()
            .map(|env| Ok((env.id, env.body_as::<Claim>()?)))
            .collect::<Result<Vec<_>>>()?;
        let snapshot = KeySnapshot::new(keys, claims);

        if self.config.verify_on_read {
            for env in key_envs.iter().chain(&claim_envs) {
                verify_integrity(env, &snapshot).map_err(|e| {
                    tracing::warn!(id = %env.id, error = %e, "stored key record failed verification");
                    e
                })?;
            }
        }
        Ok(snapshot)
    }

    /// Get an envelope by identifier.
    ///
    /// With `verify_on_read`, the signature is checked and the signer must
    /// not be revoked. Keys and claims are checked for integrity only.
    pub async fn get(&self, id: &Identifier) -> Result<Option<Envelope>> {
        let Some(envelope) = self.store.get(id).await? else {
            return Ok(None);
        };
        if self.config.verify_on_read {
            let keys = self.keys().await?;
            verify_stored(&envelope, &keys)?;
        }
        Ok(Some(envelope))
    }

    pub(crate) async fn get_body<B: Body>(&self, id: &Identifier) -> Result<B> {
        let envelope = self.get(id).await?.ok_or(VaultError::NotFound(*id))?;
        Ok(envelope.into_body()?)
    }

    /// Every body of type `B`, integrity-checked when configured.
    pub(crate) async fn load_bodies<B: Body>(&self, keys: &KeySnapshot) -> Result<Vec<(Identifier, B)>> {
        self.store
            .list_by_type(B::TYPE)
            .await?
            .into_iter()
            .map(|env| {
                if self.config.verify_on_read {
                    verify_integrity(&env, keys)?;
                }
                Ok((env.id, env.into_body()?))
            })
            .collect()
    }

    /// Every body of type `B` whose signer is not revoked. Used for the
    /// objects authorization is derived from.
    pub(crate) async fn load_granting<B: Body>(&self, keys: &KeySnapshot) -> Result<Vec<(Identifier, B)>> {
        let mut bodies = Vec::new();
        for env in self.store.list_by_type(B::TYPE).await? {
            if self.config.verify_on_read {
                verify_integrity(&env, keys)?;
            }
            if let Some(signer) = env.sig.public_key_id.filter(|signer| keys.is_revoked(signer)) {
                tracing::debug!(id = %env.id, signer = %signer, "ignoring object signed by revoked key");
                continue;
            }
            bodies.push((env.id, env.into_body()?));
        }
        Ok(bodies)
    }

    /// Stored versions of type `B` that name `id` as their predecessor.
    async fn successors<B: Body>(
        &self,
        id: &Identifier,
        previous: impl Fn(&B) -> Option<Identifier>,
    ) -> Result<Vec<Identifier>> {
        let mut found = Vec::new();
        for env in self.store.list_by_type(B::TYPE).await? {
            if previous(&env.body_as::<B>()?) == Some(*id) {
                found.push(env.id);
            }
        }
        Ok(found)
    }

    /// Check that `key_id` may sign or receive secrets right now.
    pub(crate) fn ensure_usable(&self, keys: &KeySnapshot, key_id: &Identifier) -> Result<PublicKey> {
        let key = keys
            .public_key(key_id)
            .ok_or(CoreError::UnknownSigner(*key_id))?;
        if keys.is_revoked(key_id) {
            tracing::warn!(key_id = %key_id, "refused revoked key");
            return Err(CoreError::KeyRevoked(*key_id).into());
        }
        if self.config.reject_expired_keys && key.is_expired(now_millis()) {
            tracing::warn!(key_id = %key_id, expires_at = key.expires_at, "refused expired key");
            return Err(CoreError::KeyExpired(*key_id).into());
        }
        Ok(key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writing
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify and store an envelope built elsewhere.
    ///
    /// Keyring objects must go through the keyring operations so the
    /// generation head stays consistent. Claims must be signed by the owner
    /// of the key they name. Invite and policy versions must extend a
    /// version nothing else has replaced yet.
    pub async fn ingest(&self, envelope: &Envelope) -> Result<InsertResult> {
        let _chains = match envelope.object_type() {
            ObjectType::OrgInvite | ObjectType::Policy => Some(self.chains.lock().await),
            _ => None,
        };
        self.admissible(envelope).await?;
        self.put_admitted(envelope).await
    }

    async fn put_admitted(&self, envelope: &Envelope) -> Result<InsertResult> {
        let result = self.store.put(envelope).await?;
        tracing::debug!(id = %envelope.id, object_type = %envelope.object_type(), ?result, "ingested envelope");
        Ok(result)
    }

    /// Every check `ingest` makes before writing. Callers storing invite or
    /// policy versions hold `chains`.
    async fn admissible(&self, envelope: &Envelope) -> Result<()> {
        if matches!(
            envelope.object_type(),
            ObjectType::Keyring | ObjectType::KeyringMember | ObjectType::Credential
        ) {
            return Err(VaultError::InvalidOperation(format!(
                "{} objects are written through keyring operations",
                envelope.object_type()
            )));
        }

        let keys = self.keys().await?;
        if let Err(e) = envelope.verify(&keys) {
            tracing::warn!(id = %envelope.id, error = %e, "rejected envelope");
            return Err(e.into());
        }
        if let Some(signer) = envelope.sig.public_key_id {
            self.ensure_usable(&keys, &signer)?;
        }

        match &envelope.body {
            Object::Claim(claim) => check_claim_signer(&keys, claim, envelope.sig.public_key_id),
            Object::OrgInvite(invite) => self.check_invite_link(&envelope.id, invite).await,
            Object::Policy(policy) => self.check_policy_link(&envelope.id, policy).await,
            _ => Ok(()),
        }
    }

    async fn check_invite_link(&self, id: &Identifier, invite: &OrgInvite) -> Result<()> {
        let Some(previous_id) = invite.previous else {
            if invite.state == InviteState::Pending {
                return Ok(());
            }
            return Err(VaultError::InvalidOperation(format!(
                "{} invite {} names no previous version",
                invite.state, id
            )));
        };
        let previous: OrgInvite = self.get_body(&previous_id).await?;
        let refused = CoreError::InvalidStateTransition {
            from: previous.state.to_string(),
            to: invite.state.to_string(),
        };
        if !previous.is_succeeded_by(invite)? {
            tracing::warn!(invite_id = %id, previous = %previous_id, "invite does not follow its previous version");
            return Err(refused.into());
        }
        let replaced = self
            .successors::<OrgInvite>(&previous_id, |i| i.previous)
            .await?;
        if replaced.iter().any(|other| other != id) {
            tracing::warn!(invite_id = %id, previous = %previous_id, "invite version already replaced");
            return Err(refused.into());
        }
        Ok(())
    }

    async fn check_policy_link(&self, id: &Identifier, policy: &Policy) -> Result<()> {
        let Some(previous_id) = policy.previous else {
            return Ok(());
        };
        let previous: Policy = self.get_body(&previous_id).await?;
        if previous.org_id != policy.org_id {
            return Err(VaultError::InvalidOperation(format!(
                "policy {} supersedes {} from another org",
                id, previous_id
            )));
        }
        let replaced = self.successors::<Policy>(&previous_id, |p| p.previous).await?;
        if let Some(other) = replaced.iter().find(|other| *other != id) {
            return Err(VaultError::InvalidOperation(format!(
                "policy {} is already superseded by {}",
                previous_id, other
            )));
        }
        Ok(())
    }

    /// Seal `body` with `signer`'s signing key and store it.
    pub async fn create(&self, body: impl Into<Object>, signer: &PrincipalKeys) -> Result<Envelope> {
        let envelope = Envelope::seal(body, &signer.signing, Some(signer.signing_key_id))?;
        self.ingest(&envelope).await?;
        Ok(envelope)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keypairs
    // ─────────────────────────────────────────────────────────────────────────

    /// Generate, sign and store a signing and an encryption keypair.
    ///
    /// Private halves are sealed under `kek` before they reach the store.
    pub async fn generate_keypairs(
        &self,
        org_id: Identifier,
        owner_id: Identifier,
        kek: &KeyEncryptionKey,
    ) -> Result<GeneratedKeypairs> {
        let generated = generate_keypairs(org_id, owner_id, kek, now_millis(), self.config.key_lifetime_ms)?;
        for result in [&generated.signing, &generated.encryption] {
            self.store.put(&result.public_key).await?;
            self.store.put(&result.private_key).await?;
            for claim in &result.claims {
                self.store.put(claim).await?;
            }
        }
        tracing::info!(
            org_id = %org_id,
            owner_id = %owner_id,
            signing_key_id = %generated.keys.signing_key_id,
            encryption_key_id = %generated.keys.encryption_key_id,
            "stored principal keypairs"
        );
        Ok(generated)
    }

    /// Every keypair in `org_id`, optionally only those of `owner_id`,
    /// revoked ones included.
    pub async fn list_keypairs(
        &self,
        org_id: &Identifier,
        owner_id: Option<&Identifier>,
    ) -> Result<Vec<KeypairResult>> {
        let keys = self.keys().await?;
        let mut privates: HashMap<Identifier, Envelope> = HashMap::new();
        for env in self.store.list_by_type(ObjectType::PrivateKey).await? {
            if self.config.verify_on_read {
                verify_integrity(&env, &keys)?;
            }
            let private: PrivateKey = env.body_as()?;
            privates.insert(private.public_key_id, env);
        }
        let claim_envs = self.store.list_by_type(ObjectType::Claim).await?;
        let public_envs = self.store.list_by_type(ObjectType::PublicKey).await?;

        let mut results = Vec::new();
        for public_env in public_envs {
            let public: PublicKey = public_env.body_as()?;
            if public.org_id != *org_id || owner_id.map_or(false, |o| public.owner_id != *o) {
                continue;
            }
            let Some(private_env) = privates.remove(&public_env.id) else {
                continue;
            };
            let claims = claim_envs
                .iter()
                .filter(|env| {
                    env.body_as::<Claim>()
                        .map_or(false, |c| c.public_key_id == public_env.id)
                })
                .cloned()
                .collect();
            results.push(KeypairResult {
                public_key: public_env,
                private_key: private_env,
                claims,
            });
        }
        Ok(results)
    }

    /// Append a revocation claim to the chain of `key_id`.
    ///
    /// `signer` must own the key. A signing key may revoke itself; that is
    /// the last thing it signs.
    pub async fn revoke_key(&self, key_id: &Identifier, signer: &PrincipalKeys) -> Result<Envelope> {
        let keys = self.keys().await?;
        self.ensure_usable(&keys, &signer.signing_key_id)?;
        let key = keys.public_key(key_id).ok_or(VaultError::NotFound(*key_id))?;
        if key.owner_id != signer.owner_id || key.org_id != signer.org_id {
            return Err(VaultError::InvalidOperation(format!(
                "{} may not revoke key {} of {}",
                signer.owner_id, key_id, key.owner_id
            )));
        }

        let mut chain = ClaimChain::collect(*key_id, key.org_id, key.owner_id, keys.claims_for(key_id));
        if chain.is_revoked() {
            return Err(CoreError::KeyRevoked(*key_id).into());
        }
        let (_, claim) = chain.extend(ClaimType::Revocation, now_millis())?;
        let envelope = Envelope::seal(claim, &signer.signing, Some(signer.signing_key_id))?;
        self.ingest(&envelope).await?;

        tracing::info!(
            key_id = %key_id,
            owner_id = %key.owner_id,
            key_type = %key.key_type,
            claim_id = %envelope.id,
            "revoked key"
        );
        Ok(envelope)
    }

    /// Revoke every unrevoked key `signer` holds in its org.
    ///
    /// The signing key used to sign the claims is revoked last.
    pub async fn revoke_keypairs(&self, signer: &PrincipalKeys) -> Result<Vec<Envelope>> {
        let keys = self.keys().await?;
        let mut targets: Vec<(Identifier, KeyType)> = keys
            .keys_of(&signer.org_id, &signer.owner_id)
            .filter(|(id, _)| !keys.is_revoked(id))
            .map(|(id, k)| (*id, k.key_type))
            .collect();
        targets.sort_by_key(|(id, _)| *id == signer.signing_key_id);

        let mut claims = Vec::with_capacity(targets.len());
        for (key_id, _) in targets {
            claims.push(self.revoke_key(&key_id, signer).await?);
        }
        Ok(claims)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Org invites
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a pending invite. The code is returned once and only its
    /// salted hash is stored.
    pub async fn invite(
        &self,
        org_id: Identifier,
        email: &str,
        pending_teams: Vec<Identifier>,
        inviter: &PrincipalKeys,
    ) -> Result<(Envelope, InviteCode)> {
        let (invite, code) = OrgInvite::new(org_id, email, inviter.owner_id, pending_teams, now_millis());
        let envelope = self.create(invite, inviter).await?;
        tracing::info!(invite_id = %envelope.id, org_id = %org_id, "created org invite");
        Ok((envelope, code))
    }

    /// pending -> associated.
    pub async fn associate_invite(
        &self,
        invite_id: &Identifier,
        invitee_id: Identifier,
        signer: &PrincipalKeys,
    ) -> Result<Envelope> {
        let _chains = self.chains.lock().await;
        let invite = self.current_invite(invite_id, InviteState::Associated).await?;
        let next = invite.associate(invitee_id)?;
        self.store_transition(invite_id, next, signer).await
    }

    /// associated -> accepted. Fails with `InviteCodeMismatch` on a wrong
    /// code, leaving the invite untouched.
    pub async fn accept_invite(
        &self,
        invite_id: &Identifier,
        code: &str,
        signer: &PrincipalKeys,
    ) -> Result<Envelope> {
        let _chains = self.chains.lock().await;
        let invite = self.current_invite(invite_id, InviteState::Accepted).await?;
        let next = invite.accept(code, now_millis()).map_err(|e| {
            tracing::warn!(invite_id = %invite_id, error = %e, "invite acceptance refused");
            e
        })?;
        self.store_transition(invite_id, next, signer).await
    }

    /// accepted -> approved. The approved invite and one membership per
    /// pending team are stored together or not at all.
    pub async fn approve_invite(
        &self,
        invite_id: &Identifier,
        approver: &PrincipalKeys,
    ) -> Result<(Envelope, Vec<Envelope>)> {
        let _chains = self.chains.lock().await;
        let invite = self.current_invite(invite_id, InviteState::Approved).await?;
        let (next, memberships) = invite.approve(approver.owner_id, now_millis())?;

        let membership_envs = memberships
            .into_iter()
            .map(|m| Envelope::seal(m, &approver.signing, Some(approver.signing_key_id)))
            .collect::<arcanum_core::Result<Vec<_>>>()?;
        let envelope = Envelope::seal(next, &approver.signing, Some(approver.signing_key_id))?;
        for env in membership_envs.iter().chain(std::iter::once(&envelope)) {
            self.admissible(env).await?;
        }

        let mut batch = membership_envs.clone();
        batch.push(envelope.clone());
        self.store.put_batch(&batch).await?;
        tracing::info!(
            from = %invite_id,
            to = %envelope.id,
            memberships = membership_envs.len(),
            "invite approved"
        );
        Ok((envelope, membership_envs))
    }

    /// Load `invite_id`, refusing it if a later version already replaced it.
    async fn current_invite(&self, invite_id: &Identifier, to: InviteState) -> Result<OrgInvite> {
        let invite: OrgInvite = self.get_body(invite_id).await?;
        let replaced = self.successors::<OrgInvite>(invite_id, |i| i.previous).await?;
        if let Some(successor) = replaced.first() {
            tracing::warn!(invite_id = %invite_id, successor = %successor, "invite already transitioned");
            return Err(CoreError::InvalidStateTransition {
                from: invite.state.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        Ok(invite)
    }

    /// Seal and store the next invite version. Callers hold `chains`.
    async fn store_transition(
        &self,
        from: &Identifier,
        next: OrgInvite,
        signer: &PrincipalKeys,
    ) -> Result<Envelope> {
        let state = next.state;
        let envelope = Envelope::seal(next, &signer.signing, Some(signer.signing_key_id))?;
        self.admissible(&envelope).await?;
        self.put_admitted(&envelope).await?;
        tracing::info!(from = %from, to = %envelope.id, state = %state, "invite transitioned");
        Ok(envelope)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Policies
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and store a policy. `previous` links a new version to the
    /// one it supersedes, which must be the newest version of its chain.
    pub async fn create_policy(
        &self,
        org_id: Identifier,
        document: PolicyDocument,
        previous: Option<Identifier>,
        signer: &PrincipalKeys,
    ) -> Result<Envelope> {
        validate(&document).map_err(arcanum_perms::PermsError::from)?;
        self.create(Policy::new(org_id, USER_POLICY, document, previous), signer)
            .await
    }

    /// Attach a policy to a team.
    pub async fn attach_policy(
        &self,
        org_id: Identifier,
        team_id: Identifier,
        policy_id: Identifier,
        signer: &PrincipalKeys,
    ) -> Result<Envelope> {
        let _: Policy = self.get_body(&policy_id).await?;
        self.create(PolicyAttachment::new(org_id, team_id, policy_id), signer)
            .await
    }

    /// Statements that apply to `owner_id` in `org_id`.
    ///
    /// Follows team memberships to attachments, and each attached policy to
    /// its newest version. Objects signed by a revoked key grant nothing.
    /// Where a version has more than one successor, the greatest identifier
    /// wins.
    pub async fn statements_for(
        &self,
        org_id: &Identifier,
        owner_id: &Identifier,
    ) -> Result<Vec<PolicyStatement>> {
        let keys = self.keys().await?;
        let teams: HashSet<Identifier> = self
            .load_granting::<Membership>(&keys)
            .await?
            .into_iter()
            .filter(|(_, m)| m.org_id == *org_id && m.owner_id == *owner_id)
            .map(|(_, m)| m.team_id)
            .collect();
        let attached: Vec<Identifier> = self
            .load_granting::<PolicyAttachment>(&keys)
            .await?
            .into_iter()
            .filter(|(_, a)| a.org_id == *org_id && teams.contains(&a.owner_id))
            .map(|(_, a)| a.policy_id)
            .collect();

        let policies: HashMap<Identifier, Policy> = self
            .load_granting::<Policy>(&keys)
            .await?
            .into_iter()
            .filter(|(_, p)| p.org_id == *org_id)
            .collect();
        let mut successor: HashMap<Identifier, Identifier> = HashMap::new();
        for (id, policy) in &policies {
            if let Some(prev) = policy.previous {
                let newest = successor.entry(prev).or_insert(*id);
                if *id > *newest {
                    *newest = *id;
                }
            }
        }

        let mut seen = HashSet::new();
        let mut statements = Vec::new();
        for mut id in attached {
            let mut hops = 0;
            while let Some(next) = successor.get(&id) {
                id = *next;
                hops += 1;
                if hops > policies.len() {
                    return Err(VaultError::InvalidOperation(format!("policy chain through {} loops", id)));
                }
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(policy) = policies.get(&id) {
                statements.extend(policy.policy.statements.iter().cloned());
            }
        }
        Ok(statements)
    }

    /// Evaluate the policies attached to `owner_id`'s teams.
    pub async fn authorize(
        &self,
        org_id: &Identifier,
        owner_id: &Identifier,
        action: PolicyAction,
        resource: &str,
    ) -> Result<Decision> {
        let statements = self.statements_for(org_id, owner_id).await?;
        let decision = evaluate(&statements, action, resource);
        tracing::debug!(owner_id = %owner_id, %action, resource, ?decision, "evaluated policy");
        Ok(decision)
    }

    /// Like [`Vault::authorize`], failing with `Unauthorized` on deny.
    pub async fn require(
        &self,
        org_id: &Identifier,
        owner_id: &Identifier,
        action: PolicyAction,
        resource: &str,
    ) -> Result<()> {
        match self.authorize(org_id, owner_id, action, resource).await? {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                tracing::warn!(owner_id = %owner_id, %action, resource, ?reason, "request denied");
                Err(VaultError::Unauthorized {
                    owner_id: *owner_id,
                    action,
                    resource: resource.to_string(),
                    reason,
                })
            }
        }
    }
}

/// A claim must be signed by a key of the same principal as the key it names.
fn check_claim_signer(keys: &KeySnapshot, claim: &Claim, signer: Option<Identifier>) -> Result<()> {
    let key = keys
        .public_key(&claim.public_key_id)
        .ok_or(VaultError::NotFound(claim.public_key_id))?;
    let owned = signer
        .and_then(|signer| keys.public_key(&signer))
        .map_or(false, |s| s.owner_id == key.owner_id && s.org_id == key.org_id);
    if !owned || claim.owner_id != key.owner_id || claim.org_id != key.org_id {
        tracing::warn!(
            public_key_id = %claim.public_key_id,
            owner_id = %key.owner_id,
            claim_type = %claim.claim_type,
            "refused claim not signed by the key owner"
        );
        return Err(VaultError::InvalidOperation(format!(
            "claims against key {} must be signed by {}",
            claim.public_key_id, key.owner_id
        )));
    }
    Ok(())
}
