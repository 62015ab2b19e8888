//! Org invitation state machine.
//!
//! ```text
//! pending -> associated -> accepted -> approved
//! ```
//!
//! Transitions borrow the current invite and return its next version, so a
//! rejected transition leaves nothing half-applied. Each version names the
//! one it replaced in `previous`. The invite code is stored only as a salted
//! Blake3 digest.

use ciborium::value::Value;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::canonical::{Canonical, CanonicalMap};
use crate::error::{CoreError, Result};
use crate::object::{schema_v1, Body, Membership, SCHEMA_V1};
use crate::types::{hex_bytes, Identifier, Timestamp};

/// Algorithm name for salted invite code digests.
pub const INVITE_CODE_ALG: &str = "blake3-salted";

const INVITE_CODE_CONTEXT: &str = "arcanum org-invite code v1";
const INVITE_CODE_LEN: usize = 16;
const INVITE_SALT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteState {
    Pending,
    Associated,
    Accepted,
    Approved,
}

impl InviteState {
    pub fn as_str(self) -> &'static str {
        match self {
            InviteState::Pending => "pending",
            InviteState::Associated => "associated",
            InviteState::Accepted => "accepted",
            InviteState::Approved => "approved",
        }
    }

    /// The single state reachable from this one.
    pub fn next(self) -> Option<InviteState> {
        match self {
            InviteState::Pending => Some(InviteState::Associated),
            InviteState::Associated => Some(InviteState::Accepted),
            InviteState::Accepted => Some(InviteState::Approved),
            InviteState::Approved => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for InviteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Salted digest of the invite code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteCodeHash {
    pub alg: String,
    #[serde(with = "hex_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

fn digest_code(salt: &[u8], code: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_derive_key(INVITE_CODE_CONTEXT);
    hasher.update(salt);
    hasher.update(code.as_bytes());
    hasher.finalize()
}

impl InviteCodeHash {
    fn new(code: &str) -> Self {
        let mut salt = vec![0u8; INVITE_SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let value = digest_code(&salt, code).as_bytes().to_vec();
        Self {
            alg: INVITE_CODE_ALG.to_string(),
            salt,
            value,
        }
    }

    /// Constant-time comparison of `code` against the stored digest.
    pub fn verify(&self, code: &str) -> bool {
        if self.alg != INVITE_CODE_ALG {
            return false;
        }
        let Ok(stored) = <[u8; 32]>::try_from(self.value.as_slice()) else {
            return false;
        };
        digest_code(&self.salt, code) == blake3::Hash::from(stored)
    }
}

/// The plaintext invite code, handed to the inviter once and never stored.
pub struct InviteCode(Zeroizing<String>);

impl InviteCode {
    fn generate() -> Self {
        let mut raw = Zeroizing::new([0u8; INVITE_CODE_LEN]);
        rand::thread_rng().fill_bytes(&mut raw[..]);
        Self(Zeroizing::new(hex::encode(&raw[..])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InviteCode(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgInvite {
    #[serde(skip, default = "schema_v1")]
    pub schema_version: u32,
    pub org_id: Identifier,
    pub email: String,
    pub inviter_id: Identifier,
    pub invitee_id: Option<Identifier>,
    pub approver_id: Option<Identifier>,
    pub state: InviteState,
    /// The version this one replaced. `None` only while pending.
    pub previous: Option<Identifier>,
    pub code: InviteCodeHash,
    pub pending_teams: Vec<Identifier>,
    pub created_at: Timestamp,
    pub accepted_at: Option<Timestamp>,
    pub approved_at: Option<Timestamp>,
}

impl OrgInvite {
    /// Create a pending invite and the code to deliver to the invitee.
    pub fn new(
        org_id: Identifier,
        email: &str,
        inviter_id: Identifier,
        pending_teams: Vec<Identifier>,
        created_at: Timestamp,
    ) -> (Self, InviteCode) {
        let code = InviteCode::generate();
        let invite = Self {
            schema_version: SCHEMA_V1,
            org_id,
            email: email.to_string(),
            inviter_id,
            invitee_id: None,
            approver_id: None,
            state: InviteState::Pending,
            previous: None,
            code: InviteCodeHash::new(code.as_str()),
            pending_teams,
            created_at,
            accepted_at: None,
            approved_at: None,
        };
        (invite, code)
    }

    fn require(&self, to: InviteState) -> Result<()> {
        if self.state.next() == Some(to) {
            Ok(())
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Whether `next` is a legal successor of this version: one state
    /// forward, linked back here, with every earlier field unchanged.
    pub fn is_succeeded_by(&self, next: &OrgInvite) -> Result<bool> {
        if self.state.next() != Some(next.state) || next.previous != Some(self.identifier()?) {
            return Ok(false);
        }
        let kept = self.org_id == next.org_id
            && self.email == next.email
            && self.inviter_id == next.inviter_id
            && self.code == next.code
            && self.pending_teams == next.pending_teams
            && self.created_at == next.created_at;
        let stamped = match next.state {
            InviteState::Pending => false,
            InviteState::Associated => {
                self.invitee_id.is_none() && next.invitee_id.is_some() && next.accepted_at.is_none()
            }
            InviteState::Accepted => {
                self.invitee_id == next.invitee_id
                    && self.accepted_at.is_none()
                    && next.accepted_at.is_some()
            }
            InviteState::Approved => {
                self.invitee_id == next.invitee_id
                    && self.accepted_at == next.accepted_at
                    && next.approver_id.is_some()
                    && next.approver_id != next.invitee_id
                    && next.approved_at.is_some()
            }
        };
        Ok(kept && stamped)
    }

    /// pending -> associated: link the invitee's identity.
    pub fn associate(&self, invitee_id: Identifier) -> Result<Self> {
        self.require(InviteState::Associated)?;
        Ok(Self {
            invitee_id: Some(invitee_id),
            state: InviteState::Associated,
            previous: Some(self.identifier()?),
            ..self.clone()
        })
    }

    /// associated -> accepted: the invitee proves possession of the code.
    pub fn accept(&self, code: &str, now: Timestamp) -> Result<Self> {
        self.require(InviteState::Accepted)?;
        if !self.code.verify(code) {
            return Err(CoreError::InviteCodeMismatch);
        }
        Ok(Self {
            state: InviteState::Accepted,
            previous: Some(self.identifier()?),
            accepted_at: Some(now),
            ..self.clone()
        })
    }

    /// accepted -> approved: a distinct principal grants the pending teams.
    pub fn approve(&self, approver_id: Identifier, now: Timestamp) -> Result<(Self, Vec<Membership>)> {
        self.require(InviteState::Approved)?;
        let invitee = self.invitee_id.ok_or_else(|| CoreError::InvalidStateTransition {
            from: self.state.to_string(),
            to: InviteState::Approved.to_string(),
        })?;
        if approver_id == invitee {
            return Err(CoreError::SelfApproval);
        }

        let memberships = self
            .pending_teams
            .iter()
            .map(|team_id| Membership::new(self.org_id, invitee, *team_id))
            .collect();

        let approved = Self {
            approver_id: Some(approver_id),
            state: InviteState::Approved,
            previous: Some(self.identifier()?),
            approved_at: Some(now),
            ..self.clone()
        };
        Ok((approved, memberships))
    }
}

impl Canonical for OrgInvite {
    fn canonical_value(&self) -> Value {
        CanonicalMap::new()
            .opt_timestamp("accepted_at", self.accepted_at)
            .opt_id("approver_id", self.approver_id.as_ref())
            .opt_timestamp("approved_at", self.approved_at)
            .value(
                "code",
                CanonicalMap::new()
                    .text("alg", &self.code.alg)
                    .bytes("salt", &self.code.salt)
                    .bytes("value", &self.code.value)
                    .build(),
            )
            .timestamp("created_at", self.created_at)
            .text("email", &self.email)
            .opt_id("invitee_id", self.invitee_id.as_ref())
            .id("inviter_id", &self.inviter_id)
            .id("org_id", &self.org_id)
            .ids("pending_teams", &self.pending_teams)
            .opt_id("previous", self.previous.as_ref())
            .text("state", self.state.as_str())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectType;

    fn id(tag: ObjectType, seed: &[u8]) -> Identifier {
        Identifier::derive(tag, seed)
    }

    fn pending() -> (OrgInvite, InviteCode) {
        OrgInvite::new(
            id(ObjectType::Org, b"acme"),
            "bob@example.com",
            id(ObjectType::User, b"alice"),
            vec![id(ObjectType::Team, b"devs"), id(ObjectType::Team, b"ops")],
            1_000,
        )
    }

    #[test]
    fn test_full_lifecycle() {
        let (invite, code) = pending();
        let bob = id(ObjectType::User, b"bob");
        let alice = invite.inviter_id;

        let associated = invite.associate(bob).unwrap();
        assert_eq!(associated.state, InviteState::Associated);

        let accepted = associated.accept(code.as_str(), 2_000).unwrap();
        assert_eq!(accepted.accepted_at, Some(2_000));

        let (approved, memberships) = accepted.approve(alice, 3_000).unwrap();
        assert_eq!(approved.state, InviteState::Approved);
        assert_eq!(approved.created_at, 1_000);
        assert_eq!(approved.accepted_at, Some(2_000));
        assert_eq!(approved.approved_at, Some(3_000));
        assert_eq!(memberships.len(), 2);
        assert!(memberships.iter().all(|m| m.owner_id == bob));
        assert!(approved.state.is_terminal());
    }

    #[test]
    fn test_pending_only_reaches_associated() {
        let (invite, code) = pending();
        assert!(matches!(
            invite.accept(code.as_str(), 2_000),
            Err(CoreError::InvalidStateTransition { ref from, ref to })
                if from == "pending" && to == "accepted"
        ));
        assert!(invite.approve(invite.inviter_id, 2_000).is_err());
        assert_eq!(invite.state, InviteState::Pending);
    }

    #[test]
    fn test_no_backward_or_repeat_transitions() {
        let (invite, code) = pending();
        let bob = id(ObjectType::User, b"bob");
        let associated = invite.associate(bob).unwrap();
        assert!(associated.associate(bob).is_err());

        let accepted = associated.accept(code.as_str(), 2_000).unwrap();
        // Re-accepting cannot move the timestamp.
        assert!(accepted.accept(code.as_str(), 9_000).is_err());
        assert_eq!(accepted.accepted_at, Some(2_000));

        let (approved, _) = accepted.approve(invite.inviter_id, 3_000).unwrap();
        assert!(approved.approve(invite.inviter_id, 4_000).is_err());
        assert!(approved.associate(bob).is_err());
    }

    #[test]
    fn test_wrong_code_rejected() {
        let (invite, _code) = pending();
        let associated = invite.associate(id(ObjectType::User, b"bob")).unwrap();
        assert!(matches!(
            associated.accept("not-the-code", 2_000),
            Err(CoreError::InviteCodeMismatch)
        ));
    }

    #[test]
    fn test_self_approval_rejected() {
        let (invite, code) = pending();
        let bob = id(ObjectType::User, b"bob");
        let accepted = invite
            .associate(bob)
            .unwrap()
            .accept(code.as_str(), 2_000)
            .unwrap();
        assert!(matches!(accepted.approve(bob, 3_000), Err(CoreError::SelfApproval)));
    }

    #[test]
    fn test_code_never_stored_in_plaintext() {
        let (invite, code) = pending();
        let json = serde_json::to_string(&invite).unwrap();
        assert!(!json.contains(code.as_str()));
        assert_eq!(invite.code.alg, INVITE_CODE_ALG);
    }

    #[test]
    fn test_each_state_has_distinct_identifier() {
        let (invite, _) = pending();
        let associated = invite.associate(id(ObjectType::User, b"bob")).unwrap();
        assert_ne!(invite.identifier().unwrap(), associated.identifier().unwrap());
    }

    #[test]
    fn test_each_version_links_the_one_it_replaced() {
        let (invite, code) = pending();
        assert_eq!(invite.previous, None);

        let associated = invite.associate(id(ObjectType::User, b"bob")).unwrap();
        assert_eq!(associated.previous, Some(invite.identifier().unwrap()));
        assert!(invite.is_succeeded_by(&associated).unwrap());

        let accepted = associated.accept(code.as_str(), 2_000).unwrap();
        assert_eq!(accepted.previous, Some(associated.identifier().unwrap()));
        assert!(associated.is_succeeded_by(&accepted).unwrap());
        assert!(!invite.is_succeeded_by(&accepted).unwrap());

        let (approved, _) = accepted.approve(invite.inviter_id, 3_000).unwrap();
        assert!(accepted.is_succeeded_by(&approved).unwrap());
    }

    #[test]
    fn test_forged_successor_rejected() {
        let (invite, _) = pending();
        let associated = invite.associate(id(ObjectType::User, b"bob")).unwrap();

        let retargeted = OrgInvite {
            pending_teams: vec![id(ObjectType::Team, b"admins")],
            ..associated.clone()
        };
        assert!(!invite.is_succeeded_by(&retargeted).unwrap());

        let unlinked = OrgInvite {
            previous: None,
            ..associated
        };
        assert!(!invite.is_succeeded_by(&unlinked).unwrap());
    }
}
