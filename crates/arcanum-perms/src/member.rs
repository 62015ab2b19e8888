//! Wrapping a keyring master secret for individual principals.
//!
//! The master secret is sealed for a member with an ephemeral X25519 key
//! agreement against the member's encryption key. The wrap key is bound to
//! the keyring and the member's key identifier, so a wrapped value cannot be
//! replayed into another keyring or onto another principal's row.
//!
//! `KeyringMemberKey.value` is `ephemeral public key (32 bytes) || ciphertext`.

use arcanum_core::{
    Envelope, Identifier, Keyring, KeyringMember, KeyringMemberKey, KeyDirectory, Timestamp,
};

use crate::crypto::{EphemeralKeyPair, SealNonce, X25519PublicKey};
use crate::error::{PermsError, Result};
use crate::keypair::PrincipalKeys;
use crate::master::MasterSecret;

/// Algorithm name for wrapped member keys.
pub const MEMBER_WRAP_ALG: &str = "x25519-xchacha20poly1305";

/// A principal that should receive a wrapped copy of a master secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipient {
    pub owner_id: Identifier,
    pub encryption_key_id: Identifier,
    pub public_key: X25519PublicKey,
}

impl Recipient {
    pub fn of(keys: &PrincipalKeys) -> Self {
        Self {
            owner_id: keys.owner_id,
            encryption_key_id: keys.encryption_key_id,
            public_key: keys.encryption_public(),
        }
    }
}

fn wrap_context(keyring_id: &Identifier, encrypting_key_id: &Identifier) -> Vec<u8> {
    let mut ctx = Vec::with_capacity(2 * keyring_id.as_bytes().len());
    ctx.extend_from_slice(keyring_id.as_bytes());
    ctx.extend_from_slice(encrypting_key_id.as_bytes());
    ctx
}

/// Seal `master` for `recipient`.
pub fn wrap_master(
    master: &MasterSecret,
    keyring_id: &Identifier,
    recipient: &Recipient,
) -> Result<KeyringMemberKey> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key();
    let context = wrap_context(keyring_id, &recipient.encryption_key_id);
    let wrap_key = ephemeral
        .diffie_hellman(&recipient.public_key)
        .derive_wrap_key(&context);

    let nonce = SealNonce::generate();
    let ciphertext = wrap_key.seal(&nonce, master.as_bytes(), &context)?;

    let mut value = Vec::with_capacity(32 + ciphertext.len());
    value.extend_from_slice(ephemeral_public.as_bytes());
    value.extend_from_slice(&ciphertext);

    Ok(KeyringMemberKey {
        alg: MEMBER_WRAP_ALG.to_string(),
        nonce: nonce.as_bytes().to_vec(),
        value,
    })
}

/// Wrap `master` for `recipient` and sign the member row with `granter`'s
/// signing key.
pub fn add_member(
    keyring_id: Identifier,
    keyring: &Keyring,
    master: &MasterSecret,
    recipient: &Recipient,
    granter: &PrincipalKeys,
    now: Timestamp,
) -> Result<Envelope> {
    let key = wrap_master(master, &keyring_id, recipient)?;
    let member = KeyringMember::new(
        keyring_id,
        keyring,
        recipient.owner_id,
        recipient.encryption_key_id,
        granter.signing_key_id,
        key,
        now,
    );
    let envelope = Envelope::seal(member, &granter.signing, Some(granter.signing_key_id))?;

    tracing::debug!(
        keyring_id = %keyring_id,
        member_id = %envelope.id,
        owner_id = %recipient.owner_id,
        granted_by = %granter.owner_id,
        "wrapped keyring secret for member"
    );
    Ok(envelope)
}

/// Recover the master secret from a member row.
///
/// Fails with `UnauthorizedPrincipal` if `principal` does not hold the
/// member's encrypting key, and with `KeyRevoked` if either the encrypting
/// key or the key that signed the grant has been revoked.
pub fn unwrap_member<D: KeyDirectory + ?Sized>(
    member: &KeyringMember,
    principal: &PrincipalKeys,
    directory: &D,
) -> Result<MasterSecret> {
    if principal.encryption_key_id != member.encrypting_key_id {
        tracing::warn!(
            keyring_id = %member.keyring_id,
            presented = %principal.encryption_key_id,
            expected = %member.encrypting_key_id,
            "rejected unwrap by unauthorized principal"
        );
        return Err(PermsError::UnauthorizedPrincipal {
            presented: principal.encryption_key_id,
            expected: member.encrypting_key_id,
        });
    }
    for key_id in [member.encrypting_key_id, member.public_key_id] {
        if directory.is_revoked(&key_id) {
            tracing::warn!(
                keyring_id = %member.keyring_id,
                key_id = %key_id,
                "rejected unwrap with revoked key"
            );
            return Err(PermsError::KeyRevoked(key_id));
        }
    }

    if member.key.alg != MEMBER_WRAP_ALG {
        return Err(PermsError::Decryption(format!(
            "unsupported member key algorithm: {}",
            member.key.alg
        )));
    }
    if member.key.value.len() < 32 {
        return Err(PermsError::Decryption("wrapped key too short".into()));
    }
    let (ephemeral, ciphertext) = member.key.value.split_at(32);
    let ephemeral = X25519PublicKey::from_slice(ephemeral)?;
    let nonce = SealNonce::from_slice(&member.key.nonce)?;

    let context = wrap_context(&member.keyring_id, &member.encrypting_key_id);
    let wrap_key = principal
        .encryption
        .diffie_hellman(&ephemeral)
        .derive_wrap_key(&context);
    let secret = wrap_key.open(&nonce, ciphertext, &context)?;
    MasterSecret::from_slice(&secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::{generate_keypairs, KeyEncryptionKey};
    use arcanum_core::{Body, Claim, ClaimType, ObjectType, PathExp, TrustedKeys};

    fn principal(name: &[u8]) -> PrincipalKeys {
        generate_keypairs(
            Identifier::derive(ObjectType::Org, b"acme"),
            Identifier::derive(ObjectType::User, name),
            &KeyEncryptionKey::generate(),
            0,
            i64::MAX,
        )
        .unwrap()
        .keys
    }

    fn keyring() -> (Identifier, Keyring) {
        let keyring = Keyring::new(
            Identifier::derive(ObjectType::Org, b"acme"),
            Identifier::derive(ObjectType::Project, b"web"),
            PathExp::new("acme", "web", "*", "*", "*", "*").unwrap(),
            None,
            1,
            0,
        );
        (keyring.identifier().unwrap(), keyring)
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let alice = principal(b"alice");
        let bob = principal(b"bob");
        let (keyring_id, keyring) = keyring();
        let master = MasterSecret::generate();

        let env = add_member(keyring_id, &keyring, &master, &Recipient::of(&bob), &alice, 10).unwrap();
        let member: KeyringMember = env.body_as().unwrap();
        assert_eq!(member.owner_id, bob.owner_id);
        assert_eq!(member.public_key_id, alice.signing_key_id);
        assert_eq!(env.sig.public_key_id, Some(alice.signing_key_id));

        let recovered = unwrap_member(&member, &bob, &TrustedKeys::new()).unwrap();
        assert_eq!(recovered.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_other_principal_is_unauthorized() {
        let alice = principal(b"alice");
        let bob = principal(b"bob");
        let (keyring_id, keyring) = keyring();
        let master = MasterSecret::generate();

        let env = add_member(keyring_id, &keyring, &master, &Recipient::of(&bob), &alice, 10).unwrap();
        let member: KeyringMember = env.body_as().unwrap();
        assert!(matches!(
            unwrap_member(&member, &alice, &TrustedKeys::new()),
            Err(PermsError::UnauthorizedPrincipal { .. })
        ));
    }

    #[test]
    fn test_revoked_granter_key() {
        let alice = principal(b"alice");
        let bob = principal(b"bob");
        let (keyring_id, keyring) = keyring();
        let master = MasterSecret::generate();

        let env = add_member(keyring_id, &keyring, &master, &Recipient::of(&bob), &alice, 10).unwrap();
        let member: KeyringMember = env.body_as().unwrap();

        let mut dir = TrustedKeys::new();
        dir.insert_claim(Claim::at(
            alice.org_id,
            alice.owner_id,
            None,
            alice.signing_key_id,
            ClaimType::Revocation,
            20,
        ));
        assert!(matches!(
            unwrap_member(&member, &bob, &dir),
            Err(PermsError::KeyRevoked(k)) if k == alice.signing_key_id
        ));
    }

    #[test]
    fn test_wrapped_value_bound_to_keyring() {
        let alice = principal(b"alice");
        let (keyring_id, keyring) = keyring();
        let master = MasterSecret::generate();

        let env = add_member(keyring_id, &keyring, &master, &Recipient::of(&alice), &alice, 10).unwrap();
        let mut member: KeyringMember = env.body_as().unwrap();
        member.keyring_id = Identifier::derive(ObjectType::Keyring, b"elsewhere");
        assert!(matches!(
            unwrap_member(&member, &alice, &TrustedKeys::new()),
            Err(PermsError::Decryption(_))
        ));
    }
}
