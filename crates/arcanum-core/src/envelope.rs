//! The signed envelope around every persisted object.
//!
//! Wire form: `{ "id", "version", "body", "sig" }`. The body is decoded by
//! the type tag embedded in `id`, so a JSON body never carries its own type.

use serde::{Deserialize, Serialize};

use crate::crypto::SigningKeypair;
use crate::error::{CoreError, Result};
use crate::object::{Body, Object, SCHEMA_V1};
use crate::signature::{sign_object, verify_object, KeyDirectory, Signature};
use crate::types::{Identifier, ObjectType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EnvelopeWire")]
pub struct Envelope {
    pub id: Identifier,
    pub version: u32,
    pub body: Object,
    pub sig: Signature,
}

#[derive(Deserialize)]
struct EnvelopeWire {
    id: Identifier,
    version: u32,
    body: serde_json::Value,
    sig: Signature,
}

impl TryFrom<EnvelopeWire> for Envelope {
    type Error = CoreError;

    fn try_from(wire: EnvelopeWire) -> Result<Self> {
        if wire.version != SCHEMA_V1 {
            return Err(CoreError::Decoding(format!(
                "unsupported schema version {}",
                wire.version
            )));
        }
        let object_type = wire.id.object_type()?;
        let body = Object::from_json(object_type, wire.body)?;
        Ok(Self {
            id: wire.id,
            version: wire.version,
            body,
            sig: wire.sig,
        })
    }
}

impl Envelope {
    /// Identify and sign an object.
    pub fn seal(
        body: impl Into<Object>,
        keypair: &SigningKeypair,
        public_key_id: Option<Identifier>,
    ) -> Result<Self> {
        let body = body.into();
        let (id, sig) = sign_object(&body, keypair, public_key_id)?;
        Ok(Self {
            id,
            version: body.schema_version(),
            body,
            sig,
        })
    }

    pub fn object_type(&self) -> ObjectType {
        self.body.object_type()
    }

    /// Check that `id` is the identifier of `body`.
    pub fn verify_id(&self) -> Result<()> {
        let derived = self.body.identifier()?;
        if derived != self.id {
            return Err(CoreError::IdentifierMismatch {
                claimed: self.id,
                derived,
            });
        }
        Ok(())
    }

    /// Check identifier, signature and signer revocation.
    pub fn verify<D: KeyDirectory + ?Sized>(&self, directory: &D) -> Result<()> {
        verify_object(&self.id, &self.body, &self.sig, directory)
    }

    /// Clone the body out as a specific type.
    pub fn body_as<B: Body>(&self) -> Result<B> {
        B::try_from(self.body.clone())
    }

    pub fn into_body<B: Body>(self) -> Result<B> {
        B::try_from(self.body)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::Encoding(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::Decoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Org, Project};
    use crate::signature::TrustedKeys;

    #[test]
    fn test_envelope_json_shape() {
        let keypair = SigningKeypair::generate();
        let env = Envelope::seal(Org::new("acme"), &keypair, None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert_eq!(json["id"], env.id.to_hex());
        assert_eq!(json["version"], 1);
        assert_eq!(json["body"]["name"], "acme");
        assert_eq!(json["sig"]["alg"], "eddsa");
        assert!(json["sig"]["public_key_id"].is_null());
    }

    #[test]
    fn test_envelope_decodes_by_id_tag() {
        let keypair = SigningKeypair::generate();
        let org_id = Org::new("acme").identifier().unwrap();
        let env = Envelope::seal(Project::new("web", org_id), &keypair, None).unwrap();

        let back = Envelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.object_type(), ObjectType::Project);
        assert_eq!(back.into_body::<Project>().unwrap().name, "web");
    }

    #[test]
    fn test_tampered_body_fails_id_check() {
        let keypair = SigningKeypair::generate();
        let env = Envelope::seal(Org::new("acme"), &keypair, None).unwrap();
        let json = env.to_json().unwrap().replace("acme", "evil");
        let tampered = Envelope::from_json(&json).unwrap();
        assert!(matches!(
            tampered.verify_id(),
            Err(CoreError::IdentifierMismatch { .. })
        ));
        assert!(tampered.verify(&TrustedKeys::new()).is_err());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let keypair = SigningKeypair::generate();
        let env = Envelope::seal(Org::new("acme"), &keypair, None).unwrap();
        let json = env.to_json().unwrap().replace("\"version\":1", "\"version\":7");
        assert!(Envelope::from_json(&json).is_err());
    }
}
