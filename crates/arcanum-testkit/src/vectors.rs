//! Golden test vectors for deterministic verification.
//!
//! Each vector pins the canonical encoding of a fixed body. Identifiers
//! referenced by the bodies are built with [`fixed_id`] so the expected
//! bytes do not depend on any hash output.

use arcanum_core::{
    canonical_bytes, Body, Membership, ObjectType, Org, PolicyAction, PolicyAttachment,
    PolicyEffect, PolicyStatement, Project,
};

use crate::fixtures::fixed_id;

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Expected canonical bytes (hex).
    pub expected_canonical: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "org",
            // {"name": "acme"}
            expected_canonical: "a1646e616d656461636d65",
        },
        GoldenVector {
            name: "project",
            expected_canonical: "a2646e616d6563776562\
                                 666f72675f696452010d11111111111111111111111111111111",
        },
        GoldenVector {
            name: "membership",
            expected_canonical: "a3666f72675f696452010d11111111111111111111111111111111\
                                 686f776e65725f696452010122222222222222222222222222222222\
                                 677465616d5f696452010f33333333333333333333333333333333",
        },
        GoldenVector {
            name: "policy_attachment",
            expected_canonical: "a3666f72675f696452010d11111111111111111111111111111111\
                                 686f776e65725f696452010f33333333333333333333333333333333\
                                 69706f6c6963795f696452011144444444444444444444444444444444",
        },
        GoldenVector {
            name: "policy_statement",
            // action is the integer bit set: read | list = 0x12
            expected_canonical: "a366616374696f6e12\
                                 6665666665637465616c6c6f77\
                                 687265736f75726365732f61636d652f7765622f2a2f2a2f2a2f2a2f2a",
        },
    ]
}

/// Canonical bytes of the body a vector describes.
pub fn canonical_for(vector: &GoldenVector) -> Vec<u8> {
    let org = fixed_id(ObjectType::Org, 0x11);
    let user = fixed_id(ObjectType::User, 0x22);
    let team = fixed_id(ObjectType::Team, 0x33);
    let policy = fixed_id(ObjectType::Policy, 0x44);

    let bytes = match vector.name {
        "org" => Org::new("acme").canonical_bytes(),
        "project" => Project::new("web", org).canonical_bytes(),
        "membership" => Membership::new(org, user, team).canonical_bytes(),
        "policy_attachment" => PolicyAttachment::new(org, team, policy).canonical_bytes(),
        "policy_statement" => canonical_bytes(&PolicyStatement {
            effect: PolicyEffect::Allow,
            action: PolicyAction::READ | PolicyAction::LIST,
            resource: "/acme/web/*/*/*/*/*".to_string(),
        }),
        other => panic!("unknown vector: {}", other),
    };
    bytes.unwrap_or_else(|e| panic!("vector {} failed to encode: {}", vector.name, e))
}

/// Check every vector, reporting (name, matches, actual hex).
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let hex = hex::encode(canonical_for(v));
            (v.name.to_string(), hex == v.expected_canonical, hex)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vectors_match() {
        for (name, matches, hex) in verify_all_vectors() {
            assert!(matches, "vector '{}' encoded as {}", name, hex);
        }
    }

    #[test]
    fn test_vector_identifiers_carry_tag() {
        let org = fixed_id(ObjectType::Org, 0x11);
        let id = Project::new("web", org).identifier().unwrap();
        assert_eq!(&id.as_bytes()[..2], &[0x01, ObjectType::Project.to_u8()]);
    }
}
