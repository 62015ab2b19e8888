//! Proptest generators for property-based testing.

use proptest::prelude::*;

use arcanum_core::{
    Identifier, ObjectType, Org, PathExp, PolicyAction, PolicyEffect, PolicyStatement, Project,
    SigningKeypair,
};

/// Generate a random signing keypair.
pub fn keypair() -> impl Strategy<Value = SigningKeypair> {
    any::<[u8; 32]>().prop_map(|seed| SigningKeypair::from_seed(&seed))
}

/// Generate any object type.
pub fn object_type() -> impl Strategy<Value = ObjectType> {
    prop::sample::select(ObjectType::ALL.to_vec())
}

/// Generate an identifier derived from random bytes.
pub fn identifier(object_type: ObjectType) -> impl Strategy<Value = Identifier> {
    prop::collection::vec(any::<u8>(), 0..64)
        .prop_map(move |bytes| Identifier::derive(object_type, &bytes))
}

/// A name valid as a literal path segment.
pub fn name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}".prop_map(String::from)
}

/// A credential name.
pub fn credential_name() -> impl Strategy<Value = String> {
    "[A-Z][A-Z0-9_]{0,31}".prop_map(String::from)
}

/// One glob segment in its string form.
pub fn glob() -> impl Strategy<Value = String> {
    prop_oneof![
        name(),
        Just("*".to_string()),
        name().prop_map(|n| format!("{}*", n)),
        prop::collection::vec(name(), 2..4).prop_map(|opts| format!("[{}]", opts.join("|"))),
    ]
}

/// A six-segment path expression with a literal org.
pub fn pathexp() -> impl Strategy<Value = PathExp> {
    (name(), prop::collection::vec(glob(), 5))
        .prop_filter_map("valid path expression", |(org, rest)| {
            format!("/{}/{}", org, rest.join("/")).parse::<PathExp>().ok()
        })
}

/// A concrete resource: six path segments plus a credential name.
pub fn resource() -> impl Strategy<Value = String> {
    (prop::collection::vec(name(), 6), credential_name())
        .prop_map(|(segments, cred)| format!("/{}/{}", segments.join("/"), cred))
}

/// Any non-empty combination of actions.
pub fn policy_action() -> impl Strategy<Value = PolicyAction> {
    (1u8..=PolicyAction::ALL.bits()).prop_map(PolicyAction::from_bits)
}

/// A single action.
pub fn single_action() -> impl Strategy<Value = PolicyAction> {
    prop::sample::select(PolicyAction::NAMED.iter().map(|(a, _)| *a).collect::<Vec<_>>())
}

/// A statement over a seven-segment resource pattern.
pub fn policy_statement() -> impl Strategy<Value = PolicyStatement> {
    (
        prop_oneof![Just(PolicyEffect::Allow), Just(PolicyEffect::Deny)],
        policy_action(),
        prop::collection::vec(glob(), 7),
    )
        .prop_map(|(effect, action, segments)| PolicyStatement {
            effect,
            action,
            resource: format!("/{}", segments.join("/")),
        })
}

/// An org body.
pub fn org() -> impl Strategy<Value = Org> {
    name().prop_map(|n| Org::new(&n))
}

/// A project body under a random org.
pub fn project() -> impl Strategy<Value = Project> {
    (name(), identifier(ObjectType::Org)).prop_map(|(n, org_id)| Project::new(&n, org_id))
}
