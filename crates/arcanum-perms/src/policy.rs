//! Policy evaluation and validation.
//!
//! Statements from every attached policy are flattened and evaluated per
//! requested action bit:
//!
//! 1. any matching `deny` refuses the bit
//! 2. otherwise any matching `allow` grants it
//! 3. otherwise the bit is refused by default
//!
//! A request naming several actions is allowed only if every bit is
//! allowed. Statement order never changes the outcome.

use arcanum_core::policy::decode_action_names;
use arcanum_core::{PolicyAction, PolicyDocument, PolicyEffect, PolicyStatement, ResourcePattern};

use crate::error::{FieldError, PolicyValidationError};

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// A deny statement matched.
    Explicit,
    /// No statement matched.
    Default,
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

fn statement_matches(statement: &PolicyStatement, bit: PolicyAction, resource: &str) -> bool {
    if !statement.action.contains(bit) {
        return false;
    }
    // Unparsable resources never match; `validate` reports them.
    statement
        .resource
        .parse::<ResourcePattern>()
        .map_or(false, |pattern| pattern.matches(resource))
}

fn evaluate_bit<'a, I>(statements: I, bit: PolicyAction, resource: &str) -> Decision
where
    I: IntoIterator<Item = &'a PolicyStatement>,
{
    let mut allowed = false;
    for statement in statements {
        if !statement_matches(statement, bit, resource) {
            continue;
        }
        match statement.effect {
            PolicyEffect::Deny => return Decision::Deny(DenyReason::Explicit),
            PolicyEffect::Allow => allowed = true,
        }
    }
    if allowed {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::Default)
    }
}

/// Decide whether `action` on `resource` is permitted by `statements`.
pub fn evaluate<'a, I>(statements: I, action: PolicyAction, resource: &str) -> Decision
where
    I: IntoIterator<Item = &'a PolicyStatement>,
    I::IntoIter: Clone,
{
    let statements = statements.into_iter();
    let mut decision = Decision::Deny(DenyReason::Default);
    for (bit, _) in PolicyAction::NAMED {
        if !action.contains(bit) {
            continue;
        }
        match evaluate_bit(statements.clone(), bit, resource) {
            Decision::Allow => decision = Decision::Allow,
            denied => return denied,
        }
    }
    decision
}

/// Check a policy document, collecting every problem.
pub fn validate(document: &PolicyDocument) -> Result<(), PolicyValidationError> {
    let mut errors = Vec::new();
    if document.name.trim().is_empty() {
        errors.push(FieldError::new("name", "must not be empty"));
    }
    if document.statements.is_empty() {
        errors.push(FieldError::new("statements", "must contain at least one statement"));
    }
    for (i, statement) in document.statements.iter().enumerate() {
        if statement.action.is_empty() {
            errors.push(FieldError::new(
                format!("statements[{i}].action"),
                "must name at least one action",
            ));
        }
        if let Err(e) = statement.resource.parse::<ResourcePattern>() {
            errors.push(FieldError::new(format!("statements[{i}].resource"), e.to_string()));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(PolicyValidationError { errors })
    }
}

/// Validate a policy document in its JSON wire form.
///
/// Decoding silently drops unknown action names; this also reports them
/// so authoring tools can surface typos.
pub fn validate_json(value: &serde_json::Value) -> Result<PolicyDocument, PolicyValidationError> {
    let mut errors = Vec::new();
    if let Some(statements) = value.get("statements").and_then(|s| s.as_array()) {
        for (i, statement) in statements.iter().enumerate() {
            let names: Vec<&str> = match statement.get("action") {
                Some(serde_json::Value::String(name)) => vec![name.as_str()],
                Some(serde_json::Value::Array(items)) => {
                    items.iter().filter_map(|v| v.as_str()).collect()
                }
                _ => Vec::new(),
            };
            let (_, unknown) = decode_action_names(names);
            for name in unknown {
                errors.push(FieldError::new(
                    format!("statements[{i}].action"),
                    format!("unknown action {name:?}"),
                ));
            }
        }
    }

    let document = match serde_json::from_value::<PolicyDocument>(value.clone()) {
        Ok(document) => document,
        Err(e) => {
            errors.push(FieldError::new("policy", e.to_string()));
            return Err(PolicyValidationError { errors });
        }
    };
    if let Err(mut invalid) = validate(&document) {
        errors.append(&mut invalid.errors);
    }
    if errors.is_empty() {
        Ok(document)
    } else {
        Err(PolicyValidationError { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DB: &str = "/acme/web/prod/api/alice/1/DB_PASSWORD";

    fn doc(statements: Vec<PolicyStatement>) -> PolicyDocument {
        PolicyDocument {
            name: "default".into(),
            description: String::new(),
            statements,
        }
    }

    #[test]
    fn test_no_statements_denies_by_default() {
        let none: [PolicyStatement; 0] = [];
        assert_eq!(
            evaluate(&none, PolicyAction::READ, DB),
            Decision::Deny(DenyReason::Default)
        );
    }

    #[test]
    fn test_matching_allow() {
        let statements = [PolicyStatement::allow(
            PolicyAction::READ | PolicyAction::LIST,
            "/acme/web/*/*/*/*/*",
        )];
        assert!(evaluate(&statements, PolicyAction::READ, DB).is_allowed());
        assert_eq!(
            evaluate(&statements, PolicyAction::UPDATE, DB),
            Decision::Deny(DenyReason::Default)
        );
    }

    #[test]
    fn test_deny_overrides_allow_in_any_order() {
        let allow = PolicyStatement::allow(PolicyAction::ALL, "/acme/*/*/*/*/*/*");
        let deny = PolicyStatement::deny(PolicyAction::READ, "/acme/web/prod/*/*/*/*");
        for statements in [[allow.clone(), deny.clone()], [deny, allow]] {
            assert_eq!(
                evaluate(&statements, PolicyAction::READ, DB),
                Decision::Deny(DenyReason::Explicit)
            );
            assert!(evaluate(&statements, PolicyAction::LIST, DB).is_allowed());
        }
    }

    #[test]
    fn test_multi_action_requires_every_bit() {
        let statements = [PolicyStatement::allow(PolicyAction::READ, "/acme/*/*/*/*/*/*")];
        assert_eq!(
            evaluate(&statements, PolicyAction::READ | PolicyAction::DELETE, DB),
            Decision::Deny(DenyReason::Default)
        );
    }

    #[test]
    fn test_empty_action_denied() {
        let statements = [PolicyStatement::allow(PolicyAction::ALL, "/acme/*/*/*/*/*/*")];
        assert_eq!(
            evaluate(&statements, PolicyAction::NONE, DB),
            Decision::Deny(DenyReason::Default)
        );
    }

    #[test]
    fn test_segment_count_must_match() {
        let statements = [PolicyStatement::allow(PolicyAction::READ, "/acme/*/*/*/*/*")];
        assert!(!evaluate(&statements, PolicyAction::READ, DB).is_allowed());
    }

    #[test]
    fn test_validate_aggregates_errors() {
        let mut document = doc(vec![
            PolicyStatement::allow(PolicyAction::NONE, "/acme/*"),
            PolicyStatement::deny(PolicyAction::READ, "acme/no-leading-slash"),
        ]);
        document.name = " ".into();

        let err = validate(&document).unwrap_err();
        let fields: Vec<&str> = err.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["name", "statements[0].action", "statements[1].resource"]);
    }

    #[test]
    fn test_validate_ok() {
        let document = doc(vec![PolicyStatement::allow(PolicyAction::READ, "/acme/*/*/*/*/*/*")]);
        assert!(validate(&document).is_ok());
    }

    #[test]
    fn test_validate_json_reports_unknown_actions() {
        let value = json!({
            "name": "typo",
            "description": "",
            "statements": [
                { "effect": "allow", "action": ["read", "raed"], "resource": "/acme/*/*/*/*/*/*" }
            ]
        });
        let err = validate_json(&value).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].field, "statements[0].action");
        assert!(err.errors[0].message.contains("raed"));
    }

    #[test]
    fn test_validate_json_ok() {
        let value = json!({
            "name": "readers",
            "description": "read-only",
            "statements": [
                { "effect": "allow", "action": "read", "resource": "/acme/*/*/*/*/*/*" }
            ]
        });
        let document = validate_json(&value).unwrap();
        assert_eq!(document.statements[0].action, PolicyAction::READ);
    }
}
