//! Data model shared between the resource service (which owns it) and the
//! decision service (which caches and evaluates it).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A signing credential. `expires` is unix seconds; `0` means the secret
/// never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub secret_id: String,
    pub username: String,
    pub secret_key: String,
    #[serde(default)]
    pub expires: i64,
    #[serde(default)]
    pub description: String,
}

impl Secret {
    /// A secret with `expires >= 1` in the past is dead; `0` is immortal.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires >= 1 && now > self.expires
    }
}

/// Whether a matching policy grants or forcefully denies access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Comparison operator for numeric conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A condition constrains a policy to requests whose context satisfies it.
/// The map key under which a condition is stored names the context value it
/// inspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "options", rename_all = "snake_case")]
pub enum Condition {
    /// Context value string-equals the expected literal.
    StringEqual { equals: String },
    /// Context value is a member of the literal set.
    StringIn { values: Vec<String> },
    /// Context value is an IP address contained in the CIDR block.
    CidrMatch { cidr: String },
    /// Context value compares numerically against the literal.
    NumericCompare { op: CompareOp, value: f64 },
}

/// The rule body of a policy: the four matching axes plus conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    pub effect: Effect,
    #[serde(default)]
    pub conditions: BTreeMap<String, Condition>,
}

/// A named, user-owned authorization policy. Snapshots of these are
/// immutable on decision replicas; the resource service is the only writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub username: String,
    pub policy: PolicyDocument,
}

/// Envelope for list endpoints, including the unpaged replica pulls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub total: u64,
    pub items: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_expiry_semantics() {
        let mut secret = Secret {
            secret_id: "s1".into(),
            username: "alice".into(),
            secret_key: "k".into(),
            expires: 0,
            description: String::new(),
        };
        // 0 never expires, no matter how far in the future "now" is.
        assert!(!secret.is_expired(i64::MAX));

        secret.expires = 100;
        assert!(secret.is_expired(101));
        assert!(!secret.is_expired(100));
    }

    #[test]
    fn policy_document_round_trips() {
        let doc: PolicyDocument = serde_json::from_value(json!({
            "subjects": ["users:alice"],
            "actions": ["articles:read"],
            "resources": ["articles:alice:*"],
            "effect": "allow",
            "conditions": {
                "remote_ip": {"kind": "cidr_match", "options": {"cidr": "10.0.0.0/8"}},
                "tier": {"kind": "string_in", "options": {"values": ["gold", "silver"]}}
            }
        }))
        .unwrap();

        assert_eq!(doc.effect, Effect::Allow);
        assert!(matches!(
            doc.conditions.get("remote_ip"),
            Some(Condition::CidrMatch { .. })
        ));

        let echoed: PolicyDocument =
            serde_json::from_str(&serde_json::to_string(&doc).unwrap()).unwrap();
        assert_eq!(echoed, doc);
    }

    #[test]
    fn unknown_condition_kind_is_rejected() {
        let result: Result<Condition, _> = serde_json::from_value(json!({
            "kind": "geo_fence",
            "options": {"country": "NL"}
        }));
        assert!(result.is_err());
    }
}
