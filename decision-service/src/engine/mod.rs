//! The policy decision engine.
//!
//! Evaluation never fails: whatever the input, it produces a [`Decision`].
//! Candidate policies pass through four filters (subjects, resources,
//! actions, conditions); a surviving deny policy always wins over any number
//! of allows.

pub mod condition;

use common::model::{Effect, Policy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const REASON_NO_POLICY: &str = "no policy allowed access";

/// A decision request. `context` always carries `username` for well-formed
/// requests; the handler rejects bodies where it is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthzRequest {
    pub subject: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl AuthzRequest {
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.context.get("username").and_then(Value::as_str)
    }
}

/// The wire-visible outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deciders: Vec<String>,
}

/// A decision plus the material the audit trail wants: the conclusion text
/// and the full policies that decided the outcome.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub decision: Decision,
    pub conclusion: String,
    pub deciders: Vec<Policy>,
}

/// Evaluate `request` against the user's policy list.
#[must_use]
pub fn evaluate(policies: &[Policy], request: &AuthzRequest) -> Verdict {
    let candidates: Vec<&Policy> = policies
        .iter()
        .filter(|p| any_pattern_matches(&p.policy.subjects, &request.subject))
        .filter(|p| any_pattern_matches(&p.policy.resources, &request.resource))
        .filter(|p| any_pattern_matches(&p.policy.actions, &request.action))
        .filter(|p| conditions_hold(p, request))
        .collect();

    let allows: Vec<&Policy> = candidates
        .iter()
        .copied()
        .filter(|p| p.policy.effect == Effect::Allow)
        .collect();
    let denier = candidates.iter().copied().find(|p| p.policy.effect == Effect::Deny);

    if let Some(denier) = denier {
        let mut deciders: Vec<Policy> = allows.iter().copied().cloned().collect();
        deciders.push(denier.clone());

        let conclusion = if allows.is_empty() {
            format!("policy {} forcefully denied the access", denier.name)
        } else {
            format!(
                "policies {} allow access, but policy {} forcefully denied it",
                join_names(&allows),
                denier.name
            )
        };

        return Verdict {
            decision: Decision {
                allowed: false,
                reason: Some(format!("policy {} forcefully denied the access", denier.name)),
                deciders: deciders.iter().map(|p| p.name.clone()).collect(),
            },
            conclusion,
            deciders,
        };
    }

    if !allows.is_empty() {
        let deciders: Vec<Policy> = allows.iter().copied().cloned().collect();
        return Verdict {
            decision: Decision {
                allowed: true,
                reason: None,
                deciders: deciders.iter().map(|p| p.name.clone()).collect(),
            },
            conclusion: format!("policies {} allow access", join_names(&allows)),
            deciders,
        };
    }

    Verdict {
        decision: Decision {
            allowed: false,
            reason: Some(REASON_NO_POLICY.to_string()),
            deciders: Vec::new(),
        },
        conclusion: REASON_NO_POLICY.to_string(),
        deciders: Vec::new(),
    }
}

fn conditions_hold(policy: &Policy, request: &AuthzRequest) -> bool {
    policy
        .policy
        .conditions
        .iter()
        .all(|(name, cond)| condition::evaluate(cond, name, &request.context))
}

fn join_names(policies: &[&Policy]) -> String {
    policies
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Match one pattern against a value: literal equality, or segment-wise on
/// `:` where `*` matches any single segment. Segment counts must agree.
#[must_use]
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == value {
        return true;
    }
    if !pattern.contains(':') {
        return false;
    }

    let pattern_segments: Vec<&str> = pattern.split(':').collect();
    let value_segments: Vec<&str> = value.split(':').collect();

    pattern_segments.len() == value_segments.len()
        && pattern_segments
            .iter()
            .zip(&value_segments)
            .all(|(p, v)| *p == "*" || p == v)
}

fn any_pattern_matches(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|pattern| pattern_matches(pattern, value))
}
