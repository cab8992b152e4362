//! Condition evaluation against the request context.
//!
//! A condition is stored under the name of the context value it inspects.
//! Any evaluation problem (missing value, wrong type, unparseable CIDR)
//! counts as "did not match" and silently filters the policy out; condition
//! bugs must never turn into request-level failures.

use std::net::IpAddr;

use common::model::{CompareOp, Condition};
use ipnetwork::IpNetwork;
use serde_json::{Map, Value};

/// Evaluate one condition named `name` against the request context.
#[must_use]
pub fn evaluate(condition: &Condition, name: &str, context: &Map<String, Value>) -> bool {
    let Some(value) = context.get(name) else {
        return false;
    };

    match condition {
        Condition::StringEqual { equals } => value.as_str() == Some(equals.as_str()),

        Condition::StringIn { values } => value
            .as_str()
            .is_some_and(|actual| values.iter().any(|candidate| candidate == actual)),

        Condition::CidrMatch { cidr } => {
            let Some(ip) = value.as_str().and_then(|s| s.parse::<IpAddr>().ok()) else {
                return false;
            };
            match cidr.parse::<IpNetwork>() {
                Ok(network) => network.contains(ip),
                Err(_) => false,
            }
        }

        Condition::NumericCompare { op, value: expected } => value
            .as_f64()
            .is_some_and(|actual| compare(*op, actual, *expected)),
    }
}

fn compare(op: CompareOp, actual: f64, expected: f64) -> bool {
    match op {
        CompareOp::Eq => actual == expected,
        CompareOp::Ne => actual != expected,
        CompareOp::Lt => actual < expected,
        CompareOp::Le => actual <= expected,
        CompareOp::Gt => actual > expected,
        CompareOp::Ge => actual >= expected,
    }
}
