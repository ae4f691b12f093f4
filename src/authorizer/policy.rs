//! Access decision documents in the API gateway authorizer response format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Policy language version the gateway expects.
pub const POLICY_VERSION: &str = "2012-10-17";

/// The only action an authorizer grants.
pub const INVOKE_ACTION: &str = "execute-api:Invoke";

/// Principal reported for every decision.
pub const PRINCIPAL_ID: &str = "User";

/// Context key holding the serialized token for downstream handlers.
pub const CONTEXT_USER_KEY: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub action: String,
    pub effect: Effect,
    pub resource: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

/// The authorizer's answer for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub principal_id: String,
    pub policy_document: PolicyDocument,
    pub context: BTreeMap<String, String>,
}

impl AccessDecision {
    /// Build a single-statement decision for `resource` with the given context.
    #[must_use]
    pub fn new(effect: Effect, resource: &str, context: BTreeMap<String, String>) -> Self {
        Self {
            principal_id: PRINCIPAL_ID.to_string(),
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: vec![Statement {
                    action: INVOKE_ACTION.to_string(),
                    effect,
                    resource: vec![resource.to_string()],
                }],
            },
            context,
        }
    }

    /// Allow `resource`, carrying the serialized token under [`CONTEXT_USER_KEY`].
    #[must_use]
    pub fn allow(resource: &str, user: String) -> Self {
        Self::new(
            Effect::Allow,
            resource,
            BTreeMap::from([(CONTEXT_USER_KEY.to_string(), user)]),
        )
    }

    #[must_use]
    pub fn effect(&self) -> Option<Effect> {
        self.policy_document.statement.first().map(|s| s.effect)
    }
}
