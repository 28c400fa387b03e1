//! Per-table, per-action access policy. Five ordered slots
//! (view, list, create, update, delete), persisted as a `;`-joined token
//! string but handled in memory as a closed rule enum so slot parsing can
//! never be confused with rule interpretation.

use crate::auth::Caller;
use crate::error::AppError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    View,
    List,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::View,
        Action::List,
        Action::Create,
        Action::Update,
        Action::Delete,
    ];

    fn slot(self) -> usize {
        match self {
            Action::View => 0,
            Action::List => 1,
            Action::Create => 2,
            Action::Update => 3,
            Action::Delete => 4,
        }
    }
}

/// One slot of the policy.
///
/// `Owned` carries the raw token; what the token means (own row vs. a
/// column pointing at the owner) is decided at evaluation time, where the
/// table's auth flag is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessRule {
    /// `"0"` — admin only.
    Denied,
    /// `"1"` — any authenticated caller.
    Authenticated,
    /// `"2"` — public, no caller needed.
    Public,
    /// Any other token — ownership check against this column (or the row
    /// itself on auth tables).
    Owned(String),
}

impl AccessRule {
    fn parse(token: &str) -> Self {
        match token {
            "0" | "" => AccessRule::Denied,
            "1" => AccessRule::Authenticated,
            "2" => AccessRule::Public,
            other => AccessRule::Owned(other.to_string()),
        }
    }

    fn encode(&self) -> &str {
        match self {
            AccessRule::Denied => "0",
            AccessRule::Authenticated => "1",
            AccessRule::Public => "2",
            AccessRule::Owned(column) => column,
        }
    }
}

/// Exactly five slots, always. Missing or malformed slots come out as
/// [`AccessRule::Denied`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPolicy {
    rules: [AccessRule; 5],
}

impl AccessPolicy {
    pub fn admin_only() -> Self {
        Self {
            rules: [
                AccessRule::Denied,
                AccessRule::Denied,
                AccessRule::Denied,
                AccessRule::Denied,
                AccessRule::Denied,
            ],
        }
    }

    /// Parse the persisted `view;list;create;update;delete` token string.
    pub fn parse(raw: &str) -> Self {
        let mut policy = Self::admin_only();
        for (i, token) in raw.split(';').take(5).enumerate() {
            policy.rules[i] = AccessRule::parse(token.trim());
        }
        policy
    }

    pub fn encode(&self) -> String {
        self.rules
            .iter()
            .map(AccessRule::encode)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Build from five caller-supplied tokens, validating each one.
    pub fn from_tokens(tokens: &[String]) -> Result<Self, AppError> {
        if tokens.len() != 5 {
            return Err(AppError::BadRequest(format!(
                "access policy needs exactly 5 slots, got {}",
                tokens.len()
            )));
        }
        let mut policy = Self::admin_only();
        for (i, token) in tokens.iter().enumerate() {
            let token = token.trim();
            match token {
                "0" | "1" | "2" => {}
                other if crate::sql::is_valid_ident(other) => {}
                other => {
                    return Err(AppError::BadRequest(format!(
                        "invalid access token: {:?}",
                        other
                    )))
                }
            }
            policy.rules[i] = AccessRule::parse(token);
        }
        Ok(policy)
    }

    pub fn rule(&self, action: Action) -> &AccessRule {
        &self.rules[action.slot()]
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::admin_only()
    }
}

impl Serialize for AccessPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for AccessPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.split(';').count() > 5 {
            return Err(D::Error::custom("access policy has more than 5 slots"));
        }
        Ok(AccessPolicy::parse(&raw))
    }
}

/// How an ownership rule applies to a concrete table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnershipCheck {
    /// Auth table: the row's primary key must equal the caller's identity.
    SelfId,
    /// Any other table: this column's value must equal the caller's identity.
    Column(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Deny,
    Allow,
    RequireOwnership(OwnershipCheck),
}

/// Evaluate one slot for a caller. Admins always pass. Ownership checks
/// that need the row's data are deferred to the row engine.
pub fn evaluate(rule: &AccessRule, caller: Option<&Caller>, is_auth_table: bool) -> AccessDecision {
    if caller.is_some_and(Caller::is_admin) {
        return AccessDecision::Allow;
    }
    match rule {
        AccessRule::Denied => AccessDecision::Deny,
        AccessRule::Authenticated => {
            if caller.is_some() {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny
            }
        }
        AccessRule::Public => AccessDecision::Allow,
        AccessRule::Owned(column) => {
            if caller.is_none() {
                return AccessDecision::Deny;
            }
            if is_auth_table {
                AccessDecision::RequireOwnership(OwnershipCheck::SelfId)
            } else {
                AccessDecision::RequireOwnership(OwnershipCheck::Column(column.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn admin() -> Caller {
        Caller {
            id: 1,
            role: Role::Admin,
        }
    }

    fn user(id: i64) -> Caller {
        Caller {
            id,
            role: Role::User,
        }
    }

    #[test]
    fn parse_encode_roundtrip() {
        let policy = AccessPolicy::parse("2;1;0;owner_id;2");
        assert_eq!(policy.rule(Action::View), &AccessRule::Public);
        assert_eq!(policy.rule(Action::List), &AccessRule::Authenticated);
        assert_eq!(policy.rule(Action::Create), &AccessRule::Denied);
        assert_eq!(
            policy.rule(Action::Update),
            &AccessRule::Owned("owner_id".into())
        );
        assert_eq!(policy.encode(), "2;1;0;owner_id;2");
    }

    #[test]
    fn missing_slots_default_to_denied() {
        let policy = AccessPolicy::parse("2;1");
        assert_eq!(policy.rule(Action::Create), &AccessRule::Denied);
        assert_eq!(policy.rule(Action::Delete), &AccessRule::Denied);
        assert_eq!(policy.encode(), "2;1;0;0;0");
    }

    #[test]
    fn admin_always_allowed() {
        let caller = admin();
        for rule in [
            AccessRule::Denied,
            AccessRule::Authenticated,
            AccessRule::Public,
            AccessRule::Owned("owner_id".into()),
        ] {
            assert_eq!(evaluate(&rule, Some(&caller), false), AccessDecision::Allow);
        }
    }

    #[test]
    fn denied_rejects_everyone_else() {
        let caller = user(3);
        assert_eq!(
            evaluate(&AccessRule::Denied, Some(&caller), false),
            AccessDecision::Deny
        );
        assert_eq!(
            evaluate(&AccessRule::Denied, None, false),
            AccessDecision::Deny
        );
    }

    #[test]
    fn authenticated_requires_a_caller() {
        let caller = user(3);
        assert_eq!(
            evaluate(&AccessRule::Authenticated, Some(&caller), false),
            AccessDecision::Allow
        );
        assert_eq!(
            evaluate(&AccessRule::Authenticated, None, false),
            AccessDecision::Deny
        );
    }

    #[test]
    fn public_allows_anonymous() {
        assert_eq!(
            evaluate(&AccessRule::Public, None, false),
            AccessDecision::Allow
        );
    }

    #[test]
    fn ownership_splits_on_auth_flag() {
        let caller = user(3);
        let rule = AccessRule::Owned("owner_id".into());
        assert_eq!(
            evaluate(&rule, Some(&caller), false),
            AccessDecision::RequireOwnership(OwnershipCheck::Column("owner_id".into()))
        );
        assert_eq!(
            evaluate(&rule, Some(&caller), true),
            AccessDecision::RequireOwnership(OwnershipCheck::SelfId)
        );
        assert_eq!(evaluate(&rule, None, false), AccessDecision::Deny);
    }

    #[test]
    fn from_tokens_validates() {
        let ok = AccessPolicy::from_tokens(&[
            "2".into(),
            "2".into(),
            "0".into(),
            "owner_id".into(),
            "0".into(),
        ])
        .unwrap();
        assert_eq!(ok.encode(), "2;2;0;owner_id;0");

        assert!(AccessPolicy::from_tokens(&vec!["2".to_string(); 4]).is_err());
        assert!(AccessPolicy::from_tokens(&[
            "2".into(),
            "2".into(),
            "0".into(),
            "bad column".into(),
            "0".into(),
        ])
        .is_err());
    }
}
