//! Validators gate writes per sender and keypath.
//!
//! A subtree opts into a validator through a `Validator` child whose
//! `Content-Type` names a registered validator (e.g.
//! `validator/permissions`) and whose `value` holds its config. The
//! permissions validator maps sender addresses (lowercase hex, or `*` for
//! anyone) to keypath regexes with a `write` grant:
//!
//! ```json
//! {
//!   "96216849c49358b10257cb55b28ea603c874b05e": { "^.*$": { "write": true } },
//!   "*": { "^\\.refs\\..*": { "write": true } }
//! }
//! ```
//!
//! A patch is permitted iff at least one regex granted to the sender (or
//! to `*`) matches the patch's dotted keypath and grants write.

use crate::error::ValidatorError;
use madrona_model::{Address, Patch, Value};
use regex::Regex;

/// Gates one patch for one sender against the current state.
pub trait Validator: Send + Sync {
    fn validate(&self, from: &Address, patch: &Patch) -> Result<(), ValidatorError>;
}

/// Builds a validator from its per-subtree config (the `value` entry of
/// the `Validator` node).
pub trait ValidatorFactory: Send + Sync {
    fn make(&self, config: &Value) -> Result<Box<dyn Validator>, ValidatorError>;
}

struct Grant {
    // None grants to any sender (the `*` entry)
    address: Option<Address>,
    pattern: Regex,
    write: bool,
}

/// Per-keypath permission regexes keyed by sender address.
pub struct PermissionsValidator {
    grants: Vec<Grant>,
}

impl PermissionsValidator {
    pub fn from_config(config: &Value) -> Result<PermissionsValidator, ValidatorError> {
        let entries = config
            .as_map()
            .ok_or_else(|| ValidatorError::BadConfig("expected a map of addresses".into()))?;

        let mut grants = Vec::new();
        for (who, rules) in entries {
            let address = if who == "*" {
                None
            } else {
                Some(Address::from_hex(who).map_err(ValidatorError::BadConfig)?)
            };
            let rules = rules.as_map().ok_or_else(|| {
                ValidatorError::BadConfig(format!("expected a map of patterns for {}", who))
            })?;
            for (pattern, caps) in rules {
                let pattern = Regex::new(pattern)
                    .map_err(|e| ValidatorError::BadConfig(format!("bad pattern: {}", e)))?;
                let write = caps
                    .get("write")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                grants.push(Grant {
                    address,
                    pattern,
                    write,
                });
            }
        }
        Ok(PermissionsValidator { grants })
    }
}

impl Validator for PermissionsValidator {
    fn validate(&self, from: &Address, patch: &Patch) -> Result<(), ValidatorError> {
        let keypath = patch.dotted_keypath();
        let permitted = self.grants.iter().any(|grant| {
            grant.write
                && grant
                    .address
                    .map(|addr| addr == *from)
                    .unwrap_or(true)
                && grant.pattern.is_match(&keypath)
        });
        if permitted {
            Ok(())
        } else {
            Err(ValidatorError::Forbidden {
                from: from.to_string(),
                keypath,
            })
        }
    }
}

/// Factory for [`PermissionsValidator`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissionsValidatorFactory;

impl ValidatorFactory for PermissionsValidatorFactory {
    fn make(&self, config: &Value) -> Result<Box<dyn Validator>, ValidatorError> {
        Ok(Box::new(PermissionsValidator::from_config(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use madrona_model::NodeIdentity;
    use serde_json::json;

    fn validator_for(owner: &Address) -> PermissionsValidator {
        let config_json = format!(
            r#"{{
                "{owner}": {{ "^.*$": {{ "write": true }} }},
                "*": {{
                    "^\\.refs\\..*": {{ "write": true }},
                    "^\\.commits\\.[a-f0-9]+\\.message": {{ "write": true }}
                }}
            }}"#
        );
        let config = Value::from_json(serde_json::from_str(&config_json).unwrap());
        PermissionsValidator::from_config(&config).unwrap()
    }

    #[test]
    fn test_owner_may_write_anywhere() {
        let owner = NodeIdentity::generate().address();
        let v = validator_for(&owner);
        let patch = Patch::parse(r#".anything.at.all = 1"#).unwrap();
        v.validate(&owner, &patch).unwrap();
    }

    #[test]
    fn test_star_grants_matching_keypaths_to_anyone() {
        let owner = NodeIdentity::generate().address();
        let stranger = NodeIdentity::generate().address();
        let v = validator_for(&owner);

        let refs = Patch::parse(r#".refs.heads.master = {"HEAD": "aa"}"#).unwrap();
        v.validate(&stranger, &refs).unwrap();

        let message = Patch::parse(r#".commits.deadbeef.message = "hi""#).unwrap();
        v.validate(&stranger, &message).unwrap();
    }

    #[test]
    fn test_unmatched_keypath_is_forbidden() {
        let owner = NodeIdentity::generate().address();
        let stranger = NodeIdentity::generate().address();
        let v = validator_for(&owner);

        let patch = Patch::parse(r#".commits.deadbeef.sneaky = "no""#).unwrap();
        assert!(matches!(
            v.validate(&stranger, &patch),
            Err(ValidatorError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_write_false_grants_nothing() {
        let stranger = NodeIdentity::generate().address();
        let config = Value::from_json(json!({
            "*": { "^.*$": { "write": false } },
        }));
        let v = PermissionsValidator::from_config(&config).unwrap();
        let patch = Patch::parse(r#".x = 1"#).unwrap();
        assert!(v.validate(&stranger, &patch).is_err());
    }

    #[test]
    fn test_bad_config_rejected() {
        assert!(PermissionsValidator::from_config(&Value::Uint(3)).is_err());
        let bad_regex = Value::from_json(json!({"*": {"[": {"write": true}}}));
        assert!(PermissionsValidator::from_config(&bad_regex).is_err());
    }
}
