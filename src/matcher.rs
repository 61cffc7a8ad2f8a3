use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{manifest::Str, resource::Resource};

pub const WILDCARD: &str = "*";

/// Post-transform filter. An empty rule list matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConstraints {
    #[serde(
        default,
        deserialize_with = "crate::serde_ex::nullable::deserialize",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub resource_rules: Vec<ResourceRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    #[serde(
        default,
        deserialize_with = "crate::serde_ex::nullable::deserialize",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub api_versions: Vec<Str>,
    #[serde(
        default,
        deserialize_with = "crate::serde_ex::nullable::deserialize",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub kinds: Vec<Str>,
}

impl ResourceRule {
    pub fn matches(&self, api_version: &str, kind: &str) -> bool {
        field_matches(&self.api_versions, api_version) && field_matches(&self.kinds, kind)
    }
}

impl fmt::Display for ResourceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(patterns: &[Str]) -> String {
            if patterns.is_empty() {
                WILDCARD.to_string()
            } else {
                patterns.join("|")
            }
        }

        write!(f, "{}/{}", join(&self.api_versions), join(&self.kinds))
    }
}

impl MatchConstraints {
    pub fn matches(&self, resource: &Resource) -> bool {
        self.resource_rules.is_empty()
            || self
                .resource_rules
                .iter()
                .any(|rule| rule.matches(resource.api_version(), resource.kind()))
    }
}

/// Absent constraints are permissive.
pub fn matches(resource: &Resource, constraints: Option<&MatchConstraints>) -> bool {
    constraints.is_none_or(|c| c.matches(resource))
}

fn field_matches(patterns: &[Str], value: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p == WILDCARD || p == value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(api_version: &str, kind: &str) -> Resource {
        crate::yaml::from_str(&format!("apiVersion: {api_version}\nkind: {kind}")).unwrap()
    }

    fn rule(api_versions: &[&str], kinds: &[&str]) -> ResourceRule {
        ResourceRule {
            api_versions: api_versions.iter().map(|&s| s.into()).collect(),
            kinds: kinds.iter().map(|&s| s.into()).collect(),
        }
    }

    #[test]
    fn absent_or_empty_matches_everything() {
        let resources = [
            resource("apps/v1", "Deployment"),
            resource("v1", "Service"),
            Resource::default(),
        ];
        for r in &resources {
            assert!(matches(r, None));
            assert!(matches(r, Some(&MatchConstraints::default())));
        }
    }

    #[test]
    fn wildcard_field_matches_anything() {
        let constraints = MatchConstraints {
            resource_rules: vec![rule(&["*"], &["Service"])],
        };
        assert!(constraints.matches(&resource("v1", "Service")));
        assert!(constraints.matches(&resource("serving.knative.dev/v1", "Service")));
        assert!(!constraints.matches(&resource("v1", "ConfigMap")));

        let any_kind = rule(&["apps/v1"], &["Deployment", "*"]);
        assert!(any_kind.matches("apps/v1", "StatefulSet"));
        assert!(!any_kind.matches("v1", "StatefulSet"));
    }

    #[test]
    fn empty_field_is_match_all() {
        let kinds_only = rule(&[], &["Service"]);
        assert!(kinds_only.matches("v1", "Service"));
        assert!(kinds_only.matches("", "Service"));
        assert!(!kinds_only.matches("v1", "Deployment"));
        assert!(ResourceRule::default().matches("x", "y"));
    }

    #[test]
    fn any_rule_matching_is_enough() {
        let constraints = MatchConstraints {
            resource_rules: vec![rule(&["v1"], &["Service"]), rule(&["apps/v1"], &["Deployment"])],
        };
        assert!(constraints.matches(&resource("apps/v1", "Deployment")));
        assert!(constraints.matches(&resource("v1", "Service")));
        assert!(!constraints.matches(&resource("apps/v1", "Service")));
    }

    #[test]
    fn null_rules_deserialize() {
        let constraints: MatchConstraints = crate::yaml::from_str("resourceRules:").unwrap();
        assert!(constraints.resource_rules.is_empty());

        let constraints: MatchConstraints =
            crate::yaml::from_str("resourceRules:\n- kinds: [Service]\n  apiVersions:").unwrap();
        assert_eq!(constraints.resource_rules[0].to_string(), "*/Service");
    }
}
