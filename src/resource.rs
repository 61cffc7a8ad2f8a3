mod view;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::manifest::{Str, Symbol, apiversion, kind};

pub use self::view::{AnnotationsView, MetadataView};

pub type Object = serde_json::Map<String, serde_json::Value>;

pub mod annotation {
    /// Opt-in for plain http and git transports when fetching remote sources.
    pub const ALLOW_INSECURE_SOURCE: &str = "krm.kcl.dev/allow-insecure-source";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gvk {
    pub group: Str,
    pub version: Str,
    pub kind: Str,
}

impl Gvk {
    pub fn new(api_version: &str, kind: &str) -> Self {
        let (group, version) = api_version
            .split_once('/')
            .map_or(("".into(), api_version.into()), |(g, v)| (g.into(), v.into()));
        Gvk {
            group,
            version,
            kind: kind.into(),
        }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.kind, self.version)
        } else {
            write!(f, "{}.{}.{}", self.kind, self.version, self.group)
        }
    }
}

/// A single KRM resource. Only the root must be a mapping; `apiVersion`, `kind` and
/// `metadata` are all optional since function inputs are frequently partial.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resource {
    root: Object,
}

impl Resource {
    pub fn new(root: Object) -> Self {
        Resource { root }
    }

    pub fn api_version(&self) -> &str {
        self.str_field("apiVersion")
    }

    pub fn kind(&self) -> &str {
        self.str_field("kind")
    }

    pub fn gvk(&self) -> Gvk {
        Gvk::new(self.api_version(), self.kind())
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata()?.name()
    }

    pub fn root(&self) -> &Object {
        &self.root
    }

    /// Whether this is the `KCLRun` run specification itself.
    pub fn is_run_spec(&self) -> bool {
        self.api_version() == apiversion::KclV1Alpha1::VALUE && self.kind() == kind::KclRun::VALUE
    }

    fn str_field(&self, key: &str) -> &str {
        self.root.get(key).and_then(|v| v.as_str()).unwrap_or_default()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.gvk())?;
        if let Some(name) = self.name() {
            write!(f, "/{name}")?;
        }
        Ok(())
    }
}

impl From<Object> for Resource {
    fn from(root: Object) -> Self {
        Resource::new(root)
    }
}

impl From<Resource> for serde_json::Value {
    fn from(resource: Resource) -> Self {
        serde_json::Value::Object(resource.root)
    }
}

impl TryFrom<serde_json::Value> for Resource {
    type Error = crate::Error;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Object(root) => Ok(Resource { root }),
            other => Err(crate::Error::envelope(format!(
                "resource must be a mapping, got `{other}`"
            ))),
        }
    }
}

impl Serialize for Resource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        self.root.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let root = Object::deserialize(deserializer)
            .map_err(|err| serde::de::Error::custom(format!("parsing resource: {err}")))?;
        Ok(Resource { root })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(yaml: &str) -> Resource {
        crate::yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn gvk_from_api_version() {
        let gvk = Gvk::new("apps/v1", "Deployment");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.to_string(), "Deployment.v1.apps");
        assert_eq!(Gvk::new("v1", "Service").to_string(), "Service.v1");
    }

    #[test]
    fn partial_resources() {
        let service = resource("kind: Service");
        assert_eq!(service.kind(), "Service");
        assert_eq!(service.api_version(), "");
        assert_eq!(service.name(), None);

        let deploy = resource(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
"#,
        );
        assert_eq!(deploy.name(), Some("web"));
        assert_eq!(deploy.to_string(), "Deployment.v1.apps/web");
    }

    #[test]
    fn run_spec_detection() {
        assert!(resource("apiVersion: krm.kcl.dev/v1alpha1\nkind: KCLRun").is_run_spec());
        assert!(!resource("apiVersion: v1\nkind: KCLRun").is_run_spec());
        assert!(!resource("apiVersion: krm.kcl.dev/v1alpha1\nkind: Other").is_run_spec());
    }

    #[test]
    fn non_mapping_is_rejected() {
        assert!(crate::yaml::from_str::<Resource>("- a").is_err());
        assert!(Resource::try_from(serde_json::json!("scalar")).is_err());
    }
}
