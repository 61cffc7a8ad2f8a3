use serde::Deserialize;

use crate::{
    Error, Result,
    manifest::{ConfigMap, ConfigSpec, CredSpec, KclRun, Str, Symbol, apiversion, kind},
    matcher::MatchConstraints,
    resource::{Gvk, Object, Resource},
    serde_ex,
};

pub const DEFAULT_PROGRAM_NAME: &str = "kcl-function-run";

/// Key of the `ConfigMap` entry holding the program.
pub const SOURCE_KEY: &str = "source";

pub mod env {
    pub const SRC_URL: &str = "KCL_SRC_URL";
    pub const SRC_USERNAME: &str = "KCL_SRC_USERNAME";
    pub const SRC_PASSWORD: &str = "KCL_SRC_PASSWORD";
}

/// The accepted function config shapes, keyed by apiVersion and kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionConfig {
    ConfigMap(ConfigMap),
    KclRun(KclRun),
}

impl FunctionConfig {
    pub fn decode(object: &Object) -> Result<Self> {
        if object.is_empty() {
            return Err(missing());
        }

        let resource = Resource::new(object.clone());
        let (api_version, found) = (resource.api_version(), resource.kind());
        let value = serde_json::Value::Object(object.clone());
        if api_version == apiversion::V1::VALUE && found == kind::ConfigMap::VALUE {
            ConfigMap::deserialize(value)
                .map(FunctionConfig::ConfigMap)
                .map_err(|err| Error::config(format!("parsing ConfigMap function config: {err}")))
        } else if api_version == apiversion::KclV1Alpha1::VALUE && found == kind::KclRun::VALUE {
            KclRun::deserialize(value)
                .map(FunctionConfig::KclRun)
                .map_err(|err| Error::config(format!("parsing KCLRun function config: {err}")))
        } else {
            Err(Error::config(format!(
                "`functionConfig` must be either {} or {}, but we got: {}",
                Gvk::new(apiversion::V1::VALUE, kind::ConfigMap::VALUE),
                Gvk::new(apiversion::KclV1Alpha1::VALUE, kind::KclRun::VALUE),
                Gvk::new(api_version, found),
            )))
        }
    }
}

fn missing() -> Error {
    Error::config("FunctionConfig is missing. Expect `ConfigMap` or `KCLRun`")
}

/// The canonical run request every other component works from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSpec {
    pub name: Str,
    pub source: String,
    pub params: Object,
    pub config: ConfigSpec,
    pub credentials: CredSpec,
    pub match_constraints: Option<MatchConstraints>,
    /// Set from the `krm.kcl.dev/allow-insecure-source` annotation.
    pub allow_insecure_source: bool,
}

impl From<FunctionConfig> for RunSpec {
    fn from(config: FunctionConfig) -> Self {
        match config {
            FunctionConfig::ConfigMap(cm) => {
                let mut spec = RunSpec {
                    name: cm.metadata.name.unwrap_or_default(),
                    ..Default::default()
                };
                for (key, value) in cm.data {
                    let value = serde_ex::scalar::to_string(&value);
                    if key == SOURCE_KEY {
                        spec.source = value.clone();
                    }
                    spec.params
                        .insert(key.to_string(), serde_json::Value::String(value));
                }
                spec
            }
            FunctionConfig::KclRun(run) => RunSpec {
                name: run.metadata.name.unwrap_or_default(),
                source: run.spec.source,
                params: run.spec.params,
                config: run.spec.config,
                credentials: run.spec.credentials,
                match_constraints: run.spec.match_constraints,
                allow_insecure_source: false,
            },
        }
    }
}

/// Decodes, defaults and validates a raw function config.
#[tracing::instrument(skip_all)]
pub fn normalize(raw: Option<&Object>) -> Result<RunSpec> {
    let raw = raw.ok_or_else(missing)?;
    let mut spec = RunSpec::from(FunctionConfig::decode(raw)?);

    spec.allow_insecure_source = Resource::new(raw.clone())
        .annotations()
        .is_some_and(|annotations| annotations.allow_insecure_source());

    if spec.name.is_empty() {
        spec.name = DEFAULT_PROGRAM_NAME.into();
    }

    if spec.source.is_empty() {
        return Err(Error::config("`source` must not be empty"));
    }

    tracing::debug!(name = %spec.name, "normalized function config");
    Ok(spec)
}

pub fn is_truthy(value: &str) -> bool {
    ["ok", "yes", "true", "1", "on"]
        .iter()
        .any(|ok| value.eq_ignore_ascii_case(ok))
}

impl CredSpec {
    /// Fields from `KCL_SRC_URL`, `KCL_SRC_USERNAME` and `KCL_SRC_PASSWORD` take precedence
    /// over the configured ones.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for (key, field) in [
            (env::SRC_URL, &mut self.url),
            (env::SRC_USERNAME, &mut self.username),
            (env::SRC_PASSWORD, &mut self.password),
        ] {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = value.into();
            }
        }
        self
    }

    /// Whether these credentials should be sent to `target`, a registry host or URL. Host and
    /// port must match exactly. A scope path matches whole segments only.
    pub fn applies_to(&self, target: &str) -> bool {
        if self.username.is_empty() && self.password.is_empty() {
            return false;
        }
        if self.url.is_empty() {
            return true;
        }

        let (Some(scope), Some(target)) = (parse_loose(&self.url), parse_loose(target)) else {
            return false;
        };
        if scope.host_str().is_none()
            || scope.host_str() != target.host_str()
            || scope.port() != target.port()
        {
            return false;
        }

        let prefix = scope.path().trim_end_matches('/');
        let path = target.path();
        prefix.is_empty()
            || path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// Parses `url`, reading scheme-less references such as `ghcr.io/org` as https.
fn parse_loose(url: &str) -> Option<url::Url> {
    if url.contains("://") {
        url::Url::parse(url).ok()
    } else {
        url::Url::parse(&format!("https://{url}")).ok()
    }
}
