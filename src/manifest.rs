use core::fmt;

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{matcher::MatchConstraints, resource::Object};

pub type Str = CompactString;

/// The typed run specification, `krm.kcl.dev/v1alpha1` `KCLRun`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KclRun {
    #[serde(flatten)]
    pub type_meta: TypeMeta<apiversion::KclV1Alpha1, kind::KclRun>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub spec: KclRunSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KclRunSpec {
    /// Inline KCL code, a local path, or a git/http/oci reference.
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub source: String,
    #[serde(
        default,
        deserialize_with = "crate::serde_ex::nullable::deserialize",
        skip_serializing_if = "Object::is_empty"
    )]
    pub params: Object,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub config: ConfigSpec,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub credentials: CredSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_constraints: Option<MatchConstraints>,
}

/// Legacy `v1` `ConfigMap` function config. Every `data` entry becomes a param and
/// `data.source` is the program.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    #[serde(flatten)]
    pub type_meta: TypeMeta<apiversion::V1, kind::ConfigMap>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(
        default,
        deserialize_with = "crate::serde_ex::nullable::deserialize",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub data: IndexMap<Str, serde_json::Value>,
}

/// Compile options forwarded to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    /// Top level `option()` arguments in `name=value` form.
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub arguments: Vec<Str>,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub settings: Vec<Str>,
    /// Override paths and values, e.g. `app.image="v2"`.
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub overrides: Vec<Str>,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub path_selectors: Vec<Str>,
    /// External package name to local location.
    #[serde(
        default,
        deserialize_with = "crate::serde_ex::nullable::deserialize",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub external_pkgs: IndexMap<Str, Str>,
    #[serde(flatten)]
    pub flags: CompileFlags,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileFlags {
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub vendor: bool,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub sort_keys: bool,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub show_hidden: bool,
    /// Do not emit null valued fields.
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub disable_none: bool,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub debug: bool,
    /// 32-bit strict numeric range checks.
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub strict_range_check: bool,
}

/// Credentials for remote sources.
#[derive(Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct CredSpec {
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub url: Str,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub username: Str,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    pub password: Str,
}

impl fmt::Debug for CredSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredSpec")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Str>,
    #[serde(
        default,
        deserialize_with = "crate::serde_ex::nullable::deserialize",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub annotations: IndexMap<Str, Str>,
    #[serde(flatten)]
    pub rest: IndexMap<Str, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta<V, K> {
    pub api_version: Option<V>,
    pub kind: Option<K>,
}

impl<V, K> Default for TypeMeta<V, K>
where
    V: Default,
    K: Default,
{
    fn default() -> Self {
        Self {
            api_version: Some(V::default()),
            kind: Some(K::default()),
        }
    }
}

pub mod kind {
    use super::define_symbol;

    define_symbol!(ResourceList = "ResourceList");
    define_symbol!(KclRun = "KCLRun");
    define_symbol!(ConfigMap = "ConfigMap");
}

pub mod apiversion {
    use super::define_symbol;

    define_symbol!(ConfigV1 = "config.kubernetes.io/v1");
    define_symbol!(KclV1Alpha1 = "krm.kcl.dev/v1alpha1");
    define_symbol!(V1 = "v1");
}

macro_rules! define_symbol {
    ($name:ident = $value:literal) => {
        #[derive(Clone, PartialEq, Eq, Hash, Default)]
        #[allow(non_camel_case_types)]
        pub struct $name;

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", $value)
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", $value)
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str($value)
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let value: $crate::manifest::Str = ::serde::Deserialize::deserialize(deserializer)?;
                if value == $value {
                    Ok($name)
                } else {
                    Err(serde::de::Error::custom(format!(
                        "expected `{}`, found `{value}`",
                        $value
                    )))
                }
            }
        }

        impl $crate::manifest::Symbol for $name {
            const VALUE: &'static str = $value;
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                other == $value
            }
        }
    };
}

use define_symbol;

pub trait Symbol: fmt::Debug + Send + Sync {
    const VALUE: &'static str;
}
