use std::{collections::BTreeMap, ffi::OsStr, fmt::Write as _};

use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    Error, Result,
    config::RunSpec,
    manifest::{CompileFlags, Str},
    reslist::ResourceList,
};

pub const RESOURCE_LIST: &str = "resource_list";
pub const ITEMS: &str = "items";
pub const PARAMS: &str = "params";
pub const PATH: &str = "PATH";
pub const ENV: &str = "env";

/// Option names the program context always binds. User arguments with these names are
/// shadowed.
pub const RESERVED: &[&str] = &[RESOURCE_LIST, ITEMS, PARAMS, PATH, ENV];

/// A top level `option(name)` value, already rendered for the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: Str,
    pub value: String,
    /// Structured form of context bindings. Evaluators may pass it out of band, since the
    /// rendered envelope can be arbitrarily large.
    pub data: Option<Value>,
}

impl Binding {
    pub fn new(name: impl Into<Str>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            data: None,
        }
    }

    /// Strings bind as-is, everything else as a KCL literal.
    pub fn data(name: impl Into<Str>, data: Value) -> Self {
        let value = match &data {
            Value::String(s) => s.clone(),
            other => to_kcl_literal(other),
        };
        Self {
            name: name.into(),
            value,
            data: Some(data),
        }
    }
}

/// Everything an evaluator needs besides the entry files. Built per invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalOptions {
    /// User arguments first, then the context bindings, so later names win.
    pub bindings: Vec<Binding>,
    pub overrides: Vec<Str>,
    pub settings: Vec<Str>,
    pub path_selectors: Vec<Str>,
    pub external_pkgs: IndexMap<Str, Str>,
    pub flags: CompileFlags,
}

impl EvalOptions {
    pub fn build(spec: &RunSpec, envelope: &ResourceList) -> Result<Self> {
        Self::build_with_env(spec, envelope, std::env::vars_os())
    }

    /// Variables that are not valid UTF-8 are left out of `env`.
    pub fn build_with_env<K, V>(
        spec: &RunSpec,
        envelope: &ResourceList,
        env: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self>
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let mut bindings = Vec::with_capacity(spec.config.arguments.len() + RESERVED.len());
        for argument in &spec.config.arguments {
            let (name, value) = argument.split_once('=').ok_or_else(|| {
                Error::config(format!(
                    "invalid argument `{argument}`, expected `name=value`"
                ))
            })?;
            if RESERVED.contains(&name) {
                tracing::warn!(argument = name, "argument is shadowed by a context binding");
            }
            bindings.push(Binding::new(name, value));
        }

        let envelope = serde_json::to_value(envelope)
            .map_err(|err| Error::envelope(format!("serializing envelope: {err}")))?;
        let items = envelope
            .get(ITEMS)
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        let env = env
            .into_iter()
            .filter_map(|(key, value)| {
                let (key, value) = (key.as_ref(), value.as_ref());
                match (key.to_str(), value.to_str()) {
                    (Some(key), Some(value)) => Some((key.to_string(), value.to_string())),
                    _ => {
                        tracing::warn!(
                            name = %key.to_string_lossy(),
                            "skipping non-UTF-8 environment variable"
                        );
                        None
                    }
                }
            })
            .collect::<BTreeMap<_, _>>();
        let path = env.get(PATH).cloned().unwrap_or_default();
        let env = env
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect::<serde_json::Map<_, _>>();

        bindings.extend([
            Binding::data(RESOURCE_LIST, envelope),
            Binding::data(ITEMS, items),
            Binding::data(PARAMS, Value::Object(spec.params.clone())),
            Binding::data(PATH, Value::String(path)),
            Binding::data(ENV, Value::Object(env)),
        ]);

        Ok(Self {
            bindings,
            overrides: spec.config.overrides.clone(),
            settings: spec.config.settings.clone(),
            path_selectors: spec.config.path_selectors.clone(),
            external_pkgs: spec.config.external_pkgs.clone(),
            flags: spec.config.flags,
        })
    }

    /// The effective value of `option(name)`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|b| b.name == name)
            .map(|b| b.value.as_str())
    }
}

/// Renders a JSON value as a KCL literal: JSON syntax with `True`, `False` and `None`.
pub fn to_kcl_literal(value: &Value) -> String {
    let mut buf = String::new();
    write_literal(&mut buf, value);
    buf
}

fn write_literal(buf: &mut String, value: &Value) {
    match value {
        Value::Null => buf.push_str("None"),
        Value::Bool(true) => buf.push_str("True"),
        Value::Bool(false) => buf.push_str("False"),
        Value::Number(_) | Value::String(_) => {
            let _ = write!(buf, "{value}");
        }
        Value::Array(elements) => {
            buf.push('[');
            for (i, element) in elements.iter().enumerate() {
                if i > 0 {
                    buf.push_str(", ");
                }
                write_literal(buf, element);
            }
            buf.push(']');
        }
        Value::Object(map) => {
            buf.push('{');
            for (i, (key, v)) in map.iter().enumerate() {
                if i > 0 {
                    buf.push_str(", ");
                }
                let _ = write!(buf, "{}: ", Value::String(key.clone()));
                write_literal(buf, v);
            }
            buf.push('}');
        }
    }
}
