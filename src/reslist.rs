use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    manifest::{Str, Symbol, apiversion, kind},
    resource::{Object, Resource},
};

/// The envelope exchanged with KRM function runners and with the KCL program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    #[serde(default = "default_api_version")]
    api_version: Str,
    kind: kind::ResourceList,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    items: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_config: Option<Object>,
}

fn default_api_version() -> Str {
    apiversion::ConfigV1::VALUE.into()
}

impl ResourceList {
    pub fn new(
        resources: impl IntoIterator<Item = Resource>,
        function_config: Option<Object>,
    ) -> Self {
        Self {
            api_version: default_api_version(),
            kind: kind::ResourceList,
            items: resources.into_iter().collect(),
            function_config,
        }
    }

    /// Parses an input envelope. Any `apiVersion` is accepted, the kind must be `ResourceList`.
    pub fn parse(input: &str) -> Result<Self> {
        let value = crate::yaml::from_str::<serde_json::Value>(input)
            .map_err(|err| Error::envelope(format!("failed to parse input bytes: {err}")))?;
        let found = value.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
        if found != kind::ResourceList::VALUE {
            return Err(Error::envelope(format!(
                "input was of unexpected kind {found:?}; expected ResourceList"
            )));
        }
        serde_json::from_value(value)
            .map_err(|err| Error::envelope(format!("parsing ResourceList: {err}")))
    }

    pub fn items(&self) -> &[Resource] {
        &self.items
    }

    pub fn function_config(&self) -> Option<&Object> {
        self.function_config.as_ref()
    }

    pub fn into_parts(self) -> (Vec<Resource>, Option<Object>) {
        (self.items, self.function_config)
    }
}

impl IntoIterator for ResourceList {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Builds the envelope handed to the program. `KCLRun` resources are never items, the
/// run specification travels only as `functionConfig`.
pub fn wrap(
    resources: impl IntoIterator<Item = Resource>,
    function_config: Option<Object>,
) -> ResourceList {
    ResourceList::new(
        resources.into_iter().filter(|r| !r.is_run_spec()),
        function_config,
    )
}

/// Recovers the resources from the program's output stream.
///
/// - no documents: no resources
/// - one mapping without `items`: the document itself is the only resource
/// - one mapping with `items`: its elements
/// - one sequence: its elements
/// - several documents: each document is a resource
///
/// The `functionConfig` of a single wrapped document is returned alongside.
pub fn unwrap(mut stream: Vec<serde_json::Value>) -> Result<(Vec<Resource>, Option<Object>)> {
    if stream.is_empty() {
        return Ok((Vec::new(), None));
    }

    let documents = if stream.len() == 1 {
        match stream.remove(0) {
            serde_json::Value::Object(mut root) => {
                let function_config = root
                    .get("functionConfig")
                    .and_then(|v| v.as_object())
                    .cloned();
                return match root.remove("items") {
                    None => Ok((vec![Resource::new(root)], None)),
                    Some(serde_json::Value::Null) => Ok((Vec::new(), function_config)),
                    Some(serde_json::Value::Array(items)) => {
                        Ok((into_resources(items)?, function_config))
                    }
                    Some(other) => Err(Error::envelope(format!(
                        "`items` must be a sequence, got `{other}`"
                    ))),
                };
            }
            serde_json::Value::Array(items) => items,
            other => {
                return Err(Error::envelope(format!(
                    "program output must be a mapping or a sequence, got `{other}`"
                )));
            }
        }
    } else {
        stream
    };

    let resources = into_resources(documents)?
        .into_iter()
        .filter(|r| !r.is_run_spec())
        .collect();
    Ok((resources, None))
}

fn into_resources(values: Vec<serde_json::Value>) -> Result<Vec<Resource>> {
    values.into_iter().map(Resource::try_from).collect()
}
