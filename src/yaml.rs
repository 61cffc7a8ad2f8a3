use serde::{Deserialize, de::DeserializeOwned};

pub fn from_str<T>(s: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    serde_yaml::from_str(s).map_err(Into::into)
}

/// Parses a multi-document stream. Empty documents (a stray `---`, or no input at all)
/// are skipped.
pub fn from_str_multi(s: &str) -> anyhow::Result<Vec<serde_json::Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(s) {
        let value = serde_json::Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

pub fn from_slice_multi(s: &[u8]) -> anyhow::Result<Vec<serde_json::Value>> {
    from_str_multi(std::str::from_utf8(s)?)
}

pub fn to_string<T>(value: &T) -> anyhow::Result<String>
where
    T: serde::Serialize,
{
    serde_yaml::to_string(value).map_err(Into::into)
}
