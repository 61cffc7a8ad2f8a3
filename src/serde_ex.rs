/// Treats an explicit `null` the same as an absent field, e.g. `resourceRules:` with no value.
pub mod nullable {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }
}

/// Renders a scalar as the string a `ConfigMap` would have held.
pub mod scalar {
    use serde_json::Value;

    pub fn to_string(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(_) | Value::Object(_) => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "super::nullable::deserialize")]
        values: Vec<String>,
    }

    #[test]
    fn null_is_default() {
        let holder: Holder = serde_yaml::from_str("values:").unwrap();
        assert!(holder.values.is_empty());

        let holder: Holder = serde_yaml::from_str("{}").unwrap();
        assert!(holder.values.is_empty());

        let holder: Holder = serde_yaml::from_str("values: [a]").unwrap();
        assert_eq!(holder.values, ["a"]);
    }

    #[test]
    fn scalars() {
        assert_eq!(super::scalar::to_string(&serde_json::json!("5")), "5");
        assert_eq!(super::scalar::to_string(&serde_json::json!(5)), "5");
        assert_eq!(super::scalar::to_string(&serde_json::json!(true)), "true");
        assert_eq!(super::scalar::to_string(&serde_json::Value::Null), "");
    }
}
