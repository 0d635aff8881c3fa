//! Serde helpers shared by the YAML documents

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

/// Deserialize a string field that authors sometimes leave unquoted
/// (`version: 1.0`), keeping the number exactly as YAML renders it.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!(
            "expected a string or number, found {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Doc {
        #[serde(deserialize_with = "string_or_number")]
        version: String,
    }

    #[test]
    fn test_unquoted_versions() {
        let doc: Doc = serde_yaml::from_str("version: 1.5").unwrap();
        assert_eq!(doc.version, "1.5");
        let doc: Doc = serde_yaml::from_str("version: 1.0").unwrap();
        assert_eq!(doc.version, "1.0");
        let doc: Doc = serde_yaml::from_str("version: 2").unwrap();
        assert_eq!(doc.version, "2");
        let doc: Doc = serde_yaml::from_str("version: \"^1.0.0\"").unwrap();
        assert_eq!(doc.version, "^1.0.0");
    }
}
