use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{id, name}` reference Redmine embeds for projects, trackers, statuses, users and activities.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NamedRef {
    pub id: u64,
    #[serde(default, deserialize_with = "deserialize_name")]
    pub name: String,
}

impl NamedRef {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Older Redmine versions omit `name` on some refs or send it as a number.
fn deserialize_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}
