//! Lenient decoders for provider columns
//!
//! The provider client renders some columns either as structured JSON or as
//! `key='value'` text depending on its version. These helpers accept both.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Flavor reference: a bare name or an object carrying `original_name`/`name`
pub(crate) fn flavor_reference<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(name)) => non_empty(name),
        Some(Value::Object(map)) => map
            .get("original_name")
            .or_else(|| map.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .and_then(non_empty),
        _ => None,
    })
}

/// Optional free-text column where an empty string means absent
pub(crate) fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => non_empty(text),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Networks: `{"net": ["ip", ...]}` or `"net=ip, ip; net2=ip"`
pub(crate) fn networks<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let mut networks = BTreeMap::new();
    match value {
        Some(Value::Object(map)) => {
            for (name, addresses) in map {
                let list = match addresses {
                    Value::Array(items) => items
                        .into_iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect(),
                    Value::String(single) => vec![single],
                    _ => Vec::new(),
                };
                networks.insert(name, list);
            }
        }
        Some(Value::String(text)) => {
            for segment in text.split(';') {
                let Some((name, addresses)) = segment.split_once('=') else {
                    continue;
                };
                let list = addresses
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect();
                networks.insert(name.trim().to_string(), list);
            }
        }
        _ => {}
    }
    Ok(networks)
}

/// Security groups: `[{"name": ..}]`, `["name", ..]` or `"name='a'\nname='b'"`
pub(crate) fn security_group_names<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name),
                Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
        Some(Value::String(text)) => key_values(&text)
            .into_iter()
            .filter(|(k, _)| k == "name")
            .map(|(_, v)| v)
            .collect(),
        _ => BTreeSet::new(),
    })
}

/// Properties: a JSON object or `"key='value', key2='value2'"`
pub(crate) fn properties<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, text)
            })
            .collect(),
        Some(Value::String(text)) => key_values(&text).into_iter().collect(),
        _ => BTreeMap::new(),
    })
}

/// Attached volumes: `[{"id": ..}]` or `"id='..'\nid='..'"`
pub(crate) fn volume_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(id) => non_empty(id),
                Value::Object(map) => map.get("id").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
        Some(Value::String(text)) => key_values(&text)
            .into_iter()
            .filter(|(k, _)| k == "id")
            .map(|(_, v)| v)
            .collect(),
        _ => Vec::new(),
    })
}

/// Parse `key='value'` pairs separated by commas or newlines
fn key_values(text: &str) -> Vec<(String, String)> {
    text.split([',', '\n'])
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let value = value.trim().trim_matches('\'').trim_matches('"');
            Some((key.trim().to_string(), value.to_string()))
        })
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
