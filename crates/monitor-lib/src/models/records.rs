//! Auxiliary records fetched while resolving VM metadata

use serde::Deserialize;
use std::collections::BTreeMap;

use super::fields;

/// `image show` reply
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageDetail {
    #[serde(default, deserialize_with = "fields::properties")]
    pub properties: BTreeMap<String, String>,
}

/// `volume show` reply
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VolumeDetail {
    /// Properties copied from the image the volume was created from
    #[serde(default, deserialize_with = "fields::properties")]
    pub volume_image_metadata: BTreeMap<String, String>,
}

/// `token issue` reply
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedToken {
    pub user_id: String,
}

/// `user show` reply
#[derive(Debug, Clone, Deserialize)]
pub struct UserDetail {
    pub id: String,
    pub domain_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_properties_text_form() {
        let detail: ImageDetail = serde_json::from_value(serde_json::json!({
            "properties": "os_distro='ubuntu', os_version='22.04'"
        }))
        .unwrap();
        assert_eq!(detail.properties["os_distro"], "ubuntu");
        assert_eq!(detail.properties["os_version"], "22.04");
    }

    #[test]
    fn test_volume_without_image_metadata() {
        let detail: VolumeDetail =
            serde_json::from_value(serde_json::json!({"id": "vol-1", "size": 20})).unwrap();
        assert!(detail.volume_image_metadata.is_empty());
    }
}
