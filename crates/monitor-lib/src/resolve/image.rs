use std::collections::BTreeMap;

use crate::context::ScanContext;
use crate::gateway::{Operation, Scope};
use crate::models::{ImageDetail, VolumeDetail};

/// Placeholder when no source names the image
pub const IMAGE_NOT_FOUND: &str = "image name not found";

/// Marker the compute service puts in the image column of volume-booted VMs
const BOOTED_FROM_VOLUME: &str = "booted from volume";

/// OS name/version property conventions, in lookup order
const OS_PROPERTY_PAIRS: [(&str, &str); 2] =
    [("sl:osname", "sl:osversion"), ("os_distro", "os_version")];

/// Combined image-name property copied onto volumes
const VOLUME_IMAGE_NAME: &str = "image_name";

/// One source of image identity, tried in order
#[derive(Debug, Clone, Copy)]
enum ImageSource<'a> {
    Listed(&'a str),
    Registry { image_id: &'a str },
    Volume { volume_id: &'a str },
}

/// Human-readable image of a VM. Always non-empty; falls back to
/// [`IMAGE_NOT_FOUND`] when every source comes up empty.
pub async fn resolve_image(
    ctx: &ScanContext,
    image_name: Option<&str>,
    image_id: Option<&str>,
    attached_volumes: &[String],
) -> String {
    let sources = [
        image_name.map(ImageSource::Listed),
        image_id
            .filter(|id| !id.trim().is_empty())
            .map(|image_id| ImageSource::Registry { image_id }),
        attached_volumes
            .first()
            .map(|volume_id| ImageSource::Volume { volume_id }),
    ];

    for source in sources.into_iter().flatten() {
        if let Some(label) = attempt(ctx, source).await {
            return label;
        }
    }
    IMAGE_NOT_FOUND.to_string()
}

async fn attempt(ctx: &ScanContext, source: ImageSource<'_>) -> Option<String> {
    match source {
        ImageSource::Listed(name) => {
            let name = name.trim();
            (!name.is_empty() && !name.contains(BOOTED_FROM_VOLUME)).then(|| name.to_string())
        }
        ImageSource::Registry { image_id } => {
            let operation = Operation::ImageShow {
                id: image_id.to_string(),
            };
            let image: ImageDetail = ctx.fetch(operation, Scope::Vo).await.ok()?;
            os_label(&image.properties)
        }
        ImageSource::Volume { volume_id } => {
            let operation = Operation::VolumeShow {
                id: volume_id.to_string(),
            };
            let volume: VolumeDetail = ctx.fetch(operation, Scope::Vo).await.ok()?;
            let metadata = &volume.volume_image_metadata;
            os_label(metadata).or_else(|| {
                metadata
                    .get(VOLUME_IMAGE_NAME)
                    .filter(|name| !name.trim().is_empty())
                    .cloned()
            })
        }
    }
}

/// `"{name} {version}"` from the first convention with both properties set
fn os_label(properties: &BTreeMap<String, String>) -> Option<String> {
    OS_PROPERTY_PAIRS.iter().find_map(|(name_key, version_key)| {
        let name = properties.get(*name_key).filter(|v| !v.is_empty())?;
        let version = properties.get(*version_key).filter(|v| !v.is_empty())?;
        Some(format!("{} {}", name, version))
    })
}
