use tracing::debug;

use crate::cache::FlavorCatalog;
use crate::context::ScanContext;
use crate::gateway::{Operation, Scope};
use crate::models::Flavor;

/// Flavor by name from the site catalogue, fetched once per scan.
/// Unknown names and catalogue failures resolve to `None`.
pub async fn resolve_flavor(ctx: &ScanContext, name: &str) -> Option<Flavor> {
    let cache = ctx.cache();
    ctx.metrics().record_cache_lookup("flavor", cache.flavors_loaded());
    let catalog = cache.flavors(|| load_catalog(ctx)).await;
    let flavor = catalog.get(name).cloned();
    if flavor.is_none() {
        debug!(site = %ctx.site().name, flavor = %name, "Flavor not in catalogue");
    }
    flavor
}

async fn load_catalog(ctx: &ScanContext) -> FlavorCatalog {
    ctx.fetch::<Vec<Flavor>>(Operation::FlavorList, Scope::Vo)
        .await
        .map(|flavors| flavors.into_iter().map(|f| (f.name.clone(), f)).collect())
        .unwrap_or_default()
}
