//! Site listing command

use anyhow::Result;
use monitor_lib::MonitorConfig;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_table, OutputFormat};

/// Row for sites table
#[derive(Tabled, Serialize)]
struct SiteRow {
    #[tabled(rename = "Site")]
    name: String,
    #[tabled(rename = "Identity endpoint")]
    auth_url: String,
    #[tabled(rename = "Identity provider")]
    identity_provider: String,
    #[tabled(rename = "VOs")]
    vos: String,
}

/// List configured sites, optionally only those hosting `vo`
pub fn list_sites(config: &MonitorConfig, vo: Option<&str>, format: OutputFormat) -> Result<()> {
    let mut rows: Vec<SiteRow> = config
        .sites
        .iter()
        .filter(|site| vo.map_or(true, |vo| site.project_for(vo).is_some()))
        .map(|site| SiteRow {
            name: site.name.clone(),
            auth_url: site.auth_url.to_string(),
            identity_provider: site.identity_provider.clone(),
            vos: site
                .projects
                .iter()
                .map(|p| p.vo.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));

    print_table(&rows, format);
    Ok(())
}
