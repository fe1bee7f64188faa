use std::path::Path;

use anyhow::{Context, Result};
use routekit::Configuration;

use crate::config::AppConfig;

/// Build the routing/component configuration described by `app.routing`.
///
/// Sources are merged in order, so later files override earlier ones.
/// Relative paths are taken from `base_dir`.
pub fn build_configuration(app: &AppConfig, base_dir: &Path) -> Result<Configuration> {
    let cfg = if app.routing.include_defaults {
        Configuration::with_defaults().context("Failed to load built-in component defaults")?
    } else {
        Configuration::new()
    };

    for path in app.routing_files(base_dir)? {
        cfg.add_configuration(&path)
            .with_context(|| format!("Failed to load routing source '{}'", path.display()))?;
        tracing::info!(source = %path.display(), "routing source loaded");
    }

    if !cfg.has_section(&app.routing.section) {
        tracing::warn!(
            section = %app.routing.section,
            "routing section is missing; every dispatch will end without a route"
        );
    }
    Ok(cfg)
}
