use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::AuthzFileConfig;

/// Load an authorization config file. The format is inferred from the
/// file extension; JSON, YAML and TOML are supported.
pub fn load_authz_file(path: &Path) -> Result<AuthzFileConfig> {
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Json,
    };

    let settings = Config::builder()
        .add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("invalid UTF-8 path: {}", path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("failed to read authorization config {}", path.display()))?;

    settings.try_deserialize().with_context(|| {
        format!(
            "failed to deserialize authorization config {}",
            path.display()
        )
    })
}
