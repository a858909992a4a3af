mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./webpforge.toml",
        "./config.toml",
        "~/.config/webpforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.server.auth.enabled
        && config.server.auth.token.as_deref().map_or(true, str::is_empty)
    {
        anyhow::bail!("Auth is enabled but no token is configured");
    }

    if config.tasks.workers == 0 {
        anyhow::bail!("tasks.workers must be at least 1");
    }

    if config.tasks.timeout_secs == 0 {
        anyhow::bail!("tasks.timeout_secs must be at least 1");
    }

    if config.tasks.progress_buffer == 0 {
        anyhow::bail!("tasks.progress_buffer must be at least 1");
    }

    if config.processing.frame_workers == 0 {
        anyhow::bail!("processing.frame_workers must be at least 1");
    }

    if config.processing.default_quality > 100 {
        anyhow::bail!(
            "processing.default_quality must be 0-100, got {}",
            config.processing.default_quality
        );
    }

    if !config.tasks.upload_dir.exists() {
        tracing::warn!("Upload directory does not exist: {:?}", config.tasks.upload_dir);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.tasks.workers, 2);
        assert_eq!(config.tasks.progress_buffer, 10);
        assert!(config.processing.enable_parallel);
        assert!(config.processing.frame_workers >= 1);
        assert_eq!(config.tools.timeout_secs, 300);
    }

    #[test]
    fn load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000

[server.auth]
enabled = true
token = "s3cret"

[tasks]
workers = 4
retention_hours = 2

[processing]
default_preset = "drawing"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.tasks.workers, 4);
        assert_eq!(config.tasks.retention().as_secs(), 7200);
        assert_eq!(config.processing.default_preset, webpforge_av::Preset::Drawing);
    }

    #[test]
    fn auth_without_token_is_rejected() {
        let mut config = Config::default();
        config.server.auth.enabled = true;
        assert!(validate_config(&config).is_err());

        config.server.auth.token = Some("abc".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = Config::default();
        config.tasks.workers = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("tasks.workers"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = load_config_or_default(Some(Path::new("/nonexistent/webpforge.toml")));
        assert!(result.is_err());
    }
}
