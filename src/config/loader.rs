use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::{debug, info};

use super::settings::AppConfig;

pub const ENV_PREFIX: &str = "SIGNAL_ENGINE";

/// Load configuration: defaults, then the TOML file (if present), then
/// `SIGNAL_ENGINE__<SECTION>__<KEY>` environment overrides.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if let Ok(env_file) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", env_file.display());
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("general.fallback_instruments")
                .try_parsing(true),
        )
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config
        .validate()
        .map_err(|errors| anyhow!("Invalid configuration: {}", errors.join(", ")))?;

    info!(
        "Configuration loaded ({}): {} instruments max, {}s candles",
        path.display(),
        config.general.max_instruments,
        config.data.interval_seconds
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(&scratch_dir().join("absent.toml")).unwrap();
        assert_eq!(config.training.epochs, 50);
        assert_eq!(config.inference.window_candles, 100);
    }

    #[test]
    fn test_partial_file_overrides_sections() {
        let path = scratch_dir().join("signal_engine.toml");
        std::fs::write(
            &path,
            r#"
            [training]
            epochs = 5
            acceptance_threshold = 0.6

            [general]
            fallback_instruments = ["EURUSD_otc"]
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.acceptance_threshold, 0.6);
        assert_eq!(config.training.batch_size, 64);
        assert_eq!(config.general.fallback_instruments, vec!["EURUSD_otc"]);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let path = scratch_dir().join("signal_engine.toml");
        std::fs::write(&path, "[inference]\nconfidence_threshold = 0.0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("confidence_threshold"));
    }
}
