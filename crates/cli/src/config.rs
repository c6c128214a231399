use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

// Optional overrides for the pipeline tuning knobs. Every constant the
// pipeline runs on is configuration, never a module-level constant.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub tuning: Option<TuningConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TuningConfig {
    pub max_age: Option<String>,
    pub stagnation_limit: Option<u32>,
    pub unresolved_limit: Option<u32>,
    pub settle_ms: Option<u64>,
    pub hint_settle_ms: Option<u64>,
    pub wall_recheck_ms: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_step_ms: Option<u64>,
    pub max_reloads: Option<u32>,
    pub open_attempts: Option<u32>,
    pub ready_checks: Option<u32>,
    pub open_wait_ms: Option<u64>,
    pub jump_settle_ms: Option<u64>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_path = config_dir.join("scrollback").join("config.toml");

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            anyhow::anyhow!(
                "failed to read config file at {}: {}",
                config_path.display(),
                e
            )
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file: {}", e))?;

        Ok(config)
    }

    pub fn apply(&self, cfg: &mut pipeline::PipelineConfig) -> anyhow::Result<()> {
        let Some(t) = &self.tuning else {
            return Ok(());
        };
        if let Some(age) = &t.max_age {
            cfg.discovery.max_age = parse_age(age)?;
        }
        if let Some(n) = t.stagnation_limit {
            cfg.extract.stagnation_limit = n;
        }
        if let Some(n) = t.unresolved_limit {
            cfg.discovery.unresolved_limit = n;
        }
        if let Some(ms) = t.settle_ms {
            cfg.extract.settle = Duration::from_millis(ms);
        }
        if let Some(ms) = t.hint_settle_ms {
            cfg.extract.hint_settle = Duration::from_millis(ms);
        }
        if let Some(ms) = t.wall_recheck_ms {
            cfg.extract.wall_recheck = Duration::from_millis(ms);
        }
        if let Some(ms) = t.backoff_base_ms {
            cfg.discovery.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = t.backoff_step_ms {
            cfg.discovery.backoff_step = Duration::from_millis(ms);
        }
        if let Some(n) = t.max_reloads {
            cfg.discovery.max_reloads = n;
        }
        if let Some(n) = t.open_attempts {
            cfg.open_attempts = n;
        }
        if let Some(n) = t.ready_checks {
            cfg.ready_checks = n;
        }
        if let Some(ms) = t.open_wait_ms {
            cfg.open_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = t.jump_settle_ms {
            cfg.jump_settle = Duration::from_millis(ms);
        }
        Ok(())
    }
}

pub fn parse_age(raw: &str) -> anyhow::Result<chrono::Duration> {
    let d = humantime::parse_duration(raw)
        .map_err(|e| anyhow::anyhow!("invalid duration {raw:?}: {e}"))?;
    Ok(chrono::Duration::from_std(d)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_age_accepts_humantime() {
        assert_eq!(parse_age("30d").unwrap(), chrono::Duration::days(30));
        assert!(parse_age("soon").is_err());
    }

    #[test]
    fn apply_overrides_only_what_is_set() {
        let config: Config = toml::from_str(
            r#"
            [tuning]
            stagnation_limit = 5
            backoff_base_ms = 1000
            "#,
        )
        .unwrap();
        let mut cfg = pipeline::PipelineConfig::default();
        config.apply(&mut cfg).unwrap();
        assert_eq!(cfg.extract.stagnation_limit, 5);
        assert_eq!(cfg.discovery.backoff_base, Duration::from_millis(1000));
        // Untouched knobs keep their defaults.
        assert_eq!(
            cfg.discovery.backoff_step,
            pipeline::PipelineConfig::default().discovery.backoff_step
        );
    }
}
