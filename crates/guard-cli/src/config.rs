use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use guard_fc::avoid::AvoidConfig;
use guard_fc::{FcBackend, FcConfig};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid threshold {field}={value}: {rule}")]
    InvalidThreshold { field: &'static str, value: f64, rule: &'static str },
    #[error("invalid address {field}={value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub link: LinkCfg,
    pub fc: FcConfig,
    #[serde(default)]
    pub avoid: AvoidConfig,
    #[serde(default, rename = "loop")]
    pub control: LoopCfg,
    #[serde(default)]
    pub operator: OperatorCfg,
    pub audit: Option<AuditCfg>,
}

#[derive(Debug, Deserialize)]
pub struct LinkCfg {
    pub listen: String,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct LoopCfg {
    #[serde(default = "default_tick")]
    pub tick_ms: u64,
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self { tick_ms: default_tick(), debounce_ms: default_debounce() }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatorSource {
    #[default]
    Stdin,
}

#[derive(Debug, Default, Deserialize)]
pub struct OperatorCfg {
    #[serde(default)]
    pub source: OperatorSource,
}

#[derive(Debug, Deserialize)]
pub struct AuditCfg {
    pub path: String,
}

fn default_read_timeout() -> u64 { 500 }
fn default_tick() -> u64 { 100 }
fn default_debounce() -> u64 { 1000 }

impl LinkCfg {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl LoopCfg {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

fn threshold(field: &'static str, value: f64, ok: bool, rule: &'static str) -> Result<(), ConfigError> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { field, value, rule })
    }
}

/// Startup validation; any error here halts before the control loop starts.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.link.listen.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::InvalidAddress { field: "link.listen", value: cfg.link.listen.clone() });
    }
    let rt = cfg.link.read_timeout_ms as f64;
    threshold("link.read_timeout_ms", rt, rt >= 10.0, "must be >= 10")?;

    if cfg.fc.backend == FcBackend::Mavlink && cfg.fc.url.as_deref().map_or(true, str::is_empty) {
        return Err(ConfigError::MissingField("fc.url"));
    }
    let ct = cfg.fc.call_timeout().as_millis() as f64;
    threshold("fc.call_timeout_ms", ct, ct > 0.0, "must be > 0")?;
    let alt = cfg.fc.takeoff_alt_m as f64;
    threshold("fc.takeoff_alt_m", alt, alt > 0.0, "must be > 0")?;
    if let Some(hz) = cfg.fc.send_heartbeat_hz {
        let hz = hz as f64;
        threshold("fc.send_heartbeat_hz", hz, hz > 0.0 && hz <= 50.0, "must be in (0, 50]")?;
    }

    let a = &cfg.avoid;
    threshold("avoid.move_value", a.move_value, a.move_value > 0.0 && a.move_value <= 1.0, "must be in (0, 1]")?;
    threshold("avoid.rotate_value", a.rotate_value, a.rotate_value > 0.0 && a.rotate_value <= 1.0, "must be in (0, 1]")?;
    threshold(
        "avoid.stabilization_s",
        a.stabilization_s,
        a.stabilization_s >= 0.0 && a.stabilization_s <= 60.0,
        "must be in [0, 60]",
    )?;
    threshold("avoid.min_range_cm", a.min_range_cm, a.min_range_cm >= 0.0, "must be >= 0")?;
    threshold(
        "avoid.safe_distance_cm",
        a.safe_distance_cm,
        a.safe_distance_cm > a.min_range_cm && a.safe_distance_cm <= a.max_range_cm,
        "must lie in (min_range_cm, max_range_cm]",
    )?;
    threshold("avoid.max_range_cm", a.max_range_cm, a.max_range_cm > a.min_range_cm, "must exceed min_range_cm")?;
    let stale = a.stale_after_ms as f64;
    threshold("avoid.stale_after_ms", stale, stale > 0.0, "must be > 0")?;

    let tick = cfg.control.tick_ms as f64;
    threshold("loop.tick_ms", tick, tick > 0.0, "must be > 0")?;
    let db = cfg.control.debounce_ms as f64;
    threshold("loop.debounce_ms", db, db >= 1000.0, "must be >= 1000")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [link]
        listen = "0.0.0.0:5000"

        [fc]
        backend = "dry-run"
    "#;

    fn parse(s: &str) -> Config {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn minimal_config_gets_field_defaults() {
        let cfg = parse(MINIMAL);
        assert_eq!(cfg.avoid.safe_distance_cm, 30.0);
        assert_eq!(cfg.avoid.move_value, 0.02);
        assert_eq!(cfg.avoid.max_range_cm, 60.0);
        assert_eq!(cfg.control.tick_ms, 100);
        assert_eq!(cfg.control.debounce_ms, 1000);
        assert_eq!(cfg.link.read_timeout_ms, 500);
        assert!(cfg.audit.is_none());
        assert_eq!(validate(&cfg), Ok(()));
    }

    #[test]
    fn full_config_parses() {
        let cfg = parse(
            r#"
            [link]
            listen = "127.0.0.1:5000"
            read_timeout_ms = 250

            [fc]
            backend = "mavlink"
            url = "udpout:192.168.1.35:14550"
            takeoff_alt_m = 2.0
            call_timeout_ms = 1500

            [avoid]
            safe_distance_cm = 25.0
            move_value = 0.03
            stabilization_s = 4.0

            [loop]
            tick_ms = 50
            debounce_ms = 1500

            [operator]
            source = "stdin"

            [audit]
            path = "/tmp/rangeguard-audit.jsonl"
            "#,
        );
        assert_eq!(cfg.fc.backend, FcBackend::Mavlink);
        assert_eq!(cfg.avoid.move_value, 0.03);
        assert_eq!(cfg.control.tick(), Duration::from_millis(50));
        assert_eq!(validate(&cfg), Ok(()));
    }

    #[test]
    fn rejects_bad_thresholds() {
        let mut cfg = parse(MINIMAL);
        cfg.avoid.safe_distance_cm = 80.0;
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::InvalidThreshold { field: "avoid.safe_distance_cm", .. })
        ));

        let mut cfg = parse(MINIMAL);
        cfg.avoid.move_value = f64::NAN;
        assert!(matches!(validate(&cfg), Err(ConfigError::InvalidThreshold { field: "avoid.move_value", .. })));

        let mut cfg = parse(MINIMAL);
        cfg.control.debounce_ms = 200;
        assert!(matches!(validate(&cfg), Err(ConfigError::InvalidThreshold { field: "loop.debounce_ms", .. })));

        let mut cfg = parse(MINIMAL);
        cfg.avoid.stabilization_s = 1e30;
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::InvalidThreshold { field: "avoid.stabilization_s", .. })
        ));

        for hz in [f32::INFINITY, 0.0, 120.0] {
            let mut cfg = parse(MINIMAL);
            cfg.fc.send_heartbeat_hz = Some(hz);
            assert!(matches!(
                validate(&cfg),
                Err(ConfigError::InvalidThreshold { field: "fc.send_heartbeat_hz", .. })
            ));
        }
    }

    #[test]
    fn rejects_bad_address_and_missing_url() {
        let mut cfg = parse(MINIMAL);
        cfg.link.listen = "port 5000".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::InvalidAddress { .. })));

        let mut cfg = parse(MINIMAL);
        cfg.fc.backend = FcBackend::Mavlink;
        assert_eq!(validate(&cfg), Err(ConfigError::MissingField("fc.url")));
    }
}
