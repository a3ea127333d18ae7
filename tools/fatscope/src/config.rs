//! Settings read from the environment.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use fat_engine::scan::ScanConfig;
use log::LevelFilter;

pub const ENV_LOG:         &str = "FATSCOPE_LOG";
pub const ENV_SCAN_LIMIT:  &str = "FATSCOPE_SCAN_LIMIT";
pub const ENV_MAX_MATCHES: &str = "FATSCOPE_MAX_MATCHES";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub log_level: LevelFilter,
    pub scan:      ScanConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config { log_level: LevelFilter::Info, scan: ScanConfig::default() };
        if let Some(level) = parse_var::<LevelFilter>(&lookup, ENV_LOG)? {
            config.log_level = level;
        }
        if let Some(limit) = parse_var::<u64>(&lookup, ENV_SCAN_LIMIT)? {
            if limit == 0 {
                bail!("{ENV_SCAN_LIMIT} must be at least 1");
            }
            config.scan.max_sectors = limit;
        }
        if let Some(max) = parse_var::<usize>(&lookup, ENV_MAX_MATCHES)? {
            if max == 0 {
                bail!("{ENV_MAX_MATCHES} must be at least 1");
            }
            config.scan.max_text_matches = max;
        }
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = lookup(name) else { return Ok(None) };
    let value = raw.trim().parse::<T>().with_context(|| format!("invalid {name} value {raw:?}"))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        Config::from_lookup(|name| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string()))
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.log_level, LevelFilter::Info);
        assert_eq!(c.scan, ScanConfig::default());
    }

    #[test]
    fn overrides() {
        let c = config(&[(ENV_LOG, "trace"), (ENV_SCAN_LIMIT, "500"), (ENV_MAX_MATCHES, " 7 ")]).unwrap();
        assert_eq!(c.log_level, LevelFilter::Trace);
        assert_eq!(c.scan.max_sectors, 500);
        assert_eq!(c.scan.max_text_matches, 7);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(config(&[(ENV_LOG, "loud")]).is_err());
        assert!(config(&[(ENV_SCAN_LIMIT, "-1")]).is_err());
        assert!(config(&[(ENV_SCAN_LIMIT, "0")]).is_err());
        assert!(config(&[(ENV_MAX_MATCHES, "many")]).is_err());
    }
}
