//! License gate
//!
//! Keys are resolved from the command line, then the environment, then an
//! interactive prompt. Deciding whether a key is acceptable is delegated to
//! a [`LicenseCheck`] implementation.

use std::{collections::HashSet, sync::Arc};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::{config::AppConfig, logging::ScanLogger};

pub trait LicenseCheck: Send + Sync {
    fn is_valid(&self, key: &str) -> bool;
}

/// Accepts exactly the keys configured by the operator
#[derive(Debug, Clone, Default)]
pub struct AllowListLicense {
    accepted: HashSet<String>,
}

impl AllowListLicense {
    pub fn new<I: IntoIterator<Item = String>>(keys: I) -> Self {
        Self {
            accepted: keys
                .into_iter()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .collect(),
        }
    }
}

impl LicenseCheck for AllowListLicense {
    fn is_valid(&self, key: &str) -> bool {
        let key = key.trim();
        !key.is_empty() && self.accepted.contains(key)
    }
}

pub fn create_license_check(config: &AppConfig, log: &ScanLogger) -> Arc<dyn LicenseCheck> {
    if config.license.accepted_keys.is_empty() {
        tracing::warn!(parent: log.span(), "No accepted license keys configured; every key will be rejected");
    }
    Arc::new(AllowListLicense::new(config.license.accepted_keys.iter().cloned()))
}

/// Pick the first non-empty key from the flag, the environment or stdin
pub async fn resolve_license_key(from_cli: Option<&str>, env_var: &str) -> io::Result<String> {
    if let Some(key) = non_empty(from_cli) {
        return Ok(key);
    }

    if let Some(key) = non_empty(std::env::var(env_var).ok().as_deref()) {
        tracing::debug!(env_var = env_var, "License key taken from environment");
        return Ok(key);
    }

    let mut stdout = io::stdout();
    stdout.write_all(b"License key: ").await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let check = AllowListLicense::new(vec!["ABC-123".to_string(), "  ".to_string()]);
        assert!(check.is_valid("ABC-123"));
        assert!(check.is_valid(" ABC-123\n"));
        assert!(!check.is_valid("abc-123"));
        assert!(!check.is_valid(""));
        assert!(!check.is_valid("  "));
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        let check = create_license_check(&AppConfig::default(), &ScanLogger::detached());
        assert!(!check.is_valid("ABC-123"));
    }

    #[tokio::test]
    async fn test_cli_key_wins() {
        let key = resolve_license_key(Some("FROM-CLI"), "NETSCAN_TEST_UNSET_LICENSE").await.unwrap();
        assert_eq!(key, "FROM-CLI");
    }

    #[tokio::test]
    async fn test_environment_key_used_when_flag_absent() {
        std::env::set_var("NETSCAN_TEST_ENV_LICENSE", "FROM-ENV");
        let key = resolve_license_key(None, "NETSCAN_TEST_ENV_LICENSE").await.unwrap();
        assert_eq!(key, "FROM-ENV");

        let key = resolve_license_key(Some("  "), "NETSCAN_TEST_ENV_LICENSE").await.unwrap();
        assert_eq!(key, "FROM-ENV");
    }
}
