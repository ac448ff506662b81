// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Where runs are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunLogTarget {
    /// Process memory.
    Memory,
    /// SQLite database file.
    Sqlite(PathBuf),
    /// PostgreSQL connection URL.
    Postgres(String),
}

impl RunLogTarget {
    fn parse(url: &str) -> Result<Self, ConfigError> {
        if url == "memory" {
            Ok(Self::Memory)
        } else if let Some(path) = url.strip_prefix("sqlite:") {
            let path = path.trim_start_matches("//");
            if path.is_empty() {
                return Err(ConfigError::Invalid(
                    "DUROFLOW_RUN_LOG_URL",
                    "sqlite URL must name a file",
                ));
            }
            Ok(Self::Sqlite(PathBuf::from(path)))
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres(url.to_string()))
        } else {
            Err(ConfigError::Invalid(
                "DUROFLOW_RUN_LOG_URL",
                "expected 'memory', 'sqlite:<path>' or 'postgres://...'",
            ))
        }
    }
}

/// Duroflow environment configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Run log backend
    pub run_log: RunLogTarget,
    /// Delay between an interrupt and the relaunch of its run
    pub relaunch_delay: Duration,
    /// Time a worker gets to acknowledge STOP before it is terminated
    pub stop_grace_period: Duration,
    /// Maximum concurrent workers
    pub max_workers: usize,
    /// Artifact root for content-verified module resolution
    pub module_root: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `DUROFLOW_RUN_LOG_URL`: `memory`, `sqlite:<path>` or `postgres://...` (default: memory)
    /// - `DUROFLOW_RELAUNCH_DELAY_MS`: relaunch delay (default: 3000)
    /// - `DUROFLOW_STOP_GRACE_PERIOD_MS`: stop acknowledgement timeout (default: 5000)
    /// - `DUROFLOW_MAX_WORKERS`: max concurrent workers (default: 32)
    /// - `DUROFLOW_MODULE_ROOT`: artifact directory (default: unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_log = RunLogTarget::parse(
            &std::env::var("DUROFLOW_RUN_LOG_URL").unwrap_or_else(|_| "memory".to_string()),
        )?;

        let relaunch_delay_ms: u64 = std::env::var("DUROFLOW_RELAUNCH_DELAY_MS")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DUROFLOW_RELAUNCH_DELAY_MS", "must be a number of milliseconds")
            })?;

        let stop_grace_period_ms: u64 = std::env::var("DUROFLOW_STOP_GRACE_PERIOD_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "DUROFLOW_STOP_GRACE_PERIOD_MS",
                    "must be a number of milliseconds",
                )
            })?;

        let max_workers: usize = std::env::var("DUROFLOW_MAX_WORKERS")
            .unwrap_or_else(|_| "32".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "DUROFLOW_MAX_WORKERS",
                "must be a positive integer",
            ))?;

        let module_root = std::env::var("DUROFLOW_MODULE_ROOT")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            run_log,
            relaunch_delay: Duration::from_millis(relaunch_delay_ms),
            stop_grace_period: Duration::from_millis(stop_grace_period_ms),
            max_workers,
            module_root,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 5] = [
        "DUROFLOW_RUN_LOG_URL",
        "DUROFLOW_RELAUNCH_DELAY_MS",
        "DUROFLOW_STOP_GRACE_PERIOD_MS",
        "DUROFLOW_MAX_WORKERS",
        "DUROFLOW_MODULE_ROOT",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        fn clear_all(&mut self) {
            for key in VARS {
                self.remove(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();

        let config = Config::from_env().unwrap();

        assert_eq!(config.run_log, RunLogTarget::Memory);
        assert_eq!(config.relaunch_delay, Duration::from_millis(3000));
        assert_eq!(config.stop_grace_period, Duration::from_millis(5000));
        assert_eq!(config.max_workers, 32);
        assert!(config.module_root.is_none());
    }

    #[test]
    fn test_config_from_env_with_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();

        guard.set("DUROFLOW_RUN_LOG_URL", "sqlite:.data/runs.db");
        guard.set("DUROFLOW_RELAUNCH_DELAY_MS", "250");
        guard.set("DUROFLOW_MAX_WORKERS", "4");
        guard.set("DUROFLOW_MODULE_ROOT", "/srv/artifacts");

        let config = Config::from_env().unwrap();

        assert_eq!(
            config.run_log,
            RunLogTarget::Sqlite(PathBuf::from(".data/runs.db"))
        );
        assert_eq!(config.relaunch_delay, Duration::from_millis(250));
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.module_root, Some(PathBuf::from("/srv/artifacts")));
    }

    #[test]
    fn test_config_postgres_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();

        guard.set("DUROFLOW_RUN_LOG_URL", "postgres://localhost/duroflow");
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.run_log,
            RunLogTarget::Postgres("postgres://localhost/duroflow".to_string())
        );
    }

    #[test]
    fn test_config_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();

        guard.set("DUROFLOW_MAX_WORKERS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DUROFLOW_MAX_WORKERS", _))
        ));

        guard.set("DUROFLOW_MAX_WORKERS", "8");
        guard.set("DUROFLOW_RELAUNCH_DELAY_MS", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DUROFLOW_RELAUNCH_DELAY_MS", _))
        ));

        guard.set("DUROFLOW_RELAUNCH_DELAY_MS", "10");
        guard.set("DUROFLOW_RUN_LOG_URL", "mysql://db");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DUROFLOW_RUN_LOG_URL", _))
        ));
    }
}
