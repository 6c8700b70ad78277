//! Configuration Loader
//!
//! Layers, lowest precedence first:
//!
//! 1. Built-in defaults (`JudgeQueueConfig::default()`)
//! 2. An optional TOML file
//! 3. Environment variables prefixed `JUDGE_QUEUE`, nested with `__`
//!    (e.g. `JUDGE_QUEUE__TRANSPORT__AMQP_URL`)

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use super::error::ConfigResult;
use super::JudgeQueueConfig;

pub const ENV_PREFIX: &str = "JUDGE_QUEUE";
pub const ENV_SEPARATOR: &str = "__";

impl JudgeQueueConfig {
    /// Load and validate configuration from defaults, `path` and the environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&JudgeQueueConfig::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: JudgeQueueConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, ConfigurationError, LogFormat};
    use std::env;
    use std::io::Write;

    fn with_env<F>(vars: &[(&str, &str)], test: F)
    where
        F: FnOnce(),
    {
        let mut old = Vec::new();
        for (k, v) in vars {
            old.push((k.to_string(), env::var(k).ok()));
            env::set_var(k, v);
        }

        test();

        for (k, maybe_old) in old {
            match maybe_old {
                Some(val) => env::set_var(k, val),
                None => env::remove_var(k),
            }
        }
    }

    // Env-mutating assertions share one test so they never race each other.
    #[test]
    fn test_layered_loading() {
        let defaults = JudgeQueueConfig::load(None).unwrap();
        assert_eq!(defaults.transport.queue_name, "judge");
        assert_eq!(defaults.logging.format, LogFormat::Pretty);

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[transport]
backend = "in_memory"
queue_name = "judge-file"
prefetch = 4

[service]
service = "judge-eu"
features = ["build"]

[logging]
format = "json"
"#
        )
        .unwrap();

        let from_file = JudgeQueueConfig::load(Some(file.path())).unwrap();
        assert_eq!(from_file.transport.backend, BackendKind::InMemory);
        assert_eq!(from_file.transport.queue_name, "judge-file");
        assert_eq!(from_file.transport.prefetch, Some(4));
        assert_eq!(from_file.transport.default_max_retries, 3);
        assert_eq!(from_file.service.service, "judge-eu");
        assert_eq!(from_file.service.features, vec!["build".to_string()]);
        assert_eq!(from_file.logging.format, LogFormat::Json);

        with_env(
            &[
                ("JUDGE_QUEUE__TRANSPORT__QUEUE_NAME", "judge-env"),
                ("JUDGE_QUEUE__TRANSPORT__DEFAULT_MAX_RETRIES", "5"),
            ],
            || {
                let config = JudgeQueueConfig::load(Some(file.path())).unwrap();
                assert_eq!(config.transport.queue_name, "judge-env");
                assert_eq!(config.transport.default_max_retries, 5);
                assert_eq!(config.transport.prefetch, Some(4));
            },
        );

        with_env(&[("JUDGE_QUEUE__TRANSPORT__PREFETCH", "0")], || {
            let err = JudgeQueueConfig::load(None).unwrap_err();
            assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
        });
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = JudgeQueueConfig::load(Some(Path::new("/nonexistent/judge.toml"))).unwrap_err();
        assert!(matches!(err, ConfigurationError::Load(_)));
    }
}
