//! Host configuration: optional TOML file, then `IDREG_*` environment variables.

use anyhow::{Context, Result};
use config::{Config, File as ConfigFile};
use idreg_registry::{Principal, Proof, DEFAULT_MAX_METADATA_SIZE, DEFAULT_VERIFIER_TIMEOUT};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "idreg.toml";
pub const DEFAULT_STATE_PATH: &str = "./idreg-state.json";

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,

    // State
    pub state_path: PathBuf,
    /// Limit written into the registry by `init`
    pub max_metadata_size: usize,

    // Verification
    pub verifier_timeout: Duration,
    pub verifier_allow: Vec<(Principal, Proof)>,

    // Logging
    pub log_level: String,
    pub log_format: String,
}

impl AppConfig {
    pub fn load(config_path_override: Option<&Path>) -> Result<Self> {
        let resolved_path = match config_path_override {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file {} not found (specified via --config)",
                        path.display()
                    );
                }
                Some(path.to_path_buf())
            }
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                path.exists().then_some(path)
            }
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("IDREG"));
        let config = builder.build()?;

        let state_path = get_string_value(&config, &["STATE_PATH", "state_path"])
            .unwrap_or_else(|| DEFAULT_STATE_PATH.to_string());

        let max_metadata_size = get_u64_value(
            &config,
            &["MAX_METADATA_SIZE", "max_metadata_size"],
            DEFAULT_MAX_METADATA_SIZE as u64,
        )?;

        let verifier_timeout_ms = get_u64_value(
            &config,
            &["VERIFIER_TIMEOUT_MS", "verifier_timeout_ms"],
            DEFAULT_VERIFIER_TIMEOUT.as_millis() as u64,
        )?;

        let verifier_allow = get_string_value(&config, &["VERIFIER_ALLOW", "verifier_allow"])
            .map(|value| parse_allow_list(&value))
            .transpose()?
            .unwrap_or_default();

        let app = Self {
            config_path: resolved_path,
            state_path: PathBuf::from(state_path),
            max_metadata_size: usize::try_from(max_metadata_size)
                .context("max_metadata_size does not fit in usize")?,
            verifier_timeout: Duration::from_millis(verifier_timeout_ms),
            verifier_allow,
            log_level: get_string_value(&config, &["LOG_LEVEL", "log_level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["LOG_FORMAT", "log_format"])
                .unwrap_or_else(|| "pretty".to_string()),
        };
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<()> {
        if self.state_path.as_os_str().is_empty() {
            anyhow::bail!("STATE_PATH must not be empty");
        }
        if self.verifier_timeout.is_zero() {
            anyhow::bail!("VERIFIER_TIMEOUT_MS must be greater than zero");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                self.log_format
            );
        }
        Ok(())
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(log_layer(&config.log_format, std::io::stderr))
        .try_init()?;

    Ok(())
}

/// One JSON object per line for `json`, multi-line human output otherwise.
fn log_layer<S, W>(format: &str, writer: W) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(writer)
            .boxed()
    }
}

/// Parse `principal:proofhex` pairs separated by commas.
fn parse_allow_list(value: &str) -> Result<Vec<(Principal, Proof)>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (principal, proof) = entry
                .split_once(':')
                .with_context(|| format!("verifier_allow entry '{entry}' is missing ':'"))?;
            let principal = principal
                .parse::<Principal>()
                .with_context(|| format!("invalid principal in verifier_allow entry '{entry}'"))?;
            let proof = proof
                .parse::<Proof>()
                .with_context(|| format!("invalid proof in verifier_allow entry '{entry}'"))?;
            Ok((principal, proof))
        })
        .collect()
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_u64_value(config: &Config, keys: &[&str], default: u64) -> Result<u64> {
    match get_string_value(config, keys) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{} must be a non-negative integer, got '{raw}'", keys[0])),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("log buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().expect("log buffer").clone()).expect("utf8 logs")
        }
    }

    fn capture_logs(format: &str) -> String {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber =
            tracing_subscriber::registry().with(log_layer(format, move || writer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(path = "state.json", "registry state saved");
        });
        buffer.contents()
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn file_values_are_loaded() {
        let principal = Principal::new([4u8; 32]);
        let proof = Proof::new([5u8; 32]);
        let file = write_config(&format!(
            r#"
state_path = "/tmp/registry.json"
max_metadata_size = 64
verifier_timeout_ms = 250
verifier_allow = "{principal}:{proof}"
log_level = "debug"
log_format = "json"
"#
        ));

        let config = AppConfig::load(Some(file.path())).expect("load config");
        assert_eq!(config.state_path, PathBuf::from("/tmp/registry.json"));
        assert_eq!(config.max_metadata_size, 64);
        assert_eq!(config.verifier_timeout, Duration::from_millis(250));
        assert_eq!(config.verifier_allow, vec![(principal, proof)]);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, "json");
        assert_eq!(config.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn defaults_apply_for_missing_keys() {
        let file = write_config("log_level = \"warn\"\n");
        let config = AppConfig::load(Some(file.path())).expect("load config");
        assert_eq!(config.state_path, PathBuf::from(DEFAULT_STATE_PATH));
        assert_eq!(config.max_metadata_size, DEFAULT_MAX_METADATA_SIZE);
        assert_eq!(config.verifier_timeout, DEFAULT_VERIFIER_TIMEOUT);
        assert!(config.verifier_allow.is_empty());
        assert_eq!(config.log_format, "pretty");
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let file = write_config("log_format = \"xml\"\n");
        assert!(AppConfig::load(Some(file.path())).is_err());

        let file = write_config("verifier_timeout_ms = 0\n");
        assert!(AppConfig::load(Some(file.path())).is_err());

        let file = write_config("max_metadata_size = \"lots\"\n");
        assert!(AppConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn json_format_emits_one_object_per_line() {
        let logs = capture_logs("json");
        let lines: Vec<&str> = logs.lines().collect();
        assert_eq!(lines.len(), 1);

        let entry: serde_json::Value = serde_json::from_str(lines[0]).expect("json log line");
        assert_eq!(entry["level"], "INFO");
        assert_eq!(entry["fields"]["message"], "registry state saved");
        assert_eq!(entry["fields"]["path"], "state.json");
    }

    #[test]
    fn pretty_format_is_plain_text() {
        let logs = capture_logs("pretty");
        assert!(logs.contains("registry state saved"));
        assert!(serde_json::from_str::<serde_json::Value>(logs.trim()).is_err());
    }

    #[test]
    fn allow_list_parsing() {
        let a = Principal::new([1u8; 32]);
        let b = Principal::new([2u8; 32]);
        let proof = Proof::new([3u8; 32]);

        let parsed = parse_allow_list(&format!(" {a}:{proof} , {b}:0x{proof} ,"))
            .expect("parse allow list");
        assert_eq!(parsed, vec![(a, proof), (b, proof)]);

        assert!(parse_allow_list("nonsense").is_err());
        assert!(parse_allow_list(&format!("{a}:abcd")).is_err());
    }
}
