use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::http_client::ClientConfig;
use crate::prewarm::DerivativeSpec;
use crate::size_category::SizeThresholds;
use crate::url_synth::{DeviceClass, UrlFormat};
use crate::utils::parse_duration_string;

/// Configuration errors with descriptive messages.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("mTLS configuration incomplete: both CLIENT_CERT_PATH and CLIENT_KEY_PATH must be set together, or neither")]
    IncompleteMtls,

    #[error("Invalid duration format for {var}: {message}")]
    InvalidDuration { var: String, message: String },

    #[error("URL validation failed: {0}")]
    InvalidUrl(String),
}

/// Which backend the configured storage identity points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    LocalFs,
    Rclone,
    S3,
}

/// Main configuration for a pre-warm / load-shaping run, loaded from
/// environment variables (§6). The CLI/flag layer and YAML config
/// loading are out of scope; this is the env-var equivalent the
/// teacher's own `Config::from_env` uses.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_kind: StoreKind,
    pub store_root: String,
    pub base_url: String,
    pub prefix: String,
    pub extensions: Vec<String>,
    pub derivative_names: Vec<String>,
    pub size_thresholds: SizeThresholds,
    pub size_optimized_allocation: bool,
    pub total_workers: usize,
    pub queue_multiplier: usize,
    pub task_timeout: Duration,
    pub enqueue_wait: Duration,
    pub file_list_cache_path: Option<String>,
    pub file_list_cache_ttl: Duration,
    pub use_head_before_get: bool,
    pub output_path: Option<String>,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub custom_headers: Option<String>,
}

fn env_required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.into()))
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .to_lowercase()
        == "true"
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_kind = match env::var("STORE_KIND").unwrap_or_else(|_| "local".to_string()).as_str() {
            "local" => StoreKind::LocalFs,
            "rclone" => StoreKind::Rclone,
            "s3" => StoreKind::S3,
            other => {
                return Err(ConfigError::InvalidValue {
                    var: "STORE_KIND".into(),
                    message: format!("Unknown store kind '{other}'. Valid options: local, rclone, s3"),
                })
            }
        };

        let store_root = env_required("STORE_ROOT")?;
        let base_url = env_required("BASE_URL")?;
        let prefix = env::var("PREFIX").unwrap_or_default();
        let extensions = env_list("EXTENSIONS");
        let derivative_names = env_list("DERIVATIVES");

        let small_max_mib: i64 = env_parse_or("SMALL_MAX_MIB", SizeThresholds::DEFAULT_SMALL_MAX_MIB)?;
        let medium_max_mib: i64 = env_parse_or("MEDIUM_MAX_MIB", SizeThresholds::DEFAULT_MEDIUM_MAX_MIB)?;
        let size_thresholds = SizeThresholds::from_mib(small_max_mib, medium_max_mib);

        let size_optimized_allocation = env_bool("SIZE_OPTIMIZED_ALLOCATION", false);
        let total_workers: usize = env_parse_or("TOTAL_WORKERS", 30)?;
        let queue_multiplier: usize = env_parse_or("QUEUE_MULTIPLIER", 10)?;

        let task_timeout_str = env::var("TASK_TIMEOUT").unwrap_or_else(|_| "30s".to_string());
        let task_timeout = parse_duration_or_seconds(&task_timeout_str).map_err(|e| ConfigError::InvalidDuration {
            var: "TASK_TIMEOUT".into(),
            message: e,
        })?;

        let enqueue_wait_str = env::var("ENQUEUE_WAIT").unwrap_or_else(|_| "5s".to_string());
        let enqueue_wait = parse_duration_or_seconds(&enqueue_wait_str).map_err(|e| ConfigError::InvalidDuration {
            var: "ENQUEUE_WAIT".into(),
            message: e,
        })?;

        let file_list_cache_path = env::var("FILE_LIST_CACHE_PATH").ok();
        let file_list_cache_ttl_str = env::var("FILE_LIST_CACHE_TTL").unwrap_or_else(|_| "1h".to_string());
        let file_list_cache_ttl =
            parse_duration_or_seconds(&file_list_cache_ttl_str).map_err(|e| ConfigError::InvalidDuration {
                var: "FILE_LIST_CACHE_TTL".into(),
                message: e,
            })?;

        let use_head_before_get = env_bool("USE_HEAD_BEFORE_GET", false);
        let output_path = env::var("OUTPUT_PATH").ok();
        let skip_tls_verify = env_bool("SKIP_TLS_VERIFY", false);
        let resolve_target_addr = env::var("RESOLVE_TARGET_ADDR").ok();
        let client_cert_path = env::var("CLIENT_CERT_PATH").ok();
        let client_key_path = env::var("CLIENT_KEY_PATH").ok();
        let custom_headers = env::var("CUSTOM_HEADERS").ok();

        let config = Config {
            store_kind,
            store_root,
            base_url,
            prefix,
            extensions,
            derivative_names,
            size_thresholds,
            size_optimized_allocation,
            total_workers,
            queue_multiplier,
            task_timeout,
            enqueue_wait,
            file_list_cache_path,
            file_list_cache_ttl,
            use_head_before_get,
            output_path,
            skip_tls_verify,
            resolve_target_addr,
            client_cert_path,
            client_key_path,
            custom_headers,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(
                "BASE_URL must start with http:// or https://".into(),
            ));
        }

        if self.total_workers == 0 {
            return Err(ConfigError::InvalidValue {
                var: "TOTAL_WORKERS".into(),
                message: "Must be greater than 0".into(),
            });
        }

        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::IncompleteMtls);
        }

        Ok(())
    }

    /// Derivative specs built from the configured names, each requesting
    /// the `Derivative`-style URL format (variant/IM-width derivatives
    /// need richer per-derivative config the env-var layer doesn't carry).
    /// Names matching a known device class still resolve to it, so an
    /// `ImWidth`-format derivative built from the env-var layer isn't
    /// stuck at the desktop width.
    pub fn derivative_specs(&self) -> Vec<DerivativeSpec> {
        self.derivative_names
            .iter()
            .map(|name| DerivativeSpec {
                name: name.clone(),
                format: UrlFormat::Derivative,
                variant_label: None,
                device: device_class_for_name(name),
            })
            .collect()
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            resolve_target_addr: self.resolve_target_addr.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            custom_headers: self.custom_headers.clone(),
            pool_config: None,
        }
    }

    /// Creates a default Config for testing purposes.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Config {
            store_kind: StoreKind::LocalFs,
            store_root: "/tmp/prewarm-test".into(),
            base_url: "https://cdn.example.com".into(),
            prefix: String::new(),
            extensions: vec!["jpg".into(), "png".into()],
            derivative_names: vec![],
            size_thresholds: SizeThresholds::default(),
            size_optimized_allocation: false,
            total_workers: 30,
            queue_multiplier: 10,
            task_timeout: Duration::from_secs(30),
            enqueue_wait: Duration::from_secs(5),
            file_list_cache_path: None,
            file_list_cache_ttl: Duration::from_secs(3600),
            use_head_before_get: false,
            output_path: None,
            skip_tls_verify: false,
            resolve_target_addr: None,
            client_cert_path: None,
            client_key_path: None,
            custom_headers: None,
        }
    }
}

fn device_class_for_name(name: &str) -> Option<DeviceClass> {
    match name.to_lowercase().as_str() {
        "desktop" => Some(DeviceClass::Desktop),
        "tablet" => Some(DeviceClass::Tablet),
        "mobile" => Some(DeviceClass::Mobile),
        _ => None,
    }
}

/// Accepts both a `10m`/`5h`/`3d` shorthand and a plain `Ns` seconds
/// form, since task/enqueue timeouts are usually sub-minute.
fn parse_duration_or_seconds(s: &str) -> Result<Duration, String> {
    let trimmed = s.trim();
    if let Some(secs_str) = trimmed.strip_suffix('s') {
        if let Ok(secs) = secs_str.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }
    }
    parse_duration_string(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        let vars = [
            "STORE_KIND",
            "STORE_ROOT",
            "BASE_URL",
            "PREFIX",
            "EXTENSIONS",
            "DERIVATIVES",
            "SMALL_MAX_MIB",
            "MEDIUM_MAX_MIB",
            "SIZE_OPTIMIZED_ALLOCATION",
            "TOTAL_WORKERS",
            "QUEUE_MULTIPLIER",
            "TASK_TIMEOUT",
            "ENQUEUE_WAIT",
            "FILE_LIST_CACHE_PATH",
            "FILE_LIST_CACHE_TTL",
            "USE_HEAD_BEFORE_GET",
            "OUTPUT_PATH",
            "SKIP_TLS_VERIFY",
            "RESOLVE_TARGET_ADDR",
            "CLIENT_CERT_PATH",
            "CLIENT_KEY_PATH",
            "CUSTOM_HEADERS",
        ];
        for var in vars {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_with_minimal_config() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("STORE_ROOT", "/tmp/store");
        env::set_var("BASE_URL", "https://cdn.example.com");

        let config = Config::from_env().unwrap();
        assert_eq!(config.store_kind, StoreKind::LocalFs);
        assert_eq!(config.base_url, "https://cdn.example.com");
        assert_eq!(config.total_workers, 30);
        assert_eq!(config.queue_multiplier, 10);
        assert_eq!(config.task_timeout, Duration::from_secs(30));
        assert!(config.extensions.is_empty());
        assert!(!config.skip_tls_verify);
        assert!(!config.use_head_before_get);

        clear_env_vars();
    }

    #[test]
    fn use_head_before_get_opts_in_via_env() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("STORE_ROOT", "/tmp/store");
        env::set_var("BASE_URL", "https://cdn.example.com");
        env::set_var("USE_HEAD_BEFORE_GET", "true");

        let config = Config::from_env().unwrap();
        assert!(config.use_head_before_get);

        clear_env_vars();
    }

    #[test]
    fn derivative_names_matching_device_classes_resolve_to_them() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("STORE_ROOT", "/tmp/store");
        env::set_var("BASE_URL", "https://cdn.example.com");
        env::set_var("DERIVATIVES", "desktop,tablet,mobile,thumb");

        let config = Config::from_env().unwrap();
        let specs = config.derivative_specs();
        assert_eq!(specs[0].device, Some(crate::url_synth::DeviceClass::Desktop));
        assert_eq!(specs[1].device, Some(crate::url_synth::DeviceClass::Tablet));
        assert_eq!(specs[2].device, Some(crate::url_synth::DeviceClass::Mobile));
        assert_eq!(specs[3].device, None);

        clear_env_vars();
    }

    #[test]
    fn extensions_and_derivatives_parsed_from_csv() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("STORE_ROOT", "/tmp/store");
        env::set_var("BASE_URL", "https://cdn.example.com");
        env::set_var("EXTENSIONS", "jpg, png,webp");
        env::set_var("DERIVATIVES", "thumb,full");

        let config = Config::from_env().unwrap();
        assert_eq!(config.extensions, vec!["jpg", "png", "webp"]);
        assert_eq!(config.derivative_specs().len(), 2);

        clear_env_vars();
    }

    #[test]
    fn missing_store_root_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("BASE_URL", "https://cdn.example.com");

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(ref var)) if var == "STORE_ROOT"));

        clear_env_vars();
    }

    #[test]
    fn invalid_base_url_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("STORE_ROOT", "/tmp/store");
        env::set_var("BASE_URL", "not-a-url");

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));

        clear_env_vars();
    }

    #[test]
    fn zero_total_workers_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("STORE_ROOT", "/tmp/store");
        env::set_var("BASE_URL", "https://cdn.example.com");
        env::set_var("TOTAL_WORKERS", "0");

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue { ref var, .. }) if var == "TOTAL_WORKERS"));

        clear_env_vars();
    }

    #[test]
    fn incomplete_mtls_cert_only_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("STORE_ROOT", "/tmp/store");
        env::set_var("BASE_URL", "https://cdn.example.com");
        env::set_var("CLIENT_CERT_PATH", "/path/cert.pem");

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::IncompleteMtls)));

        clear_env_vars();
    }

    #[test]
    fn unknown_store_kind_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("STORE_KIND", "ftp");
        env::set_var("STORE_ROOT", "/tmp/store");
        env::set_var("BASE_URL", "https://cdn.example.com");

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue { ref var, .. }) if var == "STORE_KIND"));

        clear_env_vars();
    }

    #[test]
    fn task_timeout_parses_plain_seconds() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("STORE_ROOT", "/tmp/store");
        env::set_var("BASE_URL", "https://cdn.example.com");
        env::set_var("TASK_TIMEOUT", "45s");

        let config = Config::from_env().unwrap();
        assert_eq!(config.task_timeout, Duration::from_secs(45));

        clear_env_vars();
    }

    #[test]
    fn for_testing_creates_valid_config() {
        let config = Config::for_testing();
        assert_eq!(config.store_kind, StoreKind::LocalFs);
        assert_eq!(config.total_workers, 30);
    }
}
