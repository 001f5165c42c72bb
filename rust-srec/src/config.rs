//! Service configuration, loaded once from the environment at startup.
//!
//! There is no database-backed or hot-reloadable configuration layer here:
//! this is a single-local-user service with no persisted task state, so
//! [`ServiceConfig`] is read once and treated as immutable thereafter.

use std::path::PathBuf;
use std::time::Duration;

use crate::utils::http_client::ProxyConfig;

/// Meta-sidecar write policy, controlled by `META_MODE`/the `meta` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetaMode {
    #[default]
    Off,
    Sidecar,
    Folder,
}

impl MetaMode {
    /// Parse a `meta`/`meta_mode` parameter token per spec §6; unknown tokens
    /// return `None` so the caller can fall back to configuration.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "0" | "off" | "false" | "no" => Some(Self::Off),
            "1" | "yes" | "true" | "on" | "sidecar" => Some(Self::Sidecar),
            "folder" | "dir" | "directory" => Some(Self::Folder),
            _ => None,
        }
    }
}

/// Twitter pre-flight network-check mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwitterPreflightMode {
    Strict,
    Lenient,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub port: u16,
    pub download_dir: PathBuf,
    pub extractor_path: String,
    pub muxer_path: String,
    pub muxer_probe_path: String,
    pub cookies_file: Option<PathBuf>,
    pub worker_count: usize,
    pub disable_accelerator: bool,
    pub meta_mode: MetaMode,
    pub meta_dir: Option<PathBuf>,
    pub disable_browser_cookies: bool,
    pub force_browser_cookies: bool,
    pub fast_start: bool,
    pub fast_info: bool,
    pub twitter_preflight_enabled: bool,
    pub twitter_preflight_mode: TwitterPreflightMode,
    pub twitter_preflight_tcp_timeout: Duration,
    pub twitter_preflight_ip_limit: usize,
    pub twitter_preflight_ttl: Duration,
    pub twitter_preflight_auto_proxy_probe: bool,
    pub proxy: ProxyConfig,
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServiceConfig {
    /// Load from environment variables, falling back to sensible local
    /// defaults for anything unset. Mirrors the `from_env_or_default`
    /// pattern used throughout the rest of this codebase for config structs.
    pub fn from_env_or_default() -> Self {
        Self {
            bind_address: std::env::var("API_BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env_parsed("API_PORT", 8787),
            download_dir: std::env::var("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./downloads")),
            extractor_path: std::env::var("EXTRACTOR_PATH").unwrap_or_else(|_| "yt-dlp".into()),
            muxer_path: std::env::var("MUXER_PATH").unwrap_or_else(|_| "ffmpeg".into()),
            muxer_probe_path: std::env::var("MUXER_PROBE_PATH").unwrap_or_else(|_| "ffprobe".into()),
            cookies_file: std::env::var("COOKIES_FILE").ok().map(PathBuf::from),
            worker_count: env_parsed("WORKER_COUNT", 2),
            disable_accelerator: env_flag("DISABLE_ACCELERATOR", false),
            meta_mode: std::env::var("META_MODE")
                .ok()
                .and_then(|v| MetaMode::parse(&v))
                .unwrap_or_default(),
            meta_dir: std::env::var("META_DIR").ok().map(PathBuf::from),
            disable_browser_cookies: env_flag("DISABLE_BROWSER_COOKIES", false),
            force_browser_cookies: env_flag("FORCE_BROWSER_COOKIES", false),
            fast_start: env_flag("FAST_START", false),
            fast_info: env_flag("FAST_INFO", false),
            twitter_preflight_enabled: std::env::var("TWITTER_PREFLIGHT")
                .map(|v| v != "0")
                .unwrap_or(true),
            twitter_preflight_mode: match std::env::var("TWITTER_PREFLIGHT_MODE")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str()
            {
                "lenient" => TwitterPreflightMode::Lenient,
                _ => TwitterPreflightMode::Strict,
            },
            twitter_preflight_tcp_timeout: Duration::from_secs_f64(
                env_parsed("TWITTER_PREFLIGHT_TCP_TIMEOUT", 0.8_f64).max(0.8),
            ),
            twitter_preflight_ip_limit: env_parsed::<usize>("TWITTER_PREFLIGHT_IP_LIMIT", 2).clamp(1, 5),
            twitter_preflight_ttl: Duration::from_secs(env_parsed("TWITTER_PREFLIGHT_TTL", 30)),
            twitter_preflight_auto_proxy_probe: env_flag(
                "TWITTER_PREFLIGHT_AUTO_PROXY_PROBE",
                false,
            ),
            proxy: ProxyConfig::from_env(),
        }
    }

    /// `--cookies`/`--cookies-from-browser` flags for extractor invocations.
    /// An explicit cookies file always wins over browser cookies; browser
    /// cookies are used only when forced and not explicitly disabled.
    pub fn cookie_flags(&self) -> Vec<String> {
        if let Some(file) = &self.cookies_file {
            return vec!["--cookies".to_string(), file.to_string_lossy().to_string()];
        }
        if self.force_browser_cookies && !self.disable_browser_cookies {
            return vec!["--cookies-from-browser".to_string(), "chrome".to_string()];
        }
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_mode_parses_known_tokens() {
        assert_eq!(MetaMode::parse("off"), Some(MetaMode::Off));
        assert_eq!(MetaMode::parse("0"), Some(MetaMode::Off));
        assert_eq!(MetaMode::parse("sidecar"), Some(MetaMode::Sidecar));
        assert_eq!(MetaMode::parse("true"), Some(MetaMode::Sidecar));
        assert_eq!(MetaMode::parse("folder"), Some(MetaMode::Folder));
        assert_eq!(MetaMode::parse("bogus"), None);
    }

    #[test]
    fn default_config_has_sane_values() {
        // SAFETY-equivalent: no process-wide env mutation here, just defaults
        // when unset in this test's environment.
        let cfg = ServiceConfig::from_env_or_default();
        assert!(cfg.worker_count >= 1);
        assert!(cfg.twitter_preflight_ip_limit >= 1 && cfg.twitter_preflight_ip_limit <= 5);
    }

    #[test]
    fn cookie_flags_empty_by_default() {
        let cfg = ServiceConfig::from_env_or_default();
        assert!(cfg.cookie_flags().is_empty());
    }

    #[test]
    fn cookie_flags_prefers_explicit_file_over_browser_cookies() {
        let mut cfg = ServiceConfig::from_env_or_default();
        cfg.cookies_file = Some(PathBuf::from("/tmp/cookies.txt"));
        cfg.force_browser_cookies = true;
        assert_eq!(
            cfg.cookie_flags(),
            vec!["--cookies".to_string(), "/tmp/cookies.txt".to_string()]
        );
    }

    #[test]
    fn cookie_flags_uses_browser_cookies_when_forced() {
        let mut cfg = ServiceConfig::from_env_or_default();
        cfg.force_browser_cookies = true;
        assert_eq!(
            cfg.cookie_flags(),
            vec!["--cookies-from-browser".to_string(), "chrome".to_string()]
        );
    }

    #[test]
    fn cookie_flags_respects_disable_browser_cookies() {
        let mut cfg = ServiceConfig::from_env_or_default();
        cfg.force_browser_cookies = true;
        cfg.disable_browser_cookies = true;
        assert!(cfg.cookie_flags().is_empty());
    }
}
