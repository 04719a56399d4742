use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "MOSAIC";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    crate::api::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("mosaic-client/{}", env!("CARGO_PKG_VERSION"))
}

/// Tunable behavior the web client hard-coded: badge threshold, reply
/// paging, the reconcile delay, search debounce, resend cooldown and the
/// recent-search cap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    #[serde(default = "default_trending_min_likes")]
    pub trending_min_likes: i64,
    #[serde(default = "default_reply_page_size")]
    pub reply_page_size: u32,
    #[serde(default = "default_reply_reload_delay", with = "humantime_serde")]
    pub reply_reload_delay: Duration,
    #[serde(default = "default_search_debounce", with = "humantime_serde")]
    pub search_debounce: Duration,
    #[serde(default = "default_resend_cooldown", with = "humantime_serde")]
    pub resend_cooldown: Duration,
    #[serde(default = "default_like_flash_ttl", with = "humantime_serde")]
    pub like_flash_ttl: Duration,
    #[serde(default = "default_recent_search_cap")]
    pub recent_search_cap: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            trending_min_likes: default_trending_min_likes(),
            reply_page_size: default_reply_page_size(),
            reply_reload_delay: default_reply_reload_delay(),
            search_debounce: default_search_debounce(),
            resend_cooldown: default_resend_cooldown(),
            like_flash_ttl: default_like_flash_ttl(),
            recent_search_cap: default_recent_search_cap(),
        }
    }
}

fn default_trending_min_likes() -> i64 {
    2
}

fn default_reply_page_size() -> u32 {
    10
}

fn default_reply_reload_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_search_debounce() -> Duration {
    Duration::from_millis(300)
}

fn default_resend_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_like_flash_ttl() -> Duration {
    Duration::from_millis(800)
}

fn default_recent_search_cap() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: i64,
    #[serde(default = "default_media_ttl_duration", with = "humantime_serde")]
    pub default_ttl: Duration,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: i64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_size_bytes: default_max_size_bytes(),
            default_ttl: default_media_ttl_duration(),
            workers: default_workers(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("mosaic"))
}

fn default_max_size_bytes() -> i64 {
    500 * 1024 * 1024
}

fn default_media_ttl_duration() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_workers() -> usize {
    2
}

fn default_max_upload_bytes() -> i64 {
    25 * 1024 * 1024
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() && other.api.base_url != default_base_url() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.is_empty() && other.api.user_agent != default_user_agent() {
        base.api.user_agent = other.api.user_agent;
    }

    if other.policy != PolicyConfig::default() {
        base.policy = other.policy;
    }

    if other.media.cache_dir.is_some() {
        base.media.cache_dir = other.media.cache_dir;
    }
    if other.media.max_size_bytes != 0 {
        base.media.max_size_bytes = other.media.max_size_bytes;
    }
    base.media.default_ttl = other.media.default_ttl;
    if other.media.workers != 0 {
        base.media.workers = other.media.workers;
    }
    if other.media.max_upload_bytes != 0 {
        base.media.max_upload_bytes = other.media.max_upload_bytes;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "policy.trending_min_likes" => {
            if let Ok(parsed) = value.parse::<i64>() {
                cfg.policy.trending_min_likes = parsed;
            }
        }
        "policy.reply_page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.policy.reply_page_size = parsed;
            }
        }
        "policy.reply_reload_delay" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.policy.reply_reload_delay = duration;
            }
        }
        "policy.search_debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.policy.search_debounce = duration;
            }
        }
        "policy.resend_cooldown" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.policy.resend_cooldown = duration;
            }
        }
        "policy.like_flash_ttl" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.policy.like_flash_ttl = duration;
            }
        }
        "policy.recent_search_cap" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.policy.recent_search_cap = parsed;
            }
        }
        "media.cache_dir" => cfg.media.cache_dir = Some(PathBuf::from(value)),
        "media.max_size_bytes" => {
            if let Ok(parsed) = value.parse::<i64>() {
                cfg.media.max_size_bytes = parsed;
            }
        }
        "media.default_ttl" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.default_ttl = duration;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        "media.max_upload_bytes" => {
            if let Ok(parsed) = value.parse::<i64>() {
                cfg.media.max_upload_bytes = parsed;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mosaic").join("config.yaml"))
}

pub fn save_api_settings(
    path: Option<PathBuf>,
    base_url: &str,
    user_agent: &str,
) -> Result<PathBuf> {
    let base_url = base_url.trim();
    let user_agent = user_agent.trim();

    anyhow::ensure!(!base_url.is_empty(), "config: api.base_url is required");
    anyhow::ensure!(!user_agent.is_empty(), "config: api.user_agent is required");

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };

    cfg.api.base_url = base_url.to_string();
    cfg.api.user_agent = user_agent.to_string();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/config.yaml")),
            env_prefix: Some("MOSAIC_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.policy.trending_min_likes, 2);
        assert_eq!(cfg.policy.reply_page_size, 10);
        assert_eq!(cfg.policy.reply_reload_delay, Duration::from_millis(500));
        assert_eq!(cfg.policy.recent_search_cap, 10);
    }

    #[test]
    fn save_api_settings_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        save_api_settings(
            Some(path.clone()),
            "https://api.example.com/",
            "mosaic-test/1.0",
        )
        .unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.api.base_url, "https://api.example.com/");
    }

    #[test]
    fn env_overrides() {
        env::set_var("MOSAIC_POLICY__TRENDING_MIN_LIKES", "5");
        env::set_var("MOSAIC_POLICY__REPLY_RELOAD_DELAY", "2s");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/config.yaml")),
            env_prefix: None,
        })
        .unwrap();
        assert_eq!(cfg.policy.trending_min_likes, 5);
        assert_eq!(cfg.policy.reply_reload_delay, Duration::from_secs(2));
        env::remove_var("MOSAIC_POLICY__TRENDING_MIN_LIKES");
        env::remove_var("MOSAIC_POLICY__REPLY_RELOAD_DELAY");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "policy:\n  trending_min_likes: 3\n  reply_page_size: 25\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("MOSAIC_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.policy.trending_min_likes, 3);
        assert_eq!(cfg.policy.reply_page_size, 25);
    }
}
