use std::collections::{HashMap, HashSet};

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "stream-cache", about = "Кэш и раздача потоков streaming API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить сервер
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    /// Адрес HTTP сервера, например `0.0.0.0:9200`
    #[arg(long, env = "BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Базовый URL upstream streaming backend'а
    #[arg(long, env = "STREAMING_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Ключ API для basic auth к upstream
    #[arg(long, env = "CHS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "REDIS_POOL_SIZE")]
    pub redis_pool_size: Option<usize>,

    /// Окно хранения записи в кэше, секунды
    #[arg(long, env = "CACHE_EXPIRY_IN_SECONDS")]
    pub cache_expiry_in_seconds: Option<u64>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub backend_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Общий префикс публичных путей.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Ёмкость канала одного подписчика broker'а.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_compaction_interval_secs")]
    pub compaction_interval_secs: u64,
    #[serde(default)]
    pub cache: CacheConfig,
    /// resource path → upstream path.
    #[serde(default = "default_backend_paths")]
    pub backend_paths: HashMap<String, String>,
    #[serde(default = "default_topics")]
    pub topics: Vec<TopicConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub storage: StorageKind,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_expiry_in_seconds")]
    pub expiry_in_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::default(),
            redis_url: default_redis_url(),
            pool_size: default_pool_size(),
            expiry_in_seconds: default_expiry_in_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    /// Resource path без `path_prefix`, например `/filings`.
    pub path: String,
}

const DEFAULT_TOPICS: [(&str, &str); 6] = [
    ("stream-filing-history", "/filings"),
    ("stream-company-profile", "/companies"),
    ("stream-company-insolvency", "/insolvency-cases"),
    ("stream-company-charges", "/charges"),
    ("stream-company-officers", "/officers"),
    ("stream-company-psc", "/persons-with-significant-control"),
];

fn default_bind_address() -> String {
    "0.0.0.0:9200".into()
}
fn default_path_prefix() -> String {
    "/streaming-api-cache".into()
}
fn default_subscriber_buffer() -> usize {
    1
}
fn default_compaction_interval_secs() -> u64 {
    60
}
fn default_redis_url() -> String {
    "localhost:6379".into()
}
fn default_pool_size() -> usize {
    10
}
fn default_expiry_in_seconds() -> u64 {
    3600
}
fn default_backend_paths() -> HashMap<String, String> {
    DEFAULT_TOPICS
        .iter()
        .map(|(_, path)| (path.to_string(), path.to_string()))
        .collect()
}
fn default_topics() -> Vec<TopicConfig> {
    DEFAULT_TOPICS
        .iter()
        .map(|(name, path)| TopicConfig { name: name.to_string(), path: path.to_string() })
        .collect()
}

fn invalid(detail: impl Into<String>) -> ServerError {
    ServerError::Config { context: "validate", detail: detail.into() }
}

impl ServerConfig {
    /// Прочитать конфиг. Отсутствующий файл не ошибка: всё берётся из
    /// значений по умолчанию и переменных окружения.
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(config = %path, "config file not found, using defaults");
                String::new()
            }
            Err(e) => {
                return Err(ServerError::Config { context: "read", detail: format!("'{path}': {e}") });
            }
        };
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Флаги и переменные окружения перекрывают значения из файла.
    pub fn apply_overrides(&mut self, args: &ServeArgs) {
        if let Some(v) = &args.bind_address {
            self.bind_address = v.clone();
        }
        if let Some(v) = &args.backend_url {
            self.backend_url = v.clone();
        }
        if let Some(v) = &args.api_key {
            self.api_key = v.clone();
        }
        if let Some(v) = &args.redis_url {
            self.cache.redis_url = v.clone();
        }
        if let Some(v) = args.redis_pool_size {
            self.cache.pool_size = v;
        }
        if let Some(v) = args.cache_expiry_in_seconds {
            self.cache.expiry_in_seconds = v;
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.backend_url.trim().is_empty() {
            return Err(invalid("backend_url is empty (set STREAMING_BACKEND_URL)"));
        }
        if self.subscriber_buffer == 0 {
            return Err(invalid("subscriber_buffer must be > 0"));
        }
        if self.compaction_interval_secs == 0 {
            return Err(invalid("compaction_interval_secs must be > 0"));
        }
        if self.cache.expiry_in_seconds == 0 {
            return Err(invalid("cache.expiry_in_seconds must be > 0"));
        }
        if self.cache.storage == StorageKind::Redis && self.cache.pool_size == 0 {
            return Err(invalid("cache.pool_size must be > 0"));
        }
        if !self.path_prefix.is_empty() && !self.path_prefix.starts_with('/') {
            return Err(invalid(format!("path_prefix '{}' must start with '/'", self.path_prefix)));
        }
        if self.topics.is_empty() {
            return Err(invalid("no [[topics]] configured"));
        }

        let mut names = HashSet::new();
        let mut routes = HashSet::new();
        for topic in &self.topics {
            if topic.name.is_empty() {
                return Err(invalid("topic with empty name"));
            }
            if !topic.path.starts_with('/') {
                return Err(invalid(format!("topic '{}': path '{}' must start with '/'", topic.name, topic.path)));
            }
            if !names.insert(topic.name.as_str()) {
                return Err(invalid(format!("duplicate topic '{}'", topic.name)));
            }
            let route = self.route_path(topic);
            if route == "/healthcheck" {
                return Err(invalid(format!("topic '{}' collides with /healthcheck", topic.name)));
            }
            if !routes.insert(route) {
                return Err(invalid(format!("duplicate topic path '{}'", topic.path)));
            }
        }
        Ok(())
    }

    /// Публичный путь topic'а: `path_prefix` + `path`.
    pub fn route_path(&self, topic: &TopicConfig) -> String {
        format!("{}{}", self.path_prefix.trim_end_matches('/'), topic.path)
    }
}
