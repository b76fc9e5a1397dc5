//! 运行配置加载（`FLEET_*` 环境变量）。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 传输后端（启动时选定，运行期不可切换）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// 进程内 broker。
    Embedded,
    /// 远程 MQTT broker（TCP）。
    Remote,
    /// 云 IoT 网关（MQTT over mTLS）。
    Cloud,
}

impl TransportKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embedded" | "local" => Some(TransportKind::Embedded),
            "remote" | "mqtt" => Some(TransportKind::Remote),
            "cloud" | "iot" => Some(TransportKind::Cloud),
            _ => None,
        }
    }
}

/// 存储后端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Some(StorageBackend::Memory),
            "postgres" | "postgresql" => Some(StorageBackend::Postgres),
            _ => None,
        }
    }
}

/// 云网关 TLS 配置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTlsConfig {
    pub ca_path: String,
    pub cert_path: String,
    pub key_path: String,
    /// 追加在所有 topic 之前的命名空间（如 thing 名称）。
    pub topic_namespace: Option<String>,
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub transport_kind: TransportKind,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_keep_alive_secs: u64,
    pub cloud_tls: Option<CloudTlsConfig>,
    pub transport_reconnect_backoff_ms: u64,
    pub subscribe_topics: Vec<String>,
    pub subscribe_qos: u8,
    pub command_qos: u8,
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub presence_timeout_secs: u64,
    pub presence_sweep_interval_secs: u64,
    pub command_timeout_secs: u64,
    pub command_sweep_interval_secs: u64,
    pub metrics_log_interval_secs: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置（测试中用 HashMap 代替进程环境）。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let transport_kind = match lookup("FLEET_TRANSPORT") {
            Some(value) => TransportKind::parse(&value)
                .ok_or_else(|| ConfigError::Invalid("FLEET_TRANSPORT".to_string(), value))?,
            None => TransportKind::Embedded,
        };
        let default_port = if transport_kind == TransportKind::Cloud {
            8883
        } else {
            1883
        };
        let mqtt_host = lookup("FLEET_MQTT_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default(&lookup, "FLEET_MQTT_PORT", default_port)?;
        let mqtt_username = read_optional(&lookup, "FLEET_MQTT_USERNAME");
        let mqtt_password = read_optional(&lookup, "FLEET_MQTT_PASSWORD");
        let mqtt_client_id =
            read_optional(&lookup, "FLEET_MQTT_CLIENT_ID").unwrap_or_else(|| "fleet-core".to_string());
        let mqtt_keep_alive_secs = read_u64_with_default(&lookup, "FLEET_MQTT_KEEP_ALIVE_SECS", 30)?;
        let cloud_tls = if transport_kind == TransportKind::Cloud {
            Some(CloudTlsConfig {
                ca_path: read_required(&lookup, "FLEET_CLOUD_CA_PATH")?,
                cert_path: read_required(&lookup, "FLEET_CLOUD_CERT_PATH")?,
                key_path: read_required(&lookup, "FLEET_CLOUD_KEY_PATH")?,
                topic_namespace: read_optional(&lookup, "FLEET_CLOUD_TOPIC_NAMESPACE"),
            })
        } else {
            None
        };
        let transport_reconnect_backoff_ms =
            read_u64_with_default(&lookup, "FLEET_TRANSPORT_RECONNECT_BACKOFF_MS", 5_000)?;
        let subscribe_topics = read_optional(&lookup, "FLEET_SUBSCRIBE_TOPICS")
            .map(|value| split_list(&value))
            .filter(|topics| !topics.is_empty())
            .unwrap_or_else(|| {
                vec![
                    "manifolds/#".to_string(),
                    "devices/#".to_string(),
                    "lorawan/#".to_string(),
                ]
            });
        let subscribe_qos = read_qos_with_default(&lookup, "FLEET_SUBSCRIBE_QOS", 1)?;
        let command_qos = read_qos_with_default(&lookup, "FLEET_COMMAND_QOS", 1)?;
        let storage_backend = match lookup("FLEET_STORAGE") {
            Some(value) => StorageBackend::parse(&value)
                .ok_or_else(|| ConfigError::Invalid("FLEET_STORAGE".to_string(), value))?,
            None => StorageBackend::Memory,
        };
        let database_url = read_optional(&lookup, "FLEET_DATABASE_URL");
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("FLEET_DATABASE_URL".to_string()));
        }
        let redis_url = read_optional(&lookup, "FLEET_REDIS_URL");
        let presence_timeout_secs =
            read_u64_with_default(&lookup, "FLEET_PRESENCE_TIMEOUT_SECS", 15)?;
        let presence_sweep_interval_secs =
            read_u64_with_default(&lookup, "FLEET_PRESENCE_SWEEP_INTERVAL_SECS", 5)?.max(1);
        let command_timeout_secs = read_u64_with_default(&lookup, "FLEET_COMMAND_TIMEOUT_SECS", 30)?;
        let command_sweep_interval_secs =
            read_u64_with_default(&lookup, "FLEET_COMMAND_SWEEP_INTERVAL_SECS", 60)?.max(1);
        let metrics_log_interval_secs =
            read_u64_with_default(&lookup, "FLEET_METRICS_LOG_INTERVAL_SECS", 60)?;

        Ok(Self {
            transport_kind,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_keep_alive_secs,
            cloud_tls,
            transport_reconnect_backoff_ms,
            subscribe_topics,
            subscribe_qos,
            command_qos,
            storage_backend,
            database_url,
            redis_url,
            presence_timeout_secs,
            presence_sweep_interval_secs,
            command_timeout_secs,
            command_sweep_interval_secs,
            metrics_log_interval_secs,
        })
    }
}

fn read_required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    read_optional(lookup, key).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn read_u16_with_default<F>(lookup: &F, key: &str, default: u16) -> Result<u16, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_qos_with_default<F>(lookup: &F, key: &str, default: u8) -> Result<u8, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    match value.parse::<u8>() {
        Ok(qos) if qos <= 2 => Ok(qos),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
