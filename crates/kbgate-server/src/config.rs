//! Server configuration
//!
//! Loaded from a YAML (default) or TOML file, then overridden by environment
//! variables. Every field has a default so the runtime can start from
//! environment alone, which is how the container image is launched.

use kbgate_core::{
    TenantResolver, TenantSource,
    retrieval::{DEFAULT_TENANT_FILTER_KEY, RetrievalLimits},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// AWS region used to derive service endpoints
    #[serde(default = "default_region")]
    pub region: String,

    /// Bearer token forwarded to the signing proxy in front of the AWS services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,

    #[serde(default)]
    pub knowledge_base: KnowledgeBaseSettings,

    #[serde(default)]
    pub memory: MemorySettings,

    #[serde(default)]
    pub model: ModelSettings,

    #[serde(default)]
    pub tenant: TenantSource,

    #[serde(default)]
    pub sessions: SessionSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseSettings {
    #[serde(default)]
    pub id: String,

    /// Overrides the regional endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Metadata key the tenant filter is applied to
    #[serde(default = "default_filter_key")]
    pub filter_key: String,

    #[serde(default = "default_results")]
    pub default_results: u32,

    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Memory resource ID; conversation memory is off without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_actor_id")]
    pub actor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_session_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            service_token: None,
            knowledge_base: KnowledgeBaseSettings::default(),
            memory: MemorySettings::default(),
            model: ModelSettings::default(),
            tenant: TenantSource::default(),
            sessions: SessionSettings::default(),
            logging: LoggingConfig::default(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for KnowledgeBaseSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            endpoint: None,
            filter_key: default_filter_key(),
            default_results: default_results(),
            max_results: default_max_results(),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            id: None,
            endpoint: None,
            actor_id: default_actor_id(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            max_turns: default_max_turns(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            capacity: default_session_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl KnowledgeBaseSettings {
    pub fn limits(&self) -> RetrievalLimits {
        RetrievalLimits {
            default_results: self.default_results,
            max_results: self.max_results,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        // Server settings
        if let Some(val) = env_value("KBGATE_HOST") {
            self.host = val;
        }

        if let Some(val) = env_value("KBGATE_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => eprintln!("Warning: Invalid KBGATE_PORT '{}', using {}", val, self.port),
            }
        }

        if let Some(val) = env_value("KBGATE_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Some(val) = env_value("KBGATE_LOG_FORMAT") {
            match val.to_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "text" => self.logging.format = LogFormat::Text,
                _ => eprintln!("Warning: Invalid KBGATE_LOG_FORMAT '{}', using default", val),
            }
        }

        // AWS services (no KBGATE_ prefix for these)
        if let Some(val) = env_value("AWS_REGION") {
            self.region = val;
        }

        if let Some(val) = env_value("KNOWLEDGE_BASE_ID") {
            self.knowledge_base.id = val;
        }

        if let Some(val) = env_value("KBGATE_KB_ENDPOINT") {
            self.knowledge_base.endpoint = Some(val);
        }

        if let Some(val) = env_value("BEDROCK_AGENTCORE_MEMORY_ID").or_else(|| env_value("MEMORY_ID"))
        {
            self.memory.id = Some(val);
        }

        if let Some(val) = env_value("KBGATE_MEMORY_ENDPOINT") {
            self.memory.endpoint = Some(val);
        }

        if let Some(val) = env_value("KBGATE_SERVICE_TOKEN") {
            self.service_token = Some(val);
        }

        // Model provider
        if let Some(val) = env_value("ANTHROPIC_API_KEY") {
            self.model.api_key = Some(val);
        }

        if let Some(val) = env_value("ANTHROPIC_BASE_URL") {
            self.model.base_url = Some(val);
        }

        if let Some(val) = env_value("ANTHROPIC_MODEL") {
            self.model.model = val;
        }

        // Tenant source: a pinned tenant wins over a header override
        if let Some(val) = env_value("KBGATE_TENANT_HEADER") {
            self.tenant = TenantSource::Header { name: val };
        }

        if let Some(val) = env_value("KBGATE_STATIC_TENANT") {
            self.tenant = TenantSource::Static { tenant_id: val };
        }
    }

    /// Check the configuration is complete enough to serve
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.knowledge_base.id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "knowledge base id is required (set KNOWLEDGE_BASE_ID)".to_string(),
            ));
        }

        if self.knowledge_base.filter_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "knowledge_base.filter_key must not be empty".to_string(),
            ));
        }

        self.knowledge_base
            .limits()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self
            .model
            .api_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "model API key is required (set ANTHROPIC_API_KEY)".to_string(),
            ));
        }

        if self.model.max_turns == 0 {
            return Err(ConfigError::Invalid(
                "model.max_turns must be at least 1".to_string(),
            ));
        }

        if let Some(id) = &self.memory.id
            && id.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "memory.id must not be empty when set".to_string(),
            ));
        }

        TenantResolver::new(self.tenant.clone())
            .map_err(|e| ConfigError::Invalid(format!("tenant source: {}", e)))?;

        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Non-empty environment variable
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_filter_key() -> String {
    DEFAULT_TENANT_FILTER_KEY.to_string()
}

fn default_results() -> u32 {
    RetrievalLimits::default().default_results
}

fn default_max_results() -> u32 {
    RetrievalLimits::default().max_results
}

fn default_actor_id() -> String {
    kbgate_session::DEFAULT_ACTOR_ID.to_string()
}

fn default_model() -> String {
    kbgate_egress::anthropic::DEFAULT_MODEL.to_string()
}

fn default_max_turns() -> u32 {
    10
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_session_ttl_secs() -> u64 {
    kbgate_session::store::DEFAULT_SESSION_TTL.as_secs()
}

fn default_session_capacity() -> usize {
    kbgate_session::store::DEFAULT_SESSION_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_body_bytes() -> usize {
    kbgate_ingress::middleware::DEFAULT_MAX_BODY_BYTES
}
