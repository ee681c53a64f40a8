//! Configuration loading and validation.
//!
//! Precedence: environment overrides > TOML file > built-in defaults.
//! Credentials are opaque strings passed through to the platform gateway;
//! `Debug` output redacts them.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::bus::OverflowPolicy;
use crate::types::Platform;

/// Default gateway endpoint for the feishu bridge.
const DEFAULT_FEISHU_GATEWAY: &str = "http://127.0.0.1:3101";
/// Default gateway endpoint for the wecom bridge.
const DEFAULT_WECOM_GATEWAY: &str = "http://127.0.0.1:3102";
/// Default gateway endpoint for the dingtalk bridge.
const DEFAULT_DINGTALK_GATEWAY: &str = "http://127.0.0.1:3103";
/// Default gateway endpoint for the qq bridge.
const DEFAULT_QQ_GATEWAY: &str = "http://127.0.0.1:3104";

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct SwitchboardConfig {
    /// Process-level settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Outbound send settings.
    #[serde(default)]
    pub send: SendConfig,

    /// Reconnect and heartbeat settings, shared by all connections.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Event bus settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Per-platform sections.
    #[serde(default)]
    pub platforms: PlatformsConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceConfig {
    /// Default tracing filter when `SWITCHBOARD_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for rotated JSON log files.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            logs_dir: default_logs_dir(),
        }
    }
}

/// Outbound send settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendConfig {
    /// How long to wait for a platform acknowledgment before a send fails
    /// with a timeout.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

/// Reconnect and heartbeat settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconnectConfig {
    /// First backoff delay after a failed connect.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Liveness probe interval while connected.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BusConfig {
    /// Queue capacity for each subscriber.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Overflow policy applied to subscribers that do not choose their own.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

/// All platform sections.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct PlatformsConfig {
    /// Feishu settings.
    #[serde(default)]
    pub feishu: FeishuConfig,

    /// WeCom settings.
    #[serde(default)]
    pub wecom: WecomConfig,

    /// DingTalk settings.
    #[serde(default)]
    pub dingtalk: DingtalkConfig,

    /// QQ settings.
    #[serde(default)]
    pub qq: QqConfig,
}

/// Feishu platform settings.
#[derive(Clone, PartialEq, Deserialize)]
pub struct FeishuConfig {
    /// Whether to run an adapter for this platform.
    #[serde(default)]
    pub enabled: bool,

    /// Feishu app id.
    #[serde(default)]
    pub app_id: String,

    /// Feishu app secret.
    #[serde(default)]
    pub app_secret: String,

    /// Gateway endpoint holding the platform's long connection.
    #[serde(default = "default_feishu_gateway")]
    pub gateway_url: String,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            app_id: String::new(),
            app_secret: String::new(),
            gateway_url: default_feishu_gateway(),
        }
    }
}

impl std::fmt::Debug for FeishuConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeishuConfig")
            .field("enabled", &self.enabled)
            .field("app_id", &self.app_id)
            .field("app_secret", &"__REDACTED__")
            .field("gateway_url", &self.gateway_url)
            .finish()
    }
}

/// WeCom platform settings.
#[derive(Clone, PartialEq, Deserialize)]
pub struct WecomConfig {
    /// Whether to run an adapter for this platform.
    #[serde(default)]
    pub enabled: bool,

    /// WeCom corp id.
    #[serde(default)]
    pub corp_id: String,

    /// WeCom agent id.
    #[serde(default)]
    pub agent_id: String,

    /// WeCom application secret.
    #[serde(default)]
    pub secret: String,

    /// Gateway endpoint holding the platform's long connection.
    #[serde(default = "default_wecom_gateway")]
    pub gateway_url: String,
}

impl Default for WecomConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            corp_id: String::new(),
            agent_id: String::new(),
            secret: String::new(),
            gateway_url: default_wecom_gateway(),
        }
    }
}

impl std::fmt::Debug for WecomConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WecomConfig")
            .field("enabled", &self.enabled)
            .field("corp_id", &self.corp_id)
            .field("agent_id", &self.agent_id)
            .field("secret", &"__REDACTED__")
            .field("gateway_url", &self.gateway_url)
            .finish()
    }
}

/// DingTalk platform settings.
#[derive(Clone, PartialEq, Deserialize)]
pub struct DingtalkConfig {
    /// Whether to run an adapter for this platform.
    #[serde(default)]
    pub enabled: bool,

    /// DingTalk app key.
    #[serde(default)]
    pub app_key: String,

    /// DingTalk app secret.
    #[serde(default)]
    pub app_secret: String,

    /// Gateway endpoint holding the platform's long connection.
    #[serde(default = "default_dingtalk_gateway")]
    pub gateway_url: String,
}

impl Default for DingtalkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            app_key: String::new(),
            app_secret: String::new(),
            gateway_url: default_dingtalk_gateway(),
        }
    }
}

impl std::fmt::Debug for DingtalkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DingtalkConfig")
            .field("enabled", &self.enabled)
            .field("app_key", &self.app_key)
            .field("app_secret", &"__REDACTED__")
            .field("gateway_url", &self.gateway_url)
            .finish()
    }
}

/// QQ platform settings.
#[derive(Clone, PartialEq, Deserialize)]
pub struct QqConfig {
    /// Whether to run an adapter for this platform.
    #[serde(default)]
    pub enabled: bool,

    /// QQ bot app id.
    #[serde(default)]
    pub app_id: String,

    /// QQ bot token (the app secret).
    #[serde(default)]
    pub token: String,

    /// Gateway endpoint holding the platform's long connection.
    #[serde(default = "default_qq_gateway")]
    pub gateway_url: String,
}

impl Default for QqConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            app_id: String::new(),
            token: String::new(),
            gateway_url: default_qq_gateway(),
        }
    }
}

impl std::fmt::Debug for QqConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QqConfig")
            .field("enabled", &self.enabled)
            .field("app_id", &self.app_id)
            .field("token", &"__REDACTED__")
            .field("gateway_url", &self.gateway_url)
            .finish()
    }
}

/// One platform's section, detached from the parent config.
///
/// The registry diffs sections between config generations (`PartialEq`) and
/// hands them to the transport factory when building an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformSection {
    /// Feishu section.
    Feishu(FeishuConfig),
    /// WeCom section.
    Wecom(WecomConfig),
    /// DingTalk section.
    Dingtalk(DingtalkConfig),
    /// QQ section.
    Qq(QqConfig),
}

impl PlatformSection {
    /// The platform this section configures.
    pub fn platform(&self) -> Platform {
        match self {
            PlatformSection::Feishu(_) => Platform::Feishu,
            PlatformSection::Wecom(_) => Platform::Wecom,
            PlatformSection::Dingtalk(_) => Platform::Dingtalk,
            PlatformSection::Qq(_) => Platform::Qq,
        }
    }

    /// Whether this platform should have a running adapter.
    pub fn enabled(&self) -> bool {
        match self {
            PlatformSection::Feishu(c) => c.enabled,
            PlatformSection::Wecom(c) => c.enabled,
            PlatformSection::Dingtalk(c) => c.enabled,
            PlatformSection::Qq(c) => c.enabled,
        }
    }

    /// Gateway endpoint for this platform.
    pub fn gateway_url(&self) -> &str {
        match self {
            PlatformSection::Feishu(c) => &c.gateway_url,
            PlatformSection::Wecom(c) => &c.gateway_url,
            PlatformSection::Dingtalk(c) => &c.gateway_url,
            PlatformSection::Qq(c) => &c.gateway_url,
        }
    }
}

impl PlatformsConfig {
    /// Detaches the section for one platform.
    pub fn section(&self, platform: Platform) -> PlatformSection {
        match platform {
            Platform::Feishu => PlatformSection::Feishu(self.feishu.clone()),
            Platform::Wecom => PlatformSection::Wecom(self.wecom.clone()),
            Platform::Dingtalk => PlatformSection::Dingtalk(self.dingtalk.clone()),
            Platform::Qq => PlatformSection::Qq(self.qq.clone()),
        }
    }

    /// Platforms currently marked enabled, in registry order.
    pub fn enabled_platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.section(*p).enabled())
            .collect()
    }
}

impl SwitchboardConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `--config` flag value if given, else
    /// `$SWITCHBOARD_CONFIG`, else `./config.toml`. A missing file yields
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path_override: Option<&std::path::Path>) -> Result<Self> {
        let path = Self::resolve_path(path_override);
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// The file path [`Self::load`] would read for the same override.
    ///
    /// Exposed so the caller can watch that file for changes.
    pub fn resolve_path(path_override: Option<&std::path::Path>) -> PathBuf {
        match path_override {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(|key| std::env::var(key).ok()),
        }
    }

    /// Load from a TOML file only, no env overrides.
    fn load_from_file(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: SwitchboardConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(SwitchboardConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        match env("SWITCHBOARD_CONFIG") {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from("config.toml"),
        }
    }

    /// Parse configuration from a TOML string (no env overrides).
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML does not match the schema.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids mutating the
    /// process environment in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("SWITCHBOARD_LOG_LEVEL") {
            self.service.log_level = v;
        }

        // Credential rotation without touching the file.
        if let Some(v) = env("SWITCHBOARD_FEISHU_APP_ID") {
            self.platforms.feishu.app_id = v;
        }
        if let Some(v) = env("SWITCHBOARD_FEISHU_APP_SECRET") {
            self.platforms.feishu.app_secret = v;
        }
        if let Some(v) = env("SWITCHBOARD_WECOM_CORP_ID") {
            self.platforms.wecom.corp_id = v;
        }
        if let Some(v) = env("SWITCHBOARD_WECOM_AGENT_ID") {
            self.platforms.wecom.agent_id = v;
        }
        if let Some(v) = env("SWITCHBOARD_WECOM_SECRET") {
            self.platforms.wecom.secret = v;
        }
        if let Some(v) = env("SWITCHBOARD_DINGTALK_APP_KEY") {
            self.platforms.dingtalk.app_key = v;
        }
        if let Some(v) = env("SWITCHBOARD_DINGTALK_APP_SECRET") {
            self.platforms.dingtalk.app_secret = v;
        }
        if let Some(v) = env("SWITCHBOARD_QQ_APP_ID") {
            self.platforms.qq.app_id = v;
        }
        if let Some(v) = env("SWITCHBOARD_QQ_TOKEN") {
            self.platforms.qq.token = v;
        }
    }

    /// Check the configuration for problems that would break at runtime.
    ///
    /// # Errors
    ///
    /// Returns one error listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.send.ack_timeout_ms == 0 {
            problems.push("send.ack_timeout_ms must be nonzero".to_string());
        }
        if self.reconnect.initial_delay_ms == 0 {
            problems.push("reconnect.initial_delay_ms must be nonzero".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            problems.push(
                "reconnect.max_delay_ms must be >= reconnect.initial_delay_ms".to_string(),
            );
        }
        if self.bus.subscriber_capacity == 0 {
            problems.push("bus.subscriber_capacity must be nonzero".to_string());
        }

        for platform in Platform::ALL {
            let section = self.platforms.section(platform);
            if !section.enabled() {
                continue;
            }
            if url::Url::parse(section.gateway_url()).is_err() {
                problems.push(format!(
                    "platforms.{platform}.gateway_url is not a valid URL: {}",
                    section.gateway_url()
                ));
            }
            for (field, value) in section.credential_fields() {
                if value.is_empty() {
                    problems.push(format!(
                        "platforms.{platform}.{field} is required when the platform is enabled"
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration:\n  - {}", problems.join("\n  - "))
        }
    }
}

impl PlatformSection {
    /// Credential field names and values, for validation and gateway auth.
    pub fn credential_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            PlatformSection::Feishu(c) => {
                vec![("app_id", c.app_id.as_str()), ("app_secret", c.app_secret.as_str())]
            }
            PlatformSection::Wecom(c) => vec![
                ("corp_id", c.corp_id.as_str()),
                ("agent_id", c.agent_id.as_str()),
                ("secret", c.secret.as_str()),
            ],
            PlatformSection::Dingtalk(c) => vec![
                ("app_key", c.app_key.as_str()),
                ("app_secret", c.app_secret.as_str()),
            ],
            PlatformSection::Qq(c) => {
                vec![("app_id", c.app_id.as_str()), ("token", c.token.as_str())]
            }
        }
    }
}

// Default value functions for serde

fn default_log_level() -> String {
    "info".to_string()
}
fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_ack_timeout_ms() -> u64 {
    10_000
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_subscriber_capacity() -> usize {
    crate::bus::DEFAULT_SUBSCRIBER_CAPACITY
}
fn default_feishu_gateway() -> String {
    DEFAULT_FEISHU_GATEWAY.to_string()
}
fn default_wecom_gateway() -> String {
    DEFAULT_WECOM_GATEWAY.to_string()
}
fn default_dingtalk_gateway() -> String {
    DEFAULT_DINGTALK_GATEWAY.to_string()
}
fn default_qq_gateway() -> String {
    DEFAULT_QQ_GATEWAY.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SwitchboardConfig::default();
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.send.ack_timeout_ms, 10_000);
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.bus.subscriber_capacity, 256);
        assert!(!config.platforms.feishu.enabled);
        assert!(config.platforms.enabled_platforms().is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml_str = r#"
[platforms.feishu]
enabled = true
app_id = "cli_abc"
app_secret = "s3cret"
"#;
        let config = SwitchboardConfig::from_toml(toml_str).expect("should parse");
        assert!(config.platforms.feishu.enabled);
        assert_eq!(config.platforms.feishu.app_id, "cli_abc");
        assert_eq!(
            config.platforms.feishu.gateway_url,
            "http://127.0.0.1:3101"
        );
        assert_eq!(config.platforms.enabled_platforms(), vec![Platform::Feishu]);
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = SwitchboardConfig::from_toml("").expect("should parse empty");
        assert_eq!(config, SwitchboardConfig::default());
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let mut config = SwitchboardConfig::from_toml(
            r#"
[service]
log_level = "debug"

[platforms.dingtalk]
enabled = true
app_key = "from-file"
app_secret = "from-file"
"#,
        )
        .expect("should parse");

        config.apply_overrides(|key| match key {
            "SWITCHBOARD_LOG_LEVEL" => Some("trace".to_string()),
            "SWITCHBOARD_DINGTALK_APP_SECRET" => Some("from-env".to_string()),
            _ => None,
        });

        assert_eq!(config.service.log_level, "trace");
        assert_eq!(config.platforms.dingtalk.app_key, "from-file");
        assert_eq!(config.platforms.dingtalk.app_secret, "from-env");
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().expect("should create tempdir");
        let path = dir.path().join("switchboard.toml");
        std::fs::write(
            &path,
            "[platforms.feishu]\nenabled = true\napp_id = \"cli_x\"\napp_secret = \"s\"\n",
        )
        .expect("should write config");

        let config = SwitchboardConfig::load(Some(&path)).expect("should load");
        assert!(config.platforms.feishu.enabled);
        assert_eq!(config.platforms.feishu.app_id, "cli_x");
        assert_eq!(SwitchboardConfig::resolve_path(Some(&path)), path);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("should create tempdir");
        let path = dir.path().join("absent.toml");
        let config = SwitchboardConfig::load(Some(&path)).expect("missing file should load");
        assert_eq!(config.platforms, PlatformsConfig::default());
    }

    #[test]
    fn test_config_path_env_resolver() {
        let path = SwitchboardConfig::config_path_with(|key| {
            (key == "SWITCHBOARD_CONFIG").then(|| "/etc/switchboard.toml".to_string())
        });
        assert_eq!(path, PathBuf::from("/etc/switchboard.toml"));

        let fallback = SwitchboardConfig::config_path_with(|_| None);
        assert_eq!(fallback, PathBuf::from("config.toml"));
    }

    #[test]
    fn test_validate_rejects_enabled_platform_without_credentials() {
        let config = SwitchboardConfig::from_toml(
            r#"
[platforms.wecom]
enabled = true
corp_id = "ww123"
"#,
        )
        .expect("should parse");

        let err = config.validate().expect_err("should reject");
        let msg = err.to_string();
        assert!(msg.contains("platforms.wecom.agent_id"));
        assert!(msg.contains("platforms.wecom.secret"));
        assert!(!msg.contains("platforms.wecom.corp_id"));
    }

    #[test]
    fn test_validate_rejects_bad_gateway_url() {
        let config = SwitchboardConfig::from_toml(
            r#"
[platforms.feishu]
enabled = true
app_id = "cli_abc"
app_secret = "s"
gateway_url = "not a url"
"#,
        )
        .expect("should parse");

        let err = config.validate().expect_err("should reject");
        assert!(err.to_string().contains("gateway_url"));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff_window() {
        let config = SwitchboardConfig::from_toml(
            r#"
[reconnect]
initial_delay_ms = 5000
max_delay_ms = 100
"#,
        )
        .expect("should parse");

        let err = config.validate().expect_err("should reject");
        assert!(err.to_string().contains("max_delay_ms"));
    }

    #[test]
    fn test_validate_accepts_disabled_platforms_without_credentials() {
        let config = SwitchboardConfig::default();
        config.validate().expect("defaults should validate");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = SwitchboardConfig::default();
        config.platforms.feishu.app_secret = "very-secret".to_string();
        config.platforms.wecom.secret = "also-secret".to_string();
        config.platforms.dingtalk.app_secret = "still-secret".to_string();
        config.platforms.qq.token = "yet-another-secret".to_string();

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("also-secret"));
        assert!(!rendered.contains("still-secret"));
        assert!(!rendered.contains("yet-another-secret"));
        assert!(rendered.contains("__REDACTED__"));
    }

    #[test]
    fn test_qq_section_parses_and_validates() {
        let config = SwitchboardConfig::from_toml(
            r#"
[platforms.qq]
enabled = true
app_id = "102034567"
token = "botsecret"
"#,
        )
        .expect("should parse");
        assert_eq!(config.platforms.qq.gateway_url, "http://127.0.0.1:3104");
        assert_eq!(config.platforms.enabled_platforms(), vec![Platform::Qq]);
        config.validate().expect("complete section should validate");

        let missing_token = SwitchboardConfig::from_toml(
            "[platforms.qq]\nenabled = true\napp_id = \"102034567\"\n",
        )
        .expect("should parse");
        let err = missing_token.validate().expect_err("should reject");
        assert!(err.to_string().contains("platforms.qq.token"));
    }

    #[test]
    fn test_section_diff_detects_credential_rotation() {
        let old = SwitchboardConfig::from_toml(
            r#"
[platforms.feishu]
enabled = true
app_id = "cli_abc"
app_secret = "old"
"#,
        )
        .expect("should parse");
        let mut new = old.clone();
        assert_eq!(
            old.platforms.section(Platform::Feishu),
            new.platforms.section(Platform::Feishu)
        );

        new.platforms.feishu.app_secret = "rotated".to_string();
        assert_ne!(
            old.platforms.section(Platform::Feishu),
            new.platforms.section(Platform::Feishu)
        );
    }
}
