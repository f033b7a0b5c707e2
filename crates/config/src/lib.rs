//! Configuration loading and validation for crewforge.
//!
//! Loads a crew description from `~/.crewforge/crew.toml` with environment
//! variable overrides. Validates all settings at load time so a bad file
//! fails before any server is spawned or model is called.
//!
//! ```toml
//! [model]
//! api_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//!
//! [[agents]]
//! role = "researcher"
//! goal = "Find facts"
//! backstory = "A careful analyst"
//! tools = ["files"]
//!
//! [[mcp_servers]]
//! name = "files"
//! transport = "stdio"
//! command = "mcp-server-filesystem"
//! args = ["/tmp"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.crewforge/crew.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrewConfig {
    /// Model endpoint shared by every agent unless overridden
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

/// Model endpoint settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Where model-written code runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeExecutionMode {
    #[default]
    Safe,
    Unsafe,
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub role: String,
    pub goal: String,
    pub backstory: String,

    /// Overrides `[model].model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Overrides `[model].temperature`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_minute: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_time_secs: Option<u64>,

    #[serde(default = "default_max_retry_limit")]
    pub max_retry_limit: u32,

    #[serde(default = "default_true")]
    pub memory: bool,

    #[serde(default)]
    pub allow_delegation: bool,

    #[serde(default)]
    pub allow_code_execution: bool,

    #[serde(default)]
    pub code_execution_mode: CodeExecutionMode,

    #[serde(default = "default_true")]
    pub respect_context_window: bool,

    #[serde(default = "default_true")]
    pub cache_tool_results: bool,

    #[serde(default = "default_context_window_tokens")]
    pub context_window_tokens: usize,

    /// Names of `[[mcp_servers]]` whose tools this agent binds
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_max_iterations() -> u32 {
    20
}
fn default_max_retry_limit() -> u32 {
    2
}
fn default_context_window_tokens() -> usize {
    8192
}
fn default_true() -> bool {
    true
}

impl AgentConfig {
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            model: None,
            temperature: None,
            max_iterations: default_max_iterations(),
            max_requests_per_minute: None,
            max_execution_time_secs: None,
            max_retry_limit: default_max_retry_limit(),
            memory: true,
            allow_delegation: false,
            allow_code_execution: false,
            code_execution_mode: CodeExecutionMode::Safe,
            respect_context_window: true,
            cache_tool_results: true,
            context_window_tokens: default_context_window_tokens(),
            tools: Vec::new(),
        }
    }
}

/// Transport used to reach an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
}

/// One `[[mcp_servers]]` entry.
#[derive(Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,

    pub transport: TransportKind,

    /// Executable to spawn (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Event stream endpoint (sse)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,

    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Only expose these remote tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_prefix: Option<String>,
}

fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_discovery_timeout_secs() -> u64 {
    30
}
fn default_call_timeout_secs() -> u64 {
    60
}

// Env values and headers routinely carry tokens.
impl std::fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env: Vec<&String> = self.env.keys().collect();
        let headers: Vec<&String> = self.headers.keys().collect();
        f.debug_struct("McpServerConfig")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &env)
            .field("cwd", &self.cwd)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("discovery_timeout_secs", &self.discovery_timeout_secs)
            .field("call_timeout_secs", &self.call_timeout_secs)
            .field("tools", &self.tools)
            .field("tool_prefix", &self.tool_prefix)
            .finish()
    }
}

impl CrewConfig {
    /// Load configuration from the default path (~/.crewforge/crew.toml).
    ///
    /// Environment variables override the file:
    /// - `CREWFORGE_API_KEY` (highest priority), then `OPENAI_API_KEY`,
    ///   used only when the file has no key
    /// - `CREWFORGE_MODEL`
    /// - `CREWFORGE_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::default_path())
    }

    /// Load `path` and apply the environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path. A missing file yields
    /// the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config = Self::parse(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        tracing::debug!(
            path = %path.display(),
            agents = config.agents.len(),
            servers = config.mcp_servers.len(),
            "Loaded crew configuration"
        );
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.model.api_key.is_none() {
            self.model.api_key = var("CREWFORGE_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(model) = var("CREWFORGE_MODEL") {
            self.model.model = model;
        }
        if let Some(url) = var("CREWFORGE_API_URL") {
            self.model.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".crewforge")
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("crew.toml")
    }

    pub fn agent(&self, role: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.role == role)
    }

    pub fn server(&self, name: &str) -> Option<&McpServerConfig> {
        self.mcp_servers.iter().find(|s| s.name == name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return invalid("model.temperature must be between 0.0 and 2.0".into());
        }
        if self.model.api_url.trim().is_empty() {
            return invalid("model.api_url must not be empty".into());
        }

        let mut servers = HashSet::new();
        for server in &self.mcp_servers {
            if server.name.trim().is_empty() {
                return invalid("mcp server name must not be empty".into());
            }
            if !servers.insert(server.name.as_str()) {
                return invalid(format!("duplicate mcp server '{}'", server.name));
            }
            match server.transport {
                TransportKind::Stdio => {
                    if server.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                        return invalid(format!("stdio server '{}' needs a command", server.name));
                    }
                }
                TransportKind::Sse => {
                    let url = server.url.as_deref().unwrap_or_default();
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        return invalid(format!(
                            "sse server '{}' needs an http(s) url",
                            server.name
                        ));
                    }
                }
            }
            if server.call_timeout_secs == 0 || server.discovery_timeout_secs == 0 {
                return invalid(format!("server '{}' timeouts must be positive", server.name));
            }
        }

        let mut roles = HashSet::new();
        for agent in &self.agents {
            for (field, value) in [
                ("role", &agent.role),
                ("goal", &agent.goal),
                ("backstory", &agent.backstory),
            ] {
                if value.trim().is_empty() {
                    return invalid(format!("agent {field} must not be empty"));
                }
            }
            if !roles.insert(agent.role.as_str()) {
                return invalid(format!("duplicate agent role '{}'", agent.role));
            }
            if agent.max_iterations == 0 {
                return invalid(format!("agent '{}': max_iterations must be at least 1", agent.role));
            }
            if agent.max_requests_per_minute == Some(0) {
                return invalid(format!(
                    "agent '{}': max_requests_per_minute must be at least 1",
                    agent.role
                ));
            }
            if let Some(t) = agent.temperature
                && !(0.0..=2.0).contains(&t)
            {
                return invalid(format!(
                    "agent '{}': temperature must be between 0.0 and 2.0",
                    agent.role
                ));
            }
            for server in &agent.tools {
                if !servers.contains(server.as_str()) {
                    return invalid(format!(
                        "agent '{}' references unknown mcp server '{server}'",
                        agent.role
                    ));
                }
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
    }

    /// Render the configuration as TOML (for `check --print`).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const CREW: &str = r#"
        [model]
        model = "llama3"
        api_url = "http://localhost:11434/v1"

        [[agents]]
        role = "researcher"
        goal = "Find facts"
        backstory = "A careful analyst"
        max_iterations = 5
        max_execution_time_secs = 30
        allow_delegation = true
        tools = ["files", "search"]

        [[agents]]
        role = "writer"
        goal = "Write it up"
        backstory = "Concise"
        code_execution_mode = "unsafe"

        [[mcp_servers]]
        name = "files"
        transport = "stdio"
        command = "mcp-server-filesystem"
        args = ["/tmp"]
        env = { LOG = "quiet" }
        tools = ["read_file"]
        tool_prefix = "fs_"

        [[mcp_servers]]
        name = "search"
        transport = "sse"
        url = "https://search.example.com/sse"
        headers = { Authorization = "Bearer abc" }
        call_timeout_secs = 5
    "#;

    fn with_agent(extra: &str) -> String {
        format!("[[agents]]\nrole = \"r\"\ngoal = \"g\"\nbackstory = \"b\"\n{extra}\n")
    }

    #[test]
    fn default_config_is_valid() {
        let config = CrewConfig::default();
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert!(config.agents.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_full_crew() {
        let config = CrewConfig::parse(CREW).unwrap();
        assert_eq!(config.model.model, "llama3");

        let researcher = config.agent("researcher").unwrap();
        assert_eq!(researcher.max_iterations, 5);
        assert_eq!(researcher.max_execution_time_secs, Some(30));
        assert_eq!(researcher.max_retry_limit, 2);
        assert!(researcher.memory);
        assert!(researcher.allow_delegation);
        assert_eq!(researcher.tools, vec!["files", "search"]);

        let writer = config.agent("writer").unwrap();
        assert_eq!(writer.code_execution_mode, CodeExecutionMode::Unsafe);
        assert_eq!(writer.max_iterations, 20);

        let files = config.server("files").unwrap();
        assert_eq!(files.transport, TransportKind::Stdio);
        assert_eq!(files.env["LOG"], "quiet");
        assert_eq!(files.tools.as_deref(), Some(&["read_file".to_string()][..]));
        assert_eq!(files.connect_timeout_secs, 10);

        let search = config.server("search").unwrap();
        assert_eq!(search.transport, TransportKind::Sse);
        assert_eq!(search.call_timeout_secs, 5);
        assert_eq!(search.discovery_timeout_secs, 30);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = CrewConfig::parse(CREW).unwrap();
        let parsed = CrewConfig::parse(&config.to_toml()).unwrap();
        assert_eq!(parsed.agents.len(), 2);
        assert_eq!(parsed.mcp_servers.len(), 2);
        assert_eq!(parsed.server("files").unwrap().args, vec!["/tmp"]);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = CrewConfig {
            model: ModelConfig {
                temperature: 5.0,
                ..ModelConfig::default()
            },
            ..CrewConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_agent_fields_rejected() {
        let err = CrewConfig::parse("[[agents]]\nrole = \"r\"\ngoal = \" \"\nbackstory = \"b\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("goal"));
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(CrewConfig::parse(&with_agent("max_iterations = 0")).is_err());
        assert!(CrewConfig::parse(&with_agent("max_requests_per_minute = 0")).is_err());
        assert!(CrewConfig::parse(&with_agent("max_execution_time_secs = 0")).is_ok());
    }

    #[test]
    fn duplicate_names_rejected() {
        let agents = format!("{}{}", with_agent(""), with_agent(""));
        assert!(CrewConfig::parse(&agents).unwrap_err().to_string().contains("duplicate"));

        let servers = r#"
            [[mcp_servers]]
            name = "a"
            transport = "stdio"
            command = "x"
            [[mcp_servers]]
            name = "a"
            transport = "stdio"
            command = "y"
        "#;
        assert!(CrewConfig::parse(servers).is_err());
    }

    #[test]
    fn transport_parameters_required() {
        let stdio = "[[mcp_servers]]\nname = \"s\"\ntransport = \"stdio\"\n";
        assert!(CrewConfig::parse(stdio).unwrap_err().to_string().contains("command"));

        let sse = "[[mcp_servers]]\nname = \"s\"\ntransport = \"sse\"\nurl = \"ftp://x\"\n";
        assert!(CrewConfig::parse(sse).unwrap_err().to_string().contains("url"));

        let unknown = "[[mcp_servers]]\nname = \"s\"\ntransport = \"websocket\"\n";
        assert!(matches!(
            CrewConfig::parse(unknown),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn unknown_server_reference_rejected() {
        let err = CrewConfig::parse(&with_agent("tools = [\"nowhere\"]")).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = CrewConfig::load_from(Path::new("/nonexistent/crew.toml")).unwrap();
        assert_eq!(config.model.api_url, "https://api.openai.com/v1");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CREW.as_bytes()).unwrap();
        let config = CrewConfig::load_from(file.path()).unwrap();
        assert_eq!(config.agents.len(), 2);
    }

    #[test]
    fn parse_error_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[[agents]\nrole = ").unwrap();
        match CrewConfig::load_from(file.path()) {
            Err(ConfigError::ParseError { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-openai"),
            ("CREWFORGE_MODEL", "gpt-4o"),
            ("CREWFORGE_API_URL", "http://proxy/v1"),
        ]);
        let mut config = CrewConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.model.model, "gpt-4o");
        assert_eq!(config.model.api_url, "http://proxy/v1");

        let env: HashMap<&str, &str> =
            HashMap::from([("CREWFORGE_API_KEY", "sk-crew"), ("OPENAI_API_KEY", "sk-openai")]);
        let mut config = CrewConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-crew"));

        // A key in the file wins over the environment.
        let mut config = CrewConfig::default();
        config.model.api_key = Some("sk-file".into());
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = CrewConfig::parse(CREW).unwrap();
        config.model.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("Bearer abc"));
        assert!(debug.contains("Authorization"));
    }
}
