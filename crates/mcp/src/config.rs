//! Connection settings for one tool server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// How to reach the server.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// A local subprocess speaking newline-delimited JSON-RPC on stdin/stdout.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    },
    /// A remote server: a GET event stream plus a POST endpoint it announces.
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Sse { .. } => "sse",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub name: String,
    pub transport: TransportConfig,
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub call_timeout: Duration,
    /// Remote tool names to expose; everything when `None`.
    pub tool_filter: Option<Vec<String>>,
    /// Prepended verbatim to every exposed tool name.
    pub tool_prefix: Option<String>,
}

impl ServerConfig {
    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            tool_filter: None,
            tool_prefix: None,
        }
    }

    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: HashMap::new(),
                cwd: None,
            },
        )
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Sse {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    /// Ignored for SSE servers.
    pub fn with_args<I, S>(mut self, new_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let TransportConfig::Stdio { args, .. } = &mut self.transport {
            args.extend(new_args.into_iter().map(Into::into));
        }
        self
    }

    /// Ignored for SSE servers.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    /// Ignored for SSE servers.
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        if let TransportConfig::Stdio { cwd, .. } = &mut self.transport {
            *cwd = Some(dir.into());
        }
        self
    }

    /// Ignored for stdio servers.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Sse { headers, .. } = &mut self.transport {
            headers.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_tool_filter<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_filter = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_tool_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = Some(prefix.into());
        self
    }

    /// Whether a remote tool passes the allow-list.
    pub fn exposes(&self, remote_name: &str) -> bool {
        self.tool_filter
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|n| n == remote_name))
    }

    /// The name the agent sees for a remote tool.
    pub fn exposed_name(&self, remote_name: &str) -> String {
        match &self.tool_prefix {
            Some(prefix) => format!("{prefix}{remote_name}"),
            None => remote_name.to_string(),
        }
    }
}
