//! Scoped adapter acquisition.
//!
//! [`with_adapter`] and [`with_adapters`] start servers, run a closure with
//! them, and always stop them afterwards. [`AdapterGuard`] covers the paths
//! where no `stop()` can be awaited (panics, dropped futures): its `Drop`
//! aborts whatever is still running.

use futures::future::join_all;
use std::future::Future;
use std::ops::Deref;
use tracing::warn;

use crate::adapter::ToolServerAdapter;
use crate::config::ServerConfig;
use crate::error::{McpError, Result};

/// Aborts its adapter on drop unless it was stopped.
#[derive(Debug)]
pub struct AdapterGuard {
    adapter: ToolServerAdapter,
    stopped: bool,
}

impl AdapterGuard {
    pub fn new(adapter: ToolServerAdapter) -> Self {
        Self {
            adapter,
            stopped: false,
        }
    }

    /// Start a fresh adapter for `config`. The guard is returned only on
    /// success; a failed start is torn down immediately.
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let guard = Self::new(ToolServerAdapter::new(config));
        guard.adapter.start().await?;
        Ok(guard)
    }

    pub fn adapter(&self) -> &ToolServerAdapter {
        &self.adapter
    }

    pub async fn stop(mut self) -> Result<()> {
        self.stopped = true;
        self.adapter.stop().await
    }
}

impl Deref for AdapterGuard {
    type Target = ToolServerAdapter;

    fn deref(&self) -> &ToolServerAdapter {
        &self.adapter
    }
}

impl Drop for AdapterGuard {
    fn drop(&mut self) {
        if !self.stopped {
            self.adapter.abort();
        }
    }
}

/// Start one server, run `f` with it, then stop it whatever `f` returned.
pub async fn with_adapter<T, E, F, Fut>(config: ServerConfig, f: F) -> std::result::Result<T, E>
where
    F: FnOnce(ToolServerAdapter) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<McpError>,
{
    let guard = AdapterGuard::start(config).await?;
    let result = f(guard.adapter().clone()).await;
    if let Err(e) = guard.stop().await {
        warn!("Failed to stop tool server: {e}");
    }
    result
}

/// Start every server concurrently, run `f` with all of them, then stop
/// them all. If any server fails to start, the ones that started are
/// stopped and the first failure is returned.
pub async fn with_adapters<T, E, F, Fut>(
    configs: Vec<ServerConfig>,
    f: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(Vec<ToolServerAdapter>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<McpError>,
{
    let started = join_all(configs.into_iter().map(AdapterGuard::start)).await;

    let mut guards = Vec::with_capacity(started.len());
    let mut first_error = None;
    for result in started {
        match result {
            Ok(guard) => guards.push(guard),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        stop_all(guards).await;
        return Err(e.into());
    }

    let adapters = guards.iter().map(|g| g.adapter().clone()).collect();
    let result = f(adapters).await;
    stop_all(guards).await;
    result
}

async fn stop_all(guards: Vec<AdapterGuard>) {
    for result in join_all(guards.into_iter().map(AdapterGuard::stop)).await {
        if let Err(e) = result {
            warn!("Failed to stop tool server: {e}");
        }
    }
}
