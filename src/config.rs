use crate::pool::PoolConfig;
use crate::threading::ThreadingProfile;
use crate::utils::backoff::ReconnectCfg;
use crate::utils::logger::LoggerConfig;
use crate::utils::params_io;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

/// Everything a [`Connector`](crate::connector::Connector) can be configured
/// with from a file. Missing sections take their defaults.
///
/// ```toml
/// name = "orders"
/// shutdown_timeout_ms = 2000
///
/// [dispatcher_threading]
/// max_threads_active = 8
/// exhausted_action = "wait"
///
/// [dispatcher_pool]
/// when_exhausted = "fail"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub name: Option<String>,
    pub dispatcher_threading: ThreadingProfile,
    pub requester_threading: ThreadingProfile,
    pub receiver_threading: ThreadingProfile,
    pub dispatcher_pool: PoolConfig,
    pub requester_pool: PoolConfig,
    pub shutdown_timeout_ms: Option<u64>,
    pub reconnect: Option<ReconnectCfg>,
    pub logger: Option<LoggerConfig>,
}

impl ConnectorConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        params_io::load_cfg(path)
    }

    /// Files merged in order, then `{env_prefix}__*` variables on top.
    pub fn load_merged<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
        env_prefix: Option<&str>,
    ) -> anyhow::Result<Self> {
        params_io::load_cfg_merge(paths, env_prefix)
    }

    #[inline]
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }

    /// Install logging from the `logger` section, or from `RELAYRT_LOG_*`
    /// variables when the section is absent.
    pub fn init_logger(&self) -> anyhow::Result<Option<WorkerGuard>> {
        match &self.logger {
            Some(cfg) => cfg.init(),
            None => LoggerConfig::from_env().init(),
        }
    }
}
