use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rolling {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

impl Rolling {
    fn rotation(self) -> Rotation {
        match self {
            Rolling::Minutely => Rotation::MINUTELY,
            Rolling::Hourly => Rotation::HOURLY,
            Rolling::Daily => Rotation::DAILY,
            Rolling::Never => Rotation::NEVER,
        }
    }
}

impl FromStr for Rolling {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minutely" => Ok(Rolling::Minutely),
            "hourly" => Ok(Rolling::Hourly),
            "daily" => Ok(Rolling::Daily),
            "never" => Ok(Rolling::Never),
            other => Err(anyhow::anyhow!("unknown log rolling '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    pub rolling: Rolling,
    pub max_files: usize,
    pub with_thread_names: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: None,
            rolling: Rolling::Daily,
            max_files: 2,
            with_thread_names: true,
        }
    }
}

impl LoggerConfig {
    /// Reads RELAYRT_LOG_LEVEL, RELAYRT_LOG_DIR, RELAYRT_LOG_PREFIX and
    /// RELAYRT_LOG_ROLLING, falling back to the defaults for anything unset
    /// or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(level) = std::env::var("RELAYRT_LOG_LEVEL") {
            cfg.level = level;
        }
        cfg.file_dir = std::env::var("RELAYRT_LOG_DIR").ok();
        cfg.file_prefix = std::env::var("RELAYRT_LOG_PREFIX").ok();
        if let Ok(rolling) = std::env::var("RELAYRT_LOG_ROLLING")
            && let Ok(rolling) = rolling.parse()
        {
            cfg.rolling = rolling;
        }
        cfg
    }

    #[inline]
    pub fn level(&self) -> Level {
        Level::from_str(&self.level).unwrap_or(Level::INFO)
    }

    /// Install the global fmt subscriber. An already installed subscriber is
    /// left in place. Keep the returned guard alive for as long as file
    /// logging should flush.
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let level = self.level();

        let Some(dir) = self.file_dir.as_deref() else {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_thread_names(self.with_thread_names)
                .try_init();
            tracing::debug!("logging to stdout");
            return Ok(None);
        };

        let prefix = self.file_prefix.as_deref().unwrap_or("relayrt");
        let appender = RollingFileAppender::builder()
            .rotation(self.rolling.rotation())
            .max_log_files(self.max_files.max(1))
            .filename_prefix(prefix)
            .build(dir)
            .with_context(|| format!("failed to create rolling appender in {dir}"))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_thread_names(self.with_thread_names)
            .with_ansi(false)
            .with_writer(writer)
            .try_init();

        tracing::info!(
            "logging to dir: {}, prefix: {}, rolling: {:?}",
            dir,
            prefix,
            self.rolling
        );
        Ok(Some(guard))
    }
}

/// Rate limiter for one log call site.
///
/// Lets one message through per `interval`; the next message after the
/// interval carries the number suppressed in between.
///
/// ```ignore
/// warn_throttled!(Duration::from_secs(5), "[Executor:{}] rejected work", name);
/// ```
pub struct Throttle {
    last: Mutex<Instant>,
    suppressed: AtomicU64,
    interval: Duration,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        // first poll always passes
        let start = Instant::now()
            .checked_sub(interval)
            .unwrap_or_else(Instant::now);
        Self {
            last: Mutex::new(start),
            suppressed: AtomicU64::new(0),
            interval,
        }
    }

    /// `Some(suppressed)` when the caller may emit, `None` otherwise.
    pub fn poll(&self) -> Option<u64> {
        if self.interval.is_zero() {
            return Some(self.suppressed.swap(0, Ordering::Relaxed));
        }
        let mut last = self.last.lock();
        if last.elapsed() >= self.interval {
            *last = Instant::now();
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

/// Level-generic throttled log; one [`Throttle`] per call site.
#[macro_export]
macro_rules! log_throttled {
    ($level:ident, $interval:expr, $($arg:tt)*) => {{
        static _THROTTLE: std::sync::OnceLock<$crate::utils::logger::Throttle> =
            std::sync::OnceLock::new();
        let t = _THROTTLE.get_or_init(|| $crate::utils::logger::Throttle::new($interval));
        if let Some(_suppressed) = t.poll() {
            if _suppressed > 0 {
                tracing::$level!(suppressed = _suppressed, $($arg)*);
            } else {
                tracing::$level!($($arg)*);
            }
        }
    }};
}

#[macro_export]
macro_rules! error_throttled { ($interval:expr, $($arg:tt)*) => { $crate::log_throttled!(error, $interval, $($arg)*); } }
#[macro_export]
macro_rules! warn_throttled  { ($interval:expr, $($arg:tt)*) => { $crate::log_throttled!(warn,  $interval, $($arg)*); } }
#[macro_export]
macro_rules! debug_throttled { ($interval:expr, $($arg:tt)*) => { $crate::log_throttled!(debug, $interval, $($arg)*); } }
