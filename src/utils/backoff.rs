use crate::utils::CancelToken;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection policy applied when a connector's transport refuses to connect.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectCfg {
    /// Quick retries right after the first failure.
    pub fast_attempts: u32,
    pub fast_delay_ms: u64,

    /// Exponential part.
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,

    /// Total retries after the initial attempt (None = until cancelled).
    pub max_retries: Option<u32>,
}

impl Default for ReconnectCfg {
    fn default() -> Self {
        Self {
            fast_attempts: 2,
            fast_delay_ms: 50,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            factor: 2.0,
            max_retries: Some(5),
        }
    }
}

pub struct Backoff {
    cfg: ReconnectCfg,
    attempt: u32,
}

impl Backoff {
    pub fn new(cfg: ReconnectCfg) -> Self {
        Self { cfg, attempt: 0 }
    }

    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.cfg.max_retries
            && self.attempt >= max
        {
            return None;
        }

        let delay = if self.attempt < self.cfg.fast_attempts {
            self.cfg.fast_delay_ms
        } else {
            let exp = self.attempt - self.cfg.fast_attempts;
            let ms = (self.cfg.base_delay_ms as f64) * self.cfg.factor.powi(exp as i32);
            ms.min(self.cfg.max_delay_ms as f64) as u64
        };
        self.attempt = self.attempt.saturating_add(1);
        Some(Duration::from_millis(delay))
    }
}

/// Run `op` until it succeeds, retries run out, or `cancel` fires.
/// Returns the last error on give-up.
pub fn retry<T, E, F>(cfg: &ReconnectCfg, cancel: &CancelToken, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut backoff = Backoff::new(cfg.clone());
    loop {
        let err = match op(backoff.attempt()) {
            Ok(v) => return Ok(v),
            Err(err) => err,
        };
        let Some(delay) = backoff.next_delay() else {
            return Err(err);
        };
        tracing::debug!(
            "retry {} in {:?} after: {}",
            backoff.attempt(),
            delay,
            err
        );
        if !cancel.sleep_cancellable(delay) {
            return Err(err);
        }
    }
}
