use anyhow::Context;
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a config value of type `T` from a single file (format by extension).
pub fn load_cfg<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(anyhow::anyhow!("file {} does not exist", path.display()));
    }

    let cfg = Config::builder()
        .add_source(File::from(path.to_path_buf()))
        .build()
        .with_context(|| format!("failed to read config from {}", path.display()))?;

    cfg.try_deserialize()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))
}

/// Merge several files (missing ones are skipped) and then environment
/// variables on top. Nested keys use `__` as separator, e.g.
/// `RELAYRT__DISPATCHER_THREADING__MAX_THREADS_ACTIVE=4`.
pub fn load_cfg_merge<T, P>(
    paths: impl IntoIterator<Item = P>,
    env_prefix: Option<&str>,
) -> anyhow::Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let mut builder = Config::builder();

    for p in paths {
        let p = p.as_ref();
        if p.exists() {
            builder = builder.add_source(File::from(p.to_path_buf()));
        } else {
            tracing::debug!("config loading: file {} does not exist", p.display());
        }
    }

    builder = match env_prefix {
        Some(prefix) => builder.add_source(Environment::with_prefix(prefix).separator("__")),
        None => builder.add_source(Environment::default().separator("__")),
    };

    let cfg = builder
        .build()
        .context("failed to build configuration from provided sources")?;

    cfg.try_deserialize()
        .context("failed to deserialize merged configuration")
}
