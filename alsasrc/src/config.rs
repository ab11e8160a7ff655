//! TOML + XDG configuration loading: read a file, then re-export its
//! fields into the process environment so `structopt`'s `env` attributes
//! pick them up as CLI defaults.

use std::env;
use std::path::Path;

use serde::Deserialize;

#[derive(Deserialize, Default)]
pub struct Config {
    device: Option<String>,
    source_name: Option<String>,
    fragments: Option<u64>,
    fragment_size: Option<u64>,
    tsched_buffer_size_ms: Option<u64>,
    tsched_buffer_watermark_ms: Option<u64>,
    mmap: Option<bool>,
    tsched: Option<bool>,
    ignore_db: Option<bool>,
}

fn set_env<T: ToString>(name: &str, value: T) {
    env::set_var(name, value.to_string());
}

fn set_env_option<T: ToString>(name: &str, value: Option<T>) {
    if let Some(value) = value {
        set_env(name, value);
    }
}

pub fn load_into_env(config: &Config) {
    set_env_option("ALSASRC_DEVICE", config.device.as_ref());
    set_env_option("ALSASRC_SOURCE_NAME", config.source_name.as_ref());
    set_env_option("ALSASRC_FRAGMENTS", config.fragments);
    set_env_option("ALSASRC_FRAGMENT_SIZE", config.fragment_size);
    set_env_option("ALSASRC_TSCHED_BUFFER_MS", config.tsched_buffer_size_ms);
    set_env_option("ALSASRC_TSCHED_WATERMARK_MS", config.tsched_buffer_watermark_ms);
    set_env_option("ALSASRC_MMAP", config.mmap);
    set_env_option("ALSASRC_TSCHED", config.tsched);
    set_env_option("ALSASRC_IGNORE_DB", config.ignore_db);
}

fn load_file(path: &Path) -> Option<Config> {
    log::debug!("looking for config in {}", path.display());

    let contents = std::fs::read_to_string(path).ok()?;

    match toml::from_str(&contents) {
        Ok(config) => {
            log::info!("reading config from {}", path.display());
            Some(config)
        }
        Err(e) => {
            log::error!("error reading config: {e}");
            std::process::exit(1);
        }
    }
}

/// Try `./alsasrc.toml`, then the XDG config dir, in that order. `None`
/// if neither exists — defaults and CLI flags then carry the session.
pub fn read() -> Option<Config> {
    if let Some(config) = load_file(Path::new("alsasrc.toml")) {
        return Some(config);
    }

    let dirs = xdg::BaseDirectories::new().ok()?;
    if let Some(path) = dirs.find_config_file("alsasrc.toml") {
        return load_file(&path);
    }

    None
}
