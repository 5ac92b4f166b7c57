//! Where meetbot keeps its files.
//!
//! Config lives in the platform config directory and sessions in the data
//! directory. `MEETBOT_HOME` puts both under one directory instead, so a second
//! instance can run beside the default one.

use anyhow::{Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "meetbot";
const HOME_ENV: &str = "MEETBOT_HOME";

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn sessions_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("sessions.json"))
}

/// Held by whichever process is driving sessions.
pub fn lock_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("meetbot.lock"))
}

fn config_dir() -> Result<PathBuf> {
    resolve(home_override(), dirs::config_dir(), None)
        .context("Unable to determine config directory")
}

fn data_dir() -> Result<PathBuf> {
    let fallback = dirs::home_dir().map(|home| home.join(".local").join("share"));
    resolve(home_override(), dirs::data_dir(), fallback)
        .context("Unable to determine data directory")
}

fn home_override() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn resolve(
    home: Option<PathBuf>,
    platform: Option<PathBuf>,
    fallback: Option<PathBuf>,
) -> Option<PathBuf> {
    home.or_else(|| platform.or(fallback).map(|dir| dir.join(APP_DIR)))
}
