use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

use crate::app_state::Heartbeat;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_seconds: i64,
    pub cloudinary_cloud_name: Option<String>,
    pub cloudinary_api_key: Option<String>,
    pub cloudinary_api_secret: Option<String>,
    pub upload_folder: String,
    pub max_image_bytes: usize,
    pub push_queue_capacity: usize,
    pub ws_ping_interval_seconds: u64,
    pub ws_idle_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/chat.db".into(),
            jwt_secret: "dev-secret-change-me".into(),
            token_ttl_seconds: server_api::auth::DEFAULT_TOKEN_TTL_SECONDS,
            cloudinary_cloud_name: None,
            cloudinary_api_key: None,
            cloudinary_api_secret: None,
            upload_folder: "chat_images".into(),
            max_image_bytes: blob_store::DEFAULT_MAX_IMAGE_BYTES,
            push_queue_capacity: server_api::outbound::DEFAULT_QUEUE_CAPACITY,
            ws_ping_interval_seconds: 25,
            ws_idle_timeout_seconds: 60,
        }
    }
}

impl Settings {
    /// Cloudinary credentials, when all three are present and non-empty.
    pub fn cloudinary_credentials(&self) -> Option<(String, String, String)> {
        let pick = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Some((
            pick(&self.cloudinary_cloud_name)?,
            pick(&self.cloudinary_api_key)?,
            pick(&self.cloudinary_api_secret)?,
        ))
    }

    /// Idle timeout is kept strictly above the ping interval.
    pub(crate) fn heartbeat(&self) -> Heartbeat {
        let ping_interval = self.ws_ping_interval_seconds.max(1);
        let idle_timeout = self.ws_idle_timeout_seconds.max(ping_interval + 1);
        Heartbeat {
            ping_interval: Duration::from_secs(ping_interval),
            idle_timeout: Duration::from_secs(idle_timeout),
        }
    }
}

pub fn load_settings() -> Settings {
    let file_cfg = fs::read_to_string("server.toml")
        .ok()
        .and_then(|raw| toml::from_str::<HashMap<String, String>>(&raw).ok())
        .unwrap_or_default();
    let env: HashMap<String, String> = std::env::vars().collect();
    settings_from(&file_cfg, &env)
}

/// Defaults, then `server.toml` keys, then environment variables.
pub fn settings_from(
    file_cfg: &HashMap<String, String>,
    env: &HashMap<String, String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(v) = file_cfg.get("bind_addr") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(v) = file_cfg.get("jwt_secret") {
        settings.jwt_secret = v.clone();
    }
    if let Some(v) = file_cfg.get("cloudinary_cloud_name") {
        settings.cloudinary_cloud_name = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("upload_folder") {
        settings.upload_folder = v.clone();
    }

    let first = |keys: &[&str]| keys.iter().rev().find_map(|key| env.get(*key).cloned());

    if let Some(v) = first(&["SERVER_BIND", "APP__BIND_ADDR"]) {
        settings.server_bind = v;
    }
    if let Some(v) = first(&["DATABASE_URL", "APP__DATABASE_URL"]) {
        settings.database_url = v;
    }
    if let Some(v) = first(&["JWT_SECRET", "APP__JWT_SECRET"]) {
        settings.jwt_secret = v;
    }
    if let Some(v) = first(&["CLOUDINARY_CLOUD_NAME", "APP__CLOUDINARY_CLOUD_NAME"]) {
        settings.cloudinary_cloud_name = Some(v);
    }
    if let Some(v) = first(&["CLOUDINARY_API_KEY", "APP__CLOUDINARY_API_KEY"]) {
        settings.cloudinary_api_key = Some(v);
    }
    if let Some(v) = first(&["CLOUDINARY_API_SECRET", "APP__CLOUDINARY_API_SECRET"]) {
        settings.cloudinary_api_secret = Some(v);
    }
    if let Some(v) = first(&["APP__UPLOAD_FOLDER"]) {
        settings.upload_folder = v;
    }
    if let Some(parsed) = first(&["APP__TOKEN_TTL_SECONDS"]).and_then(|v| v.parse::<i64>().ok()) {
        settings.token_ttl_seconds = parsed;
    }
    if let Some(parsed) = first(&["APP__MAX_IMAGE_BYTES"]).and_then(|v| v.parse::<usize>().ok()) {
        settings.max_image_bytes = parsed;
    }
    if let Some(parsed) =
        first(&["APP__PUSH_QUEUE_CAPACITY"]).and_then(|v| v.parse::<usize>().ok())
    {
        settings.push_queue_capacity = parsed.max(1);
    }
    if let Some(parsed) =
        first(&["APP__WS_PING_INTERVAL_SECONDS"]).and_then(|v| v.parse::<u64>().ok())
    {
        settings.ws_ping_interval_seconds = parsed;
    }
    if let Some(parsed) =
        first(&["APP__WS_IDLE_TIMEOUT_SECONDS"]).and_then(|v| v.parse::<u64>().ok())
    {
        settings.ws_idle_timeout_seconds = parsed;
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
