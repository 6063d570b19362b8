use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use serde::Deserialize;
use shared::domain::UserId;
use tracing::warn;
use url::Url;

const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub server_url: String,
    pub ws_path: String,
    pub send_timeout: Duration,
    pub connect_wait: Duration,
    pub connect_poll: Duration,
    pub typing_idle: Duration,
    pub reconnect_delay: Duration,
    pub dedup_capacity: usize,
    pub dedup_evict_batch: usize,
    pub history_page_size: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            ws_path: "/ws".into(),
            send_timeout: Duration::from_secs(10),
            connect_wait: Duration::from_secs(3),
            connect_poll: Duration::from_millis(100),
            typing_idle: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(2),
            dedup_capacity: 100,
            dedup_evict_batch: 20,
            history_page_size: 50,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    server_url: Option<String>,
    ws_path: Option<String>,
    send_timeout_ms: Option<u64>,
    connect_wait_ms: Option<u64>,
    connect_poll_ms: Option<u64>,
    typing_idle_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    dedup_capacity: Option<usize>,
    dedup_evict_batch: Option<usize>,
    history_page_size: Option<u32>,
}

impl ClientSettings {
    /// Websocket endpoint derived from `server_url`, scoped to one user.
    pub fn ws_url(&self, user_id: UserId) -> anyhow::Result<String> {
        let mut url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server_url '{}'", self.server_url))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(anyhow!("server_url must be http(s), got '{other}'")),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot switch '{}' to {scheme}", self.server_url))?;
        url.set_path(&self.ws_path);
        url.query_pairs_mut()
            .clear()
            .append_pair("user_id", &user_id.0.to_string());
        Ok(url.to_string())
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.ws_path {
            self.ws_path = v;
        }
        if let Some(v) = file.send_timeout_ms {
            self.send_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.connect_wait_ms {
            self.connect_wait = Duration::from_millis(v);
        }
        if let Some(v) = file.connect_poll_ms {
            self.connect_poll = Duration::from_millis(v);
        }
        if let Some(v) = file.typing_idle_ms {
            self.typing_idle = Duration::from_millis(v);
        }
        if let Some(v) = file.reconnect_delay_ms {
            self.reconnect_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.dedup_capacity {
            self.dedup_capacity = v;
        }
        if let Some(v) = file.dedup_evict_batch {
            self.dedup_evict_batch = v;
        }
        if let Some(v) = file.history_page_size {
            self.history_page_size = v;
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("APP__WS_PATH") {
            self.ws_path = v;
        }
        let millis = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());
        if let Some(v) = millis("APP__SEND_TIMEOUT_MS") {
            self.send_timeout = Duration::from_millis(v);
        }
        if let Some(v) = millis("APP__CONNECT_WAIT_MS") {
            self.connect_wait = Duration::from_millis(v);
        }
        if let Some(v) = millis("APP__CONNECT_POLL_MS") {
            self.connect_poll = Duration::from_millis(v);
        }
        if let Some(v) = millis("APP__TYPING_IDLE_MS") {
            self.typing_idle = Duration::from_millis(v);
        }
        if let Some(v) = millis("APP__RECONNECT_DELAY_MS") {
            self.reconnect_delay = Duration::from_millis(v);
        }
        if let Some(v) = lookup("APP__DEDUP_CAPACITY").and_then(|v| v.parse().ok()) {
            self.dedup_capacity = v;
        }
        if let Some(v) = lookup("APP__DEDUP_EVICT_BATCH").and_then(|v| v.parse().ok()) {
            self.dedup_evict_batch = v;
        }
        if let Some(v) = lookup("APP__HISTORY_PAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.history_page_size = v;
        }
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<SettingsFile>(&raw) {
            Ok(file) => settings.apply_file(file),
            Err(err) => warn!(path = %path.display(), "config: ignoring unreadable settings file: {err}"),
        }
    }

    settings.apply_env(env_lookup);
    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
