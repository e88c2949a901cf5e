use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use serde::Deserialize;
use tracing::warn;
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "consult.toml";
const WEBSOCKET_TRANSPORT: &str = "websocket";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub relay_url: String,
    pub api_base_url: String,
    pub transports: Vec<String>,
    pub reconnection_attempts: u32,
    pub reconnection_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub typing_expiry_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:5000/socket".into(),
            api_base_url: "http://127.0.0.1:5000/api".into(),
            transports: vec![WEBSOCKET_TRANSPORT.into()],
            reconnection_attempts: 5,
            reconnection_delay_ms: 1000,
            connect_timeout_ms: 20_000,
            typing_expiry_ms: 8000,
        }
    }
}

impl ClientSettings {
    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn typing_expiry(&self) -> Option<Duration> {
        (self.typing_expiry_ms > 0).then(|| Duration::from_millis(self.typing_expiry_ms))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self
            .transports
            .iter()
            .any(|transport| transport.eq_ignore_ascii_case(WEBSOCKET_TRANSPORT))
        {
            return Err(anyhow!(
                "transports {:?} do not include '{WEBSOCKET_TRANSPORT}', the only supported transport",
                self.transports
            ));
        }
        relay_ws_url(&self.relay_url)?;
        Url::parse(&self.api_base_url)
            .with_context(|| format!("invalid api_base_url '{}'", self.api_base_url))?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    relay_url: Option<String>,
    api_base_url: Option<String>,
    transports: Option<Vec<String>>,
    reconnection_attempts: Option<u32>,
    reconnection_delay_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    typing_expiry_ms: Option<u64>,
}

/// Defaults, then `consult.toml` (or `$CONSULT_CONFIG`), then environment overrides.
pub fn load_settings() -> ClientSettings {
    let path = std::env::var("CONSULT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut settings = ClientSettings::default();
    if let Ok(raw) = fs::read_to_string(Path::new(&path)) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => warn!(path = %path, "ignoring unreadable settings file: {err}"),
        }
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.relay_url {
        settings.relay_url = v;
    }
    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.transports {
        settings.transports = v;
    }
    if let Some(v) = file_cfg.reconnection_attempts {
        settings.reconnection_attempts = v;
    }
    if let Some(v) = file_cfg.reconnection_delay_ms {
        settings.reconnection_delay_ms = v;
    }
    if let Some(v) = file_cfg.connect_timeout_ms {
        settings.connect_timeout_ms = v;
    }
    if let Some(v) = file_cfg.typing_expiry_ms {
        settings.typing_expiry_ms = v;
    }
}

fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    let var = |plain: &str, prefixed: &str| lookup(prefixed).or_else(|| lookup(plain));

    if let Some(v) = var("CONSULT_RELAY_URL", "APP__RELAY_URL") {
        settings.relay_url = v;
    }
    if let Some(v) = var("CONSULT_API_URL", "APP__API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = var("CONSULT_TRANSPORTS", "APP__TRANSPORTS") {
        settings.transports = v
            .split(',')
            .map(str::trim)
            .filter(|transport| !transport.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = var("CONSULT_RECONNECT_ATTEMPTS", "APP__RECONNECT_ATTEMPTS") {
        match v.parse::<u32>() {
            Ok(parsed) => settings.reconnection_attempts = parsed,
            Err(err) => warn!(value = %v, "ignoring reconnect attempts override: {err}"),
        }
    }
    if let Some(v) = var("CONSULT_RECONNECT_DELAY_MS", "APP__RECONNECT_DELAY_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.reconnection_delay_ms = parsed,
            Err(err) => warn!(value = %v, "ignoring reconnect delay override: {err}"),
        }
    }
    if let Some(v) = var("CONSULT_CONNECT_TIMEOUT_MS", "APP__CONNECT_TIMEOUT_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.connect_timeout_ms = parsed,
            Err(err) => warn!(value = %v, "ignoring connect timeout override: {err}"),
        }
    }
    if let Some(v) = var("CONSULT_TYPING_EXPIRY_MS", "APP__TYPING_EXPIRY_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.typing_expiry_ms = parsed,
            Err(err) => warn!(value = %v, "ignoring typing expiry override: {err}"),
        }
    }
}

pub fn relay_ws_url(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("invalid relay url '{raw}'"))?;
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => return Err(anyhow!("relay url '{raw}' has unsupported scheme '{other}'")),
    };
    url.set_scheme(scheme)
        .map_err(|()| anyhow!("failed to rewrite relay url '{raw}' to {scheme}"))?;
    Ok(url)
}
