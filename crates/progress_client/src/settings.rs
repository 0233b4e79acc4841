use std::fs;
use std::path::Path;
use std::time::Duration;

use progress_core::{ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
use progress_logging::progress_info;
use serde::Deserialize;
use url::Url;

use crate::SettingsError;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Fixed wait before retrying a transient failure.
    pub retry_delay: Duration,
    pub retries: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
            retries: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: Url,
    /// Base for `/ws/{task_id}` stream connections.
    pub ws_base_url: Url,
    pub http: HttpSettings,
    pub reconnect: ReconnectPolicy,
}

impl ClientSettings {
    /// Settings with defaults, pointed at `api_base_url`. The stream base is
    /// derived by swapping the scheme to `ws`/`wss`.
    pub fn for_base_url(api_base_url: &str) -> Result<Self, SettingsError> {
        let api_base_url = parse_base(api_base_url)?;
        let ws_base_url = derive_ws_base(&api_base_url)?;
        Ok(Self {
            api_base_url,
            ws_base_url,
            http: HttpSettings::default(),
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Loads settings from a RON file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_ron_str(&content)?;
        progress_info!(
            "Loaded client settings from {:?} api={}",
            path,
            settings.api_base_url
        );
        Ok(settings)
    }

    pub fn from_ron_str(content: &str) -> Result<Self, SettingsError> {
        let file: SettingsFile = ron::from_str(content)?;
        file.into_settings()
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        match Self::for_base_url(DEFAULT_API_BASE_URL) {
            Ok(settings) => settings,
            Err(err) => unreachable!("built-in api url {DEFAULT_API_BASE_URL} rejected: {err}"),
        }
    }
}

/// On-disk shape. Durations are milliseconds; `reconnect_max_attempts` of 0
/// means retry forever, and an empty `ws_base_url` is derived from the API base.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    api_base_url: String,
    ws_base_url: String,
    connect_timeout_ms: u64,
    request_timeout_ms: u64,
    retry_delay_ms: u64,
    http_retries: u32,
    reconnect_delay_ms: u64,
    reconnect_max_attempts: u32,
}

impl Default for SettingsFile {
    fn default() -> Self {
        let http = HttpSettings::default();
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_base_url: String::new(),
            connect_timeout_ms: millis(http.connect_timeout),
            request_timeout_ms: millis(http.request_timeout),
            retry_delay_ms: millis(http.retry_delay),
            http_retries: http.retries,
            reconnect_delay_ms: millis(DEFAULT_RECONNECT_DELAY),
            reconnect_max_attempts: 0,
        }
    }
}

impl SettingsFile {
    fn into_settings(self) -> Result<ClientSettings, SettingsError> {
        let reconnect_delay = positive("reconnect_delay_ms", self.reconnect_delay_ms)?;
        let retry_delay = positive("retry_delay_ms", self.retry_delay_ms)?;
        let connect_timeout = positive("connect_timeout_ms", self.connect_timeout_ms)?;
        let request_timeout = positive("request_timeout_ms", self.request_timeout_ms)?;
        let api_base_url = parse_base(&self.api_base_url)?;
        let ws_base_url = if self.ws_base_url.trim().is_empty() {
            derive_ws_base(&api_base_url)?
        } else {
            parse_base(&self.ws_base_url)?
        };
        Ok(ClientSettings {
            api_base_url,
            ws_base_url,
            http: HttpSettings {
                connect_timeout,
                request_timeout,
                retry_delay,
                retries: self.http_retries,
            },
            reconnect: ReconnectPolicy {
                delay: reconnect_delay,
                max_attempts: (self.reconnect_max_attempts > 0)
                    .then_some(self.reconnect_max_attempts),
            },
        })
    }
}

/// Zero delays or timeouts would turn retries into a busy loop.
fn positive(field: &'static str, value_ms: u64) -> Result<Duration, SettingsError> {
    if value_ms == 0 {
        return Err(SettingsError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(value_ms))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parses a base URL and makes sure relative joins keep its last path segment.
fn parse_base(value: &str) -> Result<Url, SettingsError> {
    let mut url = Url::parse(value.trim()).map_err(|err| SettingsError::InvalidUrl {
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(SettingsError::InvalidUrl {
            value: value.to_string(),
            reason: "not a base url".to_string(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn derive_ws_base(api_base_url: &Url) -> Result<Url, SettingsError> {
    let scheme = match api_base_url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SettingsError::InvalidUrl {
                value: api_base_url.to_string(),
                reason: format!("cannot derive a stream url from scheme {other:?}"),
            })
        }
    };
    let mut ws_base_url = api_base_url.clone();
    ws_base_url
        .set_scheme(scheme)
        .map_err(|()| SettingsError::InvalidUrl {
            value: api_base_url.to_string(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
    Ok(ws_base_url)
}
