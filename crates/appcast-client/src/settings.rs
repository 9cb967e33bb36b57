//! Client configuration.
//!
//! Two layers, in priority order:
//! 1. **Compiled defaults** — [`ClientSettings::default()`]
//! 2. **Environment variables** — `APPCAST_*` overrides (highest priority)
//!
//! Settings only shape how connections are opened (endpoints, timeouts,
//! keepalive probing); nothing in the engine contract depends on them.

use std::time::Duration;

use tracing::warn;

/// Endpoint and timing configuration for the WebSocket transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSettings {
    /// App-level start endpoint; the registered app name is appended as a
    /// path segment when one is used.
    pub url_start: String,
    /// Public base under which viewer-facing app URLs live.
    pub url_apps: String,
    /// Recovery endpoint; the recovery key is appended as a path segment.
    pub url_recover: String,
    /// Connect timeout per attempt.
    pub timeout: Duration,
    /// Idle time on a connection before a keepalive probe is sent.
    pub keepalive_ping_interval: Duration,
    /// Time allowed for any frame to arrive after a keepalive probe.
    pub keepalive_ping_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url_start: "wss://appcast.app/api/v1/streams/apps/start".into(),
            url_apps: "https://appcast.app/apps".into(),
            url_recover: "wss://appcast.app/api/v1/streams/apps/recover".into(),
            timeout: Duration::from_secs(30),
            keepalive_ping_interval: Duration::from_secs(20),
            keepalive_ping_timeout: Duration::from_secs(20),
        }
    }
}

impl ClientSettings {
    /// Defaults with `APPCAST_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    /// The app-level connect target, optionally scoped to a registered
    /// app name.
    pub fn start_url(&self, app_name: Option<&str>) -> String {
        match app_name {
            Some(name) => format!("{}/{name}", self.url_start),
            None => self.url_start.clone(),
        }
    }

    /// The recovery connect target for `key`.
    pub fn recovery_url(&self, key: &str) -> String {
        format!("{}/{key}", self.url_recover)
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("APPCAST_URL_START") {
            self.url_start = url;
        }
        if let Some(url) = get("APPCAST_URL_APPS") {
            self.url_apps = url;
        }
        if let Some(url) = get("APPCAST_URL_RECOVER") {
            self.url_recover = url;
        }
        override_secs(&mut self.timeout, "APPCAST_TIMEOUT", &get);
        override_secs(
            &mut self.keepalive_ping_interval,
            "APPCAST_KEEPALIVE_PING_INTERVAL",
            &get,
        );
        override_secs(
            &mut self.keepalive_ping_timeout,
            "APPCAST_KEEPALIVE_PING_TIMEOUT",
            &get,
        );
    }
}

fn override_secs(slot: &mut Duration, key: &str, get: &impl Fn(&str) -> Option<String>) {
    if let Some(raw) = get(key) {
        match raw.parse::<u64>() {
            Ok(secs) => *slot = Duration::from_secs(secs),
            Err(_) => warn!(key, value = %raw, "ignoring unparsable duration override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overridden(vars: &[(&str, &str)]) -> ClientSettings {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        let mut settings = ClientSettings::default();
        settings.apply_overrides(|key| map.get(key).map(ToString::to_string));
        settings
    }

    #[test]
    fn defaults_without_overrides() {
        let settings = overridden(&[]);
        assert_eq!(settings, ClientSettings::default());
    }

    #[test]
    fn env_overrides_take_priority() {
        let settings = overridden(&[
            ("APPCAST_URL_START", "wss://staging.appcast.app/start"),
            ("APPCAST_TIMEOUT", "5"),
        ]);
        assert_eq!(settings.url_start, "wss://staging.appcast.app/start");
        assert_eq!(settings.timeout, Duration::from_secs(5));
        // Untouched keys keep their defaults.
        assert_eq!(settings.url_apps, ClientSettings::default().url_apps);
    }

    #[test]
    fn unparsable_duration_is_ignored() {
        let settings = overridden(&[("APPCAST_KEEPALIVE_PING_INTERVAL", "soon")]);
        assert_eq!(
            settings.keepalive_ping_interval,
            ClientSettings::default().keepalive_ping_interval
        );
    }

    #[test]
    fn start_url_appends_app_name() {
        let settings = ClientSettings::default();
        assert_eq!(settings.start_url(None), settings.url_start);
        assert_eq!(
            settings.start_url(Some("my-app")),
            format!("{}/my-app", settings.url_start)
        );
    }

    #[test]
    fn recovery_url_appends_key() {
        let settings = ClientSettings::default();
        assert_eq!(
            settings.recovery_url("rk-42"),
            format!("{}/rk-42", settings.url_recover)
        );
    }
}
