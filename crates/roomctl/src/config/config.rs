use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::{
    format_diagnostics, Diagnostic, Error, FieldLocation, LoadError, ValidationError, Warning,
};
use super::partial::{
    PartialAgentConfig, PartialConfig, PartialDisplayConfig, PartialHubConfig,
    PartialScanConfig, PartialVoiceConfig,
};

/// Primary plus up to four failover instances.
pub const MAX_INSTANCES: usize = 5;

/// Shorter tokens are rejected before any request is made.
pub const MIN_TOKEN_LEN: usize = 50;

#[derive(Debug)]
pub struct Config {
    pub logging: LoggingConfig,
    pub hub: HubConfig,
    pub display: DisplayConfig,
    pub filters: FiltersConfig,
    pub scan: ScanConfig,
    pub voice: VoiceConfig,
    pub feedback: FeedbackConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{}", format_diagnostics(.0))]
    Invalid(Vec<Diagnostic>),
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    pub overrides: HashMap<String, LogLevel>,
}

/// A Home Assistant instance that passed validation.
#[derive(Clone)]
pub struct HubInstance {
    pub name: String,
    pub url: String,
    pub token: String,
}

impl std::fmt::Debug for HubInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubInstance")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct HubConfig {
    /// Usable instances in failover order; the first is the primary.
    pub instances: Vec<HubInstance>,
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub title: String,
    pub room_ttl: Duration,
    pub auto_hide: Duration,
    pub interaction_hide: Duration,
    pub cleanup: Duration,
    pub poll_interval: Duration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "roomctl".to_string(),
            room_ttl: Duration::from_secs(20),
            auto_hide: Duration::from_secs(20),
            interaction_hide: Duration::from_secs(10),
            cleanup: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FiltersConfig {
    /// Domains shown by the presenter and searched by the dispatcher.
    pub entity_domains: Vec<String>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            entity_domains: vec!["light".to_string(), "switch".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub mapping_file: PathBuf,
    pub window: Duration,
    pub idle: Duration,
    pub min_rssi: Option<i16>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mapping_file: PathBuf::from("ble_entity.json"),
            window: Duration::from_secs(5),
            idle: Duration::from_secs(5),
            min_rssi: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub enabled: bool,
    pub hotkey: String,
    pub entity_domains: Vec<String>,
    pub group_lights_control: bool,
    pub room_ttl: Duration,
    pub listen: Duration,
    pub scan_window: Duration,

    /// Command that records audio and prints the transcript on stdout.
    pub transcriber: Vec<String>,
    pub language: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hotkey: "ctrl+shift+i".to_string(),
            entity_domains: vec!["light".to_string()],
            group_lights_control: false,
            room_ttl: Duration::from_secs(30),
            listen: Duration::from_secs(5),
            scan_window: Duration::from_secs(3),
            transcriber: Vec::new(),
            language: "it-IT".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    pub sounds: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self { sounds: true }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen: String,
    pub port: u16,

    /// Advertised through `/v1/info` for the hotkey daemon to bind.
    pub show_hotkey: String,
    pub quit_hotkey: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1".to_string(),
            port: 8565,
            show_hotkey: "ctrl+shift+space".to_string(),
            quit_hotkey: "ctrl+shift+q".to_string(),
        }
    }
}

/// Collects validation diagnostics while converting partial sections.
struct Validator<'a> {
    partial: &'a PartialConfig,
    diagnostics: Vec<Diagnostic>,
}

impl Validator<'_> {
    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::Error(Error::Validation(
                ValidationError::new(path, message).at(self.partial.origin(path)),
            )));
    }

    fn warn(&mut self, warning: Warning) {
        self.diagnostics.push(Diagnostic::Warning(warning));
    }

    fn location(&self, path: &str) -> Option<FieldLocation> {
        self.partial.origin(path).cloned()
    }

    /// A positive number of seconds, or the default when unset.
    fn secs(&mut self, path: &str, value: Option<&toml::Spanned<u64>>, default: Duration) -> Duration {
        match value.map(|v| *v.get_ref()) {
            None => default,
            Some(0) => {
                self.error(path, "must be greater than zero");
                default
            }
            Some(secs) => Duration::from_secs(secs),
        }
    }

    fn domains(
        &mut self,
        path: &str,
        value: Option<&toml::Spanned<Vec<String>>>,
        default: Vec<String>,
    ) -> Vec<String> {
        let Some(value) = value else {
            return default;
        };

        let domains: Vec<String> = value
            .get_ref()
            .iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        if domains.is_empty() {
            self.error(path, "at least one entity domain is required");
            return default;
        }
        domains
    }

    fn hub(&mut self, partial: Option<&PartialHubConfig>) -> HubConfig {
        let Some(partial) = partial.filter(|h| !h.instances.is_empty()) else {
            self.error(
                "hub.instances",
                "at least one Home Assistant instance must be configured",
            );
            return HubConfig::default();
        };

        let order: Vec<String> = match &partial.order {
            Some(order) => order.get_ref().clone(),
            None if partial.instances.len() == 1 => partial.instances.keys().cloned().collect(),
            None => {
                self.error(
                    "hub.order",
                    "required when more than one instance is configured",
                );
                return HubConfig::default();
            }
        };

        if order.is_empty() {
            self.error("hub.order", "must name at least one instance");
            return HubConfig::default();
        }
        if order.len() > MAX_INSTANCES {
            self.error(
                "hub.order",
                format!("at most {} instances are supported", MAX_INSTANCES),
            );
        }

        let mut seen = HashSet::new();
        for name in &order {
            if !seen.insert(name.as_str()) {
                self.error("hub.order", format!("instance '{}' is listed twice", name));
            } else if !partial.instances.contains_key(name) {
                self.error("hub.order", format!("unknown instance '{}'", name));
            }
        }

        let mut unlisted: Vec<&String> = partial
            .instances
            .keys()
            .filter(|name| !seen.contains(name.as_str()))
            .collect();
        unlisted.sort();
        for name in unlisted {
            let location = self
                .location(&format!("hub.instances.{}.url", name))
                .or_else(|| self.location(&format!("hub.instances.{}.token", name)));
            self.warn(Warning::UnlistedInstance {
                name: name.clone(),
                location,
            });
        }

        let mut instances = Vec::new();
        let mut listed = HashSet::new();
        for (index, name) in order.iter().take(MAX_INSTANCES).enumerate() {
            if !listed.insert(name.as_str()) {
                continue;
            }
            let Some(instance) = partial.instances.get(name) else {
                continue;
            };

            let url = instance.url.as_ref().map(|u| u.get_ref().trim().to_string());
            let token = instance.token.as_ref().map(|t| t.get_ref().trim().to_string());
            let (field, problem) = match (&url, &token) {
                (None, _) => ("url", "url is missing".to_string()),
                (Some(url), _) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    ("url", "url must start with http:// or https://".to_string())
                }
                (_, None) => ("token", "token is missing".to_string()),
                (_, Some(token)) if token.len() < MIN_TOKEN_LEN => (
                    "token",
                    format!("token must be at least {} characters", MIN_TOKEN_LEN),
                ),
                (Some(url), Some(token)) => {
                    instances.push(HubInstance {
                        name: name.clone(),
                        url: url.clone(),
                        token: token.clone(),
                    });
                    continue;
                }
            };

            let path = format!("hub.instances.{}.{}", name, field);
            if index == 0 {
                self.error(&path, problem);
            } else {
                let location = self.location(&path);
                self.warn(Warning::SkippedInstance {
                    name: name.clone(),
                    reason: problem,
                    location,
                });
            }
        }

        HubConfig { instances }
    }

    fn display(&mut self, partial: Option<&PartialDisplayConfig>) -> DisplayConfig {
        let defaults = DisplayConfig::default();
        let Some(p) = partial else {
            return defaults;
        };

        DisplayConfig {
            title: p
                .title
                .as_ref()
                .map(|t| t.get_ref().clone())
                .unwrap_or(defaults.title),
            room_ttl: self.secs("display.room_ttl_secs", p.room_ttl_secs.as_ref(), defaults.room_ttl),
            auto_hide: self.secs(
                "display.auto_hide_secs",
                p.auto_hide_secs.as_ref(),
                defaults.auto_hide,
            ),
            interaction_hide: self.secs(
                "display.interaction_hide_secs",
                p.interaction_hide_secs.as_ref(),
                defaults.interaction_hide,
            ),
            cleanup: self.secs("display.cleanup_secs", p.cleanup_secs.as_ref(), defaults.cleanup),
            poll_interval: self.secs(
                "display.poll_interval_secs",
                p.poll_interval_secs.as_ref(),
                defaults.poll_interval,
            ),
        }
    }

    fn scan(&mut self, partial: Option<&PartialScanConfig>) -> ScanConfig {
        let defaults = ScanConfig::default();
        let Some(p) = partial else {
            return defaults;
        };

        ScanConfig {
            mapping_file: p
                .mapping_file
                .as_ref()
                .map(|m| PathBuf::from(m.get_ref()))
                .unwrap_or(defaults.mapping_file),
            window: self.secs("scan.window_secs", p.window_secs.as_ref(), defaults.window),
            idle: self.secs("scan.idle_secs", p.idle_secs.as_ref(), defaults.idle),
            min_rssi: p.min_rssi.as_ref().map(|r| *r.get_ref()),
        }
    }

    fn voice(&mut self, partial: Option<&PartialVoiceConfig>) -> VoiceConfig {
        let defaults = VoiceConfig::default();
        let Some(p) = partial else {
            return defaults;
        };

        let config = VoiceConfig {
            enabled: p.enabled.as_ref().map(|e| *e.get_ref()).unwrap_or(defaults.enabled),
            hotkey: p
                .hotkey
                .as_ref()
                .map(|h| h.get_ref().clone())
                .unwrap_or(defaults.hotkey),
            entity_domains: self.domains(
                "voice.entity_domains",
                p.entity_domains.as_ref(),
                defaults.entity_domains,
            ),
            group_lights_control: p
                .group_lights_control
                .as_ref()
                .map(|g| *g.get_ref())
                .unwrap_or(defaults.group_lights_control),
            room_ttl: self.secs("voice.room_ttl_secs", p.room_ttl_secs.as_ref(), defaults.room_ttl),
            listen: self.secs("voice.listen_secs", p.listen_secs.as_ref(), defaults.listen),
            scan_window: self.secs(
                "voice.scan_window_secs",
                p.scan_window_secs.as_ref(),
                defaults.scan_window,
            ),
            transcriber: p
                .transcriber
                .as_ref()
                .map(|t| t.get_ref().clone())
                .unwrap_or(defaults.transcriber),
            language: p
                .language
                .as_ref()
                .map(|l| l.get_ref().clone())
                .unwrap_or(defaults.language),
        };

        if config.enabled && config.transcriber.first().is_none_or(|c| c.trim().is_empty()) {
            let path = if p.transcriber.is_some() {
                "voice.transcriber"
            } else {
                "voice.enabled"
            };
            self.error(path, "voice input needs a transcriber command");
        }

        config
    }

    fn agent(&mut self, partial: Option<&PartialAgentConfig>) -> AgentConfig {
        let defaults = AgentConfig::default();
        let Some(p) = partial else {
            return defaults;
        };

        let port = match p.port.as_ref().map(|port| *port.get_ref()) {
            Some(0) => {
                self.error("agent.port", "must be greater than zero");
                defaults.port
            }
            Some(port) => port,
            None => defaults.port,
        };

        AgentConfig {
            listen: p
                .listen
                .as_ref()
                .map(|l| l.get_ref().clone())
                .unwrap_or(defaults.listen),
            port,
            show_hotkey: p
                .show_hotkey
                .as_ref()
                .map(|h| h.get_ref().clone())
                .unwrap_or(defaults.show_hotkey),
            quit_hotkey: p
                .quit_hotkey
                .as_ref()
                .map(|h| h.get_ref().clone())
                .unwrap_or(defaults.quit_hotkey),
        }
    }
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Supports multiple config files (e.g. base + secrets), import
    /// statements within config files, conflict detection across all sources,
    /// and validation with all errors and warnings reported together.
    ///
    /// Returns the config with any warnings. Errors are returned together as
    /// [`ConfigError::Invalid`].
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let configs = PartialConfig::load_with_imports(paths)?;

        // Merge with first-wins semantics, collecting diagnostics
        let (partial, diagnostics) = PartialConfig::merge(configs);

        Self::from_partial(partial, diagnostics)
    }

    /// Convert a merged PartialConfig to a Config, validating all fields
    ///
    /// Takes diagnostics from the merge step and adds validation diagnostics.
    pub fn from_partial(
        partial: PartialConfig,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let mut validator = Validator {
            partial: &partial,
            diagnostics,
        };

        let logging = if let Some(partial_logging) = &partial.logging {
            LoggingConfig {
                level: partial_logging
                    .level
                    .as_ref()
                    .map(|s| *s.get_ref())
                    .unwrap_or_default(),
                overrides: partial_logging
                    .overrides
                    .as_ref()
                    .map(|hm| hm.iter().map(|(k, v)| (k.clone(), *v.get_ref())).collect())
                    .unwrap_or_default(),
            }
        } else {
            LoggingConfig::default()
        };

        let hub = validator.hub(partial.hub.as_ref());
        let display = validator.display(partial.display.as_ref());
        let filters = FiltersConfig {
            entity_domains: validator.domains(
                "filters.entity_domains",
                partial.filters.as_ref().and_then(|f| f.entity_domains.as_ref()),
                FiltersConfig::default().entity_domains,
            ),
        };
        let scan = validator.scan(partial.scan.as_ref());
        let voice = validator.voice(partial.voice.as_ref());
        let feedback = FeedbackConfig {
            sounds: partial
                .feedback
                .as_ref()
                .and_then(|f| f.sounds.as_ref())
                .map(|s| *s.get_ref())
                .unwrap_or(true),
        };
        let agent = validator.agent(partial.agent.as_ref());

        let diagnostics = validator.diagnostics;
        if diagnostics.iter().any(|d| d.is_error()) {
            return Err(ConfigError::Invalid(diagnostics));
        }

        Ok((
            Config {
                logging,
                hub,
                display,
                filters,
                scan,
                voice,
                feedback,
                agent,
            },
            diagnostics,
        ))
    }
}
