use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use toml::Spanned;

use super::diagnostics::{
    Diagnostic, Error, FieldLocation, LoadError, MergeError, SourceInfo, Warning,
};
use super::LogLevel;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub hub: Option<PartialHubConfig>,
    pub display: Option<PartialDisplayConfig>,
    pub filters: Option<PartialFiltersConfig>,
    pub scan: Option<PartialScanConfig>,
    pub voice: Option<PartialVoiceConfig>,
    pub feedback: Option<PartialFeedbackConfig>,
    pub agent: Option<PartialAgentConfig>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,

    /// Where each merged field was defined, keyed by dotted field path.
    /// Only populated on the result of [`PartialConfig::merge`].
    #[serde(skip)]
    pub origins: HashMap<String, FieldLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialHubConfig {
    pub order: Option<Spanned<Vec<String>>>,
    #[serde(default)]
    pub instances: HashMap<String, PartialHubInstance>,
}

#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialHubInstance {
    pub url: Option<Spanned<String>>,
    pub token: Option<Spanned<String>>,
}

impl std::fmt::Debug for PartialHubInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialHubInstance")
            .field("url", &self.url.as_ref().map(|u| u.get_ref()))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialDisplayConfig {
    pub title: Option<Spanned<String>>,
    pub room_ttl_secs: Option<Spanned<u64>>,
    pub auto_hide_secs: Option<Spanned<u64>>,
    pub interaction_hide_secs: Option<Spanned<u64>>,
    pub cleanup_secs: Option<Spanned<u64>>,
    pub poll_interval_secs: Option<Spanned<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialFiltersConfig {
    pub entity_domains: Option<Spanned<Vec<String>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialScanConfig {
    pub mapping_file: Option<Spanned<String>>,
    pub window_secs: Option<Spanned<u64>>,
    pub idle_secs: Option<Spanned<u64>>,
    pub min_rssi: Option<Spanned<i16>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialVoiceConfig {
    pub enabled: Option<Spanned<bool>>,
    pub hotkey: Option<Spanned<String>>,
    pub entity_domains: Option<Spanned<Vec<String>>>,
    pub group_lights_control: Option<Spanned<bool>>,
    pub room_ttl_secs: Option<Spanned<u64>>,
    pub listen_secs: Option<Spanned<u64>>,
    pub scan_window_secs: Option<Spanned<u64>>,
    pub transcriber: Option<Spanned<Vec<String>>>,
    pub language: Option<Spanned<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialFeedbackConfig {
    pub sounds: Option<Spanned<bool>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialAgentConfig {
    pub listen: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
    pub show_hotkey: Option<Spanned<String>>,
    pub quit_hotkey: Option<Spanned<String>>,
}

/// First-wins bookkeeping shared by every section merge.
struct Merger {
    origins: HashMap<String, FieldLocation>,
    diagnostics: Vec<Diagnostic>,
}

impl Merger {
    fn field<T>(
        &mut self,
        source: &SourceInfo,
        path: String,
        slot: &mut Option<Spanned<T>>,
        incoming: Option<Spanned<T>>,
    ) {
        let Some(incoming) = incoming else {
            return;
        };

        let location = FieldLocation::new(source, incoming.span());
        if let Some(prev) = self.origins.get(&path) {
            // Conflict: keep first value, record error
            self.diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                message: format!("'{}' defined in multiple config files", path),
                field_path: path,
                conflicts: vec![prev.clone(), location],
            })));
        } else {
            *slot = Some(incoming);
            self.origins.insert(path, location);
        }
    }

    fn logging(
        &mut self,
        source: &SourceInfo,
        result: &mut PartialLoggingConfig,
        logging: PartialLoggingConfig,
    ) {
        self.field(source, "logging.level".into(), &mut result.level, logging.level);

        if let Some(overrides) = logging.overrides {
            let result_overrides = result.overrides.get_or_insert_with(HashMap::new);
            for (key, value) in overrides {
                let mut slot = result_overrides.remove(&key);
                self.field(
                    source,
                    format!("logging.overrides.{}", key),
                    &mut slot,
                    Some(value),
                );
                if let Some(slot) = slot {
                    result_overrides.insert(key, slot);
                }
            }
        }
    }

    fn hub(&mut self, source: &SourceInfo, result: &mut PartialHubConfig, hub: PartialHubConfig) {
        self.field(source, "hub.order".into(), &mut result.order, hub.order);

        for (name, instance) in hub.instances {
            let result_instance = result.instances.entry(name.clone()).or_default();
            self.field(
                source,
                format!("hub.instances.{}.url", name),
                &mut result_instance.url,
                instance.url,
            );
            self.field(
                source,
                format!("hub.instances.{}.token", name),
                &mut result_instance.token,
                instance.token,
            );
        }
    }

    fn display(
        &mut self,
        source: &SourceInfo,
        result: &mut PartialDisplayConfig,
        display: PartialDisplayConfig,
    ) {
        self.field(source, "display.title".into(), &mut result.title, display.title);
        self.field(
            source,
            "display.room_ttl_secs".into(),
            &mut result.room_ttl_secs,
            display.room_ttl_secs,
        );
        self.field(
            source,
            "display.auto_hide_secs".into(),
            &mut result.auto_hide_secs,
            display.auto_hide_secs,
        );
        self.field(
            source,
            "display.interaction_hide_secs".into(),
            &mut result.interaction_hide_secs,
            display.interaction_hide_secs,
        );
        self.field(
            source,
            "display.cleanup_secs".into(),
            &mut result.cleanup_secs,
            display.cleanup_secs,
        );
        self.field(
            source,
            "display.poll_interval_secs".into(),
            &mut result.poll_interval_secs,
            display.poll_interval_secs,
        );
    }

    fn scan(&mut self, source: &SourceInfo, result: &mut PartialScanConfig, scan: PartialScanConfig) {
        self.field(
            source,
            "scan.mapping_file".into(),
            &mut result.mapping_file,
            scan.mapping_file,
        );
        self.field(source, "scan.window_secs".into(), &mut result.window_secs, scan.window_secs);
        self.field(source, "scan.idle_secs".into(), &mut result.idle_secs, scan.idle_secs);
        self.field(source, "scan.min_rssi".into(), &mut result.min_rssi, scan.min_rssi);
    }

    fn voice(
        &mut self,
        source: &SourceInfo,
        result: &mut PartialVoiceConfig,
        voice: PartialVoiceConfig,
    ) {
        self.field(source, "voice.enabled".into(), &mut result.enabled, voice.enabled);
        self.field(source, "voice.hotkey".into(), &mut result.hotkey, voice.hotkey);
        self.field(
            source,
            "voice.entity_domains".into(),
            &mut result.entity_domains,
            voice.entity_domains,
        );
        self.field(
            source,
            "voice.group_lights_control".into(),
            &mut result.group_lights_control,
            voice.group_lights_control,
        );
        self.field(
            source,
            "voice.room_ttl_secs".into(),
            &mut result.room_ttl_secs,
            voice.room_ttl_secs,
        );
        self.field(source, "voice.listen_secs".into(), &mut result.listen_secs, voice.listen_secs);
        self.field(
            source,
            "voice.scan_window_secs".into(),
            &mut result.scan_window_secs,
            voice.scan_window_secs,
        );
        self.field(
            source,
            "voice.transcriber".into(),
            &mut result.transcriber,
            voice.transcriber,
        );
        self.field(source, "voice.language".into(), &mut result.language, voice.language);
    }

    fn agent(
        &mut self,
        source: &SourceInfo,
        result: &mut PartialAgentConfig,
        agent: PartialAgentConfig,
    ) {
        self.field(source, "agent.listen".into(), &mut result.listen, agent.listen);
        self.field(source, "agent.port".into(), &mut result.port, agent.port);
        self.field(
            source,
            "agent.show_hotkey".into(),
            &mut result.show_hotkey,
            agent.show_hotkey,
        );
        self.field(
            source,
            "agent.quit_hotkey".into(),
            &mut result.quit_hotkey,
            agent.quit_hotkey,
        );
    }
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Each config file is loaded, then its imports are recursively processed.
    /// Cycle detection prevents infinite loops.
    ///
    /// Returns a Vec of all loaded configs in order (imports first, then parent)
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    /// Recursively load a config file and its imports
    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        // Canonicalize the path to detect cycles reliably
        let canonical_path = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path.clone(),
                cycle: visited.iter().cloned().collect(),
            });
        }

        visited.insert(canonical_path.clone());

        let config = Self::from_file(path)?;

        // Process imports first (depth-first)
        for import_path in &config.imports {
            let import_path_buf = PathBuf::from(import_path);

            // Resolve relative imports from the parent file's directory
            let resolved_path = if import_path_buf.is_absolute() {
                import_path_buf
            } else {
                let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
                parent_dir.join(import_path_buf)
            };

            Self::load_recursive(&resolved_path, visited, configs)?;
        }

        configs.push(config);

        // Remove from visited set to allow imports from sibling branches
        visited.remove(&canonical_path);

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.hub.is_none()
            && self.display.is_none()
            && self.filters.is_none()
            && self.scan.is_none()
            && self.voice.is_none()
            && self.feedback.is_none()
            && self.agent.is_none()
            && self.imports.is_empty()
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics: the first occurrence of a field is kept.
    /// Conflicts (same field defined in multiple configs) are collected as errors
    /// but merging continues to find all conflicts at once.
    ///
    /// Merging is per field, so one file may define an instance's `url` and
    /// another its `token`.
    ///
    /// Returns (merged, diagnostics) where diagnostics may contain warnings and errors
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut imports = Vec::new();
        let mut merger = Merger {
            origins: HashMap::new(),
            diagnostics: Vec::new(),
        };

        for config in configs {
            imports.extend(config.imports.iter().cloned());

            let source = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            if config.is_empty() {
                merger
                    .diagnostics
                    .push(Diagnostic::Warning(Warning::EmptyConfig {
                        file_path: source.file_path.clone(),
                    }));
            }

            if let Some(logging) = config.logging {
                let slot = result.logging.get_or_insert_with(Default::default);
                merger.logging(&source, slot, logging);
            }
            if let Some(hub) = config.hub {
                let slot = result.hub.get_or_insert_with(Default::default);
                merger.hub(&source, slot, hub);
            }
            if let Some(display) = config.display {
                let slot = result.display.get_or_insert_with(Default::default);
                merger.display(&source, slot, display);
            }
            if let Some(filters) = config.filters {
                let slot = result.filters.get_or_insert_with(Default::default);
                merger.field(
                    &source,
                    "filters.entity_domains".into(),
                    &mut slot.entity_domains,
                    filters.entity_domains,
                );
            }
            if let Some(scan) = config.scan {
                let slot = result.scan.get_or_insert_with(Default::default);
                merger.scan(&source, slot, scan);
            }
            if let Some(voice) = config.voice {
                let slot = result.voice.get_or_insert_with(Default::default);
                merger.voice(&source, slot, voice);
            }
            if let Some(feedback) = config.feedback {
                let slot = result.feedback.get_or_insert_with(Default::default);
                merger.field(&source, "feedback.sounds".into(), &mut slot.sounds, feedback.sounds);
            }
            if let Some(agent) = config.agent {
                let slot = result.agent.get_or_insert_with(Default::default);
                merger.agent(&source, slot, agent);
            }
        }

        result.imports = imports;
        result.origins = merger.origins;

        (result, merger.diagnostics)
    }

    pub fn origin(&self, path: &str) -> Option<&FieldLocation> {
        self.origins.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str, content: &str) -> PartialConfig {
        let mut config: PartialConfig = toml::from_str(content).unwrap();
        config.source = Some(SourceInfo {
            file_path: PathBuf::from(name),
            content: content.to_string(),
        });
        config
    }

    #[test]
    fn test_instance_fields_merge_across_files() {
        let base = parse(
            "base.toml",
            "[hub.instances.home]\nurl = \"http://ha.local:8123\"\n",
        );
        let secrets = parse("secrets.toml", "[hub.instances.home]\ntoken = \"abc\"\n");

        let (merged, diagnostics) = PartialConfig::merge([base, secrets]);
        assert!(diagnostics.is_empty());

        let home = &merged.hub.as_ref().unwrap().instances["home"];
        assert_eq!(home.url.as_ref().unwrap().get_ref(), "http://ha.local:8123");
        assert_eq!(home.token.as_ref().unwrap().get_ref(), "abc");

        let origin = merged.origin("hub.instances.home.token").unwrap();
        assert_eq!(origin.file_path, PathBuf::from("secrets.toml"));
        assert_eq!(&origin.content[origin.span.clone()], "\"abc\"");
    }

    #[test]
    fn test_first_definition_wins() {
        let a = parse("a.toml", "[display]\ntitle = \"first\"\n");
        let b = parse("b.toml", "[display]\ntitle = \"second\"\n");

        let (merged, diagnostics) = PartialConfig::merge([a, b]);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_error());
        assert_eq!(
            merged.display.unwrap().title.unwrap().into_inner(),
            "first"
        );
    }

    #[test]
    fn test_token_redacted_in_debug() {
        let config = parse("a.toml", "[hub.instances.home]\ntoken = \"supersecret\"\n");
        let debug = format!("{:?}", config.hub.unwrap().instances["home"]);
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<PartialConfig>("[display]\ntitel = \"x\"\n").is_err());
    }
}
