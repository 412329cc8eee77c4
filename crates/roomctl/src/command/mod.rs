//! Voice command grammar.
//!
//! A transcript is reduced to an [`Action`] and a [`Target`]. The target is
//! either a fragment of a device name, resolved later against the room's
//! devices, or one of the light [`Group`]s.

mod parser;


use serde::Serialize;
use strum::AsRefStr;
use strum::Display;
use strum::EnumString;

pub use parser::CommandParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Action {
    TurnOn,
    TurnOff,
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Group {
    /// Every light in the room whose name does not mention "led".
    AllLights,

    /// Every light in the room whose name mentions "led".
    LedLights,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Lowercased fragment of a display name or device ID.
    Entity(String),
    Group(Group),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Entity(name) => write!(f, "'{}'", name),
            Target::Group(group) => write!(f, "<{}>", group),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedCommand {
    pub action: Action,
    pub target: Target,
}

impl ParsedCommand {
    pub fn entity(action: Action, name: impl Into<String>) -> Self {
        Self {
            action,
            target: Target::Entity(name.into()),
        }
    }

    pub fn group(action: Action, group: Group) -> Self {
        Self {
            action,
            target: Target::Group(group),
        }
    }
}

/// Ordered keyword to action table.
///
/// Lookup returns the first entry found anywhere in the text, so a keyword
/// that contains another one ("disattiva" contains "attiva") has to come
/// before it.
#[derive(Debug, Clone)]
pub struct KeywordTable {
    entries: Vec<(String, Action)>,
}

impl KeywordTable {
    pub fn new<K: Into<String>>(entries: impl IntoIterator<Item = (K, Action)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, a)| (k.into().to_lowercase(), a))
                .collect(),
        }
    }

    /// First keyword contained in `text`, with its action.
    pub fn find(&self, text: &str) -> Option<(&str, Action)> {
        self.entries
            .iter()
            .find(|(keyword, _)| text.contains(keyword.as_str()))
            .map(|(keyword, action)| (keyword.as_str(), *action))
    }

    pub fn contains_any(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for KeywordTable {
    /// Italian and English phrasings.
    fn default() -> Self {
        Self::new([
            ("accendi", Action::TurnOn),
            ("accenda", Action::TurnOn),
            ("disattiva", Action::TurnOff),
            ("attiva", Action::TurnOn),
            ("spegni", Action::TurnOff),
            ("spegna", Action::TurnOff),
            ("apri", Action::Open),
            ("chiudi", Action::Close),
            ("turn on", Action::TurnOn),
            ("switch on", Action::TurnOn),
            ("turn off", Action::TurnOff),
            ("switch off", Action::TurnOff),
            ("open", Action::Open),
            ("close", Action::Close),
        ])
    }
}
