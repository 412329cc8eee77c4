use std::sync::LazyLock;

use regex::Regex;

use super::Group;
use super::KeywordTable;
use super::ParsedCommand;

const ALL_LIGHTS_PHRASES: &[&str] = &[
    "tutte le luci",
    "tutte le luce",
    "tutte luci",
    "le luci",
    "la luce",
    "all lights",
    "all the lights",
    "the lights",
];

const LED_PHRASES: &[&str] = &[
    "tutti i led",
    "tutte le led",
    "luce led",
    "luci led",
    "le led",
    "i led",
    "led lights",
    "led light",
    "the led",
    "the leds",
    "all leds",
];

/// Words dropped from the front of an entity target.
const PARTICLES: &[&str] = &["la", "il", "lo", "luce", "luci"];

static LIGHTS_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(lights|luci)\b").expect("static pattern"));

static LED_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(led|leds)\b").expect("static pattern"));

#[derive(Debug, Clone, Default)]
pub struct CommandParser {
    keywords: KeywordTable,
    group_commands: bool,
}

impl CommandParser {
    pub fn new(keywords: KeywordTable, group_commands: bool) -> Self {
        Self {
            keywords,
            group_commands,
        }
    }

    pub fn with_group_commands(mut self, enabled: bool) -> Self {
        self.group_commands = enabled;
        self
    }

    pub fn group_commands(&self) -> bool {
        self.group_commands
    }

    /// Parse a transcript. Returns `None` when no keyword is present or
    /// nothing is left to act on after it.
    pub fn parse(&self, text: &str) -> Option<ParsedCommand> {
        let text = text.trim().to_lowercase();

        if self.group_commands {
            if let Some(command) = self.parse_group(&text) {
                tracing::debug!("Parsed '{}' as group command {:?}", text, command);
                return Some(command);
            }
        }

        let (keyword, action) = self.keywords.find(&text)?;
        let rest = text.split_once(keyword).map(|(_, rest)| rest)?;
        let target = strip_particles(rest);
        if target.is_empty() {
            tracing::debug!("Keyword '{}' without a target in '{}'", keyword, text);
            return None;
        }

        Some(ParsedCommand::entity(action, target))
    }

    fn parse_group(&self, text: &str) -> Option<ParsedCommand> {
        let group = if ALL_LIGHTS_PHRASES.iter().any(|p| text.contains(p))
            && self.keywords.contains_any(text)
        {
            Group::AllLights
        } else if LIGHTS_WORD.is_match(text)
            && !text.contains("led")
            && self.keywords.contains_any(text)
        {
            Group::AllLights
        } else if LED_PHRASES.iter().any(|p| text.contains(p)) && self.keywords.contains_any(text)
        {
            Group::LedLights
        } else if LED_WORD.is_match(text) && self.keywords.contains_any(text) {
            Group::LedLights
        } else {
            return None;
        };

        let (_, action) = self.keywords.find(text)?;
        Some(ParsedCommand::group(action, group))
    }
}

fn strip_particles(rest: &str) -> String {
    let mut words = rest.split_whitespace().peekable();
    while words.next_if(|w| PARTICLES.contains(w)).is_some() {}
    words.collect::<Vec<_>>().join(" ")
}
