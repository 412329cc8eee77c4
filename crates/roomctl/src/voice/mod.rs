//! Voice command cycle.
//!
//! Locate the room (served from a dedicated cache for repeated commands),
//! capture and transcribe one phrase, parse it, and dispatch it against the
//! room's devices.

mod transcriber;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub use transcriber::CommandTranscriber;
#[cfg(test)]
pub use transcriber::MockTranscriber;
pub use transcriber::Transcriber;
pub use transcriber::TRANSCRIBE_GRACE;

use crate::command::CommandParser;
use crate::config::VoiceConfig;
use crate::dispatch::Dispatcher;
use crate::dispatch::Outcome;
use crate::feedback::Cue;
use crate::feedback::Feedback;
use crate::hub::Hub;
use crate::locator::RoomLocator;
use crate::room_cache::RoomCache;
use crate::room_cache::RoomLookup;

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("No transcriber command configured")]
    NotConfigured,

    #[error("Failed to run transcriber {0}: {1}")]
    Spawn(String, #[source] std::io::Error),

    #[error("Transcriber exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Transcriber did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Speech not recognized")]
    Unintelligible,
}

/// Result of one voice cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VoiceOutcome {
    /// Nothing usable was transcribed.
    NotUnderstood { reason: String },

    /// Text was heard but matched no command.
    InvalidCommand { transcript: String },

    Dispatched {
        transcript: String,
        outcome: Outcome,
    },
}

impl VoiceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VoiceOutcome::Dispatched { outcome, .. } if outcome.is_success())
    }
}

impl fmt::Display for VoiceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceOutcome::NotUnderstood { reason } => write!(f, "Voice: {}", reason),
            VoiceOutcome::InvalidCommand { transcript } => {
                write!(f, "Voice: invalid command '{}'", transcript)
            }
            VoiceOutcome::Dispatched {
                transcript,
                outcome,
            } => write!(f, "Voice: '{}' - {}", transcript, outcome),
        }
    }
}

pub struct VoiceAssistant {
    config: VoiceConfig,
    locator: RoomLocator,
    rooms: RoomCache,
    transcriber: Arc<dyn Transcriber>,
    parser: CommandParser,
    dispatcher: Dispatcher,
    feedback: Feedback,
}

impl VoiceAssistant {
    pub fn new(
        config: VoiceConfig,
        locator: RoomLocator,
        transcriber: Arc<dyn Transcriber>,
        feedback: Feedback,
    ) -> Self {
        Self {
            rooms: RoomCache::new(config.room_ttl),
            parser: CommandParser::default().with_group_commands(config.group_lights_control),
            dispatcher: Dispatcher::new(config.entity_domains.clone()),
            config,
            locator,
            transcriber,
            feedback,
        }
    }

    /// Drop the cached room, e.g. after switching hub instance.
    pub async fn invalidate_room(&self, reason: &str) {
        self.rooms.invalidate(reason).await;
    }

    /// Run one full cycle against `hub`.
    ///
    /// A failed room lookup does not abort the cycle: the phrase is still
    /// captured and the dispatcher reports that no room is known. Whatever
    /// the outcome, a cached room is re-stamped afterwards so back-to-back
    /// commands keep it alive.
    pub async fn run_cycle(&self, hub: &dyn Hub) -> VoiceOutcome {
        let outcome = self.cycle(hub).await;
        self.rooms.touch().await;
        outcome
    }

    async fn cycle(&self, hub: &dyn Hub) -> VoiceOutcome {
        let room = if self.locator.has_mapping() {
            let lookup = self
                .rooms
                .get_or_refresh(|| {
                    self.locator
                        .locate(hub, self.config.scan_window, &self.config.entity_domains)
                })
                .await;
            match lookup {
                Ok(lookup @ (RoomLookup::Cached(_) | RoomLookup::Refreshed(_))) => {
                    lookup.entry().cloned()
                }
                Ok(RoomLookup::NoRoom) => {
                    tracing::info!("No room detected for voice command");
                    None
                }
                Err(e) => {
                    tracing::warn!("Room detection failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        self.feedback.play(Cue::Listening);
        tracing::info!("Listening for {:?}", self.config.listen);

        let transcript = match self
            .transcriber
            .transcribe(self.config.listen, &self.config.language)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Transcription failed: {}", e);
                self.feedback.play(Cue::Failure);
                return VoiceOutcome::NotUnderstood {
                    reason: e.to_string(),
                };
            }
        };
        tracing::info!("Heard '{}'", transcript);

        let Some(command) = self.parser.parse(&transcript) else {
            tracing::info!("No command in '{}'", transcript);
            self.feedback.play(Cue::Failure);
            return VoiceOutcome::InvalidCommand { transcript };
        };

        let outcome = self
            .dispatcher
            .execute(hub, room.as_deref(), &command)
            .await;
        tracing::info!("Voice command {:?}: {}", command, outcome);

        self.feedback.play(if outcome.is_success() {
            Cue::Success
        } else {
            Cue::Failure
        });

        VoiceOutcome::Dispatched {
            transcript,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::BeaconMapping;
    use crate::beacon::BeaconReading;
    use crate::beacon::MockScanner;
    use crate::beacon::RoomId;
    use crate::hub::Area;
    use crate::hub::Device;
    use crate::hub::MockHub;
    use macaddr::MacAddr6;

    fn kitchen() -> MacAddr6 {
        MacAddr6::new(0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01)
    }

    fn hub() -> MockHub {
        MockHub::new("http://mock")
            .with_devices(vec![
                Device::new("light.kitchen_main", "off").with_name("Kitchen Main"),
                Device::new("light.kitchen_led_strip", "off").with_name("LED Strip"),
                Device::new("light.hall", "off").with_name("Hall"),
            ])
            .with_area(
                Area::new("kitchen", "Kitchen"),
                &["light.kitchen_main", "light.kitchen_led_strip"],
            )
    }

    fn assistant(scanner: Arc<MockScanner>, transcriber: MockTranscriber) -> VoiceAssistant {
        let mapping = BeaconMapping::new([(kitchen(), RoomId::from("kitchen"))]);
        let config = VoiceConfig {
            enabled: true,
            group_lights_control: true,
            listen: Duration::ZERO,
            scan_window: Duration::ZERO,
            ..Default::default()
        };
        VoiceAssistant::new(
            config,
            RoomLocator::new(scanner, Arc::new(mapping), None),
            Arc::new(transcriber),
            Feedback::new(false),
        )
    }

    fn kitchen_scanner() -> Arc<MockScanner> {
        let scanner = Arc::new(MockScanner::new());
        scanner.push_cycle(vec![BeaconReading::new(kitchen(), -60)]);
        scanner
    }

    #[tokio::test]
    async fn test_group_command_in_detected_room() {
        let hub = hub();
        let voice = assistant(kitchen_scanner(), MockTranscriber::new().hears("Accendi le luci"));

        let outcome = voice.run_cycle(&hub).await;
        assert!(outcome.is_success(), "{}", outcome);
        assert_eq!(
            outcome,
            VoiceOutcome::Dispatched {
                transcript: "Accendi le luci".to_string(),
                outcome: Outcome::Executed {
                    succeeded: 1,
                    attempted: 1
                },
            }
        );

        let calls = hub.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "light.turn_on");
        assert_eq!(calls[0].1["entity_id"], "light.kitchen_main");
    }

    #[tokio::test]
    async fn test_room_served_from_cache() {
        let hub = hub();
        let scanner = kitchen_scanner();
        let voice = assistant(
            scanner.clone(),
            MockTranscriber::new()
                .hears("spegni i led")
                .hears("accendi kitchen main"),
        );

        assert!(voice.run_cycle(&hub).await.is_success());
        assert!(voice.run_cycle(&hub).await.is_success());
        assert_eq!(scanner.calls(), 1);

        voice.invalidate_room("test").await;
        // Next scan sees nothing, so the command has no room
        let outcome = voice.run_cycle(&hub).await;
        assert_eq!(scanner.calls(), 2);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_invalid_command() {
        let hub = hub();
        let voice = assistant(kitchen_scanner(), MockTranscriber::new().hears("che ore sono"));

        let outcome = voice.run_cycle(&hub).await;
        assert_eq!(
            outcome,
            VoiceOutcome::InvalidCommand {
                transcript: "che ore sono".to_string()
            }
        );
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transcription_failure_abandons_cycle() {
        let hub = hub();
        let voice = assistant(
            kitchen_scanner(),
            MockTranscriber::new().fails(VoiceError::Unintelligible),
        );

        let outcome = voice.run_cycle(&hub).await;
        assert!(matches!(outcome, VoiceOutcome::NotUnderstood { .. }));
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_room_fails_fast() {
        let hub = hub();
        let voice = assistant(
            Arc::new(MockScanner::new()),
            MockTranscriber::new().hears("turn off the lights"),
        );

        let outcome = voice.run_cycle(&hub).await;
        assert_eq!(
            outcome,
            VoiceOutcome::Dispatched {
                transcript: "turn off the lights".to_string(),
                outcome: Outcome::NoRoom,
            }
        );
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_restamps_room() {
        let hub = hub();
        let voice = assistant(
            kitchen_scanner(),
            MockTranscriber::new()
                .hears("accendi kitchen main")
                .hears("che ore sono"),
        );

        voice.run_cycle(&hub).await;
        let first = voice.rooms.current().await.unwrap().captured_at;

        tokio::time::sleep(Duration::from_millis(10)).await;
        // Not understood, but the room is still kept alive
        voice.run_cycle(&hub).await;
        let second = voice.rooms.current().await.unwrap().captured_at;

        assert!(second > first);
    }
}
