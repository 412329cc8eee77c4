use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::VoiceError;

/// Extra time given to the transcriber beyond the capture itself.
pub const TRANSCRIBE_GRACE: Duration = Duration::from_secs(15);

/// Speech-to-text over a fixed-length capture.
///
/// This trait allows for mocking the microphone for testing purposes
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Record for `duration` and return the recognized text.
    async fn transcribe(&self, duration: Duration, language: &str) -> Result<String, VoiceError>;
}

/// Runs an external command that records audio and prints the transcript.
///
/// `{duration}` (whole seconds) and `{language}` in any argument are replaced
/// before the command starts.
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    argv: Vec<String>,
}

impl CommandTranscriber {
    pub fn new(argv: Vec<String>) -> Result<Self, VoiceError> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(VoiceError::NotConfigured);
        }
        Ok(Self { argv })
    }

    fn command_line(&self, duration: Duration, language: &str) -> Vec<String> {
        let secs = duration.as_secs().max(1).to_string();
        self.argv
            .iter()
            .map(|arg| arg.replace("{duration}", &secs).replace("{language}", language))
            .collect()
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, duration: Duration, language: &str) -> Result<String, VoiceError> {
        let argv = self.command_line(duration, language);
        let (program, args) = argv.split_first().ok_or(VoiceError::NotConfigured)?;

        tracing::debug!("Running transcriber {:?}", argv);
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Spawn(program.clone(), e))?;

        let output = tokio::time::timeout(duration + TRANSCRIBE_GRACE, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout(duration + TRANSCRIBE_GRACE))?
            .map_err(|e| VoiceError::Spawn(program.clone(), e))?;

        if !output.status.success() {
            return Err(VoiceError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(VoiceError::Unintelligible);
        }
        Ok(text)
    }
}

/// Mock transcriber for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockTranscriber {
    results: std::sync::Mutex<std::collections::VecDeque<Result<String, VoiceError>>>,
}

#[cfg(test)]
impl MockTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hears(self, text: &str) -> Self {
        self.results.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fails(self, error: VoiceError) -> Self {
        self.results.lock().unwrap().push_back(Err(error));
        self
    }
}

#[cfg(test)]
#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _duration: Duration, _language: &str) -> Result<String, VoiceError> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(VoiceError::Unintelligible))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_placeholders_substituted() {
        let transcriber =
            CommandTranscriber::new(argv(&["stt", "--seconds={duration}", "--lang", "{language}"]))
                .unwrap();
        assert_eq!(
            transcriber.command_line(Duration::from_secs(5), "it-IT"),
            argv(&["stt", "--seconds=5", "--lang", "it-IT"])
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            CommandTranscriber::new(Vec::new()),
            Err(VoiceError::NotConfigured)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_the_transcript() {
        let transcriber = CommandTranscriber::new(argv(&["echo", "  accendi la luce  "])).unwrap();
        let text = transcriber
            .transcribe(Duration::from_secs(1), "it-IT")
            .await
            .unwrap();
        assert_eq!(text, "accendi la luce");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silence_is_unintelligible() {
        let transcriber = CommandTranscriber::new(argv(&["true"])).unwrap();
        let err = transcriber
            .transcribe(Duration::from_secs(1), "it-IT")
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Unintelligible));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command() {
        let transcriber = CommandTranscriber::new(argv(&["false"])).unwrap();
        let err = transcriber
            .transcribe(Duration::from_secs(1), "it-IT")
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let transcriber =
            CommandTranscriber::new(argv(&["/nonexistent/roomctl-transcriber"])).unwrap();
        let err = transcriber
            .transcribe(Duration::from_secs(1), "it-IT")
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Spawn(..)));
    }
}
