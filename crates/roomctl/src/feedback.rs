//! Audible cues for the voice path, rendered as terminal bells.

use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Capture started.
    Listening,
    Success,
    Failure,
}

impl Cue {
    fn bells(self) -> usize {
        match self {
            Cue::Listening | Cue::Success => 1,
            Cue::Failure => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Feedback {
    enabled: bool,
}

impl Feedback {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn play(&self, cue: Cue) {
        if !self.enabled {
            return;
        }

        let mut stderr = std::io::stderr().lock();
        if let Err(e) = stderr
            .write_all("\x07".repeat(cue.bells()).as_bytes())
            .and_then(|_| stderr.flush())
        {
            tracing::debug!("Failed to play {:?} cue: {}", cue, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_is_distinct() {
        assert_eq!(Cue::Success.bells(), 1);
        assert_eq!(Cue::Failure.bells(), 2);
    }
}
