//! Conversation transcript

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptTurn {
    /// What the user said
    pub user: String,
    /// What the model said back
    pub model: String,
    pub completed_at: DateTime<Utc>,
}

/// Accumulates transcription fragments until the turn completes
#[derive(Debug, Default)]
pub struct Transcript {
    pending_user: String,
    pending_model: String,
    turns: Vec<TranscriptTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, text: &str) {
        self.pending_user.push_str(text);
    }

    pub fn push_output(&mut self, text: &str) {
        self.pending_model.push_str(text);
    }

    /// Move the pending fragments into the history.
    ///
    /// Returns `None` when nothing was said since the last commit.
    pub fn commit_turn(&mut self) -> Option<TranscriptTurn> {
        if self.pending_user.is_empty() && self.pending_model.is_empty() {
            return None;
        }

        let turn = TranscriptTurn {
            user: std::mem::take(&mut self.pending_user),
            model: std::mem::take(&mut self.pending_model),
            completed_at: Utc::now(),
        };
        self.turns.push(turn.clone());
        Some(turn)
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_user
    }

    pub fn pending_output(&self) -> &str {
        &self.pending_model
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    /// History including any unfinished turn
    pub fn finish(mut self) -> Vec<TranscriptTurn> {
        self.commit_turn();
        self.turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_join_into_turn() {
        let mut transcript = Transcript::new();
        transcript.push_input("What's the ");
        transcript.push_input("weather?");
        transcript.push_output("Sunny.");

        let turn = transcript.commit_turn().unwrap();
        assert_eq!(turn.user, "What's the weather?");
        assert_eq!(turn.model, "Sunny.");
        assert_eq!(transcript.turns().len(), 1);
        assert!(transcript.pending_input().is_empty());
        assert!(transcript.pending_output().is_empty());
    }

    #[test]
    fn test_empty_turn_not_committed() {
        let mut transcript = Transcript::new();
        assert!(transcript.commit_turn().is_none());
        assert!(transcript.turns().is_empty());
    }

    #[test]
    fn test_finish_keeps_partial_turn() {
        let mut transcript = Transcript::new();
        transcript.push_input("first");
        transcript.commit_turn();
        transcript.push_output("cut off mid");

        let turns = transcript.finish();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].user, "");
        assert_eq!(turns[1].model, "cut off mid");
    }
}
