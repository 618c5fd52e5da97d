//! # Experiment Phase Module
//!
//! Tracks which stage of the session is running so every logged sample can be
//! stamped with it.
//!
//! ## Control Envelopes
//! The experiment front end sends JSON envelopes:
//! `{"event": "INICIO_STROOP", "details": {"participantId": "..."}}`.
//! The configured start event opens a new participant session; every other
//! event name becomes the new phase label.

use crate::error::ControlError;
use serde::Deserialize;
use std::fmt;

const DEFAULT_PARTICIPANT: &str = "default_id";

/// Label of the current experimental stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase(String);

impl Phase {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::new("idle")
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Open a new recording for this (already sanitized) participant
    StartSession { participant_id: String, label: String },
    PhaseChange(Phase),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: Option<String>,
    #[serde(default)]
    details: Option<Details>,
}

#[derive(Debug, Default, Deserialize)]
struct Details {
    #[serde(rename = "participantId")]
    participant_id: Option<String>,
}

/// Parse one control channel message
pub fn parse_envelope(text: &str, start_event: &str) -> Result<ControlEvent, ControlError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let event = envelope
        .event
        .filter(|e| !e.trim().is_empty())
        .ok_or(ControlError::MissingEvent)?;

    if event == start_event {
        let raw_id = envelope
            .details
            .and_then(|d| d.participant_id)
            .unwrap_or_else(|| DEFAULT_PARTICIPANT.to_string());
        Ok(ControlEvent::StartSession {
            participant_id: sanitize_participant_id(&raw_id),
            label: event,
        })
    } else {
        Ok(ControlEvent::PhaseChange(Phase::new(event)))
    }
}

/// Replace every character outside `[A-Za-z0-9_ -]` with `_`
pub fn sanitize_participant_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_PARTICIPANT.to_string();
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ' ' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// What the logger must do after a control event
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRequest {
    Open { participant_id: String },
}

/// Single writer of the current phase
#[derive(Debug, Clone, Default)]
pub struct PhaseController {
    current: Phase,
    participant: Option<String>,
}

impl PhaseController {
    pub fn new(initial: Phase) -> Self {
        Self {
            current: initial,
            participant: None,
        }
    }

    pub fn current(&self) -> &Phase {
        &self.current
    }

    pub fn participant(&self) -> Option<&str> {
        self.participant.as_deref()
    }

    pub fn apply(&mut self, event: ControlEvent) -> Option<SessionRequest> {
        match event {
            ControlEvent::PhaseChange(phase) => {
                log::info!("Phase change: {} -> {}", self.current, phase);
                self.current = phase;
                None
            }
            ControlEvent::StartSession {
                participant_id,
                label,
            } => {
                log::info!("Session start for participant '{}'", participant_id);
                self.current = Phase::new(label);
                self.participant = Some(participant_id.clone());
                Some(SessionRequest::Open { participant_id })
            }
        }
    }
}
