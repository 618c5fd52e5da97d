//! # Inter-Beat Interval Artifact Filter
//!
//! Rejects beats whose relative change from the last accepted interval is
//! physiologically implausible (missed or doubled beats, motion spikes).
//!
//! A beat `v` compared against the reference `p` is an artifact when
//! `|v - p| / p` is strictly greater than the threshold. Only accepted beats
//! move the reference. The first beat is compared against a fixed seed, so a
//! subject whose resting interval is far from the seed may lose a few beats at
//! startup.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    Accepted(f64),
    Artifact,
}

impl Classification {
    pub fn is_artifact(&self) -> bool {
        matches!(self, Classification::Artifact)
    }

    /// Cleaned value, absent for artifacts
    pub fn cleaned(&self) -> Option<f64> {
        match self {
            Classification::Accepted(value) => Some(*value),
            Classification::Artifact => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactFilter {
    threshold: f64,
    last_accepted: f64,
}

impl ArtifactFilter {
    pub fn new(threshold: f64, seed_ms: f64) -> Self {
        Self {
            threshold,
            last_accepted: seed_ms,
        }
    }

    pub fn last_accepted(&self) -> f64 {
        self.last_accepted
    }

    pub fn relative_change(&self, value: f64) -> f64 {
        (value - self.last_accepted).abs() / self.last_accepted
    }

    /// Classify without touching the reference
    pub fn classify(&self, value: f64) -> Classification {
        if self.relative_change(value) > self.threshold {
            Classification::Artifact
        } else {
            Classification::Accepted(value)
        }
    }

    /// Classify and, on acceptance, make `value` the new reference
    pub fn apply(&mut self, value: f64) -> Classification {
        let classification = self.classify(value);
        if let Classification::Accepted(accepted) = classification {
            self.last_accepted = accepted;
        }
        classification
    }
}
