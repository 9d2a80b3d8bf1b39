//! Haplogroup assignment records.
//!
//! # Responsibility
//! - Define the append-only assignment log entries stored per profile.
//! - Validate assignment input before it reaches persistence.
//!
//! # Invariants
//! - Stored assignments are never mutated or deleted.
//! - `Propagated` provenance always names the seed profile it came from.

use crate::model::profile::ProfileId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Where an assignment came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AssignmentProvenance {
    /// Direct test result or imported assertion.
    Tested,
    /// Inferred along the paternal line from a seed profile.
    Propagated { from: ProfileId },
}

impl AssignmentProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tested => "tested",
            Self::Propagated { .. } => "propagated",
        }
    }

    pub fn propagated_from(&self) -> Option<&str> {
        match self {
            Self::Tested => None,
            Self::Propagated { from } => Some(from.as_str()),
        }
    }
}

/// Confidence label recorded with an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Confirmed,
    Propagated,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Propagated => "propagated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "confirmed" => Some(Self::Confirmed),
            "propagated" => Some(Self::Propagated),
            _ => None,
        }
    }
}

/// Assignment input accepted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
    pub profile_id: ProfileId,
    pub haplogroup: String,
    pub source: String,
    pub provenance: AssignmentProvenance,
    pub confidence: Confidence,
    /// Propagation run that produced this row, if any.
    pub run_id: Option<Uuid>,
}

impl NewAssignment {
    /// Tested (or imported) assignment for one profile.
    pub fn tested(
        profile_id: impl Into<ProfileId>,
        haplogroup: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            haplogroup: haplogroup.into().trim().to_string(),
            source: source.into().trim().to_string(),
            provenance: AssignmentProvenance::Tested,
            confidence: Confidence::Confirmed,
            run_id: None,
        }
    }

    /// Assignment inferred from `seed_id` during propagation run `run_id`.
    pub fn propagated(
        profile_id: impl Into<ProfileId>,
        haplogroup: impl Into<String>,
        source: impl Into<String>,
        seed_id: impl Into<ProfileId>,
        run_id: Uuid,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            haplogroup: haplogroup.into().trim().to_string(),
            source: source.into().trim().to_string(),
            provenance: AssignmentProvenance::Propagated {
                from: seed_id.into(),
            },
            confidence: Confidence::Propagated,
            run_id: Some(run_id),
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn validate(&self) -> Result<(), AssignmentValidationError> {
        if self.profile_id.trim().is_empty() {
            return Err(AssignmentValidationError::EmptyProfileId);
        }
        validate_haplogroup(&self.haplogroup)?;
        validate_source(&self.source)?;
        if let AssignmentProvenance::Propagated { from } = &self.provenance {
            if from.trim().is_empty() {
                return Err(AssignmentValidationError::EmptyPropagationSeed);
            }
        }
        Ok(())
    }
}

/// Persisted assignment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaplogroupAssignment {
    /// Monotonic row id; orders the per-profile log.
    pub assignment_id: i64,
    pub profile_id: ProfileId,
    pub haplogroup: String,
    pub source: String,
    pub provenance: AssignmentProvenance,
    pub confidence: Confidence,
    pub run_id: Option<Uuid>,
    /// Epoch milliseconds.
    pub assigned_at: i64,
}

impl HaplogroupAssignment {
    pub fn is_tested(&self) -> bool {
        self.provenance == AssignmentProvenance::Tested
    }
}

/// Validation errors for assignment input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentValidationError {
    EmptyProfileId,
    EmptyHaplogroup,
    InvalidHaplogroup(String),
    EmptySource,
    EmptyPropagationSeed,
}

impl Display for AssignmentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyProfileId => write!(f, "assignment profile id must not be empty"),
            Self::EmptyHaplogroup => write!(f, "haplogroup must not be empty"),
            Self::InvalidHaplogroup(value) => {
                write!(f, "haplogroup `{value}` must not contain whitespace")
            }
            Self::EmptySource => write!(f, "assignment source must not be empty"),
            Self::EmptyPropagationSeed => {
                write!(f, "propagated assignment must name its seed profile")
            }
        }
    }
}

impl Error for AssignmentValidationError {}

/// Checks a haplogroup label such as `R-M269` or `I1`.
pub fn validate_haplogroup(value: &str) -> Result<(), AssignmentValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AssignmentValidationError::EmptyHaplogroup);
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(AssignmentValidationError::InvalidHaplogroup(
            trimmed.to_string(),
        ));
    }
    Ok(())
}

pub fn validate_source(value: &str) -> Result<(), AssignmentValidationError> {
    if value.trim().is_empty() {
        return Err(AssignmentValidationError::EmptySource);
    }
    Ok(())
}
