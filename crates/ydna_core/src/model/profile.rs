//! Profile, paternal link and union records.
//!
//! # Responsibility
//! - Describe person nodes as cached from the genealogy service.
//! - Normalize user-supplied profile references into service ids.
//!
//! # Invariants
//! - `Profile::id` is stable; display attributes may be refreshed.
//! - A `PaternalLink` always points father -> son and never to itself.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service-assigned profile identifier, e.g. `profile-6000000012345`.
pub type ProfileId = String;

const PROFILE_PREFIX: &str = "profile-";
const UNKNOWN_NAME: &str = "Unknown";

static PROFILE_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:profile-)?(g?[0-9]+)$").expect("profile reference pattern is valid")
});

/// Recorded gender of a profile.
///
/// Only `Male` profiles take part in paternal-line traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse for service payloads; anything unrecognized is `Unknown`.
    pub fn from_label(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Self::Male,
            "female" | "f" => Self::Female,
            _ => Self::Unknown,
        }
    }
}

/// Cached person node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub display_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Gender,
    /// Free-form date hint as delivered by the service.
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub is_alive: bool,
}

impl Profile {
    /// Creates a profile with only identity, name and gender populated.
    pub fn new(id: impl Into<ProfileId>, display_name: impl Into<String>, gender: Gender) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            first_name: None,
            last_name: None,
            gender,
            birth_date: None,
            death_date: None,
            is_alive: false,
        }
    }

    pub fn is_male(&self) -> bool {
        self.gender == Gender::Male
    }

    pub fn is_female(&self) -> bool {
        self.gender == Gender::Female
    }

    /// Best display label: display name, then first/last name, then `Unknown`.
    pub fn label(&self) -> String {
        let display = self.display_name.trim();
        if !display.is_empty() {
            return display.to_string();
        }
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            UNKNOWN_NAME.to_string()
        } else {
            parts.join(" ")
        }
    }

    /// Id without the `profile-` prefix, used in export file names.
    pub fn short_id(&self) -> &str {
        self.id.strip_prefix(PROFILE_PREFIX).unwrap_or(&self.id)
    }

    /// Checks the invariants required before persistence.
    pub fn validate(&self) -> Result<(), ProfileValidationError> {
        if self.id.trim().is_empty() {
            return Err(ProfileValidationError::EmptyId);
        }
        if self.id.trim() != self.id {
            return Err(ProfileValidationError::InvalidReference(self.id.clone()));
        }
        Ok(())
    }
}

/// How a paternal link entered the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkProvenance {
    /// Discovered by walking immediate-family listings.
    Traversal,
    /// Declared by a union record.
    Union,
}

impl LinkProvenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traversal => "traversal",
            Self::Union => "union",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "traversal" => Some(Self::Traversal),
            "union" => Some(Self::Union),
            _ => None,
        }
    }
}

/// Directed father -> son edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaternalLink {
    pub father_id: ProfileId,
    pub son_id: ProfileId,
    pub provenance: LinkProvenance,
    /// Position of the son in the father's remote family listing.
    pub child_order: i64,
}

impl PaternalLink {
    pub fn discovered(
        father_id: impl Into<ProfileId>,
        son_id: impl Into<ProfileId>,
        child_order: i64,
    ) -> Self {
        Self {
            father_id: father_id.into(),
            son_id: son_id.into(),
            provenance: LinkProvenance::Traversal,
            child_order,
        }
    }

    pub fn from_union(
        father_id: impl Into<ProfileId>,
        son_id: impl Into<ProfileId>,
        child_order: i64,
    ) -> Self {
        Self {
            provenance: LinkProvenance::Union,
            ..Self::discovered(father_id, son_id, child_order)
        }
    }
}

/// Parental pairing as listed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Union {
    pub id: String,
    pub partner_ids: Vec<ProfileId>,
    pub child_ids: Vec<ProfileId>,
    pub status: Option<String>,
}

/// Validation errors for profile identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileValidationError {
    EmptyId,
    InvalidReference(String),
}

impl Display for ProfileValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "profile id must not be empty"),
            Self::InvalidReference(value) => write!(f, "invalid profile reference `{value}`"),
        }
    }
}

impl Error for ProfileValidationError {}

/// Normalizes a user-supplied profile reference into a service id.
///
/// Accepts `profile-123`, `123`, `g123`, or a profile URL whose last path
/// segment is one of those forms.
pub fn normalize_profile_id(raw: &str) -> Result<ProfileId, ProfileValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProfileValidationError::EmptyId);
    }

    let candidate = if trimmed.contains('/') {
        trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or(trimmed)
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(trimmed)
    } else {
        trimmed
    };

    PROFILE_REF_RE
        .captures(candidate)
        .and_then(|caps| caps.get(1))
        .map(|number| format!("{PROFILE_PREFIX}{}", number.as_str()))
        .ok_or_else(|| ProfileValidationError::InvalidReference(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{normalize_profile_id, Gender, Profile, ProfileValidationError};

    #[test]
    fn normalize_accepts_bare_prefixed_and_url_forms() {
        assert_eq!(normalize_profile_id("12345").unwrap(), "profile-12345");
        assert_eq!(
            normalize_profile_id(" profile-12345 ").unwrap(),
            "profile-12345"
        );
        assert_eq!(
            normalize_profile_id("https://www.geni.com/people/John-Smith/6000000012345?through=1")
                .unwrap(),
            "profile-6000000012345"
        );
        assert_eq!(normalize_profile_id("g600").unwrap(), "profile-g600");
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert_eq!(
            normalize_profile_id("   "),
            Err(ProfileValidationError::EmptyId)
        );
        assert!(matches!(
            normalize_profile_id("union-77"),
            Err(ProfileValidationError::InvalidReference(_))
        ));
    }

    #[test]
    fn label_falls_back_to_name_parts_then_unknown() {
        let mut profile = Profile::new("profile-1", "", Gender::Male);
        assert_eq!(profile.label(), "Unknown");
        profile.first_name = Some("John".to_string());
        profile.last_name = Some("Smith".to_string());
        assert_eq!(profile.label(), "John Smith");
        profile.display_name = "John Smith Sr.".to_string();
        assert_eq!(profile.label(), "John Smith Sr.");
        assert_eq!(profile.short_id(), "1");
    }

    #[test]
    fn gender_labels_are_lenient() {
        assert_eq!(Gender::from_label("MALE"), Gender::Male);
        assert_eq!(Gender::from_label("f"), Gender::Female);
        assert_eq!(Gender::from_label(""), Gender::Unknown);
    }
}
