//! Remote genealogy graph access.
//!
//! # Responsibility
//! - Define the family-listing contract the engines depend on.
//! - Classify remote failures into retryable and branch-fatal kinds.
//!
//! # Invariants
//! - Implementations only read from the remote service.
//! - `FamilyListing::father` is always a male, biological parent.

pub mod geni;
pub mod throttle;

use crate::model::profile::{Profile, ProfileId, Union};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Immediate family of one focus profile as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FamilyListing {
    pub focus: Profile,
    pub father: Option<Profile>,
    pub mother: Option<Profile>,
    pub spouses: Vec<Profile>,
    /// Biological children of the focus, in listing order.
    pub children: Vec<Profile>,
    pub unions: Vec<Union>,
}

impl FamilyListing {
    /// Listing with only the focus populated.
    pub fn of(focus: Profile) -> Self {
        Self {
            focus,
            ..Self::default()
        }
    }

    pub fn with_father(mut self, father: Profile) -> Self {
        self.father = Some(father);
        self
    }

    pub fn with_child(mut self, child: Profile) -> Self {
        self.children.push(child);
        self
    }

    /// Male children in listing order, paired with their listing position.
    pub fn sons(&self) -> impl Iterator<Item = (usize, &Profile)> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, child)| child.is_male())
    }
}

/// Failure of one remote family fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// HTTP 429; `retry_after` carries the server hint when present.
    RateLimited { retry_after: Option<Duration> },
    NotFound(ProfileId),
    /// Token rejected and could not be refreshed.
    AuthExpired,
    PermissionDenied(ProfileId),
    /// Transport failure or server-side 5xx.
    Network(String),
    /// Payload could not be interpreted as a family listing.
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether the throttled client should retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network(_))
    }

    /// Stable label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound(_) => "not_found",
            Self::AuthExpired => "auth_expired",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited {
                retry_after: Some(delay),
            } => write!(f, "rate limited, retry after {}s", delay.as_secs()),
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::NotFound(id) => write!(f, "profile not found: {id}"),
            Self::AuthExpired => write!(f, "access token expired; re-run `ydna auth`"),
            Self::PermissionDenied(id) => write!(f, "permission denied for profile {id}"),
            Self::Network(message) => write!(f, "network error: {message}"),
            Self::InvalidResponse(message) => write!(f, "invalid family listing: {message}"),
        }
    }
}

impl Error for RemoteError {}

/// Read-only access to the remote family graph.
pub trait RemoteGraph {
    /// Fetches the immediate family of `profile_id`.
    fn get_family(&mut self, profile_id: &str) -> Result<FamilyListing, RemoteError>;
}

impl<G: RemoteGraph + ?Sized> RemoteGraph for &mut G {
    fn get_family(&mut self, profile_id: &str) -> Result<FamilyListing, RemoteError> {
        (**self).get_family(profile_id)
    }
}

impl<G: RemoteGraph + ?Sized> RemoteGraph for Box<G> {
    fn get_family(&mut self, profile_id: &str) -> Result<FamilyListing, RemoteError> {
        (**self).get_family(profile_id)
    }
}
