//! Named paternal trees.
//!
//! A tree records one root ancestor and the male-line members found under it
//! at build time, so a later run can be compared with what was known then.

use crate::model::profile::ProfileId;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Member of a recorded tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeMember {
    pub profile_id: ProfileId,
    /// Generations below the root; the root is 0.
    pub generation: u32,
}

/// Tree input accepted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaternalTree {
    pub name: String,
    pub root_profile_id: ProfileId,
    pub haplogroup: Option<String>,
    /// Root first, then descendants in walk order.
    pub members: Vec<TreeMember>,
}

impl NewPaternalTree {
    pub fn validate(&self) -> Result<(), TreeValidationError> {
        if self.name.trim().is_empty() {
            return Err(TreeValidationError::EmptyName);
        }
        if self.root_profile_id.trim().is_empty() {
            return Err(TreeValidationError::EmptyRoot);
        }
        let root_listed = self
            .members
            .iter()
            .any(|member| member.profile_id == self.root_profile_id && member.generation == 0);
        if !root_listed {
            return Err(TreeValidationError::RootNotMember(
                self.root_profile_id.clone(),
            ));
        }
        Ok(())
    }
}

/// Stored tree header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaternalTree {
    pub tree_id: i64,
    pub name: String,
    pub root_profile_id: ProfileId,
    pub haplogroup: Option<String>,
    pub member_count: u64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeValidationError {
    EmptyName,
    EmptyRoot,
    RootNotMember(ProfileId),
}

impl Display for TreeValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "tree name must not be empty"),
            Self::EmptyRoot => write!(f, "tree root must not be empty"),
            Self::RootNotMember(id) => {
                write!(f, "tree root {id} must be listed as member at generation 0")
            }
        }
    }
}

impl Error for TreeValidationError {}
