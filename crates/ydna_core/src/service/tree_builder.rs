//! Named paternal trees built from a root search and a downward walk.

use super::root_finder::{locate_root, RootSummary};
use super::traversal::{Direction, TraversalError, TraversalReport, TraversalService};
use crate::model::tree::{NewPaternalTree, PaternalTree, TreeMember};
use crate::remote::RemoteGraph;
use crate::repo::store::LocalStore;
use log::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeBuildRequest {
    pub start_id: String,
    /// Defaults to "Paternal tree of <root name>".
    pub name: Option<String>,
    pub haplogroup: Option<String>,
    pub max_generations_up: u32,
    pub max_generations_down: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeBuildReport {
    pub tree: PaternalTree,
    pub root: RootSummary,
    /// Downward walk from the root; its visits are the tree members.
    pub descendants: TraversalReport,
}

impl TreeBuildReport {
    pub fn descendant_count(&self) -> usize {
        self.descendants.visits.len().saturating_sub(1)
    }
}

/// Finds the root above `request.start_id`, walks its male line down and
/// records the result as a named tree. Assigns no haplogroups.
pub fn build_paternal_tree<S: LocalStore, G: RemoteGraph>(
    traversal: &mut TraversalService<S, G>,
    request: &TreeBuildRequest,
) -> Result<TreeBuildReport, TraversalError> {
    let start = traversal.ensure_profile(&request.start_id)?;
    let root = locate_root(traversal, &start.id, request.max_generations_up)?;
    let descendants =
        traversal.traverse(&root.root_id, Direction::Down, request.max_generations_down)?;

    let name = match request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        Some(name) => name.to_string(),
        None => {
            let label = traversal
                .store()
                .get_profile(&root.root_id)?
                .map(|profile| profile.label())
                .unwrap_or_else(|| root.root_id.clone());
            format!("Paternal tree of {label}")
        }
    };

    let members = descendants
        .visits
        .iter()
        .map(|visit| TreeMember {
            profile_id: visit.profile_id.clone(),
            generation: visit.generation,
        })
        .collect();
    let tree = traversal.store().create_paternal_tree(&NewPaternalTree {
        name,
        root_profile_id: root.root_id.clone(),
        haplogroup: request
            .haplogroup
            .as_deref()
            .map(str::trim)
            .filter(|haplogroup| !haplogroup.is_empty())
            .map(str::to_string),
        members,
    })?;

    info!(
        "event=build_tree module=service status=ok tree_id={} root={} generations_up={} members={}",
        tree.tree_id, tree.root_profile_id, root.generations_up, tree.member_count
    );
    Ok(TreeBuildReport {
        tree,
        root,
        descendants,
    })
}
