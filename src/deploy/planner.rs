// src/deploy/planner.rs

//! Merge planning
//!
//! Diffs a staged tree against the live tree. Only paths present in the staged
//! tree appear in a plan; whatever exists solely in the live tree (user
//! settings, themes, saved state) is outside the plan and therefore never
//! touched by the merge.

use crate::error::{Error, Result};
use crate::filesystem::atomic::files_identical;
use crate::filesystem::path::display_relative;
use crate::filesystem::walk_tree;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What the merge will do with one staged file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MergeAction {
    /// Not in the live tree yet
    Create,
    /// In the live tree with different content
    Overwrite,
    /// In the live tree, byte-identical
    Unchanged,
}

impl MergeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Overwrite => "overwrite",
            Self::Unchanged => "unchanged",
        }
    }

    /// Whether the action writes to the live tree
    pub fn writes(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One (path, action) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    /// Relative to both tree roots
    pub path: PathBuf,
    pub action: MergeAction,
}

impl PlannedAction {
    pub fn new(path: impl Into<PathBuf>, action: MergeAction) -> Self {
        Self {
            path: path.into(),
            action,
        }
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<9} {}", self.action, display_relative(&self.path))
    }
}

/// Per-action counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub overwrite: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    /// Actions that write
    pub fn pending(&self) -> usize {
        self.create + self.overwrite
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to overwrite, {} unchanged",
            self.create, self.overwrite, self.unchanged
        )
    }
}

/// A computed, not yet applied merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    /// One entry per staged file, in sorted path order
    pub actions: Vec<PlannedAction>,
    /// Staged directories missing from the live tree, parents first
    pub dirs: Vec<PathBuf>,
}

impl MergePlan {
    /// Actions that write to the live tree
    pub fn pending(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.action.writes())
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action.action {
                MergeAction::Create => summary.create += 1,
                MergeAction::Overwrite => summary.overwrite += 1,
                MergeAction::Unchanged => summary.unchanged += 1,
            }
        }
        summary
    }

    /// True when applying the plan would not write anything
    pub fn is_noop(&self) -> bool {
        self.dirs.is_empty() && self.pending().next().is_none()
    }

    /// Look up the action planned for `path`
    pub fn action_for(&self, path: &Path) -> Option<MergeAction> {
        self.actions
            .iter()
            .find(|a| a.path == path)
            .map(|a| a.action)
    }
}

/// Diff `staged` against `target`
///
/// Reads only; never writes. A staged file that would have to replace a live
/// directory (or the reverse) is a [`Error::MergeConflict`], since resolving
/// it would mean deleting content the staged tree doesn't own.
pub fn plan(staged: &Path, target: &Path) -> Result<MergePlan> {
    if let Some(kind) = existing_kind(target)?
        && kind != EntryKind::Dir
    {
        return Err(Error::MergeConflict {
            path: target.to_path_buf(),
            reason: "target is not a directory".to_string(),
        });
    }

    let listing = walk_tree(staged)?;
    let mut merge_plan = MergePlan::default();

    for dir in &listing.dirs {
        match existing_kind(&target.join(dir))? {
            None => merge_plan.dirs.push(dir.clone()),
            Some(EntryKind::Dir) => {}
            Some(_) => {
                return Err(Error::MergeConflict {
                    path: dir.clone(),
                    reason: "staged directory would replace a file".to_string(),
                });
            }
        }
    }

    for file in &listing.files {
        let live = target.join(file);
        let action = match existing_kind(&live)? {
            None => MergeAction::Create,
            Some(EntryKind::Dir) => {
                return Err(Error::MergeConflict {
                    path: file.clone(),
                    reason: "staged file would replace a directory".to_string(),
                });
            }
            Some(EntryKind::Symlink) => MergeAction::Overwrite,
            Some(EntryKind::File) => {
                if files_identical(&staged.join(file), &live)? {
                    MergeAction::Unchanged
                } else {
                    MergeAction::Overwrite
                }
            }
        };
        merge_plan.actions.push(PlannedAction::new(file.clone(), action));
    }

    debug!("Merge plan: {}", merge_plan.summary());
    Ok(merge_plan)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
    Symlink,
}

fn existing_kind(path: &Path) -> Result<Option<EntryKind>> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Ok(Some(EntryKind::Symlink)),
        Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Dir)),
        Ok(_) => Ok(Some(EntryKind::File)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::IoError(format!(
            "Cannot inspect {}: {}",
            path.display(),
            e
        ))),
    }
}
