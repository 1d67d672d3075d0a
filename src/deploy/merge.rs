// src/deploy/merge.rs

//! Merge engine
//!
//! Applies a [`MergePlan`] to the live tree. Writes go through a temporary
//! sibling and a rename so the card never holds a half-written file under a
//! real name. The engine is fail-stop: the first error ends the merge and is
//! reported with how far it got. There is no automatic rollback; a snapshot
//! of the pre-merge tree exists and recovery is an explicit revert.

use crate::deploy::planner::{MergeAction, MergePlan};
use crate::error::{Error, Result};
use crate::filesystem::atomic::copy_file_atomic;
use crate::filesystem::path::display_relative;
use crate::progress::ProgressTracker;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a completed merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub created: usize,
    pub overwritten: usize,
    pub unchanged: usize,
    pub dirs_created: usize,
    pub bytes_written: u64,
}

impl MergeResult {
    /// Files written
    pub fn written(&self) -> usize {
        self.created + self.overwritten
    }
}

/// Apply `plan` from `staged` onto `target`
///
/// `MergeError` carries the number of writing actions completed, the number
/// planned, and the path that failed.
pub fn apply(
    plan: &MergePlan,
    staged: &Path,
    target: &Path,
    progress: &dyn ProgressTracker,
) -> Result<MergeResult> {
    let planned = plan.pending().count();
    let mut result = MergeResult::default();

    progress.begin("Merging", planned as u64);

    let fail = |completed: usize, path: &Path, reason: String| Error::MergeError {
        completed,
        planned,
        path: path.to_path_buf(),
        reason,
    };

    fs::create_dir_all(target)
        .map_err(|e| fail(0, target, format!("cannot create target: {}", e)))?;

    for dir in &plan.dirs {
        let live = target.join(dir);
        fs::create_dir_all(&live).map_err(|e| fail(0, dir, e.to_string()))?;
        result.dirs_created += 1;
    }

    for planned_action in &plan.actions {
        let path = &planned_action.path;
        match planned_action.action {
            MergeAction::Unchanged => {
                result.unchanged += 1;
                continue;
            }
            MergeAction::Create | MergeAction::Overwrite => {}
        }

        let completed = result.written();
        let live = target.join(path);

        if let Some(parent) = live.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            progress.fail(&display_relative(path));
            return Err(fail(completed, path, e.to_string()));
        }

        match copy_file_atomic(&staged.join(path), &live) {
            Ok(bytes) => {
                debug!("{} {}", planned_action.action, display_relative(path));
                result.bytes_written += bytes;
                if planned_action.action == MergeAction::Create {
                    result.created += 1;
                } else {
                    result.overwritten += 1;
                }
                progress.advance(path);
            }
            Err(e) => {
                warn!(
                    "Merge stopped at {} after {}/{} writes: {}",
                    display_relative(path),
                    completed,
                    planned,
                    e
                );
                progress.fail(&display_relative(path));
                return Err(fail(completed, path, e.to_string()));
            }
        }
    }

    progress.finish("Merge complete");
    info!(
        "Merged {} created, {} overwritten, {} unchanged",
        result.created, result.overwritten, result.unchanged
    );
    Ok(result)
}

/// Paths a failed merge finished writing, given how many it completed
///
/// Writes happen in plan order, so the first `completed` pending actions are
/// the ones that landed.
pub fn completed_paths(plan: &MergePlan, completed: usize) -> Vec<PathBuf> {
    plan.pending()
        .take(completed)
        .map(|a| a.path.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::planner::{plan, PlannedAction};
    use crate::progress::SilentProgress;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let staged = temp.path().join("staged");
        let target = temp.path().join("target");
        fs::create_dir_all(&staged).unwrap();
        (temp, staged, target)
    }

    #[test]
    fn test_apply_creates_and_overwrites() {
        let (_temp, staged, target) = setup();
        fs::create_dir_all(staged.join("sub")).unwrap();
        fs::create_dir_all(staged.join("empty")).unwrap();
        fs::write(staged.join("a.txt"), b"new").unwrap();
        fs::write(staged.join("sub/b.txt"), b"b").unwrap();

        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("a.txt"), b"old").unwrap();
        fs::write(target.join("user.cfg"), b"mine").unwrap();

        let merge_plan = plan(&staged, &target).unwrap();
        let progress = SilentProgress::new();
        let result = apply(&merge_plan, &staged, &target, &progress).unwrap();

        assert_eq!(result.created, 1);
        assert_eq!(result.overwritten, 1);
        assert_eq!(result.dirs_created, 2);
        assert_eq!(fs::read(target.join("a.txt")).unwrap(), b"new");
        assert_eq!(fs::read(target.join("sub/b.txt")).unwrap(), b"b");
        assert_eq!(fs::read(target.join("user.cfg")).unwrap(), b"mine");
        assert!(target.join("empty").is_dir());
        assert_eq!(progress.position(), 2);
        assert!(progress.is_finished());
    }

    #[test]
    fn test_apply_leaves_no_temp_files() {
        let (_temp, staged, target) = setup();
        fs::write(staged.join("a"), b"1").unwrap();

        let merge_plan = plan(&staged, &target).unwrap();
        apply(&merge_plan, &staged, &target, &SilentProgress::new()).unwrap();

        let names: Vec<_> = fs::read_dir(&target)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a")]);
    }

    #[test]
    fn test_apply_stops_on_first_failure() {
        let (_temp, staged, target) = setup();
        fs::write(staged.join("a.txt"), b"a").unwrap();
        fs::write(staged.join("c.txt"), b"c").unwrap();

        // b.txt was never staged, so copying it fails
        let merge_plan = MergePlan {
            actions: vec![
                PlannedAction::new("a.txt", MergeAction::Create),
                PlannedAction::new("b.txt", MergeAction::Create),
                PlannedAction::new("c.txt", MergeAction::Create),
            ],
            dirs: Vec::new(),
        };

        let err = apply(&merge_plan, &staged, &target, &SilentProgress::new()).unwrap_err();
        match err {
            Error::MergeError {
                completed,
                planned,
                path,
                ..
            } => {
                assert_eq!(completed, 1);
                assert_eq!(planned, 3);
                assert_eq!(path, PathBuf::from("b.txt"));
                assert_eq!(completed_paths(&merge_plan, completed), vec![PathBuf::from("a.txt")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(target.join("a.txt").exists());
        assert!(!target.join("c.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, staged, target) = setup();
        fs::write(staged.join("tool"), b"#!").unwrap();
        fs::set_permissions(staged.join("tool"), fs::Permissions::from_mode(0o755)).unwrap();

        let merge_plan = plan(&staged, &target).unwrap();
        apply(&merge_plan, &staged, &target, &SilentProgress::new()).unwrap();

        let mode = fs::metadata(target.join("tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
