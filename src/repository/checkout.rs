//! Checkout Synchronization
//!
//! Keeps a local directory in step with a remote repository:
//!
//! | directory state            | action             |
//! |----------------------------|--------------------|
//! | has a `.git` directory     | `git pull` in place |
//! | missing or empty           | `git clone`        |
//! | anything else              | error, untouched   |

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{error, info};

use super::git::GitCli;
use crate::error::{PipelineError, Result};

/// What a target directory currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    /// Contains a `.git` directory
    Repository,
    /// Exists with no entries
    Empty,
    /// Does not exist
    Missing,
    /// Has entries but no `.git` directory
    Occupied,
}

/// What [`sync_checkout`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Cloned,
    Updated,
}

/// Resolves the configured path; an empty setting means the current
/// directory.
pub fn resolve_local_path(local_path: &str) -> PathBuf {
    if local_path.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(local_path)
    }
}

/// Classifies a target directory without modifying it.
pub fn inspect_checkout(path: &Path) -> Result<CheckoutState> {
    if path.join(".git").is_dir() {
        return Ok(CheckoutState::Repository);
    }

    match fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_none() {
                Ok(CheckoutState::Empty)
            } else {
                Ok(CheckoutState::Occupied)
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(CheckoutState::Missing),
        // A regular file sits where the checkout should be
        Err(_) if path.exists() => Ok(CheckoutState::Occupied),
        Err(e) => Err(e.into()),
    }
}

/// Clones or pulls `remote_url` into `local_path`.
///
/// An occupied directory without `.git` is left untouched and reported
/// as [`PipelineError::InvalidCheckout`]. Diverged checkouts are not
/// detected here; whatever `git pull` reports is passed through.
pub fn sync_checkout(git: &GitCli, remote_url: &str, local_path: &str) -> Result<SyncOutcome> {
    let path = resolve_local_path(local_path);

    match inspect_checkout(&path)? {
        CheckoutState::Repository => {
            info!("Updating existing checkout at {}", path.display());
            git.pull(&path)?;
            Ok(SyncOutcome::Updated)
        }
        CheckoutState::Empty | CheckoutState::Missing => {
            info!("Cloning {} into {}", remote_url, path.display());
            git.clone_repo(remote_url, &path)?;
            Ok(SyncOutcome::Cloned)
        }
        CheckoutState::Occupied => {
            let err = PipelineError::InvalidCheckout { path };
            error!("{}", err);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_empty_path_is_cwd() {
        assert_eq!(resolve_local_path(""), PathBuf::from("."));
        assert_eq!(resolve_local_path("/srv/dbt"), PathBuf::from("/srv/dbt"));
    }

    #[test]
    fn test_inspect_states() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();

        let missing = root.join("missing");
        assert_eq!(inspect_checkout(&missing).unwrap(), CheckoutState::Missing);

        let empty = root.join("empty");
        fs::create_dir(&empty).unwrap();
        assert_eq!(inspect_checkout(&empty).unwrap(), CheckoutState::Empty);

        let occupied = root.join("occupied");
        fs::create_dir(&occupied).unwrap();
        fs::write(occupied.join("notes.txt"), "hello").unwrap();
        assert_eq!(inspect_checkout(&occupied).unwrap(), CheckoutState::Occupied);

        let repo = root.join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        assert_eq!(inspect_checkout(&repo).unwrap(), CheckoutState::Repository);
    }

    #[test]
    fn test_git_file_is_not_a_repository() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(".git"), "gitdir: elsewhere").unwrap();
        assert_eq!(inspect_checkout(temp_dir.path()).unwrap(), CheckoutState::Occupied);
    }

    #[test]
    fn test_file_in_place_of_directory_is_occupied() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("checkout");
        fs::write(&file, "x").unwrap();
        assert_eq!(inspect_checkout(&file).unwrap(), CheckoutState::Occupied);
    }

    #[cfg(unix)]
    mod with_fake_git {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// A git stand-in that logs its arguments and fakes `clone`.
        fn fake_git(dir: &Path) -> (GitCli, PathBuf) {
            let log = dir.join("git.log");
            let script = dir.join("fake-git");
            fs::write(
                &script,
                format!(
                    "#!/bin/sh\necho \"$@ @ $(pwd)\" >> '{}'\nif [ \"$1\" = clone ]; then mkdir -p \"$3/.git\"; fi\n",
                    log.display()
                ),
            )
            .unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            (GitCli::new(script), log)
        }

        fn calls(log: &Path) -> Vec<String> {
            fs::read_to_string(log)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        #[test]
        fn test_empty_directory_is_cloned() {
            let temp_dir = tempdir().unwrap();
            let (git, log) = fake_git(temp_dir.path());
            let target = temp_dir.path().join("checkout");
            fs::create_dir(&target).unwrap();

            let outcome =
                sync_checkout(&git, "https://example.com/a.git", target.to_str().unwrap()).unwrap();

            assert_eq!(outcome, SyncOutcome::Cloned);
            assert!(target.join(".git").is_dir());
            let calls = calls(&log);
            assert_eq!(calls.len(), 1);
            assert!(calls[0].starts_with(&format!("clone https://example.com/a.git {}", target.display())));
        }

        #[test]
        fn test_missing_directory_is_cloned() {
            let temp_dir = tempdir().unwrap();
            let (git, log) = fake_git(temp_dir.path());
            let target = temp_dir.path().join("not-yet");

            let outcome = sync_checkout(&git, "repo-url", target.to_str().unwrap()).unwrap();

            assert_eq!(outcome, SyncOutcome::Cloned);
            assert!(calls(&log)[0].starts_with("clone repo-url"));
        }

        #[test]
        fn test_existing_checkout_is_pulled_not_cloned() {
            let temp_dir = tempdir().unwrap();
            let (git, log) = fake_git(temp_dir.path());
            let target = temp_dir.path().join("checkout");
            fs::create_dir_all(target.join(".git")).unwrap();
            fs::write(target.join("dbt_project.yml"), "name: analytics").unwrap();

            let outcome = sync_checkout(&git, "repo-url", target.to_str().unwrap()).unwrap();

            assert_eq!(outcome, SyncOutcome::Updated);
            let calls = calls(&log);
            assert_eq!(calls.len(), 1);
            assert!(calls[0].starts_with("pull @ "));
            assert!(calls[0].ends_with(&target.canonicalize().unwrap().display().to_string()));
            assert!(!calls.iter().any(|c| c.starts_with("clone")));
        }

        #[test]
        fn test_occupied_directory_fails_without_changes() {
            let temp_dir = tempdir().unwrap();
            let (git, log) = fake_git(temp_dir.path());
            let target = temp_dir.path().join("checkout");
            fs::create_dir(&target).unwrap();
            fs::write(target.join("stray.sql"), "select 1").unwrap();

            let err = sync_checkout(&git, "repo-url", target.to_str().unwrap()).unwrap_err();

            assert!(matches!(err, PipelineError::InvalidCheckout { .. }));
            assert!(calls(&log).is_empty());
            let entries: Vec<_> = fs::read_dir(&target).unwrap().collect();
            assert_eq!(entries.len(), 1);
            assert_eq!(fs::read_to_string(target.join("stray.sql")).unwrap(), "select 1");
        }
    }
}
