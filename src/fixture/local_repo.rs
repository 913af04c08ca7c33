//! The local git repository behind `file://` repo URLs
//!
//! Each reset rebuilds it from the testdata tree: the working copy is
//! replaced and committed as a single fresh commit, so tests that push
//! changes never leak them into the next test.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info};
use walkdir::WalkDir;

use super::FixtureError;

const GIT_IDENTITY: &[&str] = &[
    "-c",
    "user.name=gitops-e2e",
    "-c",
    "user.email=gitops-e2e@localhost",
    "-c",
    "init.defaultBranch=master",
    "-c",
    "commit.gpgsign=false",
];

/// Replace `repo_dir` with a fresh single-commit repository of `testdata`
///
/// # Errors
///
/// Fails if the tree cannot be copied or any git command fails.
pub fn recreate(testdata: &Path, repo_dir: &Path) -> Result<(), FixtureError> {
    if repo_dir.exists() {
        fs::remove_dir_all(repo_dir)?;
    }
    copy_tree(testdata, repo_dir)?;

    git(repo_dir, "init", &["--quiet"])?;
    git(repo_dir, "add", &["--all"])?;
    git(
        repo_dir,
        "commit",
        &["--quiet", "--allow-empty", "--message", "initial commit"],
    )?;

    info!(repo = %repo_dir.display(), "Recreated local repository");
    Ok(())
}

/// Copy a directory tree, skipping any `.git` directory in the source
///
/// Symlinks are followed, so linked directories are copied as directories.
pub fn copy_tree(from: &Path, to: &Path) -> Result<(), FixtureError> {
    fs::create_dir_all(to)?;

    let walker = WalkDir::new(from)
        .min_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(from).map_err(io::Error::other)?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn git(dir: &Path, subcommand: &str, args: &[&str]) -> Result<(), FixtureError> {
    let output = Command::new("git")
        .args(GIT_IDENTITY)
        .arg(subcommand)
        .args(args)
        .current_dir(dir)
        .output()?;

    if !output.status.success() {
        return Err(FixtureError::Git {
            command: subcommand.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!(subcommand, "git");
    Ok(())
}
