#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;

/// A glob utility function to find paths to files with certain extension
///
/// * `extension`: the file extension to find paths for
/// * `search_depth`: how many folders deep to search for
/// * `root_dir`: the root directory where search starts
pub fn find_files(extension: &str, search_depth: i8, root_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pattern = root_dir.to_path_buf();

    for _ in 0..search_depth {
        pattern.push("**");
    }

    pattern.push(format!("*.{extension}"));
    let pattern = pattern
        .to_str()
        .context("Could not convert root_dir to string")?
        .to_string();

    Ok(glob(&pattern)
        .context("Could not create glob")?
        .filter_map(Result::ok)
        .filter(|path| path.is_file())
        .collect())
}

/// Lists the non-hidden subdirectories of `dir`, sorted by name.
pub fn visible_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Could not list {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("Could not list {}", dir.display()))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Returns the final path component as a string, lossily.
pub fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
