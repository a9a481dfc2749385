#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{collections::BTreeSet, path::Path};

use anyhow::{Context, Result};

/// Parses roster text: the first whitespace-separated token of each line is
/// a student id. Blank lines and `#` comments are skipped.
pub fn parse_roster(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Reads the student ids listed in a roster file.
pub fn load_roster(path: &Path) -> Result<BTreeSet<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read roster {}", path.display()))?;
    let ids = parse_roster(&text);
    tracing::debug!("Loaded {} student(s) from {}", ids.len(), path.display());
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_first_token_and_skips_comments() {
        let ids = parse_roster("# id name\n101 Alice\n\n102\tBob\n  103  \n");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), ["101", "102", "103"]);
    }
}
