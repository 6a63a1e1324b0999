//! Bounded search over the sandbox tree
//!
//! File listing, regex grep and directory structure. Everything walks from
//! the sandbox root, honours `.gitignore` and the configured default ignore
//! patterns, and never follows symlinks out of the tree.

use crate::sandbox::Sandbox;
use bulwark_core::error::{BulwarkError, Result};
use bulwark_core::executor::GrepMatch;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Bytes inspected when sniffing for binary content
const BINARY_SNIFF_BYTES: usize = 8192;

/// Node of [`Sandbox::structure`]. Directories carry `children` and a `/` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeEntry>>,
}

impl TreeEntry {
    pub fn is_dir(&self) -> bool {
        self.children.is_some()
    }

    /// Indented text rendering, one entry per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.name);
        out.push('\n');
        for child in self.children.iter().flatten() {
            child.render_into(out, depth + 1);
        }
    }
}

impl Sandbox {
    /// Files matching `glob` (all files when `None`), sorted, root-relative.
    ///
    /// The default ignore list, the backup directory and `extra_ignore` are
    /// always excluded, even when the glob would match them.
    pub fn find_files(&self, glob: Option<&str>, extra_ignore: &[String]) -> Result<Vec<String>> {
        let overrides = self.overrides(glob, extra_ignore)?;
        let walker = WalkBuilder::new(self.root())
            .standard_filters(false)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .parents(false)
            .overrides(overrides)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(rel) = self.guard.relative(entry.path()) {
                files.push(rel);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Regex line search across the files selected by `glob`.
    ///
    /// Binary and non-UTF-8 files are skipped. `max_results == 0` falls back to
    /// the configured limit.
    pub fn grep(
        &self,
        pattern: &str,
        glob: Option<&str>,
        ignore_case: bool,
        max_results: usize,
    ) -> Result<Vec<GrepMatch>> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| BulwarkError::InvalidInput(format!("invalid pattern {:?}: {}", pattern, e)))?;
        let limit = if max_results == 0 {
            self.settings.max_grep_results
        } else {
            max_results
        };

        let mut matches = Vec::new();
        for rel in self.find_files(glob, &[])? {
            let Some(text) = read_text(&self.root().join(&rel)) else {
                continue;
            };
            for (index, line) in text.lines().enumerate() {
                if let Some(found) = regex.find(line) {
                    matches.push(GrepMatch {
                        path: rel.clone(),
                        line_number: index + 1,
                        line_content: line.to_string(),
                        match_start: found.start(),
                        match_end: found.end(),
                    });
                    if matches.len() >= limit {
                        debug!(pattern, limit, "grep result limit reached");
                        return Ok(matches);
                    }
                }
            }
        }
        Ok(matches)
    }

    /// Directory tree down to `max_depth` levels. Deeper directories get a
    /// single `...` child.
    pub fn structure(&self, max_depth: usize, extra_ignore: &[String]) -> Result<TreeEntry> {
        let overrides = self.overrides(None, extra_ignore)?;
        let name = self
            .root()
            .file_name()
            .map(|n| format!("{}/", n.to_string_lossy()))
            .unwrap_or_else(|| "/".to_string());
        Ok(TreeEntry {
            name,
            children: Some(walk_tree(self.root(), &overrides, 0, max_depth)),
        })
    }

    fn overrides(&self, glob: Option<&str>, extra_ignore: &[String]) -> Result<Override> {
        let mut builder = OverrideBuilder::new(self.root());
        let invalid = |e: ignore::Error| BulwarkError::InvalidInput(format!("invalid glob: {}", e));

        if let Some(glob) = glob.map(str::trim).filter(|g| !g.is_empty()) {
            builder.add(glob).map_err(invalid)?;
        }
        let ignored = self
            .settings
            .default_ignore
            .iter()
            .chain(std::iter::once(&self.settings.backup_dir_name))
            .chain(extra_ignore.iter());
        for pattern in ignored {
            builder.add(&format!("!{}", pattern)).map_err(invalid)?;
        }
        builder.build().map_err(invalid)
    }
}

fn walk_tree(dir: &Path, overrides: &Override, depth: usize, max_depth: usize) -> Vec<TreeEntry> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut entries: Vec<(bool, String, std::path::PathBuf)> = read
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            let is_dir = e.file_type().ok()?.is_dir();
            if overrides.matched(&path, is_dir).is_ignore() {
                return None;
            }
            Some((is_dir, e.file_name().to_string_lossy().into_owned(), path))
        })
        .collect();
    // directories first, then by name
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    entries
        .into_iter()
        .map(|(is_dir, name, path)| {
            if !is_dir {
                return TreeEntry { name, children: None };
            }
            let children = if depth + 1 >= max_depth {
                vec![TreeEntry {
                    name: "...".to_string(),
                    children: None,
                }]
            } else {
                walk_tree(&path, overrides, depth + 1, max_depth)
            };
            TreeEntry {
                name: format!("{}/", name),
                children: Some(children),
            }
        })
        .collect()
}

/// Contents of a text file, `None` for binary or unreadable files
fn read_text(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if head.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}
