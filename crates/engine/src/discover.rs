//! Glob-style scenario discovery
//!
//! Supports `*`, `**`, `?`, `[...]` and `{a,b}`. Matching is done on
//! `/`-separated paths; `*` never crosses a directory boundary and, as with
//! shell globs, hidden files and directories are not visited.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::{PixlError, PixlResult};

/// A compiled scenario file pattern
#[derive(Debug, Clone)]
pub struct ScenarioPattern {
    raw: String,
    regex: Regex,
    base: PathBuf,
}

impl ScenarioPattern {
    pub fn new(pattern: &str) -> PixlResult<Self> {
        let normalized = normalize(pattern);
        if normalized.is_empty() {
            return Err(PixlError::Pattern {
                pattern: pattern.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }

        let regex = Regex::new(&translate(&normalized).map_err(|reason| PixlError::Pattern {
            pattern: pattern.to_string(),
            reason,
        })?)?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
            base: literal_base(&normalized),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(&normalize(candidate))
    }

    pub fn matches_path(&self, candidate: &Path) -> bool {
        self.matches(&candidate.to_string_lossy())
    }

    /// Walk the filesystem below the pattern's literal prefix and return matching files, sorted
    pub fn discover_files(&self) -> PixlResult<Vec<PathBuf>> {
        if !self.base.exists() {
            debug!("Scenario base directory {} does not exist", self.base.display());
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.base)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| PathBuf::from(normalize(&e.path().to_string_lossy())))
            .filter(|path| self.matches_path(path))
            .collect();

        files.sort();
        debug!("Pattern '{}' matched {} file(s)", self.raw, files.len());
        Ok(files)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn normalize(path: &str) -> String {
    let mut path = path.replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}

fn has_meta(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

/// Directory to start walking from: every leading component free of glob syntax,
/// excluding the final (file) component.
fn literal_base(pattern: &str) -> PathBuf {
    let components: Vec<&str> = pattern.split('/').collect();
    let literal: Vec<&str> = components[..components.len() - 1]
        .iter()
        .take_while(|c| !has_meta(c))
        .copied()
        .collect();

    if literal.is_empty() {
        PathBuf::from(".")
    } else if literal == [""] {
        PathBuf::from("/")
    } else {
        PathBuf::from(literal.join("/"))
    }
}

fn translate(pattern: &str) -> Result<String, String> {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut brace_depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        regex.push_str("(?:[^/.][^/]*/)*");
                    } else {
                        regex.push_str(".*");
                    }
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' {
                        class.push_str("\\\\");
                    } else {
                        class.push(inner);
                    }
                }
                if !closed {
                    return Err("unterminated character class".to_string());
                }
                class.push(']');
                regex.push_str(&class);
            }
            '{' => {
                brace_depth += 1;
                regex.push_str("(?:");
            }
            ',' if brace_depth > 0 => regex.push('|'),
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                regex.push(')');
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }

    if brace_depth > 0 {
        return Err("unterminated brace group".to_string());
    }

    regex.push('$');
    Ok(regex)
}
