//! In-memory model of the files materialized by a single image layer.

use std::collections::{HashMap, HashSet};

use crate::core::elf::ElfMetadata;

pub mod extract;

/// Marker file indicating the whole directory is absent from lower layers.
pub const OPAQUE_DIR_MARKER: &str = ".wh..wh..opq";
/// Prefix marking a single deleted path.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Contents and metadata of one extracted file.
#[derive(Clone, Debug, Default)]
pub struct FileData {
    pub contents: Vec<u8>,
    pub executable: bool,
    pub elf_metadata: Option<ElfMetadata>,
}

/// The files of one layer: path→data plus the symlink table and the paths
/// this layer deletes from its ancestors.
///
/// Paths are `/`-separated and relative (no leading slash); directory
/// entries keep their trailing slash.
#[derive(Clone, Debug, Default)]
pub struct LayerFiles {
    data: HashMap<String, FileData>,
    links: HashMap<String, String>,
    removed: HashSet<String>,
}

impl LayerFiles {
    pub fn new(data: HashMap<String, FileData>) -> Self {
        let mut files = Self {
            data,
            ..Self::default()
        };
        files.detect_removed_files();
        files
    }

    pub fn files(&self) -> &HashMap<String, FileData> {
        &self.data
    }

    pub fn insert(&mut self, path: impl Into<String>, data: FileData) {
        self.data.insert(path.into(), data);
    }

    pub fn insert_link(&mut self, path: impl Into<String>, target: impl Into<String>) {
        self.links.insert(path.into(), target.into());
    }

    /// Resolves `path` through the symlink table and returns its data.
    ///
    /// A trailing slash on the query is preserved across resolution so
    /// directory entries stay addressable through directory-level links.
    pub fn get(&self, path: &str) -> Option<&FileData> {
        let mut resolved = self.resolve(path);
        if path.ends_with('/') && !resolved.ends_with('/') {
            resolved.push('/');
        }
        self.data.get(&resolved)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Paths this layer whites out, normalized at ingestion.
    pub fn removed_files(&self) -> Vec<String> {
        let mut removed: Vec<String> = self.removed.iter().cloned().collect();
        removed.sort();
        removed
    }

    /// Inherits the base layer's symlinks (unless shadowed or removed here),
    /// then flattens every link target through the merged table once.
    pub fn merge_base_and_resolve_symlinks(&mut self, base: Option<&LayerFiles>) {
        if let Some(base) = base {
            for (name, target) in &base.links {
                if self.removed.contains(name) || self.links.contains_key(name) {
                    continue;
                }
                self.links.insert(name.clone(), target.clone());
            }
        }
        let names: Vec<String> = self.links.keys().cloned().collect();
        for name in names {
            let target = self.links[&name].clone();
            let resolved = self.resolve(&target);
            self.links.insert(name, resolved);
        }
    }

    fn detect_removed_files(&mut self) {
        for path in self.data.keys() {
            let base = path_base(path);
            if base == OPAQUE_DIR_MARKER {
                // The entire directory does not exist in lower layers.
                self.removed.insert(path_dir(path).to_string());
            } else if let Some(stripped) = base.strip_prefix(WHITEOUT_PREFIX) {
                let removed = if path == base {
                    stripped.to_string()
                } else {
                    format!("{}/{}", path_dir(path), stripped)
                };
                self.removed.insert(removed);
            }
        }
    }

    /// Walks `path` component by component, substituting symlink targets.
    ///
    /// Each link is followed at most once; on a cycle the current partial
    /// resolution is returned as best effort.
    fn resolve(&self, path: &str) -> String {
        let mut resolved = path.to_string();
        let mut visited: HashSet<String> = HashSet::new();
        let mut pending: Vec<String> = path.split('/').map(str::to_string).collect();
        pending.reverse();
        let mut current = String::from(".");
        while let Some(component) = pending.pop() {
            current = clean_path(&format!("{current}/{component}"));
            if let Some(target) = self.links.get(&current) {
                if visited.contains(&current) {
                    return resolved;
                }
                visited.insert(current.clone());
                let mut replacement: Vec<String> =
                    target.split('/').map(str::to_string).collect();
                replacement.reverse();
                pending.extend(replacement);
                let mut parts: Vec<&str> = pending.iter().map(String::as_str).collect();
                parts.reverse();
                resolved = parts.join("/");
                current = String::from(".");
            }
        }
        resolved
    }
}

/// Final component of a `/`-separated path.
pub(crate) fn path_base(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, base)) => base,
        None => trimmed,
    }
}

/// Directory part of a `/`-separated path; `.` when there is none.
pub(crate) fn path_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir,
        _ => ".",
    }
}

/// Lexical cleanup of a relative `/`-separated path, in the manner of
/// `path.Clean`: collapses `.`, empty components and inner `..`.
pub(crate) fn clean_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match out.last() {
                Some(last) if *last != ".." => {
                    out.pop();
                }
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        ".".to_string()
    } else {
        out.join("/")
    }
}
