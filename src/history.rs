//! Tree of hash lists rooted at a sealed directory, with nested child
//! histories for subdirectories that carry their own sidecar (§4.5).

use std::collections::HashSet;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

use crate::error::MhlError;
use crate::hash::HashAlgorithm;
use crate::model::{HashEntry, HashList};
use crate::serializer;
use crate::sidecar;

/// One sidecar's ordered generations, plus any nested child histories
/// keyed by their path relative to this history's root.
#[derive(Debug)]
pub struct History {
    pub root_path: Utf8PathBuf,
    pub hash_lists: Vec<HashList>,
    pub child_histories: IndexMap<String, History>,
}

impl History {
    fn empty(root_path: Utf8PathBuf) -> Self {
        Self { root_path, hash_lists: Vec::new(), child_histories: IndexMap::new() }
    }

    /// Loads a history rooted at `root`, requiring a sidecar to already
    /// exist there. Used by `verify`/`diff`/`info`, which operate against
    /// an established history.
    pub fn load(root: &Utf8Path) -> Result<Self> {
        if !sidecar::sidecar_folder_exists(root) {
            return Err(MhlError::NoHistory { root: root.to_owned() }.into());
        }
        Self::load_from_path(root)
    }

    /// Loads a history rooted at `root` if a sidecar exists there,
    /// otherwise returns an empty history (no generations, no children).
    /// Used by `create`, whose first invocation against a tree has no
    /// prior sidecar at all.
    pub fn load_or_empty(root: &Utf8Path) -> Result<Self> {
        if !sidecar::sidecar_folder_exists(root) {
            return Ok(Self::empty(root.to_owned()));
        }
        Self::load_from_path(root)
    }

    fn load_from_path(root: &Utf8Path) -> Result<Self> {
        let sidecar_dir = sidecar::sidecar_folder_path(root);
        let mut hash_lists = Self::load_generations(&sidecar_dir, root)?;
        hash_lists.sort_by_key(|h| h.generation_number);
        Self::assert_contiguous(&sidecar_dir, &hash_lists)?;

        let child_histories = Self::scan_for_child_histories(root, root)?;

        Ok(Self { root_path: root.to_owned(), hash_lists, child_histories })
    }

    fn load_generations(sidecar_dir: &Utf8Path, root_path: &Utf8Path) -> Result<Vec<HashList>> {
        let mut hash_lists = Vec::new();
        let read_dir = std::fs::read_dir(sidecar_dir).with_context(|| format!("reading sidecar folder '{sidecar_dir}'"))?;
        for entry in read_dir {
            let entry = entry.with_context(|| format!("reading an entry of '{sidecar_dir}'"))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(&format!(".{}", sidecar::GENERATION_FILE_EXTENSION)) {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|p| anyhow::anyhow!("generation file path '{}' is not valid UTF-8", p.display()))?;

            let (_, filename_generation) = sidecar::parse_generation_filename(&name).ok_or_else(|| {
                MhlError::MalformedGeneration { path: path.clone(), reason: "filename does not match the generation naming convention".to_string() }
            })?;

            let contents = std::fs::read_to_string(&path).with_context(|| format!("reading generation file '{path}'"))?;
            let hash_list = serializer::decode(&contents, root_path.to_owned())
                .map_err(|e| MhlError::MalformedGeneration { path: path.clone(), reason: e.to_string() })?;

            if hash_list.generation_number != filename_generation {
                return Err(MhlError::MalformedGeneration {
                    path,
                    reason: format!(
                        "filename encodes generation {filename_generation} but file content says {}",
                        hash_list.generation_number
                    ),
                }
                .into());
            }

            hash_lists.push(hash_list);
        }
        Ok(hash_lists)
    }

    fn assert_contiguous(sidecar_dir: &Utf8Path, hash_lists: &[HashList]) -> Result<()> {
        for (index, hash_list) in hash_lists.iter().enumerate() {
            let expected = index as u32 + 1;
            if hash_list.generation_number != expected {
                return Err(MhlError::GenerationGap {
                    sidecar: sidecar_dir.to_owned(),
                    expected,
                    found: hash_list.generation_number,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Walks `current`'s subdirectories looking for nested sidecars. A
    /// directory that has its own sidecar becomes a child history boundary
    /// and is not descended into further from here — its own
    /// `load_from_path` call handles anything nested beneath it.
    fn scan_for_child_histories(current: &Utf8Path, history_root: &Utf8Path) -> Result<IndexMap<String, History>> {
        let mut children = IndexMap::new();
        let read_dir = match std::fs::read_dir(current) {
            Ok(d) => d,
            Err(_) => return Ok(children),
        };
        for entry in read_dir {
            let entry = entry.with_context(|| format!("reading an entry of '{current}'"))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == sidecar::SIDECAR_FOLDER_NAME {
                continue;
            }
            let child_path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|p| anyhow::anyhow!("path '{}' is not valid UTF-8", p.display()))?;

            if sidecar::sidecar_folder_exists(&child_path) {
                let relative = child_path
                    .strip_prefix(history_root)
                    .unwrap_or(&child_path)
                    .to_string();
                let child_history = Self::load_from_path(&child_path)?;
                children.insert(relative, child_history);
            } else {
                let nested = Self::scan_for_child_histories(&child_path, history_root)?;
                children.extend(nested);
            }
        }
        Ok(children)
    }

    /// Finds the history (self or a descendant) whose root is exactly
    /// `root_path`. Used by the session to resolve a pending generation's
    /// owning history at commit time.
    pub fn find_by_root_path(&self, root_path: &Utf8Path) -> Option<&History> {
        if self.root_path == root_path {
            return Some(self);
        }
        for child in self.child_histories.values() {
            if let Some(found) = child.find_by_root_path(root_path) {
                return Some(found);
            }
        }
        None
    }

    pub fn latest_generation_number(&self) -> u32 {
        self.hash_lists.last().map(|h| h.generation_number).unwrap_or(0)
    }

    /// Walks from `self` downward, at each step choosing the child whose
    /// key is the longest proper prefix of `rel`, returning the deepest
    /// history that owns `rel` and the remaining path within it.
    pub fn find_history_for_path<'a>(&'a self, rel: &str) -> (&'a History, String) {
        let mut current = self;
        let mut remaining = rel.to_string();
        loop {
            let mut best_key: Option<&str> = None;
            for key in current.child_histories.keys() {
                let is_prefix = remaining == *key || remaining.starts_with(&format!("{key}/"));
                if is_prefix && best_key.map(|b| key.len() > b.len()).unwrap_or(true) {
                    best_key = Some(key.as_str());
                }
            }

            match best_key {
                Some(key) => {
                    let child = &current.child_histories[key];
                    remaining = remaining.strip_prefix(key).unwrap_or(&remaining).trim_start_matches('/').to_string();
                    current = child;
                }
                None => return (current, remaining),
            }
        }
    }

    /// Scans generations in ascending order for the first `Original` entry
    /// recorded for `rel` (relative to this history, not re-resolved
    /// through child histories).
    pub fn find_original_hash_entry_for_path(&self, rel: &str) -> Option<&HashEntry> {
        for hash_list in &self.hash_lists {
            if let Some(media_hash) = hash_list.media_hash(rel) {
                if let Some(entry) = media_hash.hash_entries.iter().find(|e| e.action == crate::model::HashEntryAction::Original) {
                    return Some(entry);
                }
            }
        }
        None
    }

    /// Union of algorithms ever recorded for `rel` across this history's
    /// generations.
    pub fn find_existing_hash_formats_for_path(&self, rel: &str) -> HashSet<HashAlgorithm> {
        let mut algorithms = HashSet::new();
        for hash_list in &self.hash_lists {
            if let Some(media_hash) = hash_list.media_hash(rel) {
                for entry in &media_hash.hash_entries {
                    algorithms.insert(entry.value.algorithm);
                }
            }
        }
        algorithms
    }

    /// Looks up the most recent prior `HashEntry` for `(rel, algorithm)`,
    /// scanning generations newest-first.
    pub fn find_latest_hash_entry_for_path_and_algorithm(&self, rel: &str, algorithm: HashAlgorithm) -> Option<&HashEntry> {
        for hash_list in self.hash_lists.iter().rev() {
            if let Some(media_hash) = hash_list.media_hash(rel) {
                if let Some(entry) = media_hash.entry_for(algorithm) {
                    return Some(entry);
                }
            }
        }
        None
    }

    /// The union of file paths recorded across every generation in this
    /// history (child histories own their own paths separately), relative
    /// to `root_path` rather than absolute: every caller (`cli`'s
    /// known/touched-path bookkeeping, `find_history_for_path`) works in
    /// root-relative terms, so resolving to absolute paths here would only
    /// push a `root_path.join(..)` onto every call site. Join with
    /// `root_path` at the boundary where an absolute path is actually
    /// needed (currently none are).
    pub fn set_of_file_paths(&self) -> HashSet<String> {
        let mut paths = HashSet::new();
        for hash_list in &self.hash_lists {
            for media_hash in hash_list.media_hashes_sorted() {
                paths.insert(media_hash.relative_path.clone());
            }
        }
        paths
    }

    pub fn latest_ignore_patterns(&self) -> Vec<String> {
        self.hash_lists.last().map(|h| h.process.ignore_patterns.clone()).unwrap_or_default()
    }
}
