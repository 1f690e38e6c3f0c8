//! Logical data model for one generation (a `HashList`) and everything it
//! is built from: hash values, media/directory hashes, and the creator and
//! process metadata stamped onto every generation.

use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;

use crate::hash::HashAlgorithm;

/// `(algorithm, digest_string)`. The digest string is each algorithm's
/// canonical encoding: lowercase hex for MD5/SHA-1/XXH32/XXH64, the `c4`
/// form for C4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashValue {
    pub algorithm: HashAlgorithm,
    pub digest: String,
}

impl HashValue {
    pub fn new(algorithm: HashAlgorithm, digest: impl Into<String>) -> Self {
        Self { algorithm, digest: digest.into() }
    }
}

/// What a [`HashEntry`] means within the generation that contains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashEntryAction {
    /// First time this path was ever recorded, in any algorithm.
    Original,
    /// This generation re-hashed and matched a prior entry.
    Verified,
    /// This generation re-hashed and the digest differed from a prior entry.
    Failed,
    /// A new algorithm was added for an already-known path, or the path
    /// itself is new and this is not the `Original` entry for it.
    New,
}

#[derive(Debug, Clone)]
pub struct HashEntry {
    pub value: HashValue,
    pub action: HashEntryAction,
}

impl HashEntry {
    pub fn new(value: HashValue, action: HashEntryAction) -> Self {
        Self { value, action }
    }
}

/// One file's record within a generation. `relative_path` is forward-slash
/// normalized, never absolute, never empty, never starting with `./`. At
/// most one [`HashEntry`] per algorithm.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct MediaHash {
    pub relative_path: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<FixedOffset>,
    pub hash_entries: Vec<HashEntry>,
    /// Fields the decoder didn't recognize, preserved verbatim on re-encode.
    pub extra: IndexMap<String, String>,
}

impl MediaHash {
    pub fn new(relative_path: impl Into<String>, size_bytes: u64, last_modified: DateTime<FixedOffset>) -> anyhow::Result<Self> {
        let relative_path = relative_path.into();
        validate_relative_path(&relative_path)?;
        Ok(Self {
            relative_path,
            size_bytes,
            last_modified,
            hash_entries: Vec::new(),
            extra: IndexMap::new(),
        })
    }

    /// Inserts or replaces the entry for `entry.value.algorithm`, preserving
    /// the "at most one entry per algorithm" invariant.
    pub fn set_hash_entry(&mut self, entry: HashEntry) -> &mut Self {
        if let Some(existing) = self.hash_entries.iter_mut().find(|e| e.value.algorithm == entry.value.algorithm) {
            *existing = entry;
        } else {
            self.hash_entries.push(entry);
        }
        self
    }

    pub fn entry_for(&self, algorithm: HashAlgorithm) -> Option<&HashEntry> {
        self.hash_entries.iter().find(|e| e.value.algorithm == algorithm)
    }

    /// Hash entries in descending algorithm-priority order, per §4.7.
    pub fn hash_entries_by_priority(&self) -> Vec<&HashEntry> {
        let mut entries: Vec<&HashEntry> = self.hash_entries.iter().collect();
        entries.sort_by(|a, b| b.value.algorithm.cmp(&a.value.algorithm));
        entries
    }
}

fn validate_relative_path(path: &str) -> anyhow::Result<()> {
    if path.is_empty() {
        anyhow::bail!("relative_path must not be empty");
    }
    if path.starts_with('/') {
        anyhow::bail!("relative_path '{path}' must not be absolute");
    }
    if path.starts_with("./") {
        anyhow::bail!("relative_path '{path}' must not start with './'");
    }
    Ok(())
}

/// `(relative_path, algorithm)` pair identifying a folder's aggregated hash
/// for one generation.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DirectoryHash {
    pub relative_path: String,
    pub last_modified: DateTime<FixedOffset>,
    pub hash_value: HashValue,
}

impl DirectoryHash {
    pub fn new(relative_path: impl Into<String>, last_modified: DateTime<FixedOffset>, hash_value: HashValue) -> anyhow::Result<Self> {
        let relative_path = relative_path.into();
        if !relative_path.is_empty() {
            validate_relative_path(&relative_path)?;
        }
        Ok(Self { relative_path, last_modified, hash_value })
    }
}

/// Immutable per-generation provenance.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CreatorInfo {
    pub creation_date: DateTime<FixedOffset>,
    pub host_name: String,
    pub tool_name: String,
    pub tool_version: String,
}

/// `process_type` is a free-form label (e.g. `in-place`); `ignore_patterns`
/// is persisted so future verifications can reconstruct the same
/// exclusion semantics (§4.3).
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct ProcessInfo {
    pub process_type: String,
    pub ignore_patterns: Vec<String>,
}

/// One generation: creator info, process info, the ordered media/directory
/// hashes recorded in it, and C4 references back to prior generation files
/// (the self-referencing chain described in §6).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct HashList {
    pub generation_number: u32,
    pub root_path: Utf8PathBuf,
    pub creator: CreatorInfo,
    pub process: ProcessInfo,
    media_hashes: IndexMap<String, MediaHash>,
    pub directory_hashes: Vec<DirectoryHash>,
    /// C4 digests of prior generation files in this sidecar, keyed by the
    /// generation number they reference.
    pub references: Vec<(u32, HashValue)>,
    pub extra: IndexMap<String, String>,
}

impl HashList {
    pub fn new(generation_number: u32, root_path: Utf8PathBuf, creator: CreatorInfo, process: ProcessInfo) -> Self {
        Self {
            generation_number,
            root_path,
            creator,
            process,
            media_hashes: IndexMap::new(),
            directory_hashes: Vec::new(),
            references: Vec::new(),
            extra: IndexMap::new(),
        }
    }

    /// Inserts a new `MediaHash`, or merges `hash.hash_entries` into the
    /// existing record for the same path (a file may be touched by more
    /// than one `append_file_hash` call in one session, one per algorithm).
    pub fn upsert_media_hash(&mut self, hash: MediaHash) {
        match self.media_hashes.get_mut(&hash.relative_path) {
            Some(existing) => {
                existing.size_bytes = hash.size_bytes;
                existing.last_modified = hash.last_modified;
                for entry in hash.hash_entries {
                    existing.set_hash_entry(entry);
                }
            }
            None => {
                self.media_hashes.insert(hash.relative_path.clone(), hash);
            }
        }
    }

    pub fn media_hash(&self, relative_path: &str) -> Option<&MediaHash> {
        self.media_hashes.get(relative_path)
    }

    pub fn media_hash_mut(&mut self, relative_path: &str) -> Option<&mut MediaHash> {
        self.media_hashes.get_mut(relative_path)
    }

    /// All media hashes, in lexicographic order of `relative_path` (§4.7).
    pub fn media_hashes_sorted(&self) -> Vec<&MediaHash> {
        let mut entries: Vec<&MediaHash> = self.media_hashes.values().collect();
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        entries
    }

    pub fn media_hash_count(&self) -> usize {
        self.media_hashes.len()
    }

    pub fn add_directory_hash(&mut self, hash: DirectoryHash) {
        self.directory_hashes.push(hash);
    }

    /// Directory hashes in lexicographic order of `relative_path` (§4.7).
    pub fn directory_hashes_sorted(&self) -> Vec<&DirectoryHash> {
        let mut entries: Vec<&DirectoryHash> = self.directory_hashes.iter().collect();
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        entries
    }
}
