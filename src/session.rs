//! The transactional builder that accumulates one pending generation per
//! touched sidecar and commits them atomically (§4.6).

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;

use crate::hash::{hash_bytes, HashAlgorithm};
use crate::history::History;
use crate::model::{CreatorInfo, DirectoryHash, HashEntry, HashEntryAction, HashList, HashValue, MediaHash, ProcessInfo};
use crate::serializer;
use crate::sidecar;

/// Per-`append_file_hash` outcome returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub action: HashEntryAction,
    pub ok: bool,
    /// The prior digest this entry was checked against, set only for
    /// `Verified`/`Failed` outcomes.
    pub previous_digest: Option<String>,
}

/// Borrows a [`History`] (read-only) and accumulates pending generations
/// for every sidecar touched during the walk. Not reusable after
/// [`GenerationCreationSession::commit`] — the consuming signature makes a
/// double commit a type error, matching the "session as builder" design
/// note.
pub struct GenerationCreationSession {
    history: History,
    pending: IndexMap<Utf8PathBuf, HashList>,
}

impl GenerationCreationSession {
    pub fn new(history: History) -> Self {
        Self { history, pending: IndexMap::new() }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    fn pending_for(&mut self, owning_root: &Utf8Path) -> &mut HashList {
        if !self.pending.contains_key(owning_root) {
            let epoch: DateTime<chrono::Utc> = std::time::SystemTime::UNIX_EPOCH.into();
            let placeholder = HashList::new(
                0,
                owning_root.to_owned(),
                CreatorInfo {
                    creation_date: epoch.with_timezone(&FixedOffset::east_opt(0).expect("zero offset is always valid")),
                    host_name: String::new(),
                    tool_name: String::new(),
                    tool_version: String::new(),
                },
                ProcessInfo::default(),
            );
            self.pending.insert(owning_root.to_owned(), placeholder);
        }
        self.pending.get_mut(owning_root).expect("just inserted above")
    }

    /// Records one file's hash. `rel_from_root` is the path relative to the
    /// session's overall root (before resolving which nested history
    /// actually owns it). Returns the resulting action and whether the
    /// entry is considered verified (§4.6 four-case logic).
    pub fn append_file_hash(
        &mut self,
        rel_from_root: &str,
        size_bytes: u64,
        last_modified: DateTime<FixedOffset>,
        algorithm: HashAlgorithm,
        digest: String,
    ) -> anyhow::Result<AppendOutcome> {
        let (owning_history, local_rel) = self.history.find_history_for_path(rel_from_root);
        let owning_root = owning_history.root_path.clone();

        let already_in_history = owning_history.find_original_hash_entry_for_path(&local_rel).is_some();
        let prior_same_algorithm = owning_history
            .find_latest_hash_entry_for_path_and_algorithm(&local_rel, algorithm)
            .map(|e| e.value.digest.clone());

        let pending = self.pending_for(&owning_root);
        let already_in_pending = pending.media_hash(&local_rel).is_some();
        let pending_same_algorithm = pending.media_hash(&local_rel).and_then(|m| m.entry_for(algorithm)).map(|e| e.value.digest.clone());

        let is_original = !already_in_history && !already_in_pending;
        let prior_digest = pending_same_algorithm.or(prior_same_algorithm);

        let (action, ok, previous_digest) = if is_original {
            (HashEntryAction::Original, true, None)
        } else if let Some(prior_digest) = prior_digest {
            if prior_digest == digest {
                (HashEntryAction::Verified, true, Some(prior_digest))
            } else {
                (HashEntryAction::Failed, false, Some(prior_digest))
            }
        } else {
            (HashEntryAction::New, true, None)
        };

        let mut media_hash = pending
            .media_hash(&local_rel)
            .cloned()
            .unwrap_or(MediaHash::new(local_rel.clone(), size_bytes, last_modified)?);
        media_hash.size_bytes = size_bytes;
        media_hash.last_modified = last_modified;
        media_hash.set_hash_entry(HashEntry::new(HashValue::new(algorithm, digest), action));
        pending.upsert_media_hash(media_hash);

        Ok(AppendOutcome { action, ok, previous_digest })
    }

    /// Records a directory's aggregated hash. No verification against
    /// prior directory hashes is performed (§4.6).
    pub fn append_directory_hash(
        &mut self,
        rel_from_root: &str,
        last_modified: DateTime<FixedOffset>,
        algorithm: HashAlgorithm,
        digest: String,
    ) -> anyhow::Result<()> {
        let (owning_history, local_rel) = self.history.find_history_for_path(rel_from_root);
        let owning_root = owning_history.root_path.clone();
        let pending = self.pending_for(&owning_root);
        pending.add_directory_hash(DirectoryHash::new(local_rel, last_modified, HashValue::new(algorithm, digest))?);
        Ok(())
    }

    /// Assigns each pending `HashList` the next generation number for its
    /// sidecar, stamps creator/process info, serializes, and writes each
    /// generation file in turn. Stops at the first write failure, leaving
    /// already-written sidecars in place (§4.6, §5).
    pub fn commit(mut self, tool_name: &str, tool_version: &str, host_name: &str, process_type: &str) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let mut written = Vec::new();

        let roots: Vec<Utf8PathBuf> = self.pending.keys().cloned().collect();
        for root in roots {
            let mut hash_list = self.pending.shift_remove(&root).expect("root came from pending.keys()");

            let owning_history = self
                .history
                .find_by_root_path(&root)
                .ok_or_else(|| crate::anyhow_loc!("no history found for pending root '{root}'"))?;
            let generation_number = owning_history.latest_generation_number() + 1;

            let creation_date: DateTime<FixedOffset> = chrono::Local::now().into();
            hash_list.generation_number = generation_number;
            hash_list.creator = CreatorInfo {
                creation_date,
                host_name: host_name.to_string(),
                tool_name: tool_name.to_string(),
                tool_version: tool_version.to_string(),
            };
            hash_list.process = ProcessInfo {
                process_type: process_type.to_string(),
                ignore_patterns: owning_history.latest_ignore_patterns(),
            };

            hash_list.references = Self::collect_references(owning_history, &root)?;

            let folder_basename = root.file_name().unwrap_or("root").to_string();
            let filename = sidecar::generation_filename(&folder_basename, creation_date, generation_number);
            let sidecar_dir = sidecar::sidecar_folder_path(&root);
            let file_path = sidecar_dir.join(&filename);

            let xml = serializer::encode(&hash_list)?;
            sidecar::write_atomic(&file_path, xml.as_bytes())?;

            let own_digest = hash_bytes(HashAlgorithm::C4, xml.as_bytes());
            sidecar::append_chain_line(&root, &sidecar::chain_line(HashAlgorithm::C4, &filename, &own_digest));

            written.push(file_path);
        }

        Ok(written)
    }

    /// C4 digests of every prior generation file still on disk for this
    /// sidecar, used as the self-referencing chain (§6).
    fn collect_references(history: &History, root: &Utf8Path) -> anyhow::Result<Vec<(u32, HashValue)>> {
        let sidecar_dir = sidecar::sidecar_folder_path(root);
        let mut references = Vec::new();
        for hash_list in &history.hash_lists {
            let folder_basename = root.file_name().unwrap_or("root").to_string();
            let filename = sidecar::generation_filename(&folder_basename, hash_list.creator.creation_date, hash_list.generation_number);
            let path = sidecar_dir.join(&filename);
            if let Ok(bytes) = std::fs::read(&path) {
                let digest = hash_bytes(HashAlgorithm::C4, &bytes);
                references.push((hash_list.generation_number, HashValue::new(HashAlgorithm::C4, digest)));
            }
        }
        Ok(references)
    }
}
