//! Library-side implementation of the `create`/`verify`/`diff`/`info`
//! subcommands (§4.9). `main.rs` only parses arguments and prints reports;
//! every filesystem-touching decision lives here so it can be exercised
//! directly from tests.

use std::collections::HashSet;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, FixedOffset};

use crate::error::MhlError;
use crate::hash::{digest_for_string, hash_file, HashAlgorithm};
use crate::history::History;
use crate::ignore::MhlIgnoreSpec;
use crate::session::GenerationCreationSession;
use crate::sidecar::SIDECAR_FOLDER_NAME;
use crate::traversal::PostOrderWalk;

/// Identity/provenance the caller stamps onto every generation it writes.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub tool_name: String,
    pub tool_version: String,
    pub host_name: String,
    pub process_type: String,
}

#[derive(Debug, Default)]
pub struct CreateReport {
    pub generation_files: Vec<Utf8PathBuf>,
    pub original_count: usize,
    pub verified_count: usize,
    pub failed: Vec<(String, HashAlgorithm, String, String)>,
    pub missing: Vec<String>,
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub verified: Vec<String>,
    pub mismatches: Vec<(String, HashAlgorithm, String, String)>,
    pub missing: Vec<String>,
    pub new: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DiffReport {
    pub missing: Vec<String>,
    pub new: Vec<String>,
}

#[derive(Debug)]
pub struct InfoReport {
    pub relative_path: String,
    /// `(generation_number, algorithm, digest, action)` rows, in the order
    /// generations were recorded.
    pub entries: Vec<(u32, HashAlgorithm, String, crate::model::HashEntryAction)>,
}

fn relative_to_root(root: &Utf8Path, abs: &Utf8Path) -> String {
    let raw = abs.strip_prefix(root).unwrap_or(abs).as_str();
    crate::util::normalize_relative_path(raw)
}

fn file_mtime(path: &Utf8Path) -> Result<DateTime<FixedOffset>> {
    let metadata = std::fs::metadata(path).with_context(|| format!("reading metadata for '{path}'"))?;
    let modified = metadata.modified().with_context(|| format!("reading mtime for '{path}'"))?;
    let local: DateTime<chrono::Local> = modified.into();
    let offset = *local.offset();
    Ok(local.with_timezone(&offset))
}

/// Hashes `abs_path` and records it in `session`, implementing spec.md
/// §4.6's cross-algorithm verify-before-seal protocol: if the path already
/// has prior entries in some other algorithm and none yet in `algorithm`,
/// the highest-priority of those prior algorithms is re-verified first; the
/// `algorithm` entry is only added if that check passes. Returns the
/// target-algorithm digest (computed regardless of outcome, since a caller
/// folding directory hashes needs it either way — mirrors
/// `seal_file_path`'s `current_format_hash` return in the original) plus
/// every outcome recorded along the way.
fn seal_file(
    session: &mut GenerationCreationSession,
    rel_path: &str,
    abs_path: &Utf8Path,
    size_bytes: u64,
    mtime: DateTime<FixedOffset>,
    algorithm: HashAlgorithm,
) -> Result<(String, Vec<(HashAlgorithm, crate::session::AppendOutcome, String)>)> {
    let mut outcomes = Vec::new();

    let (owning_history, local_rel) = session.history().find_history_for_path(rel_path);
    let existing_formats = owning_history.find_existing_hash_formats_for_path(&local_rel);

    if !existing_formats.is_empty() && !existing_formats.contains(&algorithm) {
        let cross_algorithm = *existing_formats.iter().max().expect("checked non-empty above");
        let digests = hash_file(abs_path, &[cross_algorithm])?;
        let cross_digest = digests
            .get(&cross_algorithm)
            .cloned()
            .ok_or_else(|| MhlError::UnsupportedAlgorithm { name: cross_algorithm.to_string() })?;
        let outcome = session.append_file_hash(rel_path, size_bytes, mtime, cross_algorithm, cross_digest.clone())?;
        let cross_check_failed = !outcome.ok;
        outcomes.push((cross_algorithm, outcome, cross_digest));
        if cross_check_failed {
            // Still compute the target digest for directory-hash folding,
            // but do not record it: a corrupted file must not "freshen"
            // its hash under a new algorithm.
            let digests = hash_file(abs_path, &[algorithm])?;
            let digest = digests
                .get(&algorithm)
                .cloned()
                .ok_or_else(|| MhlError::UnsupportedAlgorithm { name: algorithm.to_string() })?;
            return Ok((digest, outcomes));
        }
    }

    let digests = hash_file(abs_path, &[algorithm])?;
    let digest = digests
        .get(&algorithm)
        .cloned()
        .ok_or_else(|| MhlError::UnsupportedAlgorithm { name: algorithm.to_string() })?;
    let outcome = session.append_file_hash(rel_path, size_bytes, mtime, algorithm, digest.clone())?;
    outcomes.push((algorithm, outcome, digest.clone()));
    Ok((digest, outcomes))
}

/// Every relative path recorded anywhere in `history`, including its
/// nested child histories, each path prefixed by the child's own key.
fn collect_known_paths(history: &History, prefix: &str) -> HashSet<String> {
    let mut paths = HashSet::new();
    for path in history.set_of_file_paths() {
        let full = if prefix.is_empty() { path } else { format!("{prefix}/{path}") };
        paths.insert(full);
    }
    for (key, child) in &history.child_histories {
        let child_prefix = if prefix.is_empty() { key.clone() } else { format!("{prefix}/{key}") };
        paths.extend(collect_known_paths(child, &child_prefix));
    }
    paths
}

/// Runs a full `create` seal over `root` with a single content-hash
/// algorithm, recording directory content hashes as it folds back up
/// (§4.2, §4.6). Root-relative directory hashes (including the root
/// itself) are recorded with an empty `relative_path` for the root.
pub fn run_create(root: &Utf8Path, algorithm: HashAlgorithm, ad_hoc_patterns: &[String], tool: &ToolInfo) -> Result<CreateReport> {
    let history = History::load_or_empty(root)?;
    let known_paths = collect_known_paths(&history, "");

    let ignore_spec = MhlIgnoreSpec::build(root, &history.latest_ignore_patterns(), ad_hoc_patterns, None, SIDECAR_FOLDER_NAME)?;

    let mut session = GenerationCreationSession::new(history);
    let mut content_ctx = crate::hash::DirectoryContentHashContext::new(algorithm);
    let mut structure_hashes: indexmap::IndexMap<String, String> = indexmap::IndexMap::new();

    let mut report = CreateReport::default();
    let mut touched_paths: HashSet<String> = HashSet::new();

    let walk = PostOrderWalk::new(root, &ignore_spec)?;
    for step in walk {
        let (folder_abs, children) = step?;
        let folder_rel = relative_to_root(root, &folder_abs);
        let mut structure_ctx = crate::hash::DirectoryStructureHashContext::new(algorithm);

        for (name, is_dir) in &children {
            let child_rel = crate::util::normalize_relative_path(&if folder_rel.is_empty() { name.clone() } else { format!("{folder_rel}/{name}") });

            if *is_dir {
                let subfolder_hash = structure_hashes
                    .get(&child_rel)
                    .cloned()
                    .unwrap_or_else(|| digest_for_string("", algorithm));
                structure_ctx.append_subfolder_and_hash(name, subfolder_hash);
                continue;
            }

            let abs_path = folder_abs.join(name);
            let metadata = std::fs::metadata(&abs_path).with_context(|| format!("reading metadata for '{abs_path}'"))?;
            let size_bytes = metadata.len();
            let mtime = file_mtime(&abs_path)?;

            let (digest, outcomes) = seal_file(&mut session, &child_rel, &abs_path, size_bytes, mtime, algorithm)?;
            touched_paths.insert(child_rel.clone());

            for (recorded_algorithm, outcome, recorded_digest) in &outcomes {
                match outcome.action {
                    crate::model::HashEntryAction::Original => report.original_count += 1,
                    crate::model::HashEntryAction::Verified => report.verified_count += 1,
                    crate::model::HashEntryAction::Failed => {
                        let expected = outcome.previous_digest.clone().unwrap_or_default();
                        report.failed.push((child_rel.clone(), *recorded_algorithm, expected, recorded_digest.clone()));
                    }
                    crate::model::HashEntryAction::New => {}
                }
            }

            content_ctx.append_content_hash(&child_rel, digest);
            structure_ctx.append_filename(name);
        }

        let final_structure = structure_ctx.final_structure_hash()?;
        structure_hashes.insert(folder_rel.clone(), final_structure);

        let prefix = if folder_rel.is_empty() { String::new() } else { format!("{folder_rel}/") };
        let final_content = content_ctx.final_content_hash_for_directory_prefix(&prefix)?;
        let folder_mtime = file_mtime(&folder_abs)?;

        session.append_directory_hash(&folder_rel, folder_mtime, algorithm, final_content)?;
    }

    report.missing = known_paths
        .into_iter()
        .filter(|p| !touched_paths.contains(p))
        .filter(|p| !ignore_spec.matches(p, false))
        .collect();
    report.missing.sort();

    report.generation_files = session.commit(&tool.tool_name, &tool.tool_version, &tool.host_name, &tool.process_type)?;

    Ok(report)
}

/// Creates a new generation covering only the given files (or, for a
/// directory argument, every file beneath it), without a full tree walk,
/// directory-hash folding, or missing-file detection
/// (`create_for_single_files_subcommand` equivalent, §4.9). Files present in
/// history but not named here, and files on disk that are neither named
/// here nor already in history, are simply not touched by this command.
pub fn run_create_single_files(root: &Utf8Path, input_paths: &[Utf8PathBuf], algorithm: HashAlgorithm, tool: &ToolInfo) -> Result<CreateReport> {
    let history = History::load_or_empty(root)?;
    let ignore_spec = MhlIgnoreSpec::build(root, &history.latest_ignore_patterns(), &[], None, SIDECAR_FOLDER_NAME)?;

    let mut session = GenerationCreationSession::new(history);
    let mut report = CreateReport::default();

    let mut file_paths: Vec<Utf8PathBuf> = Vec::new();
    for input in input_paths {
        if input.is_dir() {
            let walk = PostOrderWalk::new(input, &ignore_spec)?;
            for step in walk {
                let (folder_abs, children) = step?;
                for (name, is_dir) in children {
                    if is_dir {
                        continue;
                    }
                    file_paths.push(folder_abs.join(name));
                }
            }
        } else {
            file_paths.push(input.clone());
        }
    }
    file_paths.sort();
    file_paths.dedup();

    for abs_path in &file_paths {
        let child_rel = relative_to_root(root, abs_path);
        let metadata = std::fs::metadata(abs_path).with_context(|| format!("reading metadata for '{abs_path}'"))?;
        let size_bytes = metadata.len();
        let mtime = file_mtime(abs_path)?;

        let (_, outcomes) = seal_file(&mut session, &child_rel, abs_path, size_bytes, mtime, algorithm)?;
        for (recorded_algorithm, outcome, recorded_digest) in &outcomes {
            match outcome.action {
                crate::model::HashEntryAction::Original => report.original_count += 1,
                crate::model::HashEntryAction::Verified => report.verified_count += 1,
                crate::model::HashEntryAction::Failed => {
                    let expected = outcome.previous_digest.clone().unwrap_or_default();
                    report.failed.push((child_rel.clone(), *recorded_algorithm, expected, recorded_digest.clone()));
                }
                crate::model::HashEntryAction::New => {}
            }
        }
    }

    report.generation_files = session.commit(&tool.tool_name, &tool.tool_version, &tool.host_name, &tool.process_type)?;

    Ok(report)
}

/// Re-hashes every file on disk against its existing highest-priority
/// algorithm and reports mismatches, missing files, and new files. Does
/// not write a new generation (§4.9).
pub fn run_verify(root: &Utf8Path, ad_hoc_patterns: &[String]) -> Result<VerifyReport> {
    let history = History::load(root)?;
    let known_paths = collect_known_paths(&history, "");
    let ignore_spec = MhlIgnoreSpec::build(root, &history.latest_ignore_patterns(), ad_hoc_patterns, None, SIDECAR_FOLDER_NAME)?;

    let mut report = VerifyReport::default();
    let mut touched_paths: HashSet<String> = HashSet::new();

    let walk = PostOrderWalk::new(root, &ignore_spec)?;
    for step in walk {
        let (folder_abs, children) = step?;
        let folder_rel = relative_to_root(root, &folder_abs);

        for (name, is_dir) in &children {
            if *is_dir {
                continue;
            }
            let child_rel = crate::util::normalize_relative_path(&if folder_rel.is_empty() { name.clone() } else { format!("{folder_rel}/{name}") });
            touched_paths.insert(child_rel.clone());

            let (owning_history, local_rel) = history.find_history_for_path(&child_rel);

            let Some(original_entry) = owning_history.find_original_hash_entry_for_path(&local_rel) else {
                report.new.push(child_rel);
                continue;
            };
            let algorithm = original_entry.value.algorithm;
            let expected = original_entry.value.digest.clone();

            let abs_path = folder_abs.join(name);
            let digests = hash_file(&abs_path, &[algorithm])?;
            let actual = digests
                .get(&algorithm)
                .cloned()
                .ok_or_else(|| MhlError::UnsupportedAlgorithm { name: algorithm.to_string() })?;

            if actual == expected {
                report.verified.push(child_rel);
            } else {
                report.mismatches.push((child_rel, algorithm, expected, actual));
            }
        }
    }

    report.missing = known_paths
        .into_iter()
        .filter(|p| !touched_paths.contains(p))
        .filter(|p| !ignore_spec.matches(p, false))
        .collect();
    report.missing.sort();
    report.new.sort();
    report.verified.sort();

    Ok(report)
}

/// Presence-only comparison: which known paths are missing from disk, and
/// which files on disk were never recorded. No hashing is performed
/// (Open Question 2: directory-level additions are not detected).
pub fn run_diff(root: &Utf8Path, ad_hoc_patterns: &[String]) -> Result<DiffReport> {
    let history = History::load(root)?;
    let known_paths = collect_known_paths(&history, "");
    let ignore_spec = MhlIgnoreSpec::build(root, &history.latest_ignore_patterns(), ad_hoc_patterns, None, SIDECAR_FOLDER_NAME)?;

    let mut on_disk: HashSet<String> = HashSet::new();
    let walk = PostOrderWalk::new(root, &ignore_spec)?;
    for step in walk {
        let (folder_abs, children) = step?;
        let folder_rel = relative_to_root(root, &folder_abs);
        for (name, is_dir) in &children {
            if *is_dir {
                continue;
            }
            let child_rel = crate::util::normalize_relative_path(&if folder_rel.is_empty() { name.clone() } else { format!("{folder_rel}/{name}") });
            on_disk.insert(child_rel);
        }
    }

    let mut missing: Vec<String> = known_paths.difference(&on_disk).cloned().collect();
    missing.sort();
    let mut new: Vec<String> = on_disk.difference(&known_paths).cloned().collect();
    new.sort();

    Ok(DiffReport { missing, new })
}

/// Every generation's recorded hash entries for one file (§4.9's
/// `info_for_single_file` equivalent).
pub fn run_info(root: &Utf8Path, file_rel: &str) -> Result<InfoReport> {
    let history = History::load(root)?;
    let (owning_history, local_rel) = history.find_history_for_path(file_rel);

    let mut entries = Vec::new();
    for hash_list in &owning_history.hash_lists {
        if let Some(media_hash) = hash_list.media_hash(&local_rel) {
            for entry in media_hash.hash_entries_by_priority() {
                entries.push((hash_list.generation_number, entry.value.algorithm, entry.value.digest.clone(), entry.action));
            }
        }
    }

    Ok(InfoReport { relative_path: local_rel, entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tool_info() -> ToolInfo {
        ToolInfo {
            tool_name: "ascmhl".to_string(),
            tool_version: "0.1.0-test".to_string(),
            host_name: "test-host".to_string(),
            process_type: "in-place".to_string(),
        }
    }

    fn write_tree(root: &Utf8Path) {
        fs::create_dir_all(root.join("Clips")).unwrap();
        fs::write(root.join("Clips/test1.mov"), b"one").unwrap();
        fs::write(root.join("Clips/test2.mov"), b"two").unwrap();
        fs::write(root.join("root.txt"), b"root").unwrap();
    }

    #[test]
    fn create_then_verify_round_trips_clean() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        write_tree(&root);

        let report = run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();
        assert_eq!(report.generation_files.len(), 1);
        assert_eq!(report.original_count, 3);
        assert!(report.failed.is_empty());
        assert!(report.missing.is_empty());

        let verify = run_verify(&root, &[]).unwrap();
        assert_eq!(verify.verified.len(), 3);
        assert!(verify.mismatches.is_empty());
        assert!(verify.missing.is_empty());
        assert!(verify.new.is_empty());
    }

    #[test]
    fn verify_detects_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        write_tree(&root);
        run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();

        fs::write(root.join("Clips/test1.mov"), b"corrupted!").unwrap();

        let verify = run_verify(&root, &[]).unwrap();
        assert_eq!(verify.mismatches.len(), 1);
        assert_eq!(verify.mismatches[0].0, "Clips/test1.mov");
        assert_eq!(verify.verified.len(), 2);
    }

    #[test]
    fn verify_detects_missing_and_new_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        write_tree(&root);
        run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();

        fs::remove_file(root.join("Clips/test2.mov")).unwrap();
        fs::write(root.join("Clips/test3.mov"), b"brand new").unwrap();

        let verify = run_verify(&root, &[]).unwrap();
        assert_eq!(verify.missing, vec!["Clips/test2.mov".to_string()]);
        assert_eq!(verify.new, vec!["Clips/test3.mov".to_string()]);
    }

    #[test]
    fn second_create_records_new_file_as_original_and_missing_as_error() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        write_tree(&root);
        run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();

        fs::remove_file(root.join("Clips/test2.mov")).unwrap();
        fs::write(root.join("Clips/test3.mov"), b"brand new").unwrap();

        let report = run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();
        assert_eq!(report.generation_files.len(), 1);
        assert_eq!(report.original_count, 1);
        assert_eq!(report.missing, vec!["Clips/test2.mov".to_string()]);
    }

    #[test]
    fn info_reports_every_generation_for_a_path() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        write_tree(&root);
        run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();
        run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();

        let info = run_info(&root, "Clips/test1.mov").unwrap();
        assert_eq!(info.entries.len(), 2);
        assert_eq!(info.entries[0].0, 1);
        assert_eq!(info.entries[0].3, crate::model::HashEntryAction::Original);
        assert_eq!(info.entries[1].0, 2);
        assert_eq!(info.entries[1].3, crate::model::HashEntryAction::Verified);
    }

    #[test]
    fn sealing_with_a_new_algorithm_reverifies_the_prior_one_first() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        write_tree(&root);
        run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();

        let report = run_create(&root, HashAlgorithm::Sha1, &[], &tool_info()).unwrap();
        assert!(report.failed.is_empty());

        let info = run_info(&root, "Clips/test1.mov").unwrap();
        assert_eq!(info.entries.len(), 3);
        assert_eq!(info.entries[1].0, 2);
        assert_eq!(info.entries[1].1, HashAlgorithm::C4);
        assert_eq!(info.entries[1].3, crate::model::HashEntryAction::Verified);
        assert_eq!(info.entries[2].0, 2);
        assert_eq!(info.entries[2].1, HashAlgorithm::Sha1);
        assert_eq!(info.entries[2].3, crate::model::HashEntryAction::New);
    }

    #[test]
    fn sealing_a_corrupted_file_with_a_new_algorithm_does_not_record_it() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        write_tree(&root);
        run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();

        fs::write(root.join("Clips/test1.mov"), b"corrupted!").unwrap();

        let report = run_create(&root, HashAlgorithm::Sha1, &[], &tool_info()).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Clips/test1.mov");
        assert_eq!(report.failed[0].1, HashAlgorithm::C4);

        let info = run_info(&root, "Clips/test1.mov").unwrap();
        assert_eq!(info.entries.len(), 2);
        assert_eq!(info.entries[1].0, 2);
        assert_eq!(info.entries[1].1, HashAlgorithm::C4);
        assert_eq!(info.entries[1].3, crate::model::HashEntryAction::Failed);
        assert!(!info.entries.iter().any(|(generation, algorithm, ..)| *generation == 2 && *algorithm == HashAlgorithm::Sha1));
    }

    #[test]
    fn verify_keeps_flagging_drift_after_a_failed_cross_algorithm_reseal() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        write_tree(&root);
        run_create(&root, HashAlgorithm::C4, &[], &tool_info()).unwrap();

        fs::write(root.join("Clips/test1.mov"), b"corrupted!").unwrap();
        let report = run_create(&root, HashAlgorithm::Sha1, &[], &tool_info()).unwrap();
        assert_eq!(report.failed.len(), 1);

        // The corrupted bytes are still on disk; `verify` must keep comparing
        // against the original C4 entry, not the latest recorded one for
        // whatever algorithm happens to exist, so the drift is still caught.
        let verify = run_verify(&root, &[]).unwrap();
        assert_eq!(verify.mismatches.len(), 1);
        assert_eq!(verify.mismatches[0].0, "Clips/test1.mov");
        assert_eq!(verify.mismatches[0].1, HashAlgorithm::C4);
        assert_eq!(verify.verified.len(), 2);
    }

    #[test]
    fn single_file_create_seals_only_the_named_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        write_tree(&root);

        let target = root.join("Clips/test1.mov");
        let report = run_create_single_files(&root, std::slice::from_ref(&target), HashAlgorithm::C4, &tool_info()).unwrap();
        assert_eq!(report.generation_files.len(), 1);
        assert_eq!(report.original_count, 1);
        assert!(report.failed.is_empty());
        assert!(report.missing.is_empty());

        let history = History::load(&root).unwrap();
        assert!(history.find_original_hash_entry_for_path("Clips/test1.mov").is_some());
        assert!(history.find_original_hash_entry_for_path("Clips/test2.mov").is_none());
        assert!(history.hash_lists[0].directory_hashes_sorted().is_empty());
    }
}
