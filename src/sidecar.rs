//! On-disk sidecar folder layout: folder name, generation filename
//! convention, and the optional `chain.txt` ledger (§6).

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, FixedOffset};

use crate::hash::HashAlgorithm;

pub const SIDECAR_FOLDER_NAME: &str = "ascmhl";
pub const GENERATION_FILE_EXTENSION: &str = "ascmhl";
pub const CHAIN_FILE_NAME: &str = "chain.txt";

pub fn sidecar_folder_path(root: &Utf8Path) -> Utf8PathBuf {
    root.join(SIDECAR_FOLDER_NAME)
}

pub fn sidecar_folder_exists(root: &Utf8Path) -> bool {
    sidecar_folder_path(root).is_dir()
}

pub fn chain_file_path(root: &Utf8Path) -> Utf8PathBuf {
    sidecar_folder_path(root).join(CHAIN_FILE_NAME)
}

/// `<folder_basename>_<YYYY-MM-DD>_<HHMMSS>_<NNNN>.ascmhl`.
pub fn generation_filename(folder_basename: &str, timestamp: DateTime<FixedOffset>, generation_number: u32) -> String {
    format!(
        "{folder_basename}_{}_{}_{generation_number:04}.{GENERATION_FILE_EXTENSION}",
        timestamp.format("%Y-%m-%d"),
        timestamp.format("%H%M%S"),
    )
}

/// Parses a generation file's basename back into `(folder_basename,
/// generation_number)`, matching the naming convention above.
pub fn parse_generation_filename(filename: &str) -> Option<(String, u32)> {
    let stem = filename.strip_suffix(&format!(".{GENERATION_FILE_EXTENSION}"))?;
    let mut parts = stem.rsplitn(4, '_');
    let generation_str = parts.next()?;
    let _time = parts.next()?;
    let _date = parts.next()?;
    let basename = parts.next()?;

    if generation_str.len() != 4 || !generation_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let generation_number: u32 = generation_str.parse().ok()?;
    Some((basename.to_string(), generation_number))
}

/// Formats one `chain.txt` line for a generation file's own digest,
/// matching the original `HashListGeneration.line_for_hash_file` shape.
pub fn chain_line(algorithm: HashAlgorithm, generation_filename: &str, digest: &str) -> String {
    format!("{algorithm}({generation_filename})= {digest}\n")
}

/// Writes `contents` to `path` atomically: write to a temporary file in the
/// same directory, then rename into place, so a crash mid-write never
/// leaves a partially-written generation file visible (§5).
pub fn write_atomic(path: &Utf8Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().with_context(|| format!("'{path}' has no parent directory"))?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating sidecar directory '{dir}'"))?;

    let mut tmp_path = path.to_owned();
    tmp_path.set_extension(format!("{}.tmp", path.extension().unwrap_or_default()));
    std::fs::write(&tmp_path, contents).with_context(|| format!("writing temporary file '{tmp_path}'"))?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("renaming '{tmp_path}' into place as '{path}'"))?;
    Ok(())
}

/// Best-effort append of one line to `chain.txt`. Failure to read/write the
/// chain file never fails a `create`/`verify` (it is additive bookkeeping,
/// not required by the core algorithms).
pub fn append_chain_line(root: &Utf8Path, line: &str) {
    let path = chain_file_path(root);
    if let Some(dir) = path.parent() {
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
    }
    use std::io::Write;
    if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        let _ = file.write_all(line.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filename_round_trips_through_parse() {
        let ts = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2024, 3, 5, 14, 30, 7).unwrap();
        let name = generation_filename("MyShoot", ts, 3);
        assert_eq!(name, "MyShoot_2024-03-05_143007_0003.ascmhl");
        let (basename, generation) = parse_generation_filename(&name).unwrap();
        assert_eq!(basename, "MyShoot");
        assert_eq!(generation, 3);
    }

    #[test]
    fn basename_with_underscores_round_trips() {
        let ts = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let name = generation_filename("My_Shoot_2024", ts, 1);
        let (basename, generation) = parse_generation_filename(&name).unwrap();
        assert_eq!(basename, "My_Shoot_2024");
        assert_eq!(generation, 1);
    }

    #[test]
    fn rejects_non_ascmhl_extension() {
        assert!(parse_generation_filename("MyShoot_2024-03-05_143007_0003.txt").is_none());
    }
}
