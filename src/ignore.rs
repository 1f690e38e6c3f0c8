//! Gitignore-style ignore pattern resolution, merged from prior-generation
//! patterns, ad-hoc caller patterns, and an optional pattern file, plus
//! built-in defaults.

use anyhow::{Context, Result};
use camino::Utf8Path;
use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// Patterns always excluded, regardless of what the caller supplies: the
/// macOS Finder metadata file and the sidecar folder itself (a history must
/// never try to hash its own generation files).
fn builtin_defaults(sidecar_folder_name: &str) -> [String; 2] {
    [".DS_Store".to_string(), sidecar_folder_name.to_string()]
}

pub struct MhlIgnoreSpec {
    matcher: Gitignore,
}

impl MhlIgnoreSpec {
    /// Builds a matcher from, in merge order: (a) patterns stored in the
    /// most recent prior generation, (b) ad-hoc patterns from the caller,
    /// (c) an optional newline-separated pattern file, then built-in
    /// defaults (§4.3). Later entries take precedence, matching gitignore's
    /// own last-match-wins semantics.
    pub fn build(
        root: &Utf8Path,
        prior_generation_patterns: &[String],
        ad_hoc_patterns: &[String],
        pattern_file: Option<&Utf8Path>,
        sidecar_folder_name: &str,
    ) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root.as_std_path());

        for pattern in prior_generation_patterns {
            builder
                .add_line(None, pattern)
                .with_context(|| format!("invalid prior-generation ignore pattern '{pattern}'"))?;
        }
        for pattern in ad_hoc_patterns {
            builder
                .add_line(None, pattern)
                .with_context(|| format!("invalid ignore pattern '{pattern}'"))?;
        }
        if let Some(file) = pattern_file {
            if let Some(err) = builder.add(file.as_std_path()) {
                return Err(err).with_context(|| format!("reading ignore pattern file '{file}'"));
            }
        }
        for pattern in builtin_defaults(sidecar_folder_name) {
            builder
                .add_line(None, &pattern)
                .with_context(|| format!("invalid built-in ignore pattern '{pattern}'"))?;
        }

        let matcher = builder.build().context("compiling ignore pattern matcher")?;
        Ok(Self { matcher })
    }

    /// An empty spec carrying only the built-in defaults, used when no
    /// history or caller-supplied patterns exist yet.
    pub fn defaults_only(root: &Utf8Path, sidecar_folder_name: &str) -> Result<Self> {
        Self::build(root, &[], &[], None, sidecar_folder_name)
    }

    pub fn matches(&self, relative_path: &str, is_dir: bool) -> bool {
        self.matcher.matched(relative_path, is_dir).is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn root() -> Utf8PathBuf {
        Utf8PathBuf::from("/tmp/mhl-ignore-test-root")
    }

    #[test]
    fn sidecar_folder_is_always_ignored() {
        let spec = MhlIgnoreSpec::defaults_only(&root(), "ascmhl").unwrap();
        assert!(spec.matches("ascmhl", true));
    }

    #[test]
    fn ds_store_is_always_ignored() {
        let spec = MhlIgnoreSpec::defaults_only(&root(), "ascmhl").unwrap();
        assert!(spec.matches(".DS_Store", false));
    }

    #[test]
    fn ad_hoc_pattern_is_honored() {
        let spec = MhlIgnoreSpec::build(&root(), &[], &["*.tmp".to_string()], None, "ascmhl").unwrap();
        assert!(spec.matches("scratch.tmp", false));
        assert!(!spec.matches("scratch.mov", false));
    }

    #[test]
    fn prior_generation_pattern_is_honored() {
        let spec = MhlIgnoreSpec::build(&root(), &["Thumbs.db".to_string()], &[], None, "ascmhl").unwrap();
        assert!(spec.matches("Thumbs.db", false));
    }

    #[test]
    fn unrelated_files_are_not_ignored() {
        let spec = MhlIgnoreSpec::defaults_only(&root(), "ascmhl").unwrap();
        assert!(!spec.matches("Clips/test1.mov", false));
    }
}
