use camino::Utf8PathBuf;

use crate::hash::HashAlgorithm;

/// Structural and per-path error kinds (§7). Structural errors
/// (`NoHistory`, `GenerationGap`, `MalformedGeneration`,
/// `UnsupportedAlgorithm`) are fatal at load time. `HashMismatch`,
/// `MissingFiles`, and `NewFiles` are accumulated during a walk and
/// reported as a summary rather than aborting early.
#[derive(Debug, thiserror::Error)]
pub enum MhlError {
    #[error("hash mismatch for '{path}' ({algorithm}): expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("{} file(s) present in history but missing from the tree: {}", .paths.len(), .paths.join(", "))]
    MissingFiles { paths: Vec<String> },

    #[error("{} file(s) present in the tree but absent from history: {}", .paths.len(), .paths.join(", "))]
    NewFiles { paths: Vec<String> },

    #[error("no ascmhl history found at or above '{root}'")]
    NoHistory { root: Utf8PathBuf },

    #[error("sidecar '{sidecar}' has a generation gap: expected generation {expected}, found {found}")]
    GenerationGap { sidecar: Utf8PathBuf, expected: u32, found: u32 },

    #[error("malformed generation file '{path}': {reason}")]
    MalformedGeneration { path: Utf8PathBuf, reason: String },

    #[error("unsupported hash algorithm '{name}'")]
    UnsupportedAlgorithm { name: String },
}

#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        type_name_of(f)
            .rsplit("::")
            .find(|&part| part != "f" && part != "{{closure}}")
            .expect("Short function name")
    }};
}

#[macro_export]
macro_rules! anyhow_loc {
    ($msg:expr) => {
        anyhow::anyhow!("[{}:{} - {}] {}", file!(), function_name!(), line!(), $msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        anyhow::anyhow!("[{}:{} - {}] {}", file!(), function_name!(), line!(), format!($fmt, $($arg)*))
    };
}
