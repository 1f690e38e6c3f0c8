pub mod aggregate;
pub mod algorithm;
pub mod c4;

pub use aggregate::{digest_for_digest_list, digest_for_list, digest_for_string, DirectoryContentHashContext, DirectoryStructureHashContext};
pub use algorithm::{hash_bytes, hash_file, HashAlgorithm};
