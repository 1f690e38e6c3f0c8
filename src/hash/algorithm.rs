use std::fmt;
use std::io::Read;
use std::str::FromStr;

use anyhow::{Context, Result};
use camino::Utf8Path;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha512};
use xxhash_rust::xxh32::Xxh32;
use xxhash_rust::xxh64::Xxh64;

use super::c4;

/// Bytes read per chunk while streaming a file into one or more hashers.
const CHUNK_SIZE: usize = 1024 * 1024;

/// A supported content hash algorithm.
///
/// Declaration order is ascending priority: `C4` is preferred over `Sha1`,
/// which is preferred over `Md5`, which is preferred over `Xxh64`/`Xxh32`.
/// `Ord`/`PartialOrd` are derived from this order so `Iterator::max` picks
/// the highest-priority algorithm present in a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Xxh32,
    Xxh64,
    Md5,
    Sha1,
    C4,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Xxh32,
        HashAlgorithm::Xxh64,
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::C4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Xxh32 => "xxh32",
            HashAlgorithm::Xxh64 => "xxh64",
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::C4 => "c4",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xxh32" => Ok(HashAlgorithm::Xxh32),
            "xxh64" => Ok(HashAlgorithm::Xxh64),
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "c4" => Ok(HashAlgorithm::C4),
            other => anyhow::bail!(
                "unsupported hash algorithm '{other}' (expected one of xxh32, xxh64, md5, sha1, c4)"
            ),
        }
    }
}

/// An in-progress streaming digest for one algorithm.
enum Context {
    Md5(Md5),
    Sha1(Sha1),
    Xxh32(Xxh32),
    Xxh64(Xxh64),
    C4(Sha512),
}

impl Context {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Context::Md5(Md5::new()),
            HashAlgorithm::Sha1 => Context::Sha1(Sha1::new()),
            HashAlgorithm::Xxh32 => Context::Xxh32(Xxh32::new(0)),
            HashAlgorithm::Xxh64 => Context::Xxh64(Xxh64::new(0)),
            HashAlgorithm::C4 => Context::C4(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Context::Md5(h) => h.update(data),
            Context::Sha1(h) => h.update(data),
            Context::Xxh32(h) => h.update(data),
            Context::Xxh64(h) => h.update(data),
            Context::C4(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Context::Md5(h) => hex::encode(h.finalize()),
            Context::Sha1(h) => hex::encode(h.finalize()),
            Context::Xxh32(h) => format!("{:08x}", h.digest()),
            Context::Xxh64(h) => format!("{:016x}", h.digest()),
            Context::C4(h) => c4::encode(&h.finalize()),
        }
    }
}

/// Streams `path`'s content through every requested algorithm in a single
/// pass, returning each algorithm's digest string (lowercase hex, or the
/// `c4...` form for [`HashAlgorithm::C4`]).
pub fn hash_file(
    path: &Utf8Path,
    algorithms: &[HashAlgorithm],
) -> Result<indexmap::IndexMap<HashAlgorithm, String>> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("opening '{path}' for hashing"))?;

    let mut contexts: Vec<Context> = algorithms.iter().copied().map(Context::new).collect();

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading '{path}' while hashing"))?;
        if n == 0 {
            break;
        }
        for ctx in contexts.iter_mut() {
            ctx.update(&buf[..n]);
        }
    }

    Ok(algorithms
        .iter()
        .copied()
        .zip(contexts.into_iter().map(Context::finish))
        .collect())
}

/// Hashes an in-memory byte string with a single algorithm. Used for
/// aggregation (hashing digest strings and pairs of digests), not file
/// content.
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut ctx = Context::new(algorithm);
    ctx.update(data);
    ctx.finish()
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(&mut s, "{b:02x}").expect("writing into a String cannot fail");
        }
        s
    }
}
