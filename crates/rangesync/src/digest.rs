//! Digest algorithms and the byte sink that feeds them.
//!
//! Algorithms are looked up by name in a [`DigestRegistry`]. The
//! process-wide registry is built explicitly with [`init_registry`] before
//! the first hasher is constructed; [`registry`] refuses to hand it out
//! earlier so a missing initialization shows up as an error rather than as
//! an implicit side effect of first use.
//!
//! Built-in algorithms:
//!
//! | name     | output | notes |
//! |----------|--------|-------|
//! | `md5`    | 16     | protocol default |
//! | `sha256` | 32     | |
//! | `blake3` | 32     | |
//! | `xxh64`  | 8      | seed 0, big-endian (canonical xxHash byte order) |

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use md5::Md5;
use serde::{Serialize, Serializer};
use sha2::Sha256;
use tracing::{debug, info};
use xxhash_rust::xxh64::Xxh64;

use crate::error::{Result, SyncError};
use crate::wire::ByteSink;

/// Largest digest any registered algorithm may produce.
pub const MAX_DIGEST_SIZE: usize = 64;

/// Algorithm both ends use until they negotiate another one.
pub const DEFAULT_ALGORITHM: &str = "md5";

/// Final output of a digest algorithm.
///
/// Fixed-capacity buffer plus the actual length, so digests of any
/// registered algorithm fit without allocation.
#[derive(Clone, Copy)]
pub struct Digest {
    len: usize,
    bytes: [u8; MAX_DIGEST_SIZE],
}

impl Digest {
    /// Copy a finished digest value.
    ///
    /// # Panics
    ///
    /// Panics if `value` is longer than [`MAX_DIGEST_SIZE`]; the registry
    /// rejects such algorithms at registration.
    pub fn from_slice(value: &[u8]) -> Self {
        assert!(
            value.len() <= MAX_DIGEST_SIZE,
            "digest of {} bytes exceeds maximum of {}",
            value.len(),
            MAX_DIGEST_SIZE
        );
        let mut bytes = [0u8; MAX_DIGEST_SIZE];
        bytes[..value.len()].copy_from_slice(value);
        Self {
            len: value.len(),
            bytes,
        }
    }

    /// Digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Digest length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length digest.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for Digest {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Digest {}

impl PartialEq<[u8]> for Digest {
    fn eq(&self, other: &[u8]) -> bool {
        self.len == other.len() && self.as_bytes() == other
    }
}

impl PartialEq<Vec<u8>> for Digest {
    fn eq(&self, other: &Vec<u8>) -> bool {
        *self == other[..]
    }
}

/// Compares raw bytes; the string is never parsed as hex.
impl PartialEq<str> for Digest {
    fn eq(&self, other: &str) -> bool {
        *self == *other.as_bytes()
    }
}

impl fmt::LowerHex for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Running hash state of one algorithm.
///
/// `finalize` takes the boxed state by value, so a finished accumulator
/// can't be fed or finalized again.
pub trait Accumulator: Send {
    /// Feed bytes into the running hash.
    fn update(&mut self, bytes: &[u8]);

    /// Produce the final digest, consuming the state.
    fn finalize(self: Box<Self>) -> Digest;
}

impl Accumulator for Md5 {
    fn update(&mut self, bytes: &[u8]) {
        md5::Digest::update(self, bytes);
    }

    fn finalize(self: Box<Self>) -> Digest {
        Digest::from_slice(&md5::Digest::finalize(*self))
    }
}

impl Accumulator for Sha256 {
    fn update(&mut self, bytes: &[u8]) {
        sha2::Digest::update(self, bytes);
    }

    fn finalize(self: Box<Self>) -> Digest {
        Digest::from_slice(&sha2::Digest::finalize(*self))
    }
}

impl Accumulator for blake3::Hasher {
    fn update(&mut self, bytes: &[u8]) {
        blake3::Hasher::update(self, bytes);
    }

    fn finalize(self: Box<Self>) -> Digest {
        Digest::from_slice(blake3::Hasher::finalize(&self).as_bytes())
    }
}

impl Accumulator for Xxh64 {
    fn update(&mut self, bytes: &[u8]) {
        Xxh64::update(self, bytes);
    }

    fn finalize(self: Box<Self>) -> Digest {
        Digest::from_slice(&self.digest().to_be_bytes())
    }
}

/// Creates a fresh accumulator.
pub type AccumulatorFactory = fn() -> Box<dyn Accumulator>;

/// A named, registered digest algorithm.
#[derive(Clone, Copy)]
pub struct DigestAlgorithm {
    name: &'static str,
    output_len: usize,
    factory: AccumulatorFactory,
}

impl DigestAlgorithm {
    /// Registered name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Length of the digests this algorithm produces.
    pub fn output_len(&self) -> usize {
        self.output_len
    }

    /// Start a new accumulator.
    pub fn start(&self) -> Box<dyn Accumulator> {
        (self.factory)()
    }

    /// Digest a complete byte string in one go.
    pub fn digest(&self, bytes: &[u8]) -> Digest {
        let mut accumulator = self.start();
        accumulator.update(bytes);
        accumulator.finalize()
    }
}

impl fmt::Debug for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestAlgorithm")
            .field("name", &self.name)
            .field("output_len", &self.output_len)
            .finish()
    }
}

/// Name to algorithm mapping.
#[derive(Debug, Default)]
pub struct DigestRegistry {
    algorithms: BTreeMap<String, DigestAlgorithm>,
}

impl DigestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in algorithms.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtins: [(&'static str, usize, AccumulatorFactory); 4] = [
            ("md5", 16, || Box::new(<Md5 as md5::Digest>::new())),
            ("sha256", 32, || Box::new(<Sha256 as sha2::Digest>::new())),
            ("blake3", 32, || Box::new(blake3::Hasher::new())),
            ("xxh64", 8, || Box::new(Xxh64::new(0))),
        ];
        for (name, output_len, factory) in builtins {
            registry.algorithms.insert(
                name.to_string(),
                DigestAlgorithm {
                    name,
                    output_len,
                    factory,
                },
            );
        }
        registry
    }

    /// Register an additional algorithm.
    ///
    /// Names are case-insensitive. Re-registering a name or declaring an
    /// output longer than [`MAX_DIGEST_SIZE`] is a configuration error.
    pub fn register(
        &mut self,
        name: &'static str,
        output_len: usize,
        factory: AccumulatorFactory,
    ) -> Result<()> {
        if output_len > MAX_DIGEST_SIZE {
            return Err(SyncError::Config(format!(
                "digest algorithm {} produces {} bytes, maximum is {}",
                name, output_len, MAX_DIGEST_SIZE
            )));
        }
        let key = name.to_ascii_lowercase();
        if self.algorithms.contains_key(&key) {
            return Err(SyncError::Config(format!(
                "digest algorithm {} is already registered",
                name
            )));
        }
        self.algorithms.insert(
            key,
            DigestAlgorithm {
                name,
                output_len,
                factory,
            },
        );
        Ok(())
    }

    /// Resolve an algorithm by name.
    pub fn lookup(&self, name: &str) -> Result<DigestAlgorithm> {
        let algorithm = self
            .algorithms
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| SyncError::UnknownDigestAlgorithm(name.to_string()))?;
        debug!("Resolved digest algorithm {}", algorithm.name);
        Ok(algorithm)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.algorithms.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.algorithms.values().map(|a| a.name)
    }
}

static REGISTRY: OnceLock<DigestRegistry> = OnceLock::new();

/// Build the process-wide registry. Idempotent; call once at startup before
/// constructing any hasher.
pub fn init_registry() -> &'static DigestRegistry {
    REGISTRY.get_or_init(|| {
        let registry = DigestRegistry::with_defaults();
        info!(
            "Digest registry initialized: {}",
            registry.names().collect::<Vec<_>>().join(", ")
        );
        registry
    })
}

/// The process-wide registry, if [`init_registry`] has run.
pub fn registry() -> Result<&'static DigestRegistry> {
    REGISTRY.get().ok_or(SyncError::RegistryNotInitialized)
}

/// Resolve `name` in the process-wide registry.
pub fn lookup(name: &str) -> Result<DigestAlgorithm> {
    registry()?.lookup(name)
}

/// Byte sink that hashes everything written to it.
pub struct DigestSink {
    algorithm: DigestAlgorithm,
    accumulator: Box<dyn Accumulator>,
    bytes_hashed: u64,
}

impl DigestSink {
    /// Start hashing with `algorithm`.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            accumulator: algorithm.start(),
            bytes_hashed: 0,
        }
    }

    /// The algorithm in use.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Number of bytes fed to the accumulator so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Finish hashing.
    pub fn finish(self) -> Digest {
        self.accumulator.finalize()
    }
}

impl ByteSink for DigestSink {
    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        self.accumulator.update(bytes);
        self.bytes_hashed += bytes.len() as u64;
    }
}

impl fmt::Debug for DigestSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestSink")
            .field("algorithm", &self.algorithm.name)
            .field("bytes_hashed", &self.bytes_hashed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_values() {
        let md5 = DigestRegistry::with_defaults().lookup("md5").unwrap();
        assert_eq!(md5.digest(b"").to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5.digest(b"abc").to_hex(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5.output_len(), 16);
    }

    #[test]
    fn test_sha256_known_value() {
        let sha = DigestRegistry::with_defaults().lookup("SHA256").unwrap();
        assert_eq!(
            sha.digest(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_xxh64_empty_input() {
        let xxh = DigestRegistry::with_defaults().lookup("xxh64").unwrap();
        let digest = xxh.digest(b"");
        assert_eq!(digest.len(), 8);
        assert_eq!(digest.to_hex(), "ef46db3751d8e999");
    }

    #[test]
    fn test_blake3_matches_crate() {
        let b3 = DigestRegistry::with_defaults().lookup("blake3").unwrap();
        assert_eq!(
            b3.digest(b"abc").as_bytes(),
            blake3::hash(b"abc").as_bytes()
        );
    }

    #[test]
    fn test_unknown_algorithm_is_error() {
        let err = DigestRegistry::with_defaults().lookup("whirlpool").unwrap_err();
        assert!(matches!(err, SyncError::UnknownDigestAlgorithm(ref n) if n == "whirlpool"));
    }

    #[test]
    fn test_register_rejects_duplicates_and_oversized() {
        let mut registry = DigestRegistry::with_defaults();
        assert!(registry
            .register("MD5", 16, || Box::new(<Md5 as md5::Digest>::new()))
            .is_err());
        assert!(registry
            .register("huge", MAX_DIGEST_SIZE + 1, || Box::new(Xxh64::new(0)))
            .is_err());
        registry
            .register("xxh64-alt", 8, || Box::new(Xxh64::new(0)))
            .unwrap();
        assert!(registry.contains("XXH64-ALT"));
    }

    #[test]
    fn test_names_sorted() {
        let registry = DigestRegistry::with_defaults();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["blake3", "md5", "sha256", "xxh64"]);
    }

    #[test]
    fn test_global_registry() {
        let registry = init_registry();
        assert!(registry.contains(DEFAULT_ALGORITHM));
        assert!(lookup("md5").is_ok());
    }

    #[test]
    fn test_digest_equality_with_strings() {
        let digest = Digest::from_slice(b"\x01\x02ab");
        assert!(digest == *"\x01\x02ab");
        assert!(digest == b"\x01\x02ab".to_vec());
        assert!(digest != *"\x01\x02a");
        assert!(digest != *"0102");
        assert_eq!(digest.to_hex(), "01026162");
    }

    #[test]
    fn test_sink_counts_bytes_and_matches_one_shot() {
        let md5 = DigestRegistry::with_defaults().lookup("md5").unwrap();
        let mut sink = DigestSink::new(md5);
        sink.put(b"ab");
        sink.put(b"c");
        assert_eq!(sink.bytes_hashed(), 3);
        assert_eq!(sink.finish(), md5.digest(b"abc"));
    }

    #[test]
    fn test_digest_formats_as_lowercase_hex() {
        let digest = Digest::from_slice(&[0x00, 0xab, 0xcd, 0xef]);
        assert_eq!(digest.to_string(), "00abcdef");
        assert_eq!(format!("{:x}", digest), "00abcdef");
        assert_eq!(format!("{:?}", digest), "Digest(00abcdef)");
        assert_eq!(hex::decode(digest.to_hex()).unwrap(), digest.as_bytes());
    }

    #[test]
    fn test_digest_serializes_as_hex() {
        let digest = Digest::from_slice(&[0xde, 0xad]);
        assert_eq!(serde_json::to_string(&digest).unwrap(), "\"dead\"");
    }
}
