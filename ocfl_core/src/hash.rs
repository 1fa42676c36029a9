//! Content digests for inventory manifests.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Read buffer used when streaming files through a hasher.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-512, the OCFL default.
    #[default]
    Sha512,
    /// SHA-256.
    Sha256,
    /// BLAKE3 with 256-bit output.
    Blake3,
}

impl DigestAlgorithm {
    /// Returns the name used in inventories and sidecar file extensions.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }

    /// Parse algorithm from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sha512" => Ok(DigestAlgorithm::Sha512),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            _ => Err(Error::unsupported_algorithm(s)),
        }
    }

    /// Length of a hex-encoded digest for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha512 => 128,
            DigestAlgorithm::Sha256 | DigestAlgorithm::Blake3 => 64,
        }
    }

    /// Hash raw bytes.
    pub fn hash_bytes(&self, data: &[u8]) -> Digest {
        let bytes = match self {
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            DigestAlgorithm::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        };
        Digest(hex::encode(bytes))
    }

    /// Hash data from a reader.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> Result<Digest> {
        let mut hasher = Hasher::new(*self);
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Hash a file's contents.
    pub fn hash_file(&self, path: &Path) -> Result<Digest> {
        let file = std::fs::File::open(path)?;
        self.hash_reader(file)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Incremental hasher over one of the supported algorithms.
enum Hasher {
    Sha512(sha2::Sha512),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha512(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Digest {
        let bytes = match self {
            Hasher::Sha512(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        };
        Digest(hex::encode(bytes))
    }
}

/// A lowercase hex-encoded content digest, as used for manifest keys.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Create a Digest from a hex string, normalising to lowercase.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.is_empty() || !hex_str.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::invalid_arguments(format!(
                "Invalid digest: '{}'",
                hex_str
            )));
        }
        Ok(Digest(hex_str.to_ascii_lowercase()))
    }

    /// The hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha512_known_value() {
        let digest = DigestAlgorithm::Sha512.hash_bytes(b"abc");
        assert_eq!(
            digest.as_str(),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn test_sha256_known_value() {
        let digest = DigestAlgorithm::Sha256.hash_bytes(b"abc");
        assert_eq!(
            digest.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_blake3_hello_world() {
        let digest = DigestAlgorithm::Blake3.hash_bytes(b"hello world");
        assert_eq!(
            digest.as_str(),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_hex_lengths() {
        for algo in [
            DigestAlgorithm::Sha512,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Blake3,
        ] {
            assert_eq!(algo.hash_bytes(b"").as_str().len(), algo.hex_len());
        }
    }

    #[test]
    fn test_hash_file_matches_bytes() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("f.txt");
        std::fs::write(&path, b"file contents").unwrap();

        let from_file = DigestAlgorithm::Sha512.hash_file(&path).unwrap();
        let from_bytes = DigestAlgorithm::Sha512.hash_bytes(b"file contents");
        assert_eq!(from_file, from_bytes);
    }

    #[test]
    fn test_algorithm_conversions() {
        assert_eq!(DigestAlgorithm::default(), DigestAlgorithm::Sha512);
        assert_eq!(
            DigestAlgorithm::parse("sha256").unwrap(),
            DigestAlgorithm::Sha256
        );
        assert_eq!(
            "blake3".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Blake3
        );
        assert!(DigestAlgorithm::parse("md5").is_err());

        let json = serde_json::to_string(&DigestAlgorithm::Sha512).unwrap();
        assert_eq!(json, "\"sha512\"");
    }

    #[test]
    fn test_digest_from_hex() {
        let d = Digest::from_hex("ABCdef01").unwrap();
        assert_eq!(d.as_str(), "abcdef01");
        assert!(Digest::from_hex("").is_err());
        assert!(Digest::from_hex("xyz").is_err());
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Streaming and one-shot hashing agree for every algorithm
        #[test]
        fn prop_reader_matches_bytes(data: Vec<u8>) {
            for algo in [DigestAlgorithm::Sha512, DigestAlgorithm::Sha256, DigestAlgorithm::Blake3] {
                let streamed = algo.hash_reader(&data[..])?;
                prop_assert_eq!(streamed, algo.hash_bytes(&data));
            }
        }
    }
}
