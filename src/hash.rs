//! Hash-algorithm selection and an optional helper a [`crate::backend::StorageBackend`]
//! can reach for inside its own `hash` method instead of linking five hashing
//! crates itself (supplements spec.md's HASH/OPTS HASH command: the core only
//! ever needs to know *which* algorithm name was negotiated).
use md5::Digest as _;
use sha1::Digest as _;
use sha2::Digest as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    Sha1,
    #[default]
    Sha256,
    Sha512,
    Md5,
    Crc32,
}

impl HashAlgorithm {
    /// Parse an OPTS HASH / HASH algorithm token, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SHA-1" => Some(Self::Sha1),
            "SHA-256" => Some(Self::Sha256),
            "SHA-512" => Some(Self::Sha512),
            "MD5" => Some(Self::Md5),
            "CRC32" => Some(Self::Crc32),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
            Self::Md5 => "MD5",
            Self::Crc32 => "CRC32",
        }
    }
}

/// Hashes a full byte buffer with the selected algorithm and returns its
/// lowercase hex digest. A `StorageBackend::hash` implementation may call
/// this directly when it can afford to buffer the whole file in memory;
/// backends handling very large files are expected to stream the digest
/// themselves using the same crates.
pub fn hex_digest(algo: HashAlgorithm, data: &[u8]) -> String {
    match algo {
        HashAlgorithm::Sha1 => {
            let mut hasher = sha1::Sha1::new();
            hasher.update(data);
            hex::encode(hasher.finalize())
        }
        HashAlgorithm::Sha256 => {
            let mut hasher = sha2::Sha256::new();
            hasher.update(data);
            hex::encode(hasher.finalize())
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = sha2::Sha512::new();
            hasher.update(data);
            hex::encode(hasher.finalize())
        }
        HashAlgorithm::Md5 => {
            let mut hasher = md5::Md5::new();
            hasher.update(data);
            hex::encode(hasher.finalize())
        }
        HashAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(data);
            format!("{:08x}", hasher.finalize())
        }
    }
}

/// Minimal hex encoding so the crate doesn't need a dedicated `hex` dependency
/// for what is otherwise a one-line operation.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(out, "{b:02x}").unwrap();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vector() {
        assert_eq!(hex_digest(HashAlgorithm::Crc32, b"123456789"), "cbf43926");
    }

    #[test]
    fn sha256_empty_string() {
        assert_eq!(
            hex_digest(HashAlgorithm::Sha256, b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(HashAlgorithm::parse("sha-256"), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::parse("Sha-1"), Some(HashAlgorithm::Sha1));
        assert_eq!(HashAlgorithm::parse("bogus"), None);
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let a = hex_digest(HashAlgorithm::Sha256, b"unmodified contents");
        let b = hex_digest(HashAlgorithm::Sha256, b"unmodified contents");
        assert_eq!(a, b);
    }
}
