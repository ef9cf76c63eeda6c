// Licensed under the Apache License, Version 2.0.
#![deny(warnings)]

//! Content fingerprinting primitives.
//!
//! `Fingerprint` wraps an MD5 digest. MD5 is used here purely as a
//! non-cryptographic content-addressing function (see `spec.md §4.3`): it is
//! fast, stable across platforms, and its collision resistance is not a
//! security property this crate depends on.

use std::fmt;
use std::io::{self, Read};

use md5::{Digest as _, Md5};
use serde::de::{Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

pub const FINGERPRINT_SIZE: usize = 16;

/// The fingerprint of an empty byte sequence.
pub const EMPTY_FINGERPRINT: Fingerprint = Fingerprint([
    0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8, 0x42, 0x7e,
]);

/// The force-rerun sentinel stored by the state tracker for a task whose last
/// execution raised an exception (`spec.md §4.6`).
pub const FORCE_RERUN_SENTINEL: &str = "";

#[derive(Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Fingerprint(pub [u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    pub fn from_bytes_unsafe(bytes: &[u8]) -> Fingerprint {
        assert_eq!(
            bytes.len(),
            FINGERPRINT_SIZE,
            "input value was not a fingerprint; had length {}",
            bytes.len()
        );
        let mut fingerprint = [0; FINGERPRINT_SIZE];
        fingerprint.copy_from_slice(bytes);
        Fingerprint(fingerprint)
    }

    pub fn from_hex_string(hex_string: &str) -> Result<Fingerprint, String> {
        let bytes = hex::decode(hex_string).map_err(|e| format!("{e}"))?;
        if bytes.len() != FINGERPRINT_SIZE {
            return Err(format!(
                "expected a {}-byte fingerprint, got {} bytes",
                FINGERPRINT_SIZE,
                bytes.len()
            ));
        }
        Ok(Fingerprint::from_bytes_unsafe(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint<{}>", self.to_hex())
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FingerprintVisitor;

        impl<'de> Visitor<'de> for FingerprintVisitor {
            type Value = Fingerprint;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a hex-encoded fingerprint")
            }

            fn visit_str<E>(self, v: &str) -> Result<Fingerprint, E>
            where
                E: serde::de::Error,
            {
                Fingerprint::from_hex_string(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(FingerprintVisitor)
    }
}

/// A streaming hasher that accumulates bytes and files into a single
/// `Fingerprint`, mirroring `TaskInputs.fingerprint()` in `spec.md §4.3`.
pub struct FingerprintHasher {
    hasher: Md5,
}

impl FingerprintHasher {
    pub fn new() -> FingerprintHasher {
        FingerprintHasher { hasher: Md5::new() }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update(bytes);
        self
    }

    /// Reads `path` in 8 KiB chunks and feeds its contents into the hasher.
    /// A missing path is silently skipped, matching `spec.md §4.3` step 3.
    pub fn update_file(&mut self, path: &std::path::Path) -> io::Result<()> {
        let mut file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.hasher.update(&buf[..n]);
        }
        Ok(())
    }

    pub fn finish(self) -> Fingerprint {
        let digest = self.hasher.finalize();
        Fingerprint::from_bytes_unsafe(&digest)
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_fingerprint_matches_md5_of_empty_input() {
        let fp = FingerprintHasher::new().finish();
        assert_eq!(fp, EMPTY_FINGERPRINT);
    }

    #[test]
    fn hex_round_trips() {
        let fp = FingerprintHasher::new().update(b"hello").finish();
        let hex = fp.to_hex();
        assert_eq!(Fingerprint::from_hex_string(&hex).unwrap(), fp);
    }

    #[test]
    fn changing_one_byte_changes_the_fingerprint() {
        let a = FingerprintHasher::new().update(b"hello").finish();
        let b = FingerprintHasher::new().update(b"hellp").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn file_contents_are_mixed_in_and_missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"content")
            .unwrap();

        let with_file = {
            let mut h = FingerprintHasher::new();
            h.update_file(&path).unwrap();
            h.finish()
        };
        let without_file = {
            let mut h = FingerprintHasher::new();
            h.update_file(&dir.path().join("missing.txt")).unwrap();
            h.finish()
        };
        assert_ne!(with_file, without_file);
        assert_eq!(without_file, EMPTY_FINGERPRINT);
    }
}
