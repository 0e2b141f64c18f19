use std::{
    fs::File,
    io::{self, Read, Write},
    path::Path,
};

use ota_domain::{Asset, HashType};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Result, UpdatesError};

/// Streaming digest over one of the supported asset hash types.
pub(crate) enum AssetHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl AssetHasher {
    pub(crate) fn new(hash_type: HashType) -> Self {
        match hash_type {
            HashType::Sha1 => Self::Sha1(Sha1::new()),
            HashType::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub(crate) fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(hasher) => hasher.update(bytes),
            Self::Sha256(hasher) => hasher.update(bytes),
        }
    }

    pub(crate) fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(hasher) => hex::encode(hasher.finalize()),
            Self::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// Writer adapter that hashes every byte passed through it.
pub(crate) struct HashingWriter<W> {
    inner: W,
    hasher: AssetHasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub(crate) fn new(inner: W, hash_type: HashType) -> Self {
        Self {
            inner,
            hasher: AssetHasher::new(hash_type),
            written: 0,
        }
    }

    pub(crate) fn finish(mut self) -> io::Result<(String, u64)> {
        self.inner.flush()?;
        Ok((self.hasher.finalize_hex(), self.written))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hex digest of in-memory bytes.
#[must_use]
pub fn digest_bytes(hash_type: HashType, bytes: &[u8]) -> String {
    let mut hasher = AssetHasher::new(hash_type);
    hasher.update(bytes);
    hasher.finalize_hex()
}

/// Hex digest of a file on disk.
pub fn digest_file(path: &Path, hash_type: HashType) -> Result<String> {
    let mut file = File::open(path).map_err(|err| UpdatesError::io(path, err))?;
    let mut hasher = AssetHasher::new(hash_type);
    let mut buf = vec![0_u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf).map_err(|err| UpdatesError::io(path, err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize_hex())
}

/// Compare a computed digest against the one an asset declares.
pub(crate) fn ensure_digest(asset: &Asset, actual: &str) -> Result<()> {
    if actual.eq_ignore_ascii_case(&asset.content_hash) {
        Ok(())
    } else {
        Err(UpdatesError::HashMismatch {
            key: asset.key.clone(),
            hash_type: asset.hash_type.as_str(),
            expected: asset.content_hash.clone(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            digest_bytes(HashType::Sha1, b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(
            digest_bytes(HashType::Sha256, b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn hashing_writer_matches_file_digest() -> Result<()> {
        let temp = tempfile::tempdir().map_err(|err| UpdatesError::io("tempdir", err))?;
        let path = temp.path().join("payload");
        let file = File::create(&path).map_err(|err| UpdatesError::io(&path, err))?;
        let mut writer = HashingWriter::new(file, HashType::Sha256);
        writer
            .write_all(b"chunk-one/chunk-two")
            .map_err(|err| UpdatesError::io(&path, err))?;
        let (digest, written) = writer.finish().map_err(|err| UpdatesError::io(&path, err))?;
        assert_eq!(written, 19);
        assert_eq!(digest, digest_file(&path, HashType::Sha256)?);
        Ok(())
    }

    #[test]
    fn ensure_digest_reports_mismatch() {
        let asset = Asset::new("bundle.js", HashType::Sha1, "00".repeat(20));
        let err = ensure_digest(&asset, &"11".repeat(20)).unwrap_err();
        assert!(matches!(err, UpdatesError::HashMismatch { .. }));
        assert!(ensure_digest(&asset, &"00".repeat(20)).is_ok());
    }
}
