use crate::catalog::{Checksum, ChecksumAlgorithm};
use digest::Digest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use sha3::Sha3_256;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Verification failed: expected {}, got {}",
        hex::encode(.expected),
        hex::encode(.actual)
    )]
    VerificationFailed { expected: Vec<u8>, actual: Vec<u8> },

    #[error("Failed to read {path} for verification: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

enum ContentDigestHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Sha3_256(Sha3_256),
}

pub struct ContentDigestVerifier {
    hasher: ContentDigestHasher,
    expected_digest: Vec<u8>,
}

impl ContentDigestVerifier {
    #[inline]
    pub fn new(checksum: Checksum) -> Self {
        let hasher = match checksum.algorithm {
            ChecksumAlgorithm::Md5 => ContentDigestHasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha1 => ContentDigestHasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => ContentDigestHasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha384 => ContentDigestHasher::Sha384(Sha384::new()),
            ChecksumAlgorithm::Sha512 => ContentDigestHasher::Sha512(Sha512::new()),
            ChecksumAlgorithm::Sha3_256 => ContentDigestHasher::Sha3_256(Sha3_256::new()),
        };
        Self {
            hasher,
            expected_digest: checksum.digest,
        }
    }

    #[inline]
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        match &mut self.hasher {
            ContentDigestHasher::Md5(digest) => Digest::update(digest, data.as_ref()),
            ContentDigestHasher::Sha1(digest) => Digest::update(digest, data.as_ref()),
            ContentDigestHasher::Sha256(digest) => Digest::update(digest, data.as_ref()),
            ContentDigestHasher::Sha384(digest) => Digest::update(digest, data.as_ref()),
            ContentDigestHasher::Sha512(digest) => Digest::update(digest, data.as_ref()),
            ContentDigestHasher::Sha3_256(digest) => Digest::update(digest, data.as_ref()),
        };
    }

    pub fn verify(self) -> Result<(), VerificationError> {
        let actual_digest = match self.hasher {
            ContentDigestHasher::Md5(digest) => digest.finalize().to_vec(),
            ContentDigestHasher::Sha1(digest) => digest.finalize().to_vec(),
            ContentDigestHasher::Sha256(digest) => digest.finalize().to_vec(),
            ContentDigestHasher::Sha384(digest) => digest.finalize().to_vec(),
            ContentDigestHasher::Sha512(digest) => digest.finalize().to_vec(),
            ContentDigestHasher::Sha3_256(digest) => digest.finalize().to_vec(),
        };

        if actual_digest == self.expected_digest {
            Ok(())
        } else {
            Err(VerificationError::VerificationFailed {
                expected: self.expected_digest,
                actual: actual_digest,
            })
        }
    }
}

/// Hashes the whole file on the blocking pool and compares it with `checksum`.
pub async fn verify_file(path: &Path, checksum: &Checksum) -> Result<(), VerificationError> {
    let path = path.to_path_buf();
    let checksum = checksum.clone();
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || verify_file_blocking(&task_path, checksum))
        .await
        .map_err(|e| VerificationError::Io {
            path,
            source: std::io::Error::other(e),
        })?
}

fn verify_file_blocking(path: &Path, checksum: Checksum) -> Result<(), VerificationError> {
    let io_error = |source| VerificationError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(io_error)?;
    let mut verifier = ContentDigestVerifier::new(checksum);
    let mut buffer = vec![0u8; 65536]; // 64KB buffer for reading chunks

    loop {
        let bytes_read = file.read(&mut buffer).map_err(io_error)?;
        if bytes_read == 0 {
            break;
        }
        verifier.update(&buffer[..bytes_read]);
    }

    verifier.verify()
}
