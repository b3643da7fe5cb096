pub mod check;
pub mod content_digest_hasher;

pub use check::{CorruptFile, FileProblem, check_files};
pub use content_digest_hasher::{ContentDigestVerifier, VerificationError, verify_file};
