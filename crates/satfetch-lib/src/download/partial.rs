use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const PARTIAL_SUFFIX: &str = ".incomplete";

/// `<final name>.incomplete` next to the final file.
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    final_path.with_file_name(name)
}

/// What an existing partial file means for the next transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartialState {
    /// No partial file, or an empty one.
    Fresh,
    Resume { offset: u64 },
    /// As long as the declared size; only needs verification.
    Complete,
    Oversized { len: u64 },
}

impl PartialState {
    pub fn from_len(len: u64, declared_size: u64) -> Self {
        match len {
            0 => Self::Fresh,
            len if len > declared_size => Self::Oversized { len },
            len if len == declared_size => Self::Complete,
            offset => Self::Resume { offset },
        }
    }
}

pub async fn inspect_partial(path: &Path, declared_size: u64) -> std::io::Result<PartialState> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(PartialState::from_len(metadata.len(), declared_size)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(PartialState::Fresh),
        Err(err) => Err(err),
    }
}

pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/data/S2A_MSIL1C.zip")),
            PathBuf::from("/data/S2A_MSIL1C.zip.incomplete")
        );
    }

    #[test]
    fn test_state_from_len() {
        assert_eq!(PartialState::from_len(0, 100), PartialState::Fresh);
        assert_eq!(
            PartialState::from_len(40, 100),
            PartialState::Resume { offset: 40 }
        );
        assert_eq!(PartialState::from_len(100, 100), PartialState::Complete);
        assert_eq!(
            PartialState::from_len(101, 100),
            PartialState::Oversized { len: 101 }
        );
    }

    #[tokio::test]
    async fn test_inspect_missing_and_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip.incomplete");
        assert_eq!(inspect_partial(&path, 10).await.unwrap(), PartialState::Fresh);

        std::fs::write(&path, b"12345").unwrap();
        assert_eq!(
            inspect_partial(&path, 10).await.unwrap(),
            PartialState::Resume { offset: 5 }
        );

        remove_if_exists(&path).await.unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }
}
