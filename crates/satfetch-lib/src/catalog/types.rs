use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

/// Opaque catalog identifier of a product, usually a UUID.
#[derive(Clone, Debug, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Arc<str>);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnlineStatus {
    Online,
    Offline,
    Unknown,
}

impl From<Option<bool>> for OnlineStatus {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => OnlineStatus::Online,
            Some(false) => OnlineStatus::Offline,
            None => OnlineStatus::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Sha3_256,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported checksum algorithm: {0}")]
pub struct UnsupportedAlgorithm(pub String);

impl FromStr for ChecksumAlgorithm {
    type Err = UnsupportedAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('_', "-");
        match normalized.as_str() {
            "MD5" | "MD5SUM" => Ok(Self::Md5),
            "SHA1" | "SHA-1" => Ok(Self::Sha1),
            "SHA256" | "SHA-256" => Ok(Self::Sha256),
            "SHA384" | "SHA-384" => Ok(Self::Sha384),
            "SHA512" | "SHA-512" => Ok(Self::Sha512),
            "SHA3-256" => Ok(Self::Sha3_256),
            _ => Err(UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
            Self::Sha3_256 => "SHA3-256",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: Vec<u8>,
}

impl Checksum {
    pub fn from_hex(algorithm: ChecksumAlgorithm, value: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self {
            algorithm,
            digest: hex::decode(value.trim())?,
        })
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

/// A downloadable product as described by the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    /// Declared size in bytes
    pub size: u64,
    pub checksum: Checksum,
    pub online: OnlineStatus,
    pub download_url: String,
}

impl Item {
    pub fn with_online(mut self, online: OnlineStatus) -> Self {
        self.online = online;
        self
    }

    pub fn filename(&self, extension: &str) -> String {
        with_extension(self.stem(), extension)
    }

    /// `<title>_<id>`, for products whose title is already taken in the same directory.
    pub fn unique_filename(&self, extension: &str) -> String {
        let stem = format!("{}_{}", self.stem(), sanitize_filename(self.id.as_str()));
        with_extension(stem, extension)
    }

    fn stem(&self) -> String {
        let stem = sanitize_filename(&self.title);
        if stem.is_empty() {
            sanitize_filename(self.id.as_str())
        } else {
            stem
        }
    }
}

fn with_extension(stem: String, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    if extension.is_empty() {
        stem
    } else {
        format!("{stem}.{extension}")
    }
}

pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    sanitized.trim_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str) -> Item {
        Item {
            id: ItemId::from("8df46c9e-a20c-43db-a19a-4240c2ed3b8b"),
            title: title.to_string(),
            size: 10,
            checksum: Checksum::from_hex(ChecksumAlgorithm::Md5, "00").unwrap(),
            online: OnlineStatus::Unknown,
            download_url: String::new(),
        }
    }

    #[test]
    fn test_filename_uses_title_and_extension() {
        let item = item("S1A_EW_GRDH_1SDH_20141003T003840_20141003T003920_002658_002F54_4DD1");
        assert_eq!(
            item.filename("zip"),
            "S1A_EW_GRDH_1SDH_20141003T003840_20141003T003920_002658_002F54_4DD1.zip"
        );
        assert_eq!(item.filename(".EOF"), format!("{}.EOF", item.title));
    }

    #[test]
    fn test_filename_is_sanitized() {
        assert_eq!(item("../etc/passwd").filename("zip"), "_etc_passwd.zip");
        assert_eq!(item("a:b*c").filename(""), "a_b_c");
    }

    #[test]
    fn test_unique_filename_appends_id() {
        assert_eq!(
            item("S2B_MSIL2A").unique_filename("zip"),
            "S2B_MSIL2A_8df46c9e-a20c-43db-a19a-4240c2ed3b8b.zip"
        );
    }

    #[test]
    fn test_filename_falls_back_to_id() {
        assert_eq!(
            item("  ").filename("zip"),
            "8df46c9e-a20c-43db-a19a-4240c2ed3b8b.zip"
        );
    }

    #[test]
    fn test_checksum_algorithm_parsing() {
        assert_eq!("MD5".parse(), Ok(ChecksumAlgorithm::Md5));
        assert_eq!("md5".parse(), Ok(ChecksumAlgorithm::Md5));
        assert_eq!("SHA3-256".parse(), Ok(ChecksumAlgorithm::Sha3_256));
        assert_eq!("sha3_256".parse(), Ok(ChecksumAlgorithm::Sha3_256));
        assert!("CRC32".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_checksum_hex_round_trip() {
        let checksum =
            Checksum::from_hex(ChecksumAlgorithm::Md5, "D41D8CD98F00B204E9800998ECF8427E").unwrap();
        assert_eq!(checksum.digest_hex(), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
