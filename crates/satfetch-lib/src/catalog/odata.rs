use super::types::{Checksum, ChecksumAlgorithm, Item, ItemId, OnlineStatus};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ODataEnvelope {
    d: ODataProduct,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentLength {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ODataProduct {
    id: String,
    name: String,
    content_length: ContentLength,
    checksum: ODataChecksum,
    #[serde(default)]
    online: Option<bool>,
    #[serde(rename = "__metadata", default)]
    metadata: Option<ODataMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ODataChecksum {
    algorithm: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ODataMetadata {
    #[serde(default)]
    media_src: Option<String>,
}

/// Parses an OData `Products('<id>')?$format=json` response. `fallback_download_url` is used
/// when the response does not carry a media source link.
pub fn parse_product(body: &[u8], fallback_download_url: String) -> Result<Item, String> {
    let envelope: ODataEnvelope = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let product = envelope.d;

    let size = match product.content_length {
        ContentLength::Number(size) => size,
        ContentLength::Text(text) => text
            .trim()
            .parse()
            .map_err(|e| format!("Invalid ContentLength {text:?}: {e}"))?,
    };

    let algorithm: ChecksumAlgorithm = product
        .checksum
        .algorithm
        .parse()
        .map_err(|e: super::types::UnsupportedAlgorithm| e.to_string())?;
    let checksum = Checksum::from_hex(algorithm, &product.checksum.value)
        .map_err(|e| format!("Invalid checksum value {:?}: {e}", product.checksum.value))?;

    let download_url = product
        .metadata
        .and_then(|metadata| metadata.media_src)
        .filter(|url| !url.is_empty())
        .unwrap_or(fallback_download_url);

    Ok(Item {
        id: ItemId::from(product.id),
        title: product.name,
        size,
        checksum,
        online: OnlineStatus::from(product.online),
        download_url,
    })
}

#[derive(Debug, Deserialize)]
struct ODataErrorEnvelope {
    error: ODataError,
}

#[derive(Debug, Deserialize)]
struct ODataError {
    message: ODataErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ODataErrorMessage {
    value: String,
}

pub fn parse_error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ODataErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message.value)
}
