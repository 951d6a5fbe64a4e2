//! Image encoding: file on disk → base64 `data:` URL.
//!
//! Chat-completion APIs accept images inline as data URLs inside the JSON
//! request body. The media type comes from the file extension alone; no
//! content sniffing is done, so a mislabelled file is sent with whatever type
//! its name claims.

use crate::error::HandwriteError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One image read from disk and encoded for the request body.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub data_url: String,
}

/// Infer the media type from the file extension.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Wrap raw bytes as `data:{media_type};base64,{payload}`.
pub fn to_data_url(bytes: &[u8], media_type: &str) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(bytes))
}

/// Read and encode one image without blocking the runtime.
pub async fn encode_image(path: impl AsRef<Path>) -> Result<ImageAsset, HandwriteError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| HandwriteError::ImageRead {
            path: path.to_path_buf(),
            source,
        })?;
    let media_type = media_type_for(path);
    let data_url = to_data_url(&bytes, media_type);
    debug!(
        "Encoded {} ({}, {} bytes) → {} chars",
        path.display(),
        media_type,
        bytes.len(),
        data_url.len()
    );

    Ok(ImageAsset {
        path: path.to_path_buf(),
        bytes,
        media_type,
        data_url,
    })
}

/// Encode every image in order, failing on the first unreadable one.
pub async fn encode_all<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<ImageAsset>, HandwriteError> {
    let mut assets = Vec::with_capacity(paths.len());
    for p in paths {
        assets.push(encode_image(p).await?);
    }
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn media_type_table() {
        assert_eq!(media_type_for(Path::new("id.JPG")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("id.jpeg")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("sig.png")), "image/png");
        assert_eq!(media_type_for(Path::new("sig.webp")), "image/webp");
        assert_eq!(media_type_for(Path::new("scan.bmp")), "image/bmp");
        assert_eq!(media_type_for(Path::new("scan.tiff")), "application/octet-stream");
        assert_eq!(media_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn data_url_embeds_media_type() {
        assert_eq!(to_data_url(b"hi", "image/png"), "data:image/png;base64,aGk=");
    }

    #[tokio::test]
    async fn encode_reads_file() {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(&[0x89, b'P', b'N', b'G']).unwrap();

        let asset = encode_image(tmp.path()).await.unwrap();
        assert_eq!(asset.media_type, "image/png");
        assert_eq!(asset.bytes.len(), 4);
        assert!(asset.data_url.starts_with("data:image/png;base64,"));
        let payload = asset.data_url.trim_start_matches("data:image/png;base64,");
        assert_eq!(STANDARD.decode(payload).unwrap(), asset.bytes);
    }

    #[tokio::test]
    async fn missing_file_is_image_read_error() {
        let err = encode_image("/definitely/not/here.jpg").await.unwrap_err();
        assert!(matches!(err, HandwriteError::ImageRead { .. }), "got: {err}");
    }
}
