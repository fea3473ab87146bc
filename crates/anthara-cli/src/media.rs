use anthara_core::MediaPayload;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::Path;

/// Mime type for an image file, judged by extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

/// Read an image file into an inline payload.
pub fn load_image(path: &Path) -> Result<MediaPayload> {
    let Some(mime_type) = mime_for_path(path) else {
        bail!(
            "Unsupported image type: {} (use png, jpg, webp, gif or heic)",
            path.display()
        );
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    if bytes.is_empty() {
        bail!("Image file is empty: {}", path.display());
    }
    Ok(MediaPayload::new(mime_type, BASE64.encode(bytes)))
}

/// Decode a payload and write it to `path`. Returns the byte count.
pub fn save_image(media: &MediaPayload, path: &Path) -> Result<usize> {
    let bytes = decoded(media)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &bytes)
        .with_context(|| format!("Failed to write image {}", path.display()))?;
    Ok(bytes.len())
}

/// Size of the decoded payload, for display.
pub fn decoded_len(media: &MediaPayload) -> Option<usize> {
    decoded(media).ok().map(|b| b.len())
}

fn decoded(media: &MediaPayload) -> Result<Vec<u8>> {
    BASE64
        .decode(media.data.trim())
        .context("Image data is not valid base64")
}
