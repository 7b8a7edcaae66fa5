//! Staged-image handling.
//!
//! Every acquisition path (file picker, screen capture, drag-and-drop,
//! clipboard paste) funnels into [`stage`], which sniffs the payload,
//! downscales oversized pictures, and derives the preview the chat view
//! shows. At most one image is staged at a time.

use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use iced::widget::image::Handle;
use image::{GenericImageView, ImageFormat};

// Pictures are shrunk to fit this box before submission.
const MAX_WIDTH: u32 = 1120;
const MAX_HEIGHT: u32 = 1120;

#[derive(Clone)]
pub struct StagedImage {
    /// Encoded bytes as they will be submitted.
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    /// Preview decoded from the same bytes.
    pub preview: Handle,
}

impl fmt::Debug for StagedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedImage")
            .field("mime", &self.mime)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Stage raw bytes if they hold a decodable image. Returns `None` for
/// anything else; non-image payloads are dropped without surfacing an error.
pub fn stage(bytes: Vec<u8>) -> Option<StagedImage> {
    let format = match image::guess_format(&bytes) {
        Ok(format) => format,
        Err(_) => {
            tracing::debug!("ignoring non-image payload ({} bytes)", bytes.len());
            return None;
        }
    };

    match shrink_to_fit(bytes, format) {
        Ok((bytes, mime)) => {
            let preview = Handle::from_bytes(bytes.clone());
            Some(StagedImage {
                bytes,
                mime,
                preview,
            })
        }
        Err(e) => {
            tracing::debug!("could not decode image payload: {e}");
            None
        }
    }
}

/// Read and stage an image file. Used by the file picker, drag-and-drop,
/// and the screen-capture output.
pub async fn load_file(path: PathBuf) -> Result<StagedImage> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    stage(bytes).ok_or_else(|| anyhow!("{} is not a supported image", path.display()))
}

/// Stage whatever image is currently on the clipboard. Returns `None` when
/// the clipboard holds no image (text paste is handled by the input widget).
pub fn from_clipboard(clipboard: &mut arboard::Clipboard) -> Option<StagedImage> {
    let pasted = match clipboard.get_image() {
        Ok(pasted) => pasted,
        Err(arboard::Error::ContentNotAvailable) => return None,
        Err(e) => {
            tracing::debug!("clipboard read failed: {e}");
            return None;
        }
    };

    // arboard hands back raw RGBA.
    let (width, height) = (pasted.width as u32, pasted.height as u32);
    let buffer: image::ImageBuffer<image::Rgba<u8>, Vec<u8>> =
        image::ImageBuffer::from_raw(width, height, pasted.bytes.into_owned())?;

    let mut bytes = Vec::new();
    if let Err(e) = buffer.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png) {
        tracing::debug!("failed to encode clipboard image: {e}");
        return None;
    }
    stage(bytes)
}

/// Grab the screen into a temp file, trying whichever capture tool is
/// installed.
pub fn capture_screen() -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!(
        "nutrilens-capture-{}.png",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    ));

    // Wayland first, then X11, then the GNOME tool.
    let candidates: [(&str, &[&str]); 3] =
        [("grim", &[]), ("scrot", &[]), ("gnome-screenshot", &["-f"])];

    for (tool, pre_args) in candidates {
        match Command::new(tool).args(pre_args).arg(&path).output() {
            Ok(output) if output.status.success() && path.exists() => {
                tracing::debug!("captured screen with {tool}");
                return Ok(path);
            }
            Ok(output) => {
                tracing::debug!("{tool} failed: {}", String::from_utf8_lossy(&output.stderr));
            }
            Err(e) => {
                tracing::debug!("{tool} unavailable: {e}");
            }
        }
    }

    bail!("no screen capture tool found; install grim (Wayland), scrot (X11), or gnome-screenshot")
}

/// Encode a staged image for submission.
pub fn to_data_uri(image: &StagedImage) -> String {
    format!("data:{};base64,{}", image.mime, BASE64.encode(&image.bytes))
}

fn shrink_to_fit(bytes: Vec<u8>, format: ImageFormat) -> Result<(Vec<u8>, &'static str)> {
    let img = image::load_from_memory(&bytes).context("failed to decode image")?;

    let (width, height) = img.dimensions();
    if width <= MAX_WIDTH && height <= MAX_HEIGHT {
        return Ok((bytes, format.to_mime_type()));
    }

    let width_ratio = MAX_WIDTH as f32 / width as f32;
    let height_ratio = MAX_HEIGHT as f32 / height as f32;
    let scale = width_ratio.min(height_ratio);

    let new_width = (width as f32 * scale) as u32;
    let new_height = (height as f32 * scale) as u32;
    tracing::debug!("downscaling image from {width}x{height} to {new_width}x{new_height}");

    let img = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);

    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .context("failed to encode image")?;
    Ok((buffer, "image/png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_of(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn non_image_payloads_are_ignored() {
        assert!(stage(b"just some text".to_vec()).is_none());
        assert!(stage(Vec::new()).is_none());
    }

    #[test]
    fn png_bytes_are_staged_with_mime() {
        let staged = stage(png_of(4, 4)).unwrap();
        assert_eq!(staged.mime, "image/png");
        assert!(!staged.bytes.is_empty());
    }

    #[test]
    fn oversized_images_are_downscaled() {
        let staged = stage(png_of(2000, 40)).unwrap();
        let decoded = image::load_from_memory(&staged.bytes).unwrap();
        let (width, height) = decoded.dimensions();
        assert!(width <= MAX_WIDTH);
        assert!(height <= MAX_HEIGHT);
    }

    #[test]
    fn small_images_keep_their_bytes() {
        let original = png_of(8, 8);
        let staged = stage(original.clone()).unwrap();
        assert_eq!(staged.bytes, original);
    }

    #[test]
    fn data_uri_carries_mime_and_base64() {
        let staged = stage(png_of(2, 2)).unwrap();
        let uri = to_data_uri(&staged);
        assert!(uri.starts_with("data:image/png;base64,"));

        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();
        assert_eq!(BASE64.decode(payload).unwrap(), staged.bytes);
    }
}
