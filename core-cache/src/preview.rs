//! Preview rendering.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

/// Downscale `bytes` so neither edge exceeds `max_dimension` and re-encode as
/// JPEG. Formats the decoder does not understand are kept as-is so the
/// preview still shows something.
pub fn render_preview(bytes: &[u8], max_dimension: u32, quality: u8) -> Bytes {
    match try_render(bytes, max_dimension, quality) {
        Ok(rendered) => rendered,
        Err(e) => {
            debug!(error = %e, size = bytes.len(), "Preview decode failed, keeping source bytes");
            Bytes::copy_from_slice(bytes)
        }
    }
}

fn try_render(bytes: &[u8], max_dimension: u32, quality: u8) -> image::ImageResult<Bytes> {
    let source = image::load_from_memory(bytes)?;
    let scaled = if source.width() > max_dimension || source.height() > max_dimension {
        source.thumbnail(max_dimension, max_dimension)
    } else {
        source
    };

    let rgb = scaled.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_large_image_is_downscaled() {
        let rendered = render_preview(&png(400, 200), 100, 80);
        let decoded = image::load_from_memory(&rendered).unwrap();

        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 50);
        assert_eq!(image::guess_format(&rendered).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_small_image_keeps_dimensions() {
        let rendered = render_preview(&png(40, 30), 100, 80);
        let decoded = image::load_from_memory(&rendered).unwrap();

        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_undecodable_bytes_pass_through() {
        let raw = b"not really an image";
        assert_eq!(render_preview(raw, 100, 80).as_ref(), raw);
    }
}
