//! Lightbox Test Utilities
//!
//! Small in-memory image fixtures carrying the kinds of embedded metadata the
//! sanitizer has to remove:
//!
//! - [`jpeg_with_exif`]: baseline JPEG with an EXIF `APP1` segment and a `COM` comment
//! - [`png_with_text`]: PNG with a `tEXt` chunk after `IHDR`
//! - [`jpeg_with_trailer`]: JPEG followed by a second, EXIF-carrying JPEG after `EOI`
//! - [`jpeg_with_comment_after_scan`]: `COM` segment between the scan data and `EOI`
//! - [`bmp_image`]: plain BMP, for formats that are re-encoded rather than filtered
//! - [`animated_gif`]: GIF with one or more frames
//!
//! ```rust,ignore
//! let bytes = lightbox_test_utils::jpeg_with_exif(16, 16);
//! assert!(lightbox_test_utils::contains(&bytes, lightbox_test_utils::EXIF_MARKER_TEXT));
//! ```

use image::codecs::gif::GifEncoder;
use image::{Delay, DynamicImage, Frame, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;

/// Text embedded in every metadata block the fixtures add.
pub const EXIF_MARKER_TEXT: &[u8] = b"lightbox-fixture-camera";

/// Text stored in the JPEG `COM` segment.
pub const COMMENT_TEXT: &[u8] = b"lightbox-fixture-comment";

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let b = ((x + y) % 256) as u8;
        image::Rgb([r, g, b])
    })
}

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format)
        .expect("fixture encoding should not fail");
    buf.into_inner()
}

/// Plain JPEG as produced by the encoder.
pub fn plain_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(gradient(width, height)), ImageFormat::Jpeg)
}

/// JPEG carrying an `APP1` EXIF segment and a `COM` segment.
///
/// Both are inserted after the JFIF `APP0` segment so the file stays valid.
pub fn jpeg_with_exif(width: u32, height: u32) -> Vec<u8> {
    let plain = plain_jpeg(width, height);

    let mut exif = Vec::new();
    exif.extend_from_slice(b"Exif\0\0");
    // Little-endian TIFF header, IFD0 at offset 8 with no entries
    exif.extend_from_slice(b"II*\0");
    exif.extend_from_slice(&8u32.to_le_bytes());
    exif.extend_from_slice(&0u16.to_le_bytes());
    exif.extend_from_slice(&0u32.to_le_bytes());
    exif.extend_from_slice(EXIF_MARKER_TEXT);

    let mut inserted = Vec::new();
    push_jpeg_segment(&mut inserted, 0xE1, &exif);
    push_jpeg_segment(&mut inserted, 0xFE, COMMENT_TEXT);

    let at = after_app0(&plain);
    let mut out = Vec::with_capacity(plain.len() + inserted.len());
    out.extend_from_slice(&plain[..at]);
    out.extend_from_slice(&inserted);
    out.extend_from_slice(&plain[at..]);
    out
}

/// `plain_jpeg(width, height)` with an EXIF-carrying JPEG appended after its
/// `EOI`, the way multi-picture camera files store secondary images.
pub fn jpeg_with_trailer(width: u32, height: u32) -> Vec<u8> {
    [plain_jpeg(width, height), jpeg_with_exif(4, 4)].concat()
}

/// `plain_jpeg(width, height)` with a `COM` segment between the entropy-coded
/// data and `EOI`.
pub fn jpeg_with_comment_after_scan(width: u32, height: u32) -> Vec<u8> {
    let plain = plain_jpeg(width, height);
    let at = plain.len() - 2;
    assert_eq!(&plain[at..], &[0xFF, 0xD9], "encoder output ends with EOI");
    let mut out = Vec::with_capacity(plain.len() + COMMENT_TEXT.len() + 4);
    out.extend_from_slice(&plain[..at]);
    push_jpeg_segment(&mut out, 0xFE, COMMENT_TEXT);
    out.extend_from_slice(&plain[at..]);
    out
}

fn push_jpeg_segment(out: &mut Vec<u8>, marker: u8, payload: &[u8]) {
    let len = (payload.len() + 2) as u16;
    out.push(0xFF);
    out.push(marker);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
}

fn after_app0(jpeg: &[u8]) -> usize {
    if jpeg.len() > 6 && jpeg[2] == 0xFF && jpeg[3] == 0xE0 {
        let len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        4 + len
    } else {
        2
    }
}

/// PNG with a `tEXt` chunk placed right after `IHDR`.
pub fn png_with_text(width: u32, height: u32) -> Vec<u8> {
    let plain = encode(DynamicImage::ImageRgb8(gradient(width, height)), ImageFormat::Png);

    let mut data = Vec::new();
    data.extend_from_slice(b"Comment\0");
    data.extend_from_slice(EXIF_MARKER_TEXT);

    // 8-byte signature + IHDR (length, type, 13 data bytes, crc)
    let at = 8 + 4 + 4 + 13 + 4;
    let mut out = Vec::with_capacity(plain.len() + data.len() + 12);
    out.extend_from_slice(&plain[..at]);
    push_png_chunk(&mut out, b"tEXt", &data);
    out.extend_from_slice(&plain[at..]);
    out
}

fn push_png_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut crc_input = Vec::with_capacity(4 + data.len());
    crc_input.extend_from_slice(kind);
    crc_input.extend_from_slice(data);
    out.extend_from_slice(&crc32(&crc_input).to_be_bytes());
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in bytes {
        crc ^= b as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

pub fn bmp_image(width: u32, height: u32) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(gradient(width, height)), ImageFormat::Bmp)
}

/// GIF with `frames` frames, each a different solid colour.
pub fn animated_gif(width: u32, height: u32, frames: usize) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        let frames = (0..frames).map(|i| {
            let shade = (i * 60 % 256) as u8;
            let img = RgbaImage::from_pixel(width, height, image::Rgba([shade, 255 - shade, 0, 255]));
            Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(100, 1))
        });
        encoder
            .encode_frames(frames)
            .expect("fixture encoding should not fail");
    }
    out
}

/// Decode to RGBA8: `(width, height, pixels)`.
pub fn decode_pixels(bytes: &[u8]) -> (u32, u32, Vec<u8>) {
    let img = image::load_from_memory(bytes).expect("fixture should decode");
    let rgba = img.to_rgba8();
    (rgba.width(), rgba.height(), rgba.into_raw())
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"IEND"), 0xAE42_6082);
    }

    #[test]
    fn test_fixtures_decode_and_carry_metadata() {
        let jpeg = jpeg_with_exif(8, 8);
        assert!(contains(&jpeg, EXIF_MARKER_TEXT));
        assert!(contains(&jpeg, COMMENT_TEXT));
        assert_eq!(decode_pixels(&jpeg).0, 8);

        let png = png_with_text(5, 3);
        assert!(contains(&png, b"tEXt"));
        let (w, h, _) = decode_pixels(&png);
        assert_eq!((w, h), (5, 3));

        let trailer = jpeg_with_trailer(8, 8);
        assert!(contains(&trailer, EXIF_MARKER_TEXT));
        assert!(contains(&jpeg_with_comment_after_scan(8, 8), COMMENT_TEXT));
    }
}
