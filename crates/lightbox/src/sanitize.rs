//! Metadata removal for image bytes.
//!
//! JPEG and PNG are filtered at the container level: metadata segments/chunks
//! are dropped and everything else (including the compressed image data) is
//! copied byte for byte, so decoded pixels are unchanged. JPEG output ends at
//! the first `EOI`. Other formats are decoded and re-encoded in the same
//! format, which discards anything the encoder does not write. Animated GIF
//! and WebP are rejected, since re-encoding would keep only the first frame.
//!
//! Every result is fully decoded before it is returned; bytes that do not
//! decode are rejected with [`SanitizeError::Decode`].

use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SanitizeError {
    #[error("Unrecognized image format")]
    UnknownFormat,

    #[error("Malformed {format} container: {reason}")]
    Malformed { format: &'static str, reason: String },

    #[error("Image failed to decode: {0}")]
    Decode(String),

    #[error("Re-encoding failed: {0}")]
    Encode(String),

    #[error("Animated {0} images are not supported")]
    Animated(&'static str),
}

#[derive(Debug, Clone)]
pub struct Sanitized {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    /// Number of metadata blocks dropped by container filtering.
    pub removed: usize,
}

impl Sanitized {
    pub fn content_kind(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

pub fn sanitize(bytes: &[u8]) -> Result<Sanitized, SanitizeError> {
    let format = image::guess_format(bytes).map_err(|_| SanitizeError::UnknownFormat)?;

    let (out, removed) = match format {
        ImageFormat::Jpeg => strip_jpeg(bytes)?,
        ImageFormat::Png => strip_png(bytes)?,
        other => (reencode(bytes, other)?, 0),
    };

    image::load_from_memory_with_format(&out, format)
        .map_err(|e| SanitizeError::Decode(e.to_string()))?;

    Ok(Sanitized {
        bytes: out,
        format,
        removed,
    })
}

/// Names of the metadata blocks present in `bytes` (`APP1`, `COM`, `tEXt`, ...).
/// Data after a JPEG's `EOI` is reported as `trailing`.
///
/// Empty for formats that are re-encoded, and for bytes that cannot be parsed.
pub fn metadata_segments(bytes: &[u8]) -> Vec<String> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => jpeg_segments(bytes)
            .map(|layout| {
                let mut names: Vec<String> = layout
                    .segments
                    .iter()
                    .filter(|s| is_jpeg_metadata(s.marker))
                    .map(|s| jpeg_marker_name(s.marker))
                    .collect();
                if layout.trailing > 0 {
                    names.push(TRAILING.to_string());
                }
                names
            })
            .unwrap_or_default(),
        Ok(ImageFormat::Png) => png_chunks(bytes)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter(|c| is_png_metadata(&c.kind))
                    .map(|c| String::from_utf8_lossy(&c.kind).into_owned())
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

// JPEG

#[derive(Debug, Clone, Copy)]
struct Segment {
    marker: u8,
    start: usize,
    end: usize,
}

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const COM: u8 = 0xFE;

const TRAILING: &str = "trailing";

/// APP1..APP13, APP15 and COM. APP0 (JFIF) and APP14 (Adobe colour transform)
/// affect decoding and are kept.
fn is_jpeg_metadata(marker: u8) -> bool {
    matches!(marker, 0xE1..=0xED | 0xEF | COM)
}

fn jpeg_marker_name(marker: u8) -> String {
    match marker {
        COM => "COM".to_string(),
        0xE0..=0xEF => format!("APP{}", marker - 0xE0),
        other => format!("0x{:02X}", other),
    }
}

/// Layout of a JPEG stream: segments from SOI through EOI, plus the number of
/// bytes found after EOI (secondary images, vendor trailers).
struct JpegLayout {
    segments: Vec<Segment>,
    trailing: usize,
}

/// A scan segment covers the SOS header and its entropy-coded data, up to the
/// next marker that is not a restart marker. Markers between scans are parsed
/// as ordinary segments.
fn jpeg_segments(bytes: &[u8]) -> Result<JpegLayout, SanitizeError> {
    let malformed = |reason: String| SanitizeError::Malformed {
        format: "JPEG",
        reason,
    };
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != SOI {
        return Err(malformed("missing SOI marker".to_string()));
    }

    let mut segments = Vec::new();
    let mut seen_scan = false;
    let mut pos = 2;
    loop {
        if pos >= bytes.len() {
            if seen_scan {
                // Missing EOI; the decoder decides whether the scans suffice.
                return Ok(JpegLayout {
                    segments,
                    trailing: 0,
                });
            }
            return Err(malformed("no scan data before end of input".to_string()));
        }
        if bytes[pos] != 0xFF {
            return Err(malformed(format!("expected marker at offset {}", pos)));
        }
        let start = pos;
        // Fill bytes
        while pos < bytes.len() && bytes[pos] == 0xFF {
            pos += 1;
        }
        let Some(&marker) = bytes.get(pos) else {
            return Err(malformed("truncated marker".to_string()));
        };
        pos += 1;

        match marker {
            EOI => {
                segments.push(Segment {
                    marker,
                    start,
                    end: pos,
                });
                return Ok(JpegLayout {
                    segments,
                    trailing: bytes.len() - pos,
                });
            }
            0x01 | 0xD0..=0xD7 => {
                segments.push(Segment {
                    marker,
                    start,
                    end: pos,
                });
                continue;
            }
            _ => {}
        }

        if pos + 2 > bytes.len() {
            return Err(malformed(format!("truncated length for marker 0x{:02X}", marker)));
        }
        let len = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as usize;
        if len < 2 || pos + len > bytes.len() {
            return Err(malformed(format!(
                "segment 0x{:02X} length {} out of bounds",
                marker, len
            )));
        }
        pos += len;

        if marker == SOS {
            seen_scan = true;
            pos = entropy_data_end(bytes, pos);
        }
        segments.push(Segment {
            marker,
            start,
            end: pos,
        });
    }
}

/// Offset of the first marker after entropy-coded data starting at `pos`, or
/// the end of the input. Stuffed `FF 00` and restart markers belong to the scan.
fn entropy_data_end(bytes: &[u8], mut pos: usize) -> usize {
    while pos + 1 < bytes.len() {
        if bytes[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match bytes[pos + 1] {
            0x00 | 0xD0..=0xD7 => pos += 2,
            0xFF => pos += 1,
            _ => return pos,
        }
    }
    bytes.len()
}

fn strip_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, usize), SanitizeError> {
    let layout = jpeg_segments(bytes)?;
    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&bytes[..2]);
    let mut removed = 0;
    for seg in layout.segments {
        if is_jpeg_metadata(seg.marker) {
            removed += 1;
        } else {
            out.extend_from_slice(&bytes[seg.start..seg.end]);
        }
    }
    if layout.trailing > 0 {
        removed += 1;
    }
    Ok((out, removed))
}

// PNG

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Clone, Copy)]
struct Chunk {
    kind: [u8; 4],
    start: usize,
    end: usize,
}

fn is_png_metadata(kind: &[u8; 4]) -> bool {
    matches!(kind, b"tEXt" | b"zTXt" | b"iTXt" | b"eXIf" | b"tIME")
}

fn png_chunks(bytes: &[u8]) -> Result<Vec<Chunk>, SanitizeError> {
    let malformed = |reason: String| SanitizeError::Malformed {
        format: "PNG",
        reason,
    };
    if bytes.len() < PNG_SIGNATURE.len() || &bytes[..8] != PNG_SIGNATURE {
        return Err(malformed("missing signature".to_string()));
    }

    let mut chunks = Vec::new();
    let mut pos = PNG_SIGNATURE.len();
    while pos < bytes.len() {
        if pos + 8 > bytes.len() {
            return Err(malformed(format!("truncated chunk header at offset {}", pos)));
        }
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        let kind = [bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]];
        let end = pos
            .checked_add(12)
            .and_then(|p| p.checked_add(len))
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                malformed(format!(
                    "chunk {} length {} out of bounds",
                    String::from_utf8_lossy(&kind),
                    len
                ))
            })?;
        chunks.push(Chunk {
            kind,
            start: pos,
            end,
        });
        pos = end;
        if &kind == b"IEND" {
            return Ok(chunks);
        }
    }
    Err(malformed("missing IEND chunk".to_string()))
}

fn strip_png(bytes: &[u8]) -> Result<(Vec<u8>, usize), SanitizeError> {
    let chunks = png_chunks(bytes)?;
    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(PNG_SIGNATURE);
    let mut removed = 0;
    for chunk in chunks {
        if is_png_metadata(&chunk.kind) {
            removed += 1;
        } else {
            out.extend_from_slice(&bytes[chunk.start..chunk.end]);
        }
    }
    Ok((out, removed))
}

// Everything else

fn reencode(bytes: &[u8], format: ImageFormat) -> Result<Vec<u8>, SanitizeError> {
    if is_animated(bytes, format)? {
        let name = match format {
            ImageFormat::WebP => "WebP",
            _ => "GIF",
        };
        return Err(SanitizeError::Animated(name));
    }
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| SanitizeError::Decode(e.to_string()))?;
    let mut out = Cursor::new(Vec::with_capacity(bytes.len()));
    img.write_to(&mut out, format)
        .map_err(|e| SanitizeError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

fn is_animated(bytes: &[u8], format: ImageFormat) -> Result<bool, SanitizeError> {
    let decode = |e: image::ImageError| SanitizeError::Decode(e.to_string());
    match format {
        ImageFormat::Gif => {
            let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(decode)?;
            let mut frames = 0;
            for frame in decoder.into_frames() {
                frame.map_err(decode)?;
                frames += 1;
                if frames > 1 {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ImageFormat::WebP => Ok(WebPDecoder::new(Cursor::new(bytes))
            .map_err(decode)?
            .has_animation()),
        _ => Ok(false),
    }
}
