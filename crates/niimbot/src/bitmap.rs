//! Monochrome raster images and their row-oriented wire encoding.
//!
//! Each image row becomes one BitmapLine payload:
//! `row (u16 BE) | set-bit counts for three segments (3 × u8) | repeat (u8) | packed row`.
//! Pixels are packed 8 per byte, MSB first, 1 = printed (black) dot.

use image::GrayImage;

use crate::{NiimbotError, Result};

/// Header bytes preceding the packed row data.
pub const LINE_HEADER_LEN: usize = 6;

/// A black-and-white raster, one byte per pixel (0 = white, 1 = black).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoImage {
    width: u16,
    height: u16,
    pixels: Vec<u8>,
}

impl MonoImage {
    /// Build from raw pixels. Any value other than 0 or 1 is rejected.
    pub fn from_pixels(width: u16, height: u16, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != usize::from(width) * usize::from(height) {
            return Err(NiimbotError::InvalidJob(format!(
                "{} pixels do not form a {width}x{height} image",
                pixels.len()
            )));
        }
        if pixels.iter().any(|&p| p > 1) {
            return Err(NiimbotError::NotMonochrome);
        }
        Ok(Self { width, height, pixels })
    }

    /// Build from a grayscale image that contains only pure black and white.
    ///
    /// Black (0) becomes a printed dot. Thresholding is the caller's job.
    pub fn from_gray(image: &GrayImage) -> Result<Self> {
        let width = u16::try_from(image.width())
            .map_err(|_| NiimbotError::InvalidJob("image width exceeds 65535".into()))?;
        let height = u16::try_from(image.height())
            .map_err(|_| NiimbotError::InvalidJob("image height exceeds 65535".into()))?;
        let pixels = image
            .pixels()
            .map(|p| match p.0[0] {
                0 => Ok(1),
                255 => Ok(0),
                _ => Err(NiimbotError::NotMonochrome),
            })
            .collect::<Result<Vec<u8>>>()?;
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn pixel(&self, x: u16, y: u16) -> bool {
        self.pixels[usize::from(y) * usize::from(self.width) + usize::from(x)] != 0
    }

    fn row(&self, y: u16) -> &[u8] {
        let w = usize::from(self.width);
        let start = usize::from(y) * w;
        &self.pixels[start..start + w]
    }
}

/// Bytes per encoded row for a given pixel width.
pub fn row_bytes(width_px: u16) -> usize {
    usize::from(width_px).div_ceil(8)
}

/// Encode `image` into BitmapLine payloads, right-padded with white to
/// `max_width_px`.
///
/// The returned iterator is lazy and single-pass; call `encode` again to
/// restart.
pub fn encode(image: &MonoImage, max_width_px: u16) -> Result<BitmapLines<'_>> {
    if image.width() > max_width_px {
        return Err(NiimbotError::LabelTooWide {
            width: image.width(),
            max: max_width_px,
        });
    }
    let line_len = LINE_HEADER_LEN + row_bytes(max_width_px);
    if line_len > crate::protocol::packet::MAX_PAYLOAD {
        return Err(NiimbotError::PayloadTooLarge(line_len));
    }
    Ok(BitmapLines {
        image,
        row_bytes: row_bytes(max_width_px),
        next_row: 0,
    })
}

/// Lazy sequence of BitmapLine payloads, one per image row.
#[derive(Debug)]
pub struct BitmapLines<'a> {
    image: &'a MonoImage,
    row_bytes: usize,
    next_row: u16,
}

impl Iterator for BitmapLines<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_row >= self.image.height() {
            return None;
        }
        let y = self.next_row;
        self.next_row += 1;

        let packed = pack_row_msb(self.image.row(y), self.row_bytes);
        let [c1, c2, c3] = segment_bit_counts(&packed);

        let mut payload = Vec::with_capacity(LINE_HEADER_LEN + packed.len());
        payload.extend_from_slice(&y.to_be_bytes());
        payload.extend_from_slice(&[c1, c2, c3, 1]);
        payload.extend_from_slice(&packed);
        Some(payload)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::from(self.image.height() - self.next_row);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BitmapLines<'_> {}

/// Pack one pixel row into `row_bytes` bytes, MSB first. Missing pixels stay white.
fn pack_row_msb(row: &[u8], row_bytes: usize) -> Vec<u8> {
    let mut out = vec![0u8; row_bytes];
    for (x, &px) in row.iter().enumerate() {
        if px != 0 {
            out[x / 8] |= 0x80 >> (x % 8);
        }
    }
    out
}

/// Set-bit counts of the row split into three segments; the last takes the remainder.
fn segment_bit_counts(packed: &[u8]) -> [u8; 3] {
    let seg = packed.len() / 3;
    let count = |bytes: &[u8]| -> u8 {
        let ones: u32 = bytes.iter().map(|b| b.count_ones()).sum();
        u8::try_from(ones).unwrap_or(u8::MAX)
    };
    [
        count(&packed[..seg]),
        count(&packed[seg..seg * 2]),
        count(&packed[seg * 2..]),
    ]
}
