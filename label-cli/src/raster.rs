//! Turn an arbitrary image file into a black-and-white label page.

use std::path::Path;

use anyhow::Context;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use niimbot::MonoImage;

/// Load `path`, shrink it to the print head if needed and binarize it.
///
/// Transparent pixels count as paper. With `dither` the image is
/// error-diffused instead of cut at `black_point`.
pub fn load_label(
    path: &Path,
    max_width_px: u16,
    black_point: f32,
    dither: bool,
) -> anyhow::Result<MonoImage> {
    let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    tracing::debug!(width = img.width(), height = img.height(), "Loaded label image");

    let img = fit_to_width(img, u32::from(max_width_px));
    let gray = flatten_to_gray(&img);
    let bw = if dither {
        floyd_steinberg_dither(&gray)
    } else {
        threshold(&gray, black_point)
    };
    Ok(MonoImage::from_gray(&bw)?)
}

/// Downscale (never upscale) so the image fits `max_width`, keeping aspect ratio.
fn fit_to_width(img: DynamicImage, max_width: u32) -> DynamicImage {
    if img.width() <= max_width {
        return img;
    }
    let ratio = f64::from(max_width) / f64::from(img.width());
    let new_height = ((f64::from(img.height()) * ratio).round() as u32).max(1);
    tracing::debug!(
        orig_w = img.width(),
        orig_h = img.height(),
        new_width = max_width,
        new_height,
        "Resizing image to print head width"
    );
    img.resize_exact(max_width, new_height, FilterType::Lanczos3)
}

/// Grayscale with alpha composited onto white paper.
fn flatten_to_gray(img: &DynamicImage) -> GrayImage {
    let rgba = img.to_rgba8();
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let luma = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000;
        let a = u32::from(a);
        Luma([((luma * a + 255 * (255 - a)) / 255) as u8])
    })
}

/// Pixels darker than `black_point` (0.0 to 1.0 of full white) print.
pub fn threshold(img: &GrayImage, black_point: f32) -> GrayImage {
    let cut = (black_point.clamp(0.0, 1.0) * 255.0).round() as u8;
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let v = img.get_pixel(x, y).0[0];
        Luma([if v < cut { 0 } else { 255 }])
    })
}

/// Floyd-Steinberg error diffusion to pure black/white.
pub fn floyd_steinberg_dither(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut buffer: Vec<i16> = img.pixels().map(|p| i16::from(p.0[0])).collect();

    for y in 0..h {
        for x in 0..w {
            let old = buffer[y * w + x];
            let new = if old >= 128 { 255 } else { 0 };
            let error = old - new;
            buffer[y * w + x] = new;

            // Right 7/16, bottom-left 3/16, bottom 5/16, bottom-right 1/16.
            if x + 1 < w {
                buffer[y * w + x + 1] += error * 7 / 16;
            }
            if y + 1 < h {
                if x > 0 {
                    buffer[(y + 1) * w + x - 1] += error * 3 / 16;
                }
                buffer[(y + 1) * w + x] += error * 5 / 16;
                if x + 1 < w {
                    buffer[(y + 1) * w + x + 1] += error / 16;
                }
            }
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        Luma([buffer[y as usize * w + x as usize].clamp(0, 255) as u8])
    })
}
