//! Print job description.
//!
//! A job is one or more monochrome page images plus print settings. It is
//! consumed by exactly one [`PrintSession`](crate::PrintSession) run and is
//! never retried automatically.

use crate::bitmap::{self, MonoImage};
use crate::protocol::ModelProfile;
use crate::{NiimbotError, Result, mm_to_px};

/// Darkness range accepted by SetDensity.
pub const DENSITY_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Copies accepted per job.
pub const QUANTITY_RANGE: std::ops::RangeInclusive<u16> = 1..=10;

/// One invocation of "print this label".
#[derive(Debug, Clone)]
pub struct PrintJob {
    pages: Vec<MonoImage>,
    /// Print darkness, 1 (light) to 5 (dark).
    pub density: u8,
    /// Physical copies of every page.
    pub quantity: u16,
    /// Label size in millimetres (width across the print head, height along the feed).
    pub label_size_mm: Option<(f32, f32)>,
}

impl PrintJob {
    /// Create a single-page job with density 3 and one copy.
    pub fn new(image: MonoImage) -> Self {
        Self {
            pages: vec![image],
            density: 3,
            quantity: 1,
            label_size_mm: None,
        }
    }

    /// Builder: append another page.
    pub fn with_page(mut self, image: MonoImage) -> Self {
        self.pages.push(image);
        self
    }

    /// Builder: set print density.
    pub fn with_density(mut self, val: u8) -> Self {
        self.density = val;
        self
    }

    /// Builder: set copy count.
    pub fn with_quantity(mut self, val: u16) -> Self {
        self.quantity = val;
        self
    }

    /// Builder: set the physical label size in millimetres.
    pub fn with_label_size_mm(mut self, width_mm: f32, height_mm: f32) -> Self {
        self.label_size_mm = Some((width_mm, height_mm));
        self
    }

    pub fn pages(&self) -> &[MonoImage] {
        &self.pages
    }

    /// Pages the printer reports once everything is out: pages × copies.
    pub fn total_pages(&self) -> u16 {
        u16::try_from(self.pages.len())
            .unwrap_or(u16::MAX)
            .saturating_mul(self.quantity)
    }

    /// SetPageSize dimensions `(height, width)` in device pixels for `page`.
    ///
    /// The label size wins when given; otherwise the image itself is the page.
    pub fn page_size_px(&self, page: &MonoImage) -> (u16, u16) {
        match self.label_size_mm {
            Some((width_mm, height_mm)) => (mm_to_px(height_mm), mm_to_px(width_mm)),
            None => (page.height(), page.width()),
        }
    }

    /// Check every caller-supplied value against `profile` before any I/O.
    pub fn validate(&self, profile: &ModelProfile) -> Result<()> {
        if self.pages.is_empty() {
            return Err(NiimbotError::InvalidJob("job has no pages".into()));
        }
        if !DENSITY_RANGE.contains(&self.density) {
            return Err(NiimbotError::InvalidJob(format!(
                "density must be between 1 and 5, got {}",
                self.density
            )));
        }
        if !QUANTITY_RANGE.contains(&self.quantity) {
            return Err(NiimbotError::InvalidJob(format!(
                "quantity must be between 1 and 10, got {}",
                self.quantity
            )));
        }
        if let Some((width_mm, height_mm)) = self.label_size_mm {
            if !(width_mm > 0.0 && height_mm > 0.0) {
                return Err(NiimbotError::InvalidJob(format!(
                    "label size must be positive, got {width_mm}x{height_mm}mm"
                )));
            }
            let width = mm_to_px(width_mm);
            if width > profile.max_width_px {
                return Err(NiimbotError::LabelTooWide {
                    width,
                    max: profile.max_width_px,
                });
            }
        }
        for page in &self.pages {
            if page.height() == 0 {
                return Err(NiimbotError::InvalidJob("page has no rows".into()));
            }
            // Width and line payload size checks live with the encoder.
            bitmap::encode(page, profile.max_width_px)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(width: u16, height: u16) -> MonoImage {
        MonoImage::from_pixels(width, height, vec![0; usize::from(width) * usize::from(height)])
            .unwrap()
    }

    fn b1() -> ModelProfile {
        ModelProfile::resolve("b1").unwrap()
    }

    #[test]
    fn test_defaults() {
        let job = PrintJob::new(page(8, 8));
        assert_eq!(job.density, 3);
        assert_eq!(job.quantity, 1);
        assert_eq!(job.total_pages(), 1);
        assert!(job.validate(&b1()).is_ok());
    }

    #[test]
    fn test_total_pages_counts_copies() {
        let job = PrintJob::new(page(8, 8))
            .with_page(page(8, 8))
            .with_quantity(3);
        assert_eq!(job.total_pages(), 6);
    }

    #[test]
    fn test_density_and_quantity_bounds() {
        assert!(PrintJob::new(page(8, 8)).with_density(0).validate(&b1()).is_err());
        assert!(PrintJob::new(page(8, 8)).with_density(6).validate(&b1()).is_err());
        assert!(PrintJob::new(page(8, 8)).with_quantity(0).validate(&b1()).is_err());
        assert!(PrintJob::new(page(8, 8)).with_quantity(11).validate(&b1()).is_err());
        assert!(
            PrintJob::new(page(8, 8))
                .with_density(5)
                .with_quantity(10)
                .validate(&b1())
                .is_ok()
        );
    }

    #[test]
    fn test_image_wider_than_head() {
        let d110 = ModelProfile::resolve("d110").unwrap();
        let err = PrintJob::new(page(384, 8)).validate(&d110).unwrap_err();
        assert!(matches!(err, NiimbotError::LabelTooWide { width: 384, max: 240 }));
    }

    #[test]
    fn test_label_size_wider_than_head() {
        let d110 = ModelProfile::resolve("d110").unwrap();
        let err = PrintJob::new(page(200, 8))
            .with_label_size_mm(40.0, 12.0)
            .validate(&d110)
            .unwrap_err();
        assert!(matches!(err, NiimbotError::LabelTooWide { width: 320, max: 240 }));
    }

    #[test]
    fn test_page_size_from_label_hint() {
        let img = page(240, 100);
        let job = PrintJob::new(img.clone()).with_label_size_mm(30.0, 15.0);
        assert_eq!(job.page_size_px(&img), (120, 240));
        let job = PrintJob::new(img.clone());
        assert_eq!(job.page_size_px(&img), (100, 240));
    }
}
