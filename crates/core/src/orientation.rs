use crate::ocr::OcrEngine;
use image::DynamicImage;
use tracing::{debug, warn};

pub struct OrientationCorrector<'a> {
    engine: &'a dyn OcrEngine,
}

impl<'a> OrientationCorrector<'a> {
    pub fn new(engine: &'a dyn OcrEngine) -> Self {
        Self { engine }
    }

    /// Rotates the image by `(360 - detected) mod 360` degrees counter-clockwise.
    ///
    /// Detector failures and angles that are not a multiple of 90 leave the
    /// image untouched.
    pub fn correct(&self, image: DynamicImage) -> DynamicImage {
        let detected = match self.engine.detect_rotation(&image) {
            Ok(degrees) => degrees % 360,
            Err(error) => {
                debug!(%error, "orientation detection failed, keeping page as rasterized");
                return image;
            }
        };

        match rotate_counter_clockwise(image, (360 - detected) % 360) {
            Ok(rotated) => rotated,
            Err(image) => {
                warn!(detected, "unsupported page rotation, keeping page as rasterized");
                image
            }
        }
    }
}

pub fn rotate_counter_clockwise(
    image: DynamicImage,
    degrees: u32,
) -> Result<DynamicImage, DynamicImage> {
    match degrees % 360 {
        0 => Ok(image),
        90 => Ok(image.rotate270()),
        180 => Ok(image.rotate180()),
        270 => Ok(image.rotate90()),
        _ => Err(image),
    }
}
