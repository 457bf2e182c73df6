use crate::models::{BoundingBox, Element};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};

pub fn binarize(image: &DynamicImage, threshold: u8) -> GrayImage {
    let gray = image.to_luma8();
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y).0[0] > threshold {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

/// One `block` element per outermost contour whose bounding rectangle covers
/// more than `min_area` pixels.
pub fn detect_blocks(image: &DynamicImage, threshold: u8, min_area: u32) -> Vec<Element> {
    let binary = binarize(image, threshold);

    find_contours::<u32>(&binary)
        .into_iter()
        .filter(|contour| matches!(contour.border_type, BorderType::Outer) && contour.parent.is_none())
        .filter_map(|contour| {
            let min_x = contour.points.iter().map(|p| p.x).min()?;
            let max_x = contour.points.iter().map(|p| p.x).max()?;
            let min_y = contour.points.iter().map(|p| p.y).min()?;
            let max_y = contour.points.iter().map(|p| p.y).max()?;

            let width = max_x - min_x + 1;
            let height = max_y - min_y + 1;
            if width * height <= min_area {
                return None;
            }

            Some(Element::Block {
                bbox: Some(BoundingBox::new(
                    min_x as f32,
                    min_y as f32,
                    (min_x + width) as f32,
                    (min_y + height) as f32,
                )),
            })
        })
        .collect()
}
