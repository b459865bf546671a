//! # Image rectification
//!
//! Applies the remap tables from a [`crate::stereo::CameraModel`] to raw stereo
//! captures, producing row-aligned rectified images. Pixels whose source falls
//! outside the raw image are written as black.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;

use crate::error::*;
use crate::stereo::{CameraModel, RectifyMaps};

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Rectify one stereo pair through the model's remap tables.
pub fn rectify_pair(
    model: &CameraModel,
    left: &GrayImage,
    right: &GrayImage,
) -> Result<(GrayImage, GrayImage)> {
    for img in [left, right] {
        if img.dimensions() != (model.width, model.height) {
            return Err(Error::Geometry(format!(
                "image is {}x{} but the camera model was built for {}x{}",
                img.width(),
                img.height(),
                model.width,
                model.height
            )));
        }
    }

    let left_rect = remap(left, &model.left_maps);
    let right_rect = remap(right, &model.right_maps);
    Ok((left_rect, right_rect))
}

/// Resample an image through a remap table with bilinear interpolation.
pub fn remap(src: &GrayImage, maps: &RectifyMaps) -> GrayImage {
    let width = src.width();
    let height = src.height();
    let mut dst = GrayImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            let src_x = maps.map_x[idx];
            let src_y = maps.map_y[idx];

            let value = if src_x >= 0.0
                && src_x <= (width - 1) as f32
                && src_y >= 0.0
                && src_y <= (height - 1) as f32
            {
                bilinear_interpolate(src, src_x, src_y)
            } else {
                0
            };

            dst.put_pixel(x, y, image::Luma([value]));
        }
    }

    dst
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn bilinear_interpolate(img: &GrayImage, x: f32, y: f32) -> u8 {
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);

    let dx = x - x0 as f32;
    let dy = y - y0 as f32;

    let i00 = img.get_pixel(x0, y0)[0] as f32;
    let i10 = img.get_pixel(x1, y0)[0] as f32;
    let i01 = img.get_pixel(x0, y1)[0] as f32;
    let i11 = img.get_pixel(x1, y1)[0] as f32;

    let value = i00 * (1.0 - dx) * (1.0 - dy)
        + i10 * dx * (1.0 - dy)
        + i01 * (1.0 - dx) * dy
        + i11 * dx * dy;

    value.clamp(0.0, 255.0) as u8
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| image::Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    fn identity_maps(width: u32, height: u32) -> RectifyMaps {
        let mut map_x = Vec::with_capacity((width * height) as usize);
        let mut map_y = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                map_x.push(x as f32);
                map_y.push(y as f32);
            }
        }
        RectifyMaps { map_x, map_y }
    }

    #[test]
    fn identity_map_preserves_image() {
        let src = gradient_image(16, 12);
        let out = remap(&src, &identity_maps(16, 12));
        assert_eq!(src, out);
    }

    #[test]
    fn out_of_bounds_sources_become_black() {
        let src = gradient_image(8, 8);
        let mut maps = identity_maps(8, 8);
        for v in maps.map_x.iter_mut() {
            *v += 100.0;
        }
        let out = remap(&src, &maps);
        assert!(out.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn half_pixel_shift_interpolates() {
        let mut src = GrayImage::new(4, 1);
        src.put_pixel(0, 0, image::Luma([0]));
        src.put_pixel(1, 0, image::Luma([100]));
        src.put_pixel(2, 0, image::Luma([200]));
        src.put_pixel(3, 0, image::Luma([200]));

        let maps = RectifyMaps {
            map_x: vec![0.5, 1.5, 2.5, 3.0],
            map_y: vec![0.0; 4],
        };
        let out = remap(&src, &maps);
        assert_eq!(out.get_pixel(0, 0)[0], 50);
        assert_eq!(out.get_pixel(1, 0)[0], 150);
        assert_eq!(out.get_pixel(2, 0)[0], 200);
    }
}
