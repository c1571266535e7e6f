use serde::Serialize;

use crate::detect::result::BoundingBox;

/// Mid-gray used for the padded border.
pub const PAD_VALUE: u8 = 114;

/// How an input image was resized and padded into the square model input.
///
/// Recomputed on every call: consecutive frames may differ in size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LetterboxParams {
    /// Factor applied to both axes.
    pub scale: f32,
    /// Horizontal padding in model pixels.
    pub x_offset: u32,
    /// Vertical padding in model pixels.
    pub y_offset: u32,
    pub resized_width: u32,
    pub resized_height: u32,
}

impl LetterboxParams {
    /// Fit a `src_width x src_height` image into `dst_width x dst_height`
    /// without changing its aspect ratio, centered.
    ///
    /// Source dimensions must be non-zero.
    pub fn compute(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Self {
        let scale =
            (dst_width as f32 / src_width as f32).min(dst_height as f32 / src_height as f32);
        let resized_width = ((src_width as f32 * scale) as u32).clamp(1, dst_width);
        let resized_height = ((src_height as f32 * scale) as u32).clamp(1, dst_height);
        Self {
            scale,
            x_offset: (dst_width - resized_width) / 2,
            y_offset: (dst_height - resized_height) / 2,
            resized_width,
            resized_height,
        }
    }

    /// Map a model-space point back into the original image.
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.x_offset as f32) / self.scale,
            (y - self.y_offset as f32) / self.scale,
        )
    }

    /// Map an original-image point into model space.
    pub fn to_model(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.x_offset as f32,
            y * self.scale + self.y_offset as f32,
        )
    }

    /// Convert a model-space center/size box into an original-image box.
    pub fn box_to_original(&self, cx: f32, cy: f32, width: f32, height: f32) -> BoundingBox {
        let (cx, cy) = self.to_original(cx, cy);
        BoundingBox::from_center(cx, cy, width / self.scale, height / self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_image_is_padded_vertically() {
        let lb = LetterboxParams::compute(1280, 720, 640, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.resized_width, 640);
        assert_eq!(lb.resized_height, 360);
        assert_eq!(lb.x_offset, 0);
        assert_eq!(lb.y_offset, 140);
    }

    #[test]
    fn tall_image_is_padded_horizontally() {
        let lb = LetterboxParams::compute(300, 600, 640, 640);
        assert!((lb.scale - 640.0 / 600.0).abs() < 1e-6);
        assert_eq!(lb.resized_height, 640);
        assert_eq!(lb.x_offset, (640 - lb.resized_width) / 2);
        assert_eq!(lb.y_offset, 0);
    }

    #[test]
    fn model_space_point_round_trips_to_original() {
        let lb = LetterboxParams::compute(1456, 1088, 640, 640);
        for &(x, y) in &[(0.0f32, 0.0f32), (728.0, 544.0), (1455.0, 1087.0), (12.5, 900.25)] {
            let (mx, my) = lb.to_model(x, y);
            let (ox, oy) = lb.to_original(mx, my);
            assert!((ox - x).abs() < 1e-2, "x {} -> {}", x, ox);
            assert!((oy - y).abs() < 1e-2, "y {} -> {}", y, oy);
        }
    }

    #[test]
    fn box_conversion_scales_size() {
        let lb = LetterboxParams::compute(1280, 720, 640, 640);
        let b = lb.box_to_original(320.0, 320.0, 20.0, 10.0);
        assert_eq!(b.width, 40.0);
        assert_eq!(b.height, 20.0);
        assert_eq!(b.center(), (640.0, 360.0));
    }
}
