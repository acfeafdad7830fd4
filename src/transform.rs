//! Rotate, crop, translate, colour and scale, always in that order.
//!
//! Rotation, crop and re-origin are composed into one inverse-mapped
//! resample: each output pixel is mapped back through the translation, the
//! crop offset inside the rotated bounding box and the inverse rotation to
//! a source coordinate. Samples that fall outside the source are
//! transparent.

use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::model::{EditParams, ImageOperation, OperationSet};

/// Positive angles turn the image clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Thumbnail quality.
    Nearest,
    /// Export quality (Catmull-Rom).
    Bicubic,
}

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Bicubic => FilterType::CatmullRom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransformStep {
    Rotate,
    Crop,
    Translate,
    ColorRaw,
    Scale,
}

/// One run of the pipeline.
#[derive(Debug, Clone)]
pub struct Transform {
    /// Operations still to be applied; anything else is already baked in.
    pub operations: OperationSet,
    /// Target parameters.
    pub params: EditParams,
    /// Rotation already present in the source pixels.
    pub source_rotation: f64,
    pub interpolation: Interpolation,
    /// Fit inside this box; `None` or a non-positive side keeps natural size.
    pub target_box: Option<(u32, u32)>,
}

impl Transform {
    pub fn new(operations: OperationSet, params: EditParams) -> Self {
        Self {
            operations,
            params,
            source_rotation: 0.0,
            interpolation: Interpolation::Bicubic,
            target_box: None,
        }
    }

    pub fn with_source_rotation(mut self, degrees: f64) -> Self {
        self.source_rotation = degrees;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_target_box(mut self, target_box: Option<(u32, u32)>) -> Self {
        self.target_box = target_box;
        self
    }

    fn rotation_delta(&self) -> f64 {
        let delta = (self.params.rotation - self.source_rotation).rem_euclid(360.0);
        if delta.abs() < 1e-9 || (360.0 - delta).abs() < 1e-9 {
            0.0
        } else {
            delta
        }
    }

    fn scale_box(&self) -> Option<(u32, u32)> {
        self.target_box.filter(|&(w, h)| w > 0 && h > 0)
    }

    /// The steps this transform will run, in execution order.
    pub fn steps(&self) -> Vec<TransformStep> {
        let mut steps = Vec::new();
        if self.operations.contains(ImageOperation::Crop) {
            if self.rotation_delta() != 0.0 {
                steps.push(TransformStep::Rotate);
            }
            if !self.params.crop.is_full() {
                steps.push(TransformStep::Crop);
            }
            if !steps.is_empty() {
                steps.push(TransformStep::Translate);
            }
        }
        let color = self.operations.contains(ImageOperation::ColorMap) && self.params.color_curves.is_some();
        let raw = self.operations.contains(ImageOperation::RawConversion) && self.params.raw_settings.is_some();
        if color || raw {
            steps.push(TransformStep::ColorRaw);
        }
        if self.scale_box().is_some() {
            steps.push(TransformStep::Scale);
        }
        steps
    }

    pub fn apply(&self, source: &DynamicImage) -> DynamicImage {
        let steps = self.steps();
        let mut image = source.clone();

        if steps.contains(&TransformStep::Translate) {
            image = DynamicImage::ImageRgba8(self.resample_geometry(&source.to_rgba8()));
        }
        if steps.contains(&TransformStep::ColorRaw) {
            image = DynamicImage::ImageRgba8(self.map_colors(image.to_rgba8()));
        }
        if let Some((max_w, max_h)) = self.scale_box() {
            let (w, h) = fit_within(image.width(), image.height(), max_w, max_h);
            if (w, h) != (image.width(), image.height()) {
                let scaled = image::imageops::resize(&image.to_rgba8(), w, h, self.interpolation.filter());
                image = DynamicImage::ImageRgba8(scaled);
            }
        }
        image
    }

    fn resample_geometry(&self, source: &RgbaImage) -> RgbaImage {
        let (sw, sh) = (source.width() as f64, source.height() as f64);
        let theta = self.rotation_delta().to_radians();
        let (sin, cos) = theta.sin_cos();

        let bbox_w = (sw * cos.abs() + sh * sin.abs()).round().max(1.0);
        let bbox_h = (sw * sin.abs() + sh * cos.abs()).round().max(1.0);

        let crop = self.params.crop;
        let origin_x = crop.min_x * bbox_w;
        let origin_y = crop.min_y * bbox_h;
        let out_w = (crop.width() * bbox_w).round().max(1.0) as u32;
        let out_h = (crop.height() * bbox_h).round().max(1.0) as u32;

        let mut out = RgbaImage::new(out_w, out_h);
        for (u, v, pixel) in out.enumerate_pixels_mut() {
            let dx = origin_x + u as f64 + 0.5 - bbox_w / 2.0;
            let dy = origin_y + v as f64 + 0.5 - bbox_h / 2.0;
            let sx = cos * dx + sin * dy + sw / 2.0 - 0.5;
            let sy = -sin * dx + cos * dy + sh / 2.0 - 0.5;
            *pixel = match self.interpolation {
                Interpolation::Nearest => sample_nearest(source, sx, sy),
                Interpolation::Bicubic => sample_bicubic(source, sx, sy),
            };
        }
        out
    }

    fn map_colors(&self, mut image: RgbaImage) -> RgbaImage {
        let raw = self
            .params
            .raw_settings
            .filter(|_| self.operations.contains(ImageOperation::RawConversion))
            .map(|s| s.lookup_tables());
        let curves = self
            .params
            .color_curves
            .as_ref()
            .filter(|_| self.operations.contains(ImageOperation::ColorMap))
            .map(|c| c.lookup_tables());

        for pixel in image.pixels_mut() {
            for channel in 0..3 {
                let mut value = pixel.0[channel];
                if let Some(tables) = &raw {
                    value = tables[channel][value as usize];
                }
                if let Some(tables) = &curves {
                    value = tables[channel][value as usize];
                }
                pixel.0[channel] = value;
            }
        }
        image
    }
}

/// Largest size with the same aspect ratio that fits the box. Never enlarges.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

fn inside(source: &RgbaImage, x: f64, y: f64) -> bool {
    x >= -0.5 && y >= -0.5 && x < source.width() as f64 - 0.5 && y < source.height() as f64 - 0.5
}

fn sample_nearest(source: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    if !inside(source, x, y) {
        return TRANSPARENT;
    }
    let px = (x.round().max(0.0) as u32).min(source.width() - 1);
    let py = (y.round().max(0.0) as u32).min(source.height() - 1);
    *source.get_pixel(px, py)
}

fn catmull_rom(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        0.5 * (-t3 + 2.0 * t2 - t),
        0.5 * (3.0 * t3 - 5.0 * t2 + 2.0),
        0.5 * (-3.0 * t3 + 4.0 * t2 + t),
        0.5 * (t3 - t2),
    ]
}

fn sample_bicubic(source: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    if !inside(source, x, y) {
        return TRANSPARENT;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let wx = catmull_rom(x - x0);
    let wy = catmull_rom(y - y0);
    let max_x = source.width() as i64 - 1;
    let max_y = source.height() as i64 - 1;

    let mut acc = [0.0f64; 4];
    for (j, wyj) in wy.iter().enumerate() {
        let py = (y0 as i64 + j as i64 - 1).clamp(0, max_y) as u32;
        for (i, wxi) in wx.iter().enumerate() {
            let px = (x0 as i64 + i as i64 - 1).clamp(0, max_x) as u32;
            let weight = wxi * wyj;
            let sample = source.get_pixel(px, py);
            for (c, slot) in acc.iter_mut().enumerate() {
                *slot += sample.0[c] as f64 * weight;
            }
        }
    }
    Rgba(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColorCurves, CropBounds, Curve, Channel};
    use image::RgbImage;

    fn crop_only() -> OperationSet {
        [ImageOperation::Crop].into_iter().collect()
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 40])
        }))
    }

    #[test]
    fn test_steps_follow_fixed_order() {
        let params = EditParams {
            crop: CropBounds::new(0.1, 0.1, 0.9, 0.9),
            rotation: 30.0,
            color_curves: Some(ColorCurves::default()),
            ..EditParams::default()
        };
        let transform = Transform::new(OperationSet::all(), params).with_target_box(Some((100, 100)));
        assert_eq!(
            transform.steps(),
            vec![
                TransformStep::Rotate,
                TransformStep::Crop,
                TransformStep::Translate,
                TransformStep::ColorRaw,
                TransformStep::Scale,
            ]
        );
    }

    #[test]
    fn test_already_applied_operations_are_skipped() {
        let params = EditParams {
            rotation: 90.0,
            color_curves: Some(ColorCurves::default()),
            ..EditParams::default()
        };
        let colour_only: OperationSet = [ImageOperation::ColorMap].into_iter().collect();
        let steps = Transform::new(colour_only, params.clone()).steps();
        assert_eq!(steps, vec![TransformStep::ColorRaw]);

        let baked = Transform::new(crop_only(), params).with_source_rotation(90.0);
        assert!(baked.steps().is_empty());
    }

    #[test]
    fn test_quarter_turn_swaps_dimensions() {
        let params = EditParams {
            rotation: 90.0,
            ..EditParams::default()
        };
        let out = Transform::new(crop_only(), params)
            .with_interpolation(Interpolation::Nearest)
            .apply(&gradient(40, 20));
        assert_eq!((out.width(), out.height()), (20, 40));
    }

    #[test]
    fn test_quarter_turn_moves_top_left_to_top_right() {
        let mut img = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]));
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let params = EditParams {
            rotation: 90.0,
            ..EditParams::default()
        };
        let out = Transform::new(crop_only(), params)
            .with_interpolation(Interpolation::Nearest)
            .apply(&DynamicImage::ImageRgba8(img))
            .to_rgba8();
        assert_eq!(out.get_pixel(1, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_crop_is_relative_to_rotated_frame() {
        let params = EditParams {
            rotation: 90.0,
            crop: CropBounds::new(0.0, 0.0, 0.5, 1.0),
            ..EditParams::default()
        };
        let out = Transform::new(crop_only(), params)
            .with_interpolation(Interpolation::Nearest)
            .apply(&gradient(40, 20));
        assert_eq!((out.width(), out.height()), (10, 40));
    }

    #[test]
    fn test_odd_angle_leaves_transparent_corners() {
        let params = EditParams {
            rotation: 45.0,
            ..EditParams::default()
        };
        let out = Transform::new(crop_only(), params)
            .apply(&gradient(32, 32))
            .to_rgba8();
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        let (w, h) = out.dimensions();
        assert_eq!(out.get_pixel(w / 2, h / 2).0[3], 255);
    }

    #[test]
    fn test_scale_fits_box_and_never_enlarges() {
        assert_eq!(fit_within(400, 200, 100, 100), (100, 50));
        assert_eq!(fit_within(50, 20, 100, 100), (50, 20));

        let out = Transform::new(OperationSet::empty(), EditParams::default())
            .with_target_box(Some((100, 100)))
            .apply(&gradient(400, 200));
        assert_eq!((out.width(), out.height()), (100, 50));

        let natural = Transform::new(OperationSet::empty(), EditParams::default())
            .with_target_box(Some((0, 0)))
            .apply(&gradient(400, 200));
        assert_eq!((natural.width(), natural.height()), (400, 200));
    }

    #[test]
    fn test_colour_curves_are_applied() {
        let params = EditParams {
            color_curves: Some(
                ColorCurves::default().with_curve(Channel::Blue, Curve::new(vec![(0.0, 1.0), (1.0, 1.0)])),
            ),
            ..EditParams::default()
        };
        let ops: OperationSet = [ImageOperation::ColorMap].into_iter().collect();
        let out = Transform::new(ops, params).apply(&gradient(8, 8)).to_rgba8();
        assert!(out.pixels().all(|p| p.0[2] == 255));
    }
}
