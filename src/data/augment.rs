//! Stochastic training augmentation.

use image::RgbImage;
use image::imageops::FilterType;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::data::bbox::BoundingBox;
use crate::data::label::Label;
use crate::data::transform::Transform;
use crate::error::{DataError, DataResult};

/// Random crop, horizontal flip and brightness/contrast jitter.
///
/// The crop window is resized back to the input size, so the augmenter never
/// changes image dimensions. Boxes that keep less than `min_visibility` of their
/// area inside the crop window are dropped together with their class rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Augmenter {
    pub flip_horizontal_prob: f32,
    pub crop_prob: f32,
    /// Crop side as a fraction of the image side, drawn from `[min, max]`.
    pub crop_min_scale: f32,
    pub crop_max_scale: f32,
    pub min_visibility: f32,
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
}

impl Default for Augmenter {
    fn default() -> Self {
        Self {
            flip_horizontal_prob: 0.5,
            crop_prob: 0.3,
            crop_min_scale: 0.6,
            crop_max_scale: 1.0,
            min_visibility: 0.3,
            color_jitter_prob: 0.3,
            color_jitter_strength: 0.2,
        }
    }
}

impl Augmenter {
    /// Augmenter with every operation disabled.
    pub fn disabled() -> Self {
        Self {
            flip_horizontal_prob: 0.0,
            crop_prob: 0.0,
            crop_min_scale: 1.0,
            crop_max_scale: 1.0,
            min_visibility: 0.0,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.0,
        }
    }

    /// Reject settings that would panic or silently disable an operation.
    ///
    /// Probabilities, `min_visibility` and `color_jitter_strength` must lie in
    /// `[0, 1]`, and the crop range must satisfy
    /// `0 < crop_min_scale <= crop_max_scale <= 1`.
    pub fn validate(&self) -> DataResult<()> {
        let unit = [
            ("flip_horizontal_prob", self.flip_horizontal_prob),
            ("crop_prob", self.crop_prob),
            ("min_visibility", self.min_visibility),
            ("color_jitter_prob", self.color_jitter_prob),
            ("color_jitter_strength", self.color_jitter_strength),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(DataError::Config(format!(
                    "augmentation.{name} = {value} must be within [0, 1]"
                )));
            }
        }
        let (min, max) = (self.crop_min_scale, self.crop_max_scale);
        if !(min > 0.0 && min <= max && max <= 1.0) {
            return Err(DataError::Config(format!(
                "augmentation crop scale range [{min}, {max}] must satisfy 0 < min <= max <= 1"
            )));
        }
        Ok(())
    }

    fn random_crop(
        &self,
        image: RgbImage,
        label: Label,
        rng: &mut dyn RngCore,
    ) -> DataResult<(RgbImage, Label)> {
        // A full-size window is a no-op; NaN fails every comparison and lands here too.
        if !(self.crop_min_scale > 0.0
            && self.crop_min_scale < 1.0
            && self.crop_min_scale <= self.crop_max_scale
            && self.crop_max_scale <= 1.0)
            || !roll(self.crop_prob, rng)
        {
            return Ok((image, label));
        }
        let (w, h) = image.dimensions();
        let scale = rng.random_range(self.crop_min_scale..=self.crop_max_scale);
        let cw = ((w as f32 * scale).round() as u32).clamp(1, w);
        let ch = ((h as f32 * scale).round() as u32).clamp(1, h);
        let x0 = rng.random_range(0..=w - cw);
        let y0 = rng.random_range(0..=h - ch);

        let cropped = image::imageops::crop_imm(&image, x0, y0, cw, ch).to_image();
        let resized = image::imageops::resize(&cropped, w, h, FilterType::Triangle);

        let window = BoundingBox::from_tlwh(x0 as f32, y0 as f32, cw as f32, ch as f32);
        let sx = w as f32 / cw as f32;
        let sy = h as f32 / ch as f32;
        let (keep, boxes): (Vec<usize>, Vec<BoundingBox>) = label
            .boxes()
            .iter()
            .enumerate()
            .filter_map(|(i, b)| {
                let visible = b.intersection(&window)?;
                (visible.area() >= self.min_visibility * b.area()).then(|| {
                    (
                        i,
                        visible
                            .translate(-(x0 as f32), -(y0 as f32))
                            .scale(sx, sy),
                    )
                })
            })
            .unzip();

        let (classes, _) = label.select(&keep).into_parts();
        Ok((resized, Label::new(classes, boxes)?))
    }

    fn random_flip(
        &self,
        mut image: RgbImage,
        label: Label,
        rng: &mut dyn RngCore,
    ) -> (RgbImage, Label) {
        if !roll(self.flip_horizontal_prob, rng) {
            return (image, label);
        }
        image::imageops::flip_horizontal_in_place(&mut image);
        let w = image.width() as f32;
        (image, label.map_boxes(|b| b.hflip(w)))
    }

    fn random_jitter(&self, image: &mut RgbImage, rng: &mut dyn RngCore) {
        let strength = self.color_jitter_strength;
        if !(strength > 0.0 && strength.is_finite()) || !roll(self.color_jitter_prob, rng) {
            return;
        }
        let bright = 1.0 + rng.random_range(-strength..=strength);
        let contrast = 1.0 + rng.random_range(-strength..=strength);
        for pixel in image.pixels_mut() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                let v = ((v - 0.5) * contrast + 0.5) * bright;
                pixel[c] = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }
}

fn roll(prob: f32, rng: &mut dyn RngCore) -> bool {
    prob > 0.0 && rng.random_range(0.0f32..1.0) < prob
}

impl Transform for Augmenter {
    fn apply(
        &self,
        image: RgbImage,
        label: Label,
        rng: &mut dyn RngCore,
    ) -> DataResult<(RgbImage, Label)> {
        let (image, label) = self.random_crop(image, label, rng)?;
        let (mut image, label) = self.random_flip(image, label, rng);
        self.random_jitter(&mut image, rng);
        Ok((image, label))
    }
}
