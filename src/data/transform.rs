//! Image + label transforms shared by the preprocessor and augmenter slots.

use image::RgbImage;
use image::imageops::FilterType;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::data::label::Label;
use crate::error::DataResult;

/// A transform over an image and its label.
///
/// Implementations must keep classes and boxes matched by position: when a box
/// is dropped its class row goes with it (see [`Label::select`]). Geometric
/// changes to the image must be applied to the boxes as well.
pub trait Transform: Send + Sync {
    fn apply(
        &self,
        image: RgbImage,
        label: Label,
        rng: &mut dyn RngCore,
    ) -> DataResult<(RgbImage, Label)>;
}

/// Pass-through transform used when a slot is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn apply(
        &self,
        image: RgbImage,
        label: Label,
        _rng: &mut dyn RngCore,
    ) -> DataResult<(RgbImage, Label)> {
        Ok((image, label))
    }
}

/// Wrap a closure as a [`Transform`].
pub struct FnTransform<F>(pub F);

impl<F> Transform for FnTransform<F>
where
    F: Fn(RgbImage, Label, &mut dyn RngCore) -> DataResult<(RgbImage, Label)> + Send + Sync,
{
    fn apply(
        &self,
        image: RgbImage,
        label: Label,
        rng: &mut dyn RngCore,
    ) -> DataResult<(RgbImage, Label)> {
        (self.0)(image, label, rng)
    }
}

/// Apply transforms in order.
#[derive(Default)]
pub struct Compose {
    steps: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<T: Transform + 'static>(mut self, step: T) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Transform for Compose {
    fn apply(
        &self,
        image: RgbImage,
        label: Label,
        rng: &mut dyn RngCore,
    ) -> DataResult<(RgbImage, Label)> {
        self.steps
            .iter()
            .try_fold((image, label), |(image, label), step| {
                step.apply(image, label, rng)
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeMode {
    /// Stretch to fill the target dimensions.
    Force,
    /// Preserve aspect ratio; pad to target with black, image centered.
    #[default]
    Letterbox,
}

/// Deterministic resize to a fixed `(width, height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
    pub mode: ResizeMode,
}

impl Resize {
    pub fn new(width: u32, height: u32, mode: ResizeMode) -> Self {
        Self {
            width,
            height,
            mode,
        }
    }

    fn force(&self, image: &RgbImage, label: &Label) -> (RgbImage, Label) {
        let (w, h) = image.dimensions();
        let sx = self.width as f32 / w as f32;
        let sy = self.height as f32 / h as f32;
        let resized = image::imageops::resize(image, self.width, self.height, FilterType::Triangle);
        (resized, label.map_boxes(|b| b.scale(sx, sy)))
    }

    fn letterbox(&self, image: &RgbImage, label: &Label) -> (RgbImage, Label) {
        let (w, h) = image.dimensions();
        let scale = f32::min(self.width as f32 / w as f32, self.height as f32 / h as f32);
        let new_w = ((w as f32 * scale).round() as u32).clamp(1, self.width);
        let new_h = ((h as f32 * scale).round() as u32).clamp(1, self.height);
        let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let pad_w = (self.width - new_w) / 2;
        let pad_h = (self.height - new_h) / 2;
        let mut canvas = RgbImage::new(self.width, self.height);
        image::imageops::replace(&mut canvas, &resized, pad_w.into(), pad_h.into());

        let sx = new_w as f32 / w as f32;
        let sy = new_h as f32 / h as f32;
        let (tw, th) = (self.width as f32, self.height as f32);
        let label = label.map_boxes(|b| {
            b.scale(sx, sy)
                .translate(pad_w as f32, pad_h as f32)
                .clip(tw, th)
        });
        (canvas, label)
    }
}

impl Transform for Resize {
    fn apply(
        &self,
        image: RgbImage,
        label: Label,
        _rng: &mut dyn RngCore,
    ) -> DataResult<(RgbImage, Label)> {
        if image.dimensions() == (self.width, self.height) {
            return Ok((image, label));
        }
        Ok(match self.mode {
            ResizeMode::Force => self.force(&image, &label),
            ResizeMode::Letterbox => self.letterbox(&image, &label),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bbox::BoundingBox;
    use ndarray::array;

    fn label() -> Label {
        Label::new(
            array![[1.0, 0.0]],
            vec![BoundingBox::from_xyxy(10.0, 10.0, 30.0, 20.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_identity_passes_through() {
        let image = RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3]));
        let (out, out_label) = Identity
            .apply(image.clone(), label(), &mut rand::rng())
            .unwrap();
        assert_eq!(out, image);
        assert_eq!(out_label, label());
    }

    #[test]
    fn test_force_resize_scales_boxes() {
        let image = RgbImage::new(40, 40);
        let (out, out_label) = Resize::new(20, 80, ResizeMode::Force)
            .apply(image, label(), &mut rand::rng())
            .unwrap();
        assert_eq!(out.dimensions(), (20, 80));
        assert_eq!(out_label.boxes()[0].to_array(), [5.0, 20.0, 15.0, 40.0]);
    }

    #[test]
    fn test_letterbox_pads_and_offsets_boxes() {
        // 40x20 into 80x80: scale 2, resized 80x40, vertical padding of 20.
        let image = RgbImage::from_pixel(40, 20, image::Rgb([255, 255, 255]));
        let (out, out_label) = Resize::new(80, 80, ResizeMode::Letterbox)
            .apply(image, label(), &mut rand::rng())
            .unwrap();
        assert_eq!(out.dimensions(), (80, 80));
        assert_eq!(out.get_pixel(40, 5)[0], 0);
        assert_eq!(out.get_pixel(40, 40)[0], 255);
        assert_eq!(out_label.boxes()[0].to_array(), [20.0, 40.0, 60.0, 60.0]);
    }

    #[test]
    fn test_compose_runs_in_order() {
        let compose = Compose::new()
            .then(Resize::new(20, 20, ResizeMode::Force))
            .then(FnTransform(
                |image: RgbImage, label: Label, _: &mut dyn RngCore| -> DataResult<_> {
                    let w = image.width() as f32;
                    let flipped = label.map_boxes(|b| b.translate(1.0, 0.0).hflip(w));
                    Ok((image, flipped))
                },
            ));
        assert_eq!(compose.len(), 2);
        let (out, out_label) = compose
            .apply(RgbImage::new(40, 40), label(), &mut rand::rng())
            .unwrap();
        assert_eq!(out.dimensions(), (20, 20));
        assert_eq!(out_label.boxes()[0].to_array(), [4.0, 5.0, 14.0, 10.0]);
    }
}
