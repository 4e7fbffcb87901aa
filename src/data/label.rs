//! Per-image annotations and the trait dataset formats implement to produce them.

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2, Axis, aview1};

use crate::data::bbox::BoundingBox;
use crate::data::vocabulary::Vocabulary;
use crate::error::{DataError, DataResult};

/// One-hot classes and pixel boxes of one image, matched by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    /// One-hot rows, shape `(num_objects, num_classes)`.
    classes: Array2<f32>,
    boxes: Vec<BoundingBox>,
}

impl Label {
    /// Pair class rows with boxes; the two must have the same length.
    pub fn new(classes: Array2<f32>, boxes: Vec<BoundingBox>) -> DataResult<Self> {
        if classes.nrows() != boxes.len() {
            return Err(DataError::LabelMismatch {
                classes: classes.nrows(),
                boxes: boxes.len(),
            });
        }
        Ok(Self { classes, boxes })
    }

    pub fn empty(num_classes: usize) -> Self {
        Self {
            classes: Array2::zeros((0, num_classes)),
            boxes: Vec::new(),
        }
    }

    /// Stack one-hot vectors into a label.
    pub fn from_rows(
        rows: &[Array1<f32>],
        boxes: Vec<BoundingBox>,
        num_classes: usize,
    ) -> DataResult<Self> {
        let mut classes = Array2::zeros((rows.len(), num_classes));
        for (mut dst, src) in classes.rows_mut().into_iter().zip(rows) {
            if src.len() != num_classes {
                return Err(DataError::Config(format!(
                    "one-hot row has {} entries, vocabulary has {num_classes}",
                    src.len()
                )));
            }
            dst.assign(src);
        }
        Self::new(classes, boxes)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.ncols()
    }

    pub fn classes(&self) -> ArrayView2<'_, f32> {
        self.classes.view()
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    /// Boxes as an `(num_objects, 4)` XYXY array.
    pub fn coordinates(&self) -> Array2<f32> {
        let mut out = Array2::zeros((self.boxes.len(), 4));
        for (mut row, b) in out.rows_mut().into_iter().zip(&self.boxes) {
            row.assign(&aview1(&b.to_array()));
        }
        out
    }

    /// Argmax of every class row.
    pub fn class_indices(&self) -> Vec<usize> {
        self.classes
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                        if v > best.1 { (i, v) } else { best }
                    })
                    .0
            })
            .collect()
    }

    /// Keep only the objects at `indices`, in that order.
    ///
    /// # Panics
    ///
    /// Panics if any index is `>= self.len()`.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            classes: self.classes.select(Axis(0), indices),
            boxes: indices.iter().map(|&i| self.boxes[i]).collect(),
        }
    }

    /// Replace every box while keeping the class rows.
    pub fn map_boxes<F: FnMut(&BoundingBox) -> BoundingBox>(&self, f: F) -> Self {
        Self {
            classes: self.classes.clone(),
            boxes: self.boxes.iter().map(f).collect(),
        }
    }

    pub fn into_parts(self) -> (Array2<f32>, Vec<BoundingBox>) {
        (self.classes, self.boxes)
    }
}

/// Dataset-specific label reader.
///
/// Implement this trait to plug a new annotation format into the loader.
///
/// # Example
///
/// ```ignore
/// use kitti_fcos_rs::{Label, LabelSource, Vocabulary, DataResult};
///
/// struct CsvLabels;
///
/// impl LabelSource for CsvLabels {
///     fn load_label(&self, path: &Path, vocabulary: &Vocabulary) -> DataResult<Label> {
///         // Parse `path`, encode classes with `vocabulary.encode(..)`
///         Ok(Label::empty(vocabulary.num_classes()))
///     }
/// }
/// ```
pub trait LabelSource: Send + Sync {
    /// Read the label file at `path`, encoding classes with `vocabulary`.
    fn load_label(&self, path: &Path, vocabulary: &Vocabulary) -> DataResult<Label>;
}
