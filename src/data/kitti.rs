//! KITTI object-detection labels and dataset indexing.
//!
//! A KITTI label file has one object per line:
//!
//! ```text
//! type truncated occluded alpha left top right bottom h w l x y z rotation_y [score]
//! ```
//!
//! Only `type` and the 2D box (`left top right bottom`, pixels) are used.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::seq::SliceRandom;

use crate::data::bbox::BoundingBox;
use crate::data::label::{Label, LabelSource};
use crate::data::loader::SampleDescriptor;
use crate::data::vocabulary::Vocabulary;
use crate::error::{DataError, DataResult};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
const LABEL_EXTENSION: &str = "txt";

/// Label parser for the KITTI 2D object format.
#[derive(Debug, Clone)]
pub struct KittiLabels {
    /// Raw classes dropped before encoding (`DontCare` regions by default).
    pub ignored: BTreeSet<String>,
}

impl Default for KittiLabels {
    fn default() -> Self {
        Self {
            ignored: BTreeSet::from(["DontCare".to_string()]),
        }
    }
}

impl KittiLabels {
    pub fn new<I, S>(ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: ignored.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse the text of a label file. `path` is only used in error messages.
    pub fn parse(&self, text: &str, path: &Path, vocabulary: &Vocabulary) -> DataResult<Label> {
        let malformed = |line: usize, msg: String| DataError::MalformedLabel {
            path: path.to_path_buf(),
            line,
            msg,
        };

        let mut rows = Vec::new();
        let mut boxes = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens.len() != 15 && tokens.len() != 16 {
                return Err(malformed(
                    line_no,
                    format!("expected 15 or 16 fields, found {}", tokens.len()),
                ));
            }
            if self.ignored.contains(tokens[0]) {
                continue;
            }

            let mut coords = [0.0f32; 4];
            for (dst, raw) in coords.iter_mut().zip(&tokens[4..8]) {
                *dst = raw.parse().map_err(|_| {
                    malformed(line_no, format!("bbox value {raw:?} is not a number"))
                })?;
            }
            let bbox = BoundingBox::from(coords);
            if !bbox.is_valid() {
                return Err(malformed(
                    line_no,
                    format!("bbox {coords:?} must satisfy min < max"),
                ));
            }

            rows.push(vocabulary.encode(tokens[0])?);
            boxes.push(bbox);
        }

        Label::from_rows(&rows, boxes, vocabulary.num_classes())
    }
}

impl LabelSource for KittiLabels {
    fn load_label(&self, path: &Path, vocabulary: &Vocabulary) -> DataResult<Label> {
        let text = fs::read_to_string(path).map_err(|e| DataError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.parse(&text, path, vocabulary)
    }
}

/// List every image under `root/images_dir` that has a label in `root/labels_dir`.
///
/// Descriptors are relative to `root` and sorted by image name. Images without a
/// label file are skipped.
pub fn index_kitti(
    root: &Path,
    images_dir: &Path,
    labels_dir: &Path,
) -> DataResult<Vec<SampleDescriptor>> {
    let image_root = root.join(images_dir);
    let entries = fs::read_dir(&image_root).map_err(|e| DataError::Io {
        path: image_root.clone(),
        source: e,
    })?;

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DataError::Io {
            path: image_root.clone(),
            source: e,
        })?;
        images.push(entry.path());
    }
    images.retain(|p: &PathBuf| {
        p.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    });
    images.sort();

    let mut descriptors = Vec::with_capacity(images.len());
    for image in images {
        let (Some(file_name), Some(stem)) = (image.file_name(), image.file_stem()) else {
            continue;
        };
        let label = labels_dir.join(stem).with_extension(LABEL_EXTENSION);
        if !root.join(&label).is_file() {
            tracing::debug!(image = %image.display(), "skipping image without label file");
            continue;
        }
        descriptors.push(SampleDescriptor::new(images_dir.join(file_name), label));
    }
    Ok(descriptors)
}

/// Deterministic train/val split. Returns `(train, val)`.
///
/// `val_ratio` is clamped to `[0, 1]`; the validation part is rounded to the
/// nearest whole sample.
pub fn split_descriptors(
    mut descriptors: Vec<SampleDescriptor>,
    val_ratio: f32,
    seed: u64,
) -> (Vec<SampleDescriptor>, Vec<SampleDescriptor>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    descriptors.shuffle(&mut rng);
    let val_len = (descriptors.len() as f32 * val_ratio.clamp(0.0, 1.0)).round() as usize;
    let train = descriptors.split_off(val_len);
    (train, descriptors)
}
