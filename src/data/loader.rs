//! Single-sample loading: image + label, then preprocessing and augmentation.

use std::path::{Path, PathBuf};

use image::{ImageError, RgbImage};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::Stage;
use crate::data::label::{Label, LabelSource};
use crate::data::transform::{Identity, Transform};
use crate::data::vocabulary::Vocabulary;
use crate::error::{DataError, DataResult};

/// Where to find one sample, relative to the dataset root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleDescriptor {
    pub image: PathBuf,
    pub label: PathBuf,
}

impl SampleDescriptor {
    pub fn new(image: impl Into<PathBuf>, label: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            label: label.into(),
        }
    }

    /// Samples are identified by their relative image path.
    pub fn identifier(&self) -> String {
        self.image.to_string_lossy().into_owned()
    }
}

/// A loaded, transformed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub identifier: String,
    pub image: RgbImage,
    pub label: Label,
}

/// Static loader configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub root: PathBuf,
    pub vocabulary: Vocabulary,
    pub stage: Stage,
    /// Seed for per-sample augmentation RNGs; `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl LoaderConfig {
    pub fn new(root: impl Into<PathBuf>, vocabulary: Vocabulary, stage: Stage) -> Self {
        Self {
            root: root.into(),
            vocabulary,
            stage,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

/// Decode an image file and convert it to 8-bit RGB, whatever its stored layout.
pub fn load_image(path: &Path) -> DataResult<RgbImage> {
    let image = image::open(path).map_err(|e| match e {
        ImageError::IoError(source) => DataError::Io {
            path: path.to_path_buf(),
            source,
        },
        source => DataError::Image {
            path: path.to_path_buf(),
            source,
        },
    })?;
    Ok(image.to_rgb8())
}

/// Loads samples for one dataset format `L`.
///
/// The preprocessor always runs; the augmenter only runs in [`Stage::Train`].
/// Both default to [`Identity`].
pub struct SampleLoader<L: LabelSource> {
    config: LoaderConfig,
    labels: L,
    preprocessor: Box<dyn Transform>,
    augmenter: Box<dyn Transform>,
}

impl<L: LabelSource> SampleLoader<L> {
    pub fn new(config: LoaderConfig, labels: L) -> Self {
        Self {
            config,
            labels,
            preprocessor: Box::new(Identity),
            augmenter: Box::new(Identity),
        }
    }

    pub fn with_preprocessor<T: Transform + 'static>(mut self, preprocessor: T) -> Self {
        self.preprocessor = Box::new(preprocessor);
        self
    }

    pub fn with_augmenter<T: Transform + 'static>(mut self, augmenter: T) -> Self {
        self.augmenter = Box::new(augmenter);
        self
    }

    /// Configuration fixed at construction.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Vocabulary used to encode label classes.
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.config.vocabulary
    }

    /// Stage deciding whether the augmenter runs.
    pub fn stage(&self) -> Stage {
        self.config.stage
    }

    /// The dataset-specific label reader.
    pub fn label_source(&self) -> &L {
        &self.labels
    }

    /// Read an image relative to the dataset root.
    pub fn load_image(&self, relative: &Path) -> DataResult<RgbImage> {
        load_image(&self.config.root.join(relative))
    }

    /// Read a label relative to the dataset root.
    pub fn load_label(&self, relative: &Path) -> DataResult<Label> {
        self.labels
            .load_label(&self.config.root.join(relative), &self.config.vocabulary)
    }

    /// Load one sample with the augmentation RNG of epoch 0.
    pub fn load_sample(&self, descriptor: &SampleDescriptor) -> DataResult<Sample> {
        self.load_sample_for_epoch(descriptor, 0)
    }

    /// Load one sample. With a seed, augmentation is reproducible per
    /// `(seed, epoch, identifier)`.
    pub fn load_sample_for_epoch(
        &self,
        descriptor: &SampleDescriptor,
        epoch: u64,
    ) -> DataResult<Sample> {
        let identifier = descriptor.identifier();
        let image = self.load_image(&descriptor.image)?;
        let label = self.load_label(&descriptor.label)?;
        let raw_boxes = label.len();

        let mut rng = self.sample_rng(&identifier, epoch);
        let (image, label) = self.preprocessor.apply(image, label, &mut rng)?;
        let (image, label) = if self.config.stage == Stage::Train {
            let before = label.len();
            let (image, label) = self.augmenter.apply(image, label, &mut rng)?;
            if before > 0 && label.is_empty() {
                tracing::warn!(%identifier, before, "augmentation removed every box");
            }
            (image, label)
        } else {
            (image, label)
        };

        tracing::debug!(
            %identifier,
            width = image.width(),
            height = image.height(),
            raw_boxes,
            boxes = label.len(),
            "loaded sample"
        );
        Ok(Sample {
            identifier,
            image,
            label,
        })
    }

    fn sample_rng(&self, identifier: &str, epoch: u64) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(sample_seed(seed, epoch, identifier)),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }
}

/// SplitMix64 finalizer.
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Per-sample seed from `(seed, epoch, identifier)`.
///
/// Uses fixed algorithms (SplitMix64 over an FNV-1a hash of the identifier) so
/// seeded augmentation reproduces across builds and platforms.
fn sample_seed(seed: u64, epoch: u64, identifier: &str) -> u64 {
    let name = identifier
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
    mix64(mix64(mix64(seed) ^ epoch) ^ name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::augment::Augmenter;
    use crate::data::kitti::KittiLabels;
    use crate::data::vocabulary::ClassMapping;
    use std::fs;

    const LABEL: &str = "Car 0.00 0 0.0 2.0 2.0 10.0 12.0 1 1 1 0 0 0 0\n\
                         Pedestrian 0.00 0 0.0 20.0 4.0 30.0 14.0 1 1 1 0 0 0 0\n";

    fn vocab() -> Vocabulary {
        let mapping: ClassMapping = [("Car", "car"), ("Pedestrian", "pedestrian")]
            .into_iter()
            .collect();
        Vocabulary::new(mapping, vec!["car".into(), "pedestrian".into()]).unwrap()
    }

    fn write_sample(root: &Path) -> SampleDescriptor {
        fs::create_dir_all(root.join("image_2")).unwrap();
        fs::create_dir_all(root.join("label_2")).unwrap();
        let mut img = RgbImage::new(40, 20);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            *pixel = image::Rgb([(x * 6) as u8, 10, 200]);
        }
        img.save(root.join("image_2/000000.png")).unwrap();
        fs::write(root.join("label_2/000000.txt"), LABEL).unwrap();
        SampleDescriptor::new("image_2/000000.png", "label_2/000000.txt")
    }

    #[test]
    fn test_load_sample_without_transforms_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let desc = write_sample(dir.path());
        let loader = SampleLoader::new(
            LoaderConfig::new(dir.path(), vocab(), Stage::Train),
            KittiLabels::default(),
        );

        let sample = loader.load_sample(&desc).unwrap();
        let raw_image = load_image(&dir.path().join(&desc.image)).unwrap();
        let raw_label = loader.load_label(&desc.label).unwrap();
        assert_eq!(sample.identifier, "image_2/000000.png");
        assert_eq!(sample.image, raw_image);
        assert_eq!(sample.label, raw_label);
        assert_eq!(sample.label.len(), 2);
    }

    #[test]
    fn test_augmenter_only_runs_in_train() {
        let dir = tempfile::tempdir().unwrap();
        let desc = write_sample(dir.path());
        let flip = Augmenter {
            flip_horizontal_prob: 1.0,
            ..Augmenter::disabled()
        };

        let val = SampleLoader::new(
            LoaderConfig::new(dir.path(), vocab(), Stage::Val),
            KittiLabels::default(),
        )
        .with_augmenter(flip);
        let train = SampleLoader::new(
            LoaderConfig::new(dir.path(), vocab(), Stage::Train),
            KittiLabels::default(),
        )
        .with_augmenter(flip);

        let v = val.load_sample(&desc).unwrap();
        let t = train.load_sample(&desc).unwrap();
        assert_eq!(v.label.boxes()[0].to_array(), [2.0, 2.0, 10.0, 12.0]);
        assert_eq!(t.label.boxes()[0].to_array(), [30.0, 2.0, 38.0, 12.0]);
        assert_eq!(v.image.get_pixel(0, 0), t.image.get_pixel(39, 0));
    }

    #[test]
    fn test_seeded_augmentation_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let desc = write_sample(dir.path());
        let loader = SampleLoader::new(
            LoaderConfig::new(dir.path(), vocab(), Stage::Train).with_seed(Some(11)),
            KittiLabels::default(),
        )
        .with_augmenter(Augmenter::default());

        let a = loader.load_sample_for_epoch(&desc, 3).unwrap();
        let b = loader.load_sample_for_epoch(&desc, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_seed_is_stable() {
        assert_eq!(sample_seed(11, 3, "image_2/000000.png"), 0xd481_015e_a996_d17e);
        assert_eq!(sample_seed(0, 0, ""), 0xf52a_15e9_a9b5_e89b);
        assert_ne!(
            sample_seed(11, 3, "image_2/000000.png"),
            sample_seed(11, 4, "image_2/000000.png")
        );
        assert_ne!(
            sample_seed(11, 3, "image_2/000000.png"),
            sample_seed(11, 3, "image_2/000001.png")
        );
    }

    #[test]
    fn test_missing_image_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());
        let loader = SampleLoader::new(
            LoaderConfig::new(dir.path(), vocab(), Stage::Val),
            KittiLabels::default(),
        );
        let missing = SampleDescriptor::new("image_2/999999.png", "label_2/000000.txt");
        assert!(matches!(
            loader.load_sample(&missing),
            Err(DataError::Io { .. })
        ));
    }

    #[test]
    fn test_grayscale_image_is_converted_to_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        image::GrayImage::from_pixel(3, 2, image::Luma([77]))
            .save(&path)
            .unwrap();
        let rgb = load_image(&path).unwrap();
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(rgb.get_pixel(1, 1).0, [77, 77, 77]);
    }
}
