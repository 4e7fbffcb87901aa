//! TOML configuration for assembling the KITTI generators and loss settings.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::{
    Augmenter, ClassMapping, DataGenerator, KITTI_CLASSES, KittiLabels, LoaderConfig, Resize,
    ResizeMode, SampleLoader, Vocabulary, index_kitti, split_descriptors,
};
use crate::error::{DataError, DataResult};
use crate::loss::{BinaryFocalLoss, CategoricalFocalLoss};

/// Dataset stage. Augmentation and shuffling only happen in `Train`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Train,
    Val,
    All,
}

impl Stage {
    /// Lowercase name, as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Train => "train",
            Stage::Val => "val",
            Stage::All => "all",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Stage::Train),
            "val" => Ok(Stage::Val),
            "all" => Ok(Stage::All),
            other => Err(DataError::Config(format!(
                "unknown stage {other:?} (expected train, val or all)"
            ))),
        }
    }
}

/// Focal loss settings for the classification and centerness heads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub classification: CategoricalFocalLoss,
    pub centerness: BinaryFocalLoss,
}

/// Everything needed to build the KITTI train/val/all generators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub root: PathBuf,
    pub images_dir: PathBuf,
    pub labels_dir: PathBuf,
    /// Canonical output classes; position is the one-hot index.
    pub labels: Vec<String>,
    /// Raw KITTI class -> canonical label. `None` maps every label to itself.
    pub class_mapping: Option<BTreeMap<String, String>>,
    pub ignored_classes: Vec<String>,
    pub batch_size: usize,
    /// Network input `(width, height)`; `None` keeps images at their stored size.
    pub input_size: Option<(u32, u32)>,
    pub resize_mode: ResizeMode,
    pub max_boxes_per_image: usize,
    pub val_ratio: f32,
    pub seed: Option<u64>,
    pub parallel_loading: bool,
    pub augmentation: Augmenter,
    pub loss: LossConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("datasets/KITTI"),
            images_dir: PathBuf::from("image_2"),
            labels_dir: PathBuf::from("label_2"),
            labels: KITTI_CLASSES.iter().map(|s| s.to_string()).collect(),
            class_mapping: None,
            ignored_classes: vec!["DontCare".to_string()],
            batch_size: 8,
            input_size: Some((1248, 384)),
            resize_mode: ResizeMode::Letterbox,
            max_boxes_per_image: 100,
            val_ratio: 0.2,
            seed: None,
            parallel_loading: false,
            augmentation: Augmenter::default(),
            loss: LossConfig::default(),
        }
    }
}

impl GeneratorConfig {
    /// Read and validate a TOML config file.
    pub fn from_path(path: &Path) -> DataResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| DataError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw, path)
    }

    pub fn from_toml_str(raw: &str) -> DataResult<Self> {
        Self::parse(raw, Path::new("<inline>"))
    }

    fn parse(raw: &str, path: &Path) -> DataResult<Self> {
        let cfg: Self = toml::from_str(raw).map_err(|e| DataError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every setting that could otherwise fail later inside the loader.
    pub fn validate(&self) -> DataResult<()> {
        if self.batch_size == 0 {
            return Err(DataError::Config("batch_size must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.val_ratio) {
            return Err(DataError::Config(format!(
                "val_ratio {} must be within [0, 1]",
                self.val_ratio
            )));
        }
        if let Some((w, h)) = self.input_size {
            if w == 0 || h == 0 {
                return Err(DataError::Config(format!("input_size {w}x{h} is empty")));
            }
        }
        self.augmentation.validate()?;
        self.loss
            .classification
            .validate()
            .and_then(|_| self.loss.centerness.validate())
            .map_err(|e| DataError::Config(format!("loss: {e}")))?;
        self.vocabulary().map(|_| ())
    }

    /// Vocabulary from `labels` and `class_mapping` (identity when absent).
    pub fn vocabulary(&self) -> DataResult<Vocabulary> {
        let mapping = match &self.class_mapping {
            Some(map) => ClassMapping::new(map.clone()),
            None => ClassMapping::identity(&self.labels),
        };
        Vocabulary::new(mapping, self.labels.clone())
    }

    /// Index the dataset, pick the stage's split and wire the transforms.
    pub fn build(&self, stage: Stage) -> DataResult<DataGenerator<KittiLabels>> {
        self.validate()?;
        let vocabulary = self.vocabulary()?;
        let all = index_kitti(&self.root, &self.images_dir, &self.labels_dir)?;
        let total = all.len();
        let descriptors = match stage {
            Stage::All => all,
            Stage::Train | Stage::Val => {
                let (train, val) = split_descriptors(all, self.val_ratio, self.seed.unwrap_or(0));
                if stage == Stage::Train { train } else { val }
            }
        };

        let config = LoaderConfig::new(&self.root, vocabulary, stage).with_seed(self.seed);
        let mut loader = SampleLoader::new(config, KittiLabels::new(self.ignored_classes.clone()));
        if let Some((w, h)) = self.input_size {
            loader = loader.with_preprocessor(Resize::new(w, h, self.resize_mode));
        }
        if stage == Stage::Train {
            loader = loader.with_augmenter(self.augmentation);
        }

        let generator = DataGenerator::new(loader, descriptors, self.batch_size)?
            .with_parallel_loading(self.parallel_loading);
        tracing::info!(
            %stage,
            root = %self.root.display(),
            indexed = total,
            samples = generator.num_samples(),
            batches = generator.len(),
            "built data generator"
        );
        Ok(generator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
root = "/data/kitti"
labels = ["car", "pedestrian"]
batch_size = 4
input_size = [64, 32]
resize_mode = "Force"
seed = 7

[class_mapping]
Car = "car"
Van = "car"
Pedestrian = "pedestrian"

[augmentation]
flip_horizontal_prob = 0.25
crop_prob = 0.0

[loss.classification]
gamma = 1.5

[loss.centerness]
apply_class_balancing = true
"#;

    #[test]
    fn test_parse_config() {
        let cfg = GeneratorConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/data/kitti"));
        assert_eq!(cfg.images_dir, PathBuf::from("image_2"));
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.input_size, Some((64, 32)));
        assert_eq!(cfg.resize_mode, ResizeMode::Force);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.augmentation.flip_horizontal_prob, 0.25);
        assert_eq!(cfg.augmentation.crop_prob, 0.0);
        assert_eq!(
            cfg.augmentation.color_jitter_prob,
            Augmenter::default().color_jitter_prob
        );
        assert_eq!(cfg.loss.classification.gamma, 1.5);
        assert_eq!(cfg.loss.classification.alpha, 0.25);
        assert!(cfg.loss.centerness.apply_class_balancing);

        let vocab = cfg.vocabulary().unwrap();
        assert_eq!(vocab.index_of("Van").unwrap(), 0);
        assert_eq!(vocab.index_of("Pedestrian").unwrap(), 1);
    }

    #[test]
    fn test_defaults_use_identity_kitti_mapping() {
        let cfg = GeneratorConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, GeneratorConfig::default());
        let vocab = cfg.vocabulary().unwrap();
        assert_eq!(vocab.num_classes(), KITTI_CLASSES.len());
        assert_eq!(vocab.index_of("Misc").unwrap(), 7);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(matches!(
            GeneratorConfig::from_toml_str("batch_size = 0"),
            Err(DataError::Config(_))
        ));
        let outside_labels = "labels = [\"car\"]\n[class_mapping]\nCar = \"vehicle\"\n";
        assert!(matches!(
            GeneratorConfig::from_toml_str(outside_labels),
            Err(DataError::Config(_))
        ));
        assert!(matches!(
            GeneratorConfig::from_toml_str("[loss.centerness]\nlabel_smoothing = 1.0\n"),
            Err(DataError::Config(_))
        ));
        assert!(matches!(
            GeneratorConfig::from_toml_str("batch_size = \"eight\""),
            Err(DataError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_invalid_augmentation_rejected() {
        for section in [
            "[augmentation]\ncolor_jitter_prob = 1.0\ncolor_jitter_strength = inf\n",
            "[augmentation]\ncrop_prob = 1.0\ncrop_min_scale = nan\n",
            "[augmentation]\ncrop_min_scale = 0.9\ncrop_max_scale = 0.5\n",
        ] {
            assert!(
                matches!(
                    GeneratorConfig::from_toml_str(section),
                    Err(DataError::Config(_))
                ),
                "{section}"
            );
        }

        let mut cfg = GeneratorConfig::default();
        cfg.augmentation.crop_max_scale = 0.5;
        assert!(matches!(cfg.build(Stage::Train), Err(DataError::Config(_))));
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("Train".parse::<Stage>().unwrap(), Stage::Train);
        assert_eq!(" val ".parse::<Stage>().unwrap(), Stage::Val);
        assert_eq!(Stage::All.to_string(), "all");
        assert!("test".parse::<Stage>().is_err());
    }
}
