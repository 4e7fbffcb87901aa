//! Data pipeline and focal losses for training FCOS-style detectors on KITTI.
//!
//! The [`data`] module turns a KITTI directory tree into batches of RGB images
//! with one-hot classes and pixel boxes. The [`loss`] module provides
//! categorical and binary focal cross-entropy. [`GeneratorConfig`] wires both
//! from a TOML file.

pub mod config;
pub mod data;
pub mod error;
pub mod loss;

pub use config::{GeneratorConfig, LossConfig, Stage};
pub use data::{
    Batch, BoundingBox, ClassMapping, DataGenerator, KittiLabels, Label, LabelSource, Sample,
    SampleDescriptor, SampleLoader, Transform, Vocabulary,
};
pub use error::{DataError, DataResult, LossError, LossResult};
pub use loss::{BinaryFocalLoss, CategoricalFocalLoss};
