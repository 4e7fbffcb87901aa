//! KITTI sample loading, transforms and batch assembly.
//!
//! A [`SampleLoader`] reads one image and its label through a [`LabelSource`],
//! runs the preprocessor and (in training) the augmenter. [`DataGenerator`]
//! groups samples into fixed-size [`Batch`]es.

mod augment;
mod batch;
mod bbox;
mod kitti;
mod label;
mod loader;
mod transform;
mod vocabulary;

pub use augment::Augmenter;
#[cfg(feature = "burn-backend")]
pub use batch::BurnBatch;
pub use batch::{Batch, DataGenerator, DenseLabels, assemble};
pub use bbox::BoundingBox;
pub use kitti::{KittiLabels, index_kitti, split_descriptors};
pub use label::{Label, LabelSource};
pub use loader::{LoaderConfig, Sample, SampleDescriptor, SampleLoader, load_image};
pub use transform::{Compose, FnTransform, Identity, Resize, ResizeMode, Transform};
pub use vocabulary::{ClassMapping, KITTI_CLASSES, Vocabulary};
