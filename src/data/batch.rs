//! Batch assembly and epoch-wise batch generation.

use ndarray::{Array2, Array3, Array4, ArrayView3, Axis, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::config::Stage;
use crate::data::label::{Label, LabelSource};
use crate::data::loader::{Sample, SampleDescriptor, SampleLoader};
use crate::error::{DataError, DataResult};

/// A batch of samples: identifiers, stacked images and per-sample labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub identifiers: Vec<String>,
    /// Images stacked as `(N, H, W, 3)`, RGB.
    pub images: Array4<u8>,
    pub labels: Vec<Label>,
}

impl Batch {
    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Images as `f32` in `[0, 1]`.
    pub fn images_f32(&self) -> Array4<f32> {
        self.images.mapv(|v| v as f32 / 255.0)
    }

    /// Labels padded or truncated to `max_boxes` objects per sample.
    pub fn dense_labels(&self, max_boxes: usize) -> DenseLabels {
        let n = self.labels.len();
        let c = self.labels.first().map_or(0, Label::num_classes);
        let mut classes = Array3::zeros((n, max_boxes, c));
        let mut boxes = Array3::zeros((n, max_boxes, 4));
        let mut mask = Array2::zeros((n, max_boxes));
        for (i, label) in self.labels.iter().enumerate() {
            let k = label.len().min(max_boxes);
            if k == 0 {
                continue;
            }
            classes
                .slice_mut(s![i, ..k, ..])
                .assign(&label.classes().slice(s![..k, ..]));
            boxes
                .slice_mut(s![i, ..k, ..])
                .assign(&label.coordinates().slice(s![..k, ..]));
            mask.slice_mut(s![i, ..k]).fill(1.0);
        }
        DenseLabels {
            classes,
            boxes,
            mask,
        }
    }

    /// Convert to Burn tensors; images become NCHW `f32` in `[0, 1]`.
    #[cfg(feature = "burn-backend")]
    pub fn to_burn<B: burn::tensor::backend::Backend>(
        &self,
        max_boxes: usize,
        device: &B::Device,
    ) -> BurnBatch<B> {
        use burn::tensor::{Tensor, TensorData};

        let (n, h, w, c) = self.images.dim();
        let nchw = self.images_f32().permuted_axes([0, 3, 1, 2]);
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(nchw.iter().copied().collect::<Vec<f32>>(), [n, c, h, w]),
            device,
        );

        let dense = self.dense_labels(max_boxes);
        let (_, m, classes_len) = dense.classes.dim();
        let classes = Tensor::<B, 3>::from_data(
            TensorData::new(
                dense.classes.iter().copied().collect::<Vec<f32>>(),
                [n, m, classes_len],
            ),
            device,
        );
        let boxes = Tensor::<B, 3>::from_data(
            TensorData::new(dense.boxes.iter().copied().collect::<Vec<f32>>(), [n, m, 4]),
            device,
        );
        let box_mask = Tensor::<B, 2>::from_data(
            TensorData::new(dense.mask.iter().copied().collect::<Vec<f32>>(), [n, m]),
            device,
        );
        BurnBatch {
            images,
            classes,
            boxes,
            box_mask,
        }
    }
}

/// Fixed-size label arrays for a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLabels {
    /// `(N, max_boxes, num_classes)` one-hot rows, zero where padded.
    pub classes: Array3<f32>,
    /// `(N, max_boxes, 4)` XYXY pixel boxes, zero where padded.
    pub boxes: Array3<f32>,
    /// `(N, max_boxes)`, 1 for real objects.
    pub mask: Array2<f32>,
}

#[cfg(feature = "burn-backend")]
pub struct BurnBatch<B: burn::tensor::backend::Backend> {
    pub images: burn::tensor::Tensor<B, 4>,
    pub classes: burn::tensor::Tensor<B, 3>,
    pub boxes: burn::tensor::Tensor<B, 3>,
    pub box_mask: burn::tensor::Tensor<B, 2>,
}

/// Stack loaded samples into a batch, preserving order.
///
/// Every image must have the size of the first one.
pub fn assemble(samples: Vec<Sample>) -> DataResult<Batch> {
    let first = samples.first().ok_or(DataError::EmptyBatch)?;
    let (w, h) = first.image.dimensions();

    let mut images = Array4::zeros((samples.len(), h as usize, w as usize, 3));
    let mut identifiers = Vec::with_capacity(samples.len());
    let mut labels = Vec::with_capacity(samples.len());
    for (mut slot, sample) in images.axis_iter_mut(Axis(0)).zip(samples) {
        let got = sample.image.dimensions();
        if got != (w, h) {
            return Err(DataError::BatchShape {
                identifier: sample.identifier,
                expected: (w, h),
                got,
            });
        }
        let view = ArrayView3::from_shape((h as usize, w as usize, 3), sample.image.as_raw())
            .map_err(|e| DataError::Config(format!("image buffer layout: {e}")))?;
        slot.assign(&view);
        identifiers.push(sample.identifier);
        labels.push(sample.label);
    }
    Ok(Batch {
        identifiers,
        images,
        labels,
    })
}

/// Iterates a dataset in batches, one epoch at a time.
///
/// Shuffling happens at construction and at every [`DataGenerator::on_epoch_end`]
/// when enabled; with a loader seed the order is reproducible.
pub struct DataGenerator<L: LabelSource> {
    loader: SampleLoader<L>,
    descriptors: Vec<SampleDescriptor>,
    batch_size: usize,
    shuffle: bool,
    parallel: bool,
    epoch: u64,
}

impl<L: LabelSource> DataGenerator<L> {
    pub fn new(
        loader: SampleLoader<L>,
        descriptors: Vec<SampleDescriptor>,
        batch_size: usize,
    ) -> DataResult<Self> {
        if batch_size == 0 {
            return Err(DataError::Config("batch_size must be at least 1".to_string()));
        }
        let shuffle = loader.stage() == Stage::Train;
        let mut generator = Self {
            loader,
            descriptors,
            batch_size,
            shuffle,
            parallel: false,
            epoch: 0,
        };
        generator.reshuffle();
        Ok(generator)
    }

    /// Override the stage default (shuffle only in training) and reshuffle now.
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self.reshuffle();
        self
    }

    /// Load the samples of a batch on the rayon pool.
    pub fn with_parallel_loading(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// The loader used for every sample.
    pub fn loader(&self) -> &SampleLoader<L> {
        &self.loader
    }

    /// Descriptors in the order of the current epoch.
    pub fn descriptors(&self) -> &[SampleDescriptor] {
        &self.descriptors
    }

    /// Samples per full batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Current epoch, starting at 0.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of samples per epoch.
    pub fn num_samples(&self) -> usize {
        self.descriptors.len()
    }

    /// Number of batches per epoch; the last one may be short.
    pub fn len(&self) -> usize {
        self.descriptors.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Load the given samples and stack them into one batch.
    ///
    /// Any failing sample fails the whole batch.
    pub fn create_batch(&self, descriptors: &[SampleDescriptor]) -> DataResult<Batch> {
        let load = |d: &SampleDescriptor| self.loader.load_sample_for_epoch(d, self.epoch);
        let samples = if self.parallel {
            descriptors.par_iter().map(load).collect::<DataResult<Vec<_>>>()?
        } else {
            descriptors.iter().map(load).collect::<DataResult<Vec<_>>>()?
        };
        assemble(samples)
    }

    /// Batch `index` of the current epoch.
    pub fn batch(&self, index: usize) -> DataResult<Batch> {
        if index >= self.len() {
            return Err(DataError::BatchIndex {
                index,
                len: self.len(),
            });
        }
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.descriptors.len());
        self.create_batch(&self.descriptors[start..end])
    }

    /// All batches of the current epoch, in order.
    pub fn iter(&self) -> impl Iterator<Item = DataResult<Batch>> + '_ {
        (0..self.len()).map(move |i| self.batch(i))
    }

    /// Advance to the next epoch, reshuffling when enabled.
    pub fn on_epoch_end(&mut self) {
        self.epoch += 1;
        self.reshuffle();
    }

    fn reshuffle(&mut self) {
        if !self.shuffle {
            return;
        }
        let mut rng = match self.loader.config().seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.epoch)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        // Start from a canonical order so a seeded epoch does not depend on earlier epochs.
        self.descriptors.sort_by(|a, b| a.image.cmp(&b.image));
        self.descriptors.shuffle(&mut rng);
    }
}
