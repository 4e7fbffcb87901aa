//! Focal losses for the classification and centerness heads.
//!
//! [`CategoricalFocalLoss::compute`] and [`BinaryFocalLoss::compute`] work on
//! `ndarray` arrays of any rank and float type. With the `burn-backend`
//! feature, `forward` provides the same losses over Burn tensors so they can
//! sit inside a training step.

mod focal;

#[cfg(feature = "burn-backend")]
mod burn_backend;

pub use focal::{
    BinaryFocalLoss, CategoricalFocalLoss, binary_focal_crossentropy,
    categorical_focal_crossentropy, reduce_mean, resolve_axis,
};
