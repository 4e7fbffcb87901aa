//! Focal losses over Burn tensors.
//!
//! These mirror [`CategoricalFocalLoss::compute`] and
//! [`BinaryFocalLoss::compute`] so a Burn training step can use the same loss
//! settings as the array implementation. Clipping uses `f32::EPSILON`.

use burn::prelude::*;
use burn::tensor::activation::{sigmoid, softmax};

use super::focal::{BinaryFocalLoss, CategoricalFocalLoss, resolve_axis};
use crate::error::{LossError, LossResult};

const EPSILON: f64 = f32::EPSILON as f64;

fn check_dims<B: Backend, const D: usize>(
    y_true: &Tensor<B, D>,
    y_pred: &Tensor<B, D>,
) -> LossResult<()> {
    let (t, p) = (y_true.dims(), y_pred.dims());
    if t != p {
        return Err(LossError::ShapeMismatch {
            y_true: t.to_vec(),
            y_pred: p.to_vec(),
        });
    }
    Ok(())
}

fn one_minus<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
    tensor.neg().add_scalar(1.0)
}

impl CategoricalFocalLoss {
    /// Per-location loss. The class axis is kept with size 1.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        y_true: Tensor<B, D>,
        y_pred: Tensor<B, D>,
    ) -> LossResult<Tensor<B, D>> {
        self.validate()?;
        check_dims(&y_true, &y_pred)?;
        let dim = resolve_axis(self.axis, D)?.index();

        let y_pred = if self.from_logits {
            softmax(y_pred, dim)
        } else {
            y_pred
        };
        let sum = y_pred.clone().sum_dim(dim);
        let zero = sum.clone().equal_elem(0.0);
        let output = (y_pred / sum.mask_fill(zero, 1.0)).clamp(EPSILON, 1.0 - EPSILON);

        let cce = y_true.neg() * output.clone().log();
        let factor = one_minus(output).powf_scalar(self.gamma).mul_scalar(self.alpha);
        Ok((factor * cce).sum_dim(dim))
    }
}

impl BinaryFocalLoss {
    /// Elementwise loss with the same shape as the inputs.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        y_true: Tensor<B, D>,
        y_pred: Tensor<B, D>,
    ) -> LossResult<Tensor<B, D>> {
        self.validate()?;
        check_dims(&y_true, &y_pred)?;

        let ls = self.label_smoothing;
        let y_true = if ls != 0.0 {
            y_true.mul_scalar(1.0 - ls).add_scalar(0.5 * ls)
        } else {
            y_true
        };
        let p = if self.from_logits {
            sigmoid(y_pred)
        } else {
            y_pred
        };
        let negative = one_minus(y_true.clone());

        let clipped = p.clone().clamp(EPSILON, 1.0 - EPSILON);
        let bce = (y_true.clone() * clipped.clone().add_scalar(EPSILON).log()
            + negative.clone() * one_minus(clipped).add_scalar(EPSILON).log())
        .neg();
        let p_t = y_true.clone() * p.clone() + negative.clone() * one_minus(p);
        let loss = one_minus(p_t).powf_scalar(self.gamma) * bce;

        if self.apply_class_balancing {
            let weight = y_true.mul_scalar(self.alpha) + negative.mul_scalar(1.0 - self.alpha);
            Ok(loss * weight)
        } else {
            Ok(loss)
        }
    }
}
