//! Categorical and binary focal cross-entropy over `ndarray` arrays.
//!
//! Both losses down-weight well-classified elements by `(1 - p)^gamma`. The
//! clipping epsilon is the machine epsilon of the element type.

use ndarray::{Array, ArrayBase, Axis, Data, Dimension, RemoveAxis, Zip};
use num_traits::{Float, NumCast};
use serde::{Deserialize, Serialize};

use crate::error::{LossError, LossResult};

/// Focal loss over mutually exclusive classes laid out along `axis`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoricalFocalLoss {
    pub alpha: f64,
    pub gamma: f64,
    pub from_logits: bool,
    /// Class axis; negative values count from the last axis.
    pub axis: isize,
}

impl Default for CategoricalFocalLoss {
    fn default() -> Self {
        Self {
            alpha: 0.25,
            gamma: 2.0,
            from_logits: false,
            axis: -1,
        }
    }
}

/// Elementwise focal loss for independent (multi-label) targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryFocalLoss {
    /// Weight positives by `alpha` and negatives by `1 - alpha`.
    pub apply_class_balancing: bool,
    pub alpha: f64,
    pub gamma: f64,
    pub from_logits: bool,
    /// Targets become `t * (1 - ls) + 0.5 * ls`. Must lie in `[0, 1)`.
    pub label_smoothing: f64,
}

impl Default for BinaryFocalLoss {
    fn default() -> Self {
        Self {
            apply_class_balancing: false,
            alpha: 0.25,
            gamma: 2.0,
            from_logits: false,
            label_smoothing: 0.0,
        }
    }
}

/// Map a possibly negative axis onto `0..ndim`.
pub fn resolve_axis(axis: isize, ndim: usize) -> LossResult<Axis> {
    let signed = ndim as isize;
    let index = if axis < 0 { axis + signed } else { axis };
    if index < 0 || index >= signed {
        return Err(LossError::InvalidAxis { axis, ndim });
    }
    Ok(Axis(index as usize))
}

/// Mean of all loss values, `None` for an empty array.
pub fn reduce_mean<F, S, D>(losses: &ArrayBase<S, D>) -> Option<F>
where
    F: Float,
    S: Data<Elem = F>,
    D: Dimension,
{
    if losses.is_empty() {
        return None;
    }
    let count = <F as NumCast>::from(losses.len())?;
    Some(losses.iter().fold(F::zero(), |acc, &v| acc + v) / count)
}

/// [`CategoricalFocalLoss`] with default settings.
pub fn categorical_focal_crossentropy<F, S1, S2, D>(
    y_true: &ArrayBase<S1, D>,
    y_pred: &ArrayBase<S2, D>,
) -> LossResult<Array<F, D::Smaller>>
where
    F: Float,
    S1: Data<Elem = F>,
    S2: Data<Elem = F>,
    D: RemoveAxis,
{
    CategoricalFocalLoss::default().compute(y_true, y_pred)
}

/// [`BinaryFocalLoss`] with default settings.
pub fn binary_focal_crossentropy<F, S1, S2, D>(
    y_true: &ArrayBase<S1, D>,
    y_pred: &ArrayBase<S2, D>,
) -> LossResult<Array<F, D>>
where
    F: Float,
    S1: Data<Elem = F>,
    S2: Data<Elem = F>,
    D: Dimension,
{
    BinaryFocalLoss::default().compute(y_true, y_pred)
}

fn check_alpha_gamma(alpha: f64, gamma: f64) -> LossResult<()> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(LossError::InvalidParameter {
            name: "alpha",
            value: alpha,
            reason: "must lie in [0, 1]",
        });
    }
    if !(gamma >= 0.0 && gamma.is_finite()) {
        return Err(LossError::InvalidParameter {
            name: "gamma",
            value: gamma,
            reason: "must be a finite value >= 0",
        });
    }
    Ok(())
}

fn check_shapes<F, S1, S2, D>(
    y_true: &ArrayBase<S1, D>,
    y_pred: &ArrayBase<S2, D>,
) -> LossResult<()>
where
    S1: Data<Elem = F>,
    S2: Data<Elem = F>,
    D: Dimension,
{
    if y_true.shape() != y_pred.shape() {
        return Err(LossError::ShapeMismatch {
            y_true: y_true.shape().to_vec(),
            y_pred: y_pred.shape().to_vec(),
        });
    }
    Ok(())
}

fn cast<F: Float>(name: &'static str, value: f64) -> LossResult<F> {
    <F as NumCast>::from(value).ok_or(LossError::InvalidParameter {
        name,
        value,
        reason: "not representable in the element type",
    })
}

fn clip<F: Float>(value: F) -> F {
    let eps = F::epsilon();
    value.max(eps).min(F::one() - eps)
}

impl CategoricalFocalLoss {
    /// `alpha` must lie in `[0, 1]` and `gamma` must be finite and `>= 0`.
    pub fn validate(&self) -> LossResult<()> {
        check_alpha_gamma(self.alpha, self.gamma)
    }

    /// Per-location loss: the class axis is summed away.
    pub fn compute<F, S1, S2, D>(
        &self,
        y_true: &ArrayBase<S1, D>,
        y_pred: &ArrayBase<S2, D>,
    ) -> LossResult<Array<F, D::Smaller>>
    where
        F: Float,
        S1: Data<Elem = F>,
        S2: Data<Elem = F>,
        D: RemoveAxis,
    {
        self.validate()?;
        check_shapes(y_true, y_pred)?;
        let axis = resolve_axis(self.axis, y_pred.ndim())?;
        let alpha: F = cast("alpha", self.alpha)?;
        let gamma: F = cast("gamma", self.gamma)?;

        let mut output = y_pred.to_owned();
        for mut lane in output.lanes_mut(axis) {
            if self.from_logits {
                let max = lane.fold(F::neg_infinity(), |m, &v| m.max(v));
                lane.mapv_inplace(|v| (v - max).exp());
            }
            // Lanes summing to zero stay as they are; clipping keeps them finite.
            let sum = lane.fold(F::zero(), |acc, &v| acc + v);
            if sum != F::zero() {
                lane.mapv_inplace(|v| v / sum);
            }
            lane.mapv_inplace(clip);
        }

        let focal = Zip::from(y_true)
            .and(&output)
            .map_collect(|&t, &p| {
                let cce = -t * p.ln();
                alpha * (F::one() - p).powf(gamma) * cce
            });
        Ok(focal.sum_axis(axis))
    }
}

impl BinaryFocalLoss {
    /// Same `alpha` and `gamma` rules as the categorical loss, plus
    /// `label_smoothing` in `[0, 1)`.
    pub fn validate(&self) -> LossResult<()> {
        check_alpha_gamma(self.alpha, self.gamma)?;
        if !(0.0..1.0).contains(&self.label_smoothing) {
            return Err(LossError::InvalidParameter {
                name: "label_smoothing",
                value: self.label_smoothing,
                reason: "must lie in [0, 1)",
            });
        }
        Ok(())
    }

    /// Elementwise loss with the same shape as the inputs.
    pub fn compute<F, S1, S2, D>(
        &self,
        y_true: &ArrayBase<S1, D>,
        y_pred: &ArrayBase<S2, D>,
    ) -> LossResult<Array<F, D>>
    where
        F: Float,
        S1: Data<Elem = F>,
        S2: Data<Elem = F>,
        D: Dimension,
    {
        self.validate()?;
        check_shapes(y_true, y_pred)?;
        let one = F::one();
        let half = one / (one + one);
        let eps = F::epsilon();
        let alpha: F = cast("alpha", self.alpha)?;
        let gamma: F = cast("gamma", self.gamma)?;
        let smoothing: F = cast("label_smoothing", self.label_smoothing)?;
        let smooth = self.label_smoothing != 0.0;
        let balance = self.apply_class_balancing;
        let from_logits = self.from_logits;

        Ok(Zip::from(y_true).and(y_pred).map_collect(|&t, &p| {
            let t = if smooth {
                t * (one - smoothing) + half * smoothing
            } else {
                t
            };
            let p = if from_logits { one / (one + (-p).exp()) } else { p };

            let clipped = clip(p);
            let bce = -(t * (clipped + eps).ln() + (one - t) * (one - clipped + eps).ln());
            let p_t = t * p + (one - t) * (one - p);
            let mut loss = (one - p_t).powf(gamma) * bce;
            if balance {
                loss = loss * (t * alpha + (one - t) * (one - alpha));
            }
            loss
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_confident_correct_prediction_is_below_cross_entropy() {
        let y_true = array![[1.0, 0.0, 0.0]];
        let y_pred = array![[0.98, 0.01, 0.01]];
        let loss = categorical_focal_crossentropy(&y_true, &y_pred).unwrap();
        assert_eq!(loss.shape(), &[1]);
        assert!(loss[0] > 0.0);
        assert!(loss[0] < -(0.98f64.ln()));
    }

    #[test]
    fn test_hard_example_outweighs_easy_example() {
        let y_true = array![[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let y_pred = array![[0.98, 0.01, 0.01], [0.1, 0.8, 0.1]];
        let loss = categorical_focal_crossentropy(&y_true, &y_pred).unwrap();
        assert!(loss[1] > loss[0]);
    }

    #[test]
    fn test_categorical_value() {
        let y_true = array![[0.0f64, 1.0, 0.0]];
        let y_pred = array![[0.2, 0.5, 0.3]];
        let loss = categorical_focal_crossentropy(&y_true, &y_pred).unwrap();
        assert!(close(loss[0], 0.25 * 0.25 * -(0.5f64.ln())));
    }

    #[test]
    fn test_categorical_renormalizes_and_accepts_logits() {
        let y_true = array![[0.0, 1.0, 0.0]];
        let probs = array![[0.5, 0.25, 0.25]];
        let unnormalized = array![[2.0, 1.0, 1.0]];
        let logits = probs.mapv(f64::ln);

        let reference = categorical_focal_crossentropy(&y_true, &probs).unwrap();
        let renorm = categorical_focal_crossentropy(&y_true, &unnormalized).unwrap();
        let from_logits = CategoricalFocalLoss {
            from_logits: true,
            ..Default::default()
        }
        .compute(&y_true, &logits)
        .unwrap();
        assert!(close(reference[0], renorm[0]));
        assert!(close(reference[0], from_logits[0]));
    }

    #[test]
    fn test_zero_prediction_lane_stays_finite() {
        let y_true = array![[1.0f32, 0.0, 0.0]];
        let y_pred = array![[0.0f32, 0.0, 0.0]];
        let loss = categorical_focal_crossentropy(&y_true, &y_pred).unwrap();
        assert!(loss[0].is_finite());
        assert!(loss[0] > 0.0);
    }

    #[test]
    fn test_categorical_reduces_requested_axis() {
        let y_true = Array3::<f64>::from_shape_fn((2, 4, 3), |(_, _, c)| (c == 1) as u8 as f64);
        let y_pred = Array3::<f64>::from_elem((2, 4, 3), 1.0 / 3.0);
        let loss = categorical_focal_crossentropy(&y_true, &y_pred).unwrap();
        assert_eq!(loss.shape(), &[2, 4]);

        let first_axis = CategoricalFocalLoss {
            axis: 0,
            ..Default::default()
        };
        let loss = first_axis.compute(&y_true, &y_pred).unwrap();
        assert_eq!(loss.shape(), &[4, 3]);
    }

    #[test]
    fn test_shape_and_axis_errors() {
        let y_true = array![[1.0, 0.0, 0.0]];
        let y_pred = array![[0.5, 0.5]];
        assert!(matches!(
            categorical_focal_crossentropy(&y_true, &y_pred),
            Err(LossError::ShapeMismatch { .. })
        ));
        let bad_axis = CategoricalFocalLoss {
            axis: -3,
            ..Default::default()
        };
        assert_eq!(
            bad_axis.compute(&y_true, &y_true),
            Err(LossError::InvalidAxis { axis: -3, ndim: 2 })
        );
        assert_eq!(resolve_axis(-1, 4).unwrap(), Axis(3));
        assert!(resolve_axis(0, 0).is_err());
    }

    #[test]
    fn test_invalid_parameters() {
        let y = array![0.5];
        let alpha = CategoricalFocalLoss {
            alpha: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            alpha.validate(),
            Err(LossError::InvalidParameter { name: "alpha", .. })
        ));
        let gamma = BinaryFocalLoss {
            gamma: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            gamma.compute(&y, &y),
            Err(LossError::InvalidParameter { name: "gamma", .. })
        ));
        let smoothing = BinaryFocalLoss {
            label_smoothing: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            smoothing.validate(),
            Err(LossError::InvalidParameter {
                name: "label_smoothing",
                ..
            })
        ));
    }

    #[test]
    fn test_binary_value() {
        let loss = binary_focal_crossentropy(&array![1.0f64], &array![0.9]).unwrap();
        let expected = 0.1f64.powi(2) * -((0.9 + f64::EPSILON).ln());
        assert!(close(loss[0], expected));
    }

    #[test]
    fn test_binary_class_balancing_weights() {
        let y_true = array![[1.0, 0.0], [1.0, 0.0]];
        let y_pred = array![[0.3, 0.3], [0.8, 0.6]];
        let plain = BinaryFocalLoss::default().compute(&y_true, &y_pred).unwrap();
        let balanced = BinaryFocalLoss {
            apply_class_balancing: true,
            ..Default::default()
        }
        .compute(&y_true, &y_pred)
        .unwrap();

        for ((t, p), b) in y_true.iter().zip(plain.iter()).zip(balanced.iter()) {
            let weight = if *t == 1.0 { 0.25 } else { 0.75 };
            assert!(close(*b, weight * p));
        }
    }

    #[test]
    fn test_zero_label_smoothing_matches_default() {
        let y_true = array![1.0, 0.0, 1.0];
        let y_pred = array![0.7, 0.2, 0.1];
        let default = binary_focal_crossentropy(&y_true, &y_pred).unwrap();
        let explicit = BinaryFocalLoss {
            label_smoothing: 0.0,
            ..Default::default()
        }
        .compute(&y_true, &y_pred)
        .unwrap();
        assert_eq!(default, explicit);

        let smoothed = BinaryFocalLoss {
            label_smoothing: 0.2,
            ..Default::default()
        }
        .compute(&y_true, &y_pred)
        .unwrap();
        assert_ne!(default, smoothed);
    }

    #[test]
    fn test_binary_from_logits() {
        let y_true = array![1.0, 0.0];
        let probs = array![0.5, 0.5];
        let logits = array![0.0, 0.0];
        let reference = binary_focal_crossentropy(&y_true, &probs).unwrap();
        let from_logits = BinaryFocalLoss {
            from_logits: true,
            ..Default::default()
        }
        .compute(&y_true, &logits)
        .unwrap();
        assert!(close(reference[0], from_logits[0]));
        assert!(close(reference[1], from_logits[1]));
    }

    #[test]
    fn test_reduce_mean() {
        let losses = array![[1.0, 2.0], [3.0, 6.0]];
        assert_eq!(reduce_mean(&losses), Some(3.0));
        let empty = ndarray::Array1::<f32>::zeros(0);
        assert_eq!(reduce_mean(&empty), None);
    }
}
