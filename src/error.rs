//! Error types for the data pipeline and the loss functions.

use std::path::PathBuf;

use thiserror::Error;

pub type DataResult<T> = Result<T, DataError>;
pub type LossResult<T> = Result<T, LossError>;

/// Failures while loading, transforming or batching samples.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("malformed label {path} line {line}: {msg}")]
    MalformedLabel {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    /// Raw class name with no entry in the class mapping.
    #[error("class {class:?} is not in the class mapping")]
    UnknownClass { class: String },
    #[error("label has {classes} class rows but {boxes} boxes")]
    LabelMismatch { classes: usize, boxes: usize },
    #[error("sample {identifier} is {got:?} (w, h) but the batch expects {expected:?}")]
    BatchShape {
        identifier: String,
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("cannot assemble a batch from zero samples")]
    EmptyBatch,
    #[error("batch index {index} out of range for {len} batches")]
    BatchIndex { index: usize, len: usize },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("config parse error at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Invalid inputs to a focal loss evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LossError {
    #[error("y_true has shape {y_true:?} but y_pred has shape {y_pred:?}")]
    ShapeMismatch {
        y_true: Vec<usize>,
        y_pred: Vec<usize>,
    },
    #[error("axis {axis} is out of range for an array of rank {ndim}")]
    InvalidAxis { axis: isize, ndim: usize },
    #[error("invalid {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
}
