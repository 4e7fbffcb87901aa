//! Class vocabulary and one-hot encoding.

use std::collections::{BTreeMap, HashSet};

use ndarray::Array1;

use crate::error::{DataError, DataResult};

/// KITTI object classes, excluding `DontCare`.
pub const KITTI_CLASSES: [&str; 8] = [
    "Car",
    "Van",
    "Truck",
    "Pedestrian",
    "Person_sitting",
    "Cyclist",
    "Tram",
    "Misc",
];

/// Immutable mapping from a dataset's raw class name to a canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassMapping(BTreeMap<String, String>);

impl ClassMapping {
    pub fn new(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    /// Map every label to itself.
    pub fn identity<S: AsRef<str>>(labels: &[S]) -> Self {
        Self(
            labels
                .iter()
                .map(|l| (l.as_ref().to_string(), l.as_ref().to_string()))
                .collect(),
        )
    }

    /// Canonical name for a raw class, if mapped.
    pub fn get(&self, raw: &str) -> Option<&str> {
        self.0.get(raw).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ClassMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Fixed output vocabulary: the class mapping plus the ordered canonical labels.
///
/// The position of a label in `labels` is its one-hot index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    mapping: ClassMapping,
    labels: Vec<String>,
}

impl Vocabulary {
    /// Build a vocabulary, rejecting mappings that point outside `labels`.
    pub fn new(mapping: ClassMapping, labels: Vec<String>) -> DataResult<Self> {
        if labels.is_empty() {
            return Err(DataError::Config("label list is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(DataError::Config(format!("duplicate label {label:?}")));
            }
        }
        for (raw, canonical) in mapping.iter() {
            if !seen.contains(canonical) {
                return Err(DataError::Config(format!(
                    "class mapping {raw:?} -> {canonical:?} targets a label that is not in {labels:?}"
                )));
            }
        }
        Ok(Self { mapping, labels })
    }

    /// All KITTI object classes, each mapped to itself.
    pub fn kitti_default() -> Self {
        let labels: Vec<String> = KITTI_CLASSES.iter().map(|s| s.to_string()).collect();
        Self {
            mapping: ClassMapping::identity(&labels),
            labels,
        }
    }

    /// Canonical labels in one-hot order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Raw-to-canonical class mapping.
    pub fn mapping(&self) -> &ClassMapping {
        &self.mapping
    }

    /// Length of every one-hot vector.
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Index of the canonical class a raw class maps to.
    pub fn index_of(&self, raw: &str) -> DataResult<usize> {
        let canonical = self
            .mapping
            .get(raw)
            .ok_or_else(|| DataError::UnknownClass {
                class: raw.to_string(),
            })?;
        // Checked in `new`, but `kitti_default` and hand-built mappings go through here too.
        self.labels
            .iter()
            .position(|l| l == canonical)
            .ok_or_else(|| {
                DataError::Config(format!("mapped class {canonical:?} is not a known label"))
            })
    }

    /// One-hot vector of length `num_classes` for a raw class name.
    pub fn encode(&self, raw: &str) -> DataResult<Array1<f32>> {
        let index = self.index_of(raw)?;
        let mut encoding = Array1::zeros(self.num_classes());
        encoding[index] = 1.0;
        Ok(encoding)
    }

    /// Canonical label name at a one-hot index.
    pub fn decode(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }
}
