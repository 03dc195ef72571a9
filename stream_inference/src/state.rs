use std::{
    collections::HashSet,
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelMappingError {
    #[error("failed to read label mapping: {0}")]
    Io(#[from] io::Error),
    #[error("label mapping is empty")]
    Empty,
    #[error("duplicate label {0:?} in mapping")]
    Duplicate(String),
}

/// Bijection between class names and contiguous indices, fixed at load time
/// and shared read-only by every request.
#[derive(Debug)]
pub struct LabelMapping {
    labels: Vec<String>,
}

impl LabelMapping {
    /// Loads the mapping artifact: one class name per line, line number is
    /// the class index.
    pub fn load(path: &Path) -> Result<Self, LabelMappingError> {
        let file = File::open(path)?;
        let reader = io::BufReader::new(file);

        let mut labels = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let label = line.trim();
            if label.is_empty() {
                continue;
            }
            labels.push(label.to_string());
        }
        Self::from_labels(labels)
    }

    pub fn from_labels(labels: Vec<String>) -> Result<Self, LabelMappingError> {
        if labels.is_empty() {
            return Err(LabelMappingError::Empty);
        }
        let mut seen = HashSet::new();
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(LabelMappingError::Duplicate(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }
}
