use std::fs;
use std::path::Path;

use tracing::warn;

use crate::{Error, Result};

/// Class list of the shipped MobileNetV2 insect model, in output order.
pub const BUILTIN_LABELS: &str = include_str!("../labels/insectifica.txt");

/// Species names in the order of the classifier's output vector.
///
/// The order is fixed at training time (it is the sorted directory listing of
/// the training set) and must never be re-sorted here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassLabels {
    names: Vec<String>,
}

/// Key used for name lookups: trimmed, whitespace-collapsed, lowercase.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl ClassLabels {
    pub fn new(names: Vec<String>) -> Self {
        let labels = Self { names };
        labels.warn_duplicates();
        labels
    }

    /// One label per line, blank lines skipped.
    pub fn load(file_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(file_path).map_err(|e| {
            Error::startup(format!("cannot open labels {}: {}", file_path.display(), e))
        })?;
        let labels = Self::parse(&content);
        if labels.is_empty() {
            return Err(Error::startup(format!(
                "labels file {} has no entries",
                file_path.display()
            )));
        }
        Ok(labels)
    }

    /// Labels of the model this crate ships with.
    pub fn builtin() -> Self {
        Self::parse(BUILTIN_LABELS)
    }

    fn parse(content: &str) -> Self {
        let names = content
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Pairs of labels that are equal after normalization or differ by a
    /// single substituted character.
    pub fn near_duplicates(&self) -> Vec<(usize, usize)> {
        let keys: Vec<Vec<char>> = self
            .names
            .iter()
            .map(|n| normalize_name(n).chars().collect())
            .collect();
        let mut pairs = Vec::new();
        for i in 0..keys.len() {
            for j in i + 1..keys.len() {
                let (a, b) = (&keys[i], &keys[j]);
                if a.len() == b.len() && a.iter().zip(b).filter(|(x, y)| x != y).count() <= 1 {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    // Duplicate entries stay distinct classes; only the training directory
    // listing can say whether they were meant to be.
    fn warn_duplicates(&self) {
        for (first, second) in self.near_duplicates() {
            warn!(
                "Label {} '{}' looks like a duplicate of label {} '{}'",
                second, self.names[second], first, self.names[first]
            );
        }
    }
}
