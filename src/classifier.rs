use thiserror::Error;

pub const DEFAULT_K: usize = 3;

#[derive(Debug, Error, PartialEq)]
pub enum ClassifierError {
    #[error("k must be at least 1")]
    ZeroK,
    #[error("cannot learn an empty vector")]
    EmptyVector,
    #[error("vector has {got} values, training set uses {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("no training examples available")]
    NoTrainingData,
    #[error("vector contains a non-finite value at index {index}")]
    NonFinite { index: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainingExample {
    pub vector: Vec<f32>,
    pub label: String,
}

/// In-memory k-nearest-neighbor store over flattened landmark vectors.
///
/// The training set is append-only. The first learned vector fixes the
/// dimension every later `learn` and `classify` call must match.
///
/// Neighbors are ranked by Euclidean distance, equal distances by insertion
/// order. When two labels collect the same number of votes, the label whose
/// first vote ranks nearest wins.
#[derive(Clone, Debug)]
pub struct KnnClassifier {
    k: usize,
    training: Vec<TrainingExample>,
}

impl KnnClassifier {
    pub fn new(k: usize) -> Result<Self, ClassifierError> {
        if k == 0 {
            return Err(ClassifierError::ZeroK);
        }
        Ok(Self {
            k,
            training: Vec::new(),
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.training.len()
    }

    pub fn is_empty(&self) -> bool {
        self.training.is_empty()
    }

    pub fn examples(&self) -> &[TrainingExample] {
        &self.training
    }

    pub fn dimension(&self) -> Option<usize> {
        self.training.first().map(|example| example.vector.len())
    }

    pub fn learn(
        &mut self,
        vector: Vec<f32>,
        label: impl Into<String>,
    ) -> Result<(), ClassifierError> {
        if vector.is_empty() {
            return Err(ClassifierError::EmptyVector);
        }
        check_finite(&vector)?;
        self.check_dimension(vector.len())?;
        self.training.push(TrainingExample {
            vector,
            label: label.into(),
        });
        Ok(())
    }

    pub fn classify(&self, vector: &[f32]) -> Result<String, ClassifierError> {
        if self.training.is_empty() {
            return Err(ClassifierError::NoTrainingData);
        }
        check_finite(vector)?;
        self.check_dimension(vector.len())?;

        let mut ranked: Vec<(f32, usize)> = self
            .training
            .iter()
            .enumerate()
            .map(|(idx, example)| (euclidean_distance(&example.vector, vector), idx))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        // (label, votes) in order of the label's nearest neighbor.
        let mut votes: Vec<(&str, usize)> = Vec::with_capacity(self.k);
        for &(_, idx) in ranked.iter().take(self.k) {
            let label = self.training[idx].label.as_str();
            match votes.iter_mut().find(|(l, _)| *l == label) {
                Some((_, count)) => *count += 1,
                None => votes.push((label, 1)),
            }
        }

        let mut winner = votes[0];
        for &candidate in &votes[1..] {
            if candidate.1 > winner.1 {
                winner = candidate;
            }
        }
        Ok(winner.0.to_string())
    }

    /// Example count per label in first-seen order.
    pub fn label_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for example in &self.training {
            match counts.iter_mut().find(|(label, _)| *label == example.label) {
                Some((_, count)) => *count += 1,
                None => counts.push((example.label.clone(), 1)),
            }
        }
        counts
    }

    fn check_dimension(&self, got: usize) -> Result<(), ClassifierError> {
        match self.dimension() {
            Some(expected) if expected != got => {
                Err(ClassifierError::DimensionMismatch { expected, got })
            }
            _ => Ok(()),
        }
    }
}

impl Default for KnnClassifier {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            training: Vec::new(),
        }
    }
}

fn check_finite(vector: &[f32]) -> Result<(), ClassifierError> {
    match vector.iter().position(|value| !value.is_finite()) {
        Some(index) => Err(ClassifierError::NonFinite { index }),
        None => Ok(()),
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
