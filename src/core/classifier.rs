//! Gesture classifier seam and the built-in linear model.
//!
//! The trained model is opaque to the agent: anything implementing
//! [`Classifier`] maps a normalized window to one probability per label.

use crate::collector::types::CHANNEL_COUNT;
use crate::error::AgentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Gesture names, indexed by label.
pub const GESTURE_LABELS: [&str; 6] = [
    "Open hand",
    "Closed hand",
    "Fine pinch",
    "Coarse pinch",
    "Wrist in",
    "Wrist out",
];

/// Number of gesture labels.
pub const LABEL_COUNT: usize = GESTURE_LABELS.len();

/// Display name for a label index.
pub fn label_name(label: usize) -> &'static str {
    GESTURE_LABELS.get(label).copied().unwrap_or("Unknown")
}

/// Maps a normalized window to a probability distribution over labels.
pub trait Classifier: Send + Sync {
    fn predict(&self, window: &[[f32; CHANNEL_COUNT]]) -> Result<Vec<f32>, AgentError>;
}

/// Outcome of classifying one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: usize,
    pub confidence: f32,
    pub classified_at: DateTime<Utc>,
}

impl ClassificationResult {
    pub fn label_name(&self) -> &'static str {
        label_name(self.label)
    }
}

/// Arg-max over a probability vector with one entry per gesture label.
pub fn top_label(probabilities: &[f32]) -> Result<ClassificationResult, AgentError> {
    if probabilities.len() != LABEL_COUNT {
        return Err(AgentError::Model(format!(
            "prediction has {} probabilities, expected {LABEL_COUNT}",
            probabilities.len()
        )));
    }
    let (label, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| p.is_finite())
        .fold(None, |best: Option<(usize, f32)>, (idx, p)| match best {
            Some((_, top)) if top >= p => best,
            _ => Some((idx, p)),
        })
        .ok_or_else(|| AgentError::Model("prediction has no finite probabilities".to_string()))?;

    Ok(ClassificationResult {
        label,
        confidence: confidence.clamp(0.0, 1.0),
        classified_at: Utc::now(),
    })
}

/// Always returns the same distribution. Useful as a stand-in model.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    probabilities: Vec<f32>,
}

impl FixedClassifier {
    pub fn new(probabilities: Vec<f32>) -> Self {
        Self { probabilities }
    }
}

impl Classifier for FixedClassifier {
    fn predict(&self, _window: &[[f32; CHANNEL_COUNT]]) -> Result<Vec<f32>, AgentError> {
        Ok(self.probabilities.clone())
    }
}

/// Softmax regression over per-channel mean and standard deviation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub labels: Vec<String>,
    /// One row per label, `2 * CHANNEL_COUNT` weights each
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl LinearModel {
    /// Number of input features: mean and standard deviation per channel.
    pub const FEATURES: usize = 2 * CHANNEL_COUNT;

    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Model(format!("Failed to read {path:?}: {e}")))?;
        let model: LinearModel = serde_json::from_str(&content)
            .map_err(|e| AgentError::Model(format!("Failed to parse {path:?}: {e}")))?;
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AgentError::Model(format!("Failed to serialize model: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| AgentError::Model(format!("Failed to write {path:?}: {e}")))
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.labels.len() != LABEL_COUNT {
            return Err(AgentError::Model(format!(
                "model has {} labels, expected {LABEL_COUNT}",
                self.labels.len()
            )));
        }
        if self.weights.len() != self.labels.len() || self.bias.len() != self.labels.len() {
            return Err(AgentError::Model(format!(
                "expected {} weight rows and biases, found {} and {}",
                self.labels.len(),
                self.weights.len(),
                self.bias.len()
            )));
        }
        if let Some(row) = self.weights.iter().find(|r| r.len() != Self::FEATURES) {
            return Err(AgentError::Model(format!(
                "weight row has {} entries, expected {}",
                row.len(),
                Self::FEATURES
            )));
        }
        Ok(())
    }

    fn features(window: &[[f32; CHANNEL_COUNT]]) -> [f64; 2 * CHANNEL_COUNT] {
        let mut features = [0.0; 2 * CHANNEL_COUNT];
        for channel in 0..CHANNEL_COUNT {
            let values: Vec<f64> = window.iter().map(|row| f64::from(row[channel])).collect();
            let mean = values.iter().mean();
            let std_dev = values.iter().std_dev();
            features[channel] = if mean.is_finite() { mean } else { 0.0 };
            features[CHANNEL_COUNT + channel] = if std_dev.is_finite() { std_dev } else { 0.0 };
        }
        features
    }
}

impl Classifier for LinearModel {
    fn predict(&self, window: &[[f32; CHANNEL_COUNT]]) -> Result<Vec<f32>, AgentError> {
        if window.is_empty() {
            return Err(AgentError::Model("cannot classify an empty window".to_string()));
        }
        let features = Self::features(window);

        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(self.bias.iter())
            .map(|(row, b)| b + row.iter().zip(features.iter()).map(|(w, x)| w * x).sum::<f64>())
            .collect();

        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        Ok(exps.iter().map(|e| (e / total) as f32).collect())
    }
}

/// Supplies a classifier each time a pipeline starts, so a retrained model
/// file is picked up without restarting the agent.
pub trait ClassifierProvider: Send + Sync {
    fn load(&self) -> Result<Arc<dyn Classifier>, AgentError>;
}

/// Loads a [`LinearModel`] from disk on every start.
#[derive(Debug, Clone)]
pub struct ModelFile {
    pub path: PathBuf,
}

impl ModelFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ClassifierProvider for ModelFile {
    fn load(&self) -> Result<Arc<dyn Classifier>, AgentError> {
        Ok(Arc::new(LinearModel::load(&self.path)?))
    }
}

/// Hands out the same classifier instance every time.
#[derive(Clone)]
pub struct Preloaded(pub Arc<dyn Classifier>);

impl ClassifierProvider for Preloaded {
    fn load(&self) -> Result<Arc<dyn Classifier>, AgentError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_window(value: f32, len: usize) -> Vec<[f32; CHANNEL_COUNT]> {
        vec![[value; CHANNEL_COUNT]; len]
    }

    /// Open hand at rest, closed hand when channel 1 is high.
    fn gesture_model() -> LinearModel {
        let mut weights = vec![vec![0.0; LinearModel::FEATURES]; LABEL_COUNT];
        weights[1][0] = 10.0;
        let mut bias = vec![-10.0; LABEL_COUNT];
        bias[0] = 2.0;
        bias[1] = 0.0;
        LinearModel {
            labels: GESTURE_LABELS.iter().map(|l| l.to_string()).collect(),
            weights,
            bias,
        }
    }

    #[test]
    fn test_top_label() {
        let result = top_label(&[0.1, 0.7, 0.2, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(result.label, 1);
        assert!((result.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_top_label_prefers_first_on_tie() {
        let result = top_label(&[0.5, 0.5, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(result.label, 0);
    }

    #[test]
    fn test_top_label_rejects_empty() {
        assert!(top_label(&[]).is_err());
        assert!(top_label(&[f32::NAN; LABEL_COUNT]).is_err());
    }

    #[test]
    fn test_top_label_rejects_wrong_length() {
        let eight = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.95];
        assert!(matches!(top_label(&eight), Err(AgentError::Model(_))));
        assert!(matches!(top_label(&[0.9, 0.1]), Err(AgentError::Model(_))));
    }

    #[test]
    fn test_label_names() {
        assert_eq!(label_name(0), "Open hand");
        assert_eq!(label_name(5), "Wrist out");
        assert_eq!(label_name(42), "Unknown");
    }

    #[test]
    fn test_linear_model_softmax() {
        let model = gesture_model();

        let probs = model.predict(&uniform_window(0.0, 10)).unwrap();
        assert_eq!(probs.len(), LABEL_COUNT);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(probs[0] > probs[1]);

        let probs = model.predict(&uniform_window(1.0, 10)).unwrap();
        assert!(probs[1] > probs[0]);
    }

    #[test]
    fn test_linear_model_validation() {
        let mut model = gesture_model();
        model.bias.pop();
        assert!(model.validate().is_err());

        let mut model = gesture_model();
        model.weights[0].pop();
        assert!(model.validate().is_err());

        let mut model = gesture_model();
        model.labels.push("Thumbs up".to_string());
        model.weights.push(vec![0.0; LinearModel::FEATURES]);
        model.bias.push(0.0);
        assert!(matches!(model.validate(), Err(AgentError::Model(_))));

        assert!(gesture_model().validate().is_ok());
    }

    #[test]
    fn test_model_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        gesture_model().save(&path).unwrap();

        let provider = ModelFile::new(&path);
        let classifier = provider.load().unwrap();
        let probs = classifier.predict(&uniform_window(0.5, 4)).unwrap();
        assert_eq!(probs.len(), LABEL_COUNT);

        let missing = ModelFile::new(dir.path().join("absent.json"));
        assert!(matches!(missing.load(), Err(AgentError::Model(_))));
    }
}
