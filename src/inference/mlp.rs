//! Dense feed-forward classifier.
//!
//! Weights come from a JSON export of the trained network:
//!
//! ```json
//! {
//!   "layers": [
//!     { "weights": [[...11 floats...], ...], "biases": [...] },
//!     { "weights": [[...], ...], "biases": [...] }
//!   ],
//!   "output": "softmax"
//! }
//! ```
//!
//! `weights[j]` is the row of input weights for unit `j`.  Hidden layers
//! use ReLU; the final layer uses the declared output activation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::app::ports::InferencePort;
use crate::decision::Prediction;
use crate::encoder::FeatureVector;
use crate::error::{ConfigError, InferenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    /// Class probabilities; prediction is the argmax class.
    Softmax,
    /// Independent per-actuator intensities in `[0, 1]`.
    Sigmoid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f32>>,
    pub biases: Vec<f32>,
}

impl DenseLayer {
    fn inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn outputs(&self) -> usize {
        self.biases.len()
    }

    fn forward(&self, input: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.extend(self.weights.iter().zip(&self.biases).map(|(row, b)| {
            row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b
        }));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpModel {
    layers: Vec<DenseLayer>,
    output: OutputActivation,
}

impl MlpModel {
    /// Build a model, checking that consecutive layer shapes chain.
    pub fn new(layers: Vec<DenseLayer>, output: OutputActivation) -> Result<Self, ConfigError> {
        let model = Self { layers, output };
        model.check_shapes()?;
        Ok(model)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let model: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        model.check_shapes()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn activation(&self) -> OutputActivation {
        self.output
    }

    fn check_shapes(&self) -> Result<(), ConfigError> {
        if self.layers.is_empty() {
            return Err(ConfigError::ValidationFailed("model has no layers"));
        }
        let mut expected_in = self.layers[0].inputs();
        for layer in &self.layers {
            if layer.weights.len() != layer.biases.len() {
                return Err(ConfigError::ValidationFailed("layer rows != biases"));
            }
            if layer.weights.iter().any(|row| row.len() != expected_in) {
                return Err(ConfigError::ValidationFailed("layer width does not chain"));
            }
            expected_in = layer.outputs();
        }
        Ok(())
    }

    /// Raw output activations for one input.
    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if input.len() != self.input_len() {
            return Err(InferenceError::InputShape {
                expected: self.input_len(),
                actual: input.len(),
            });
        }
        let mut current = input.to_vec();
        let mut next = Vec::new();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            layer.forward(&current, &mut next);
            if i < last {
                next.iter_mut().for_each(|v| *v = v.max(0.0));
            }
            std::mem::swap(&mut current, &mut next);
        }
        match self.output {
            OutputActivation::Softmax => softmax(&mut current),
            OutputActivation::Sigmoid => current.iter_mut().for_each(|v| *v = sigmoid(*v)),
        }
        if current.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::MalformedOutput("non-finite activation".into()));
        }
        Ok(current)
    }
}

impl InferencePort for MlpModel {
    fn input_len(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::inputs)
    }

    fn output_len(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::outputs)
    }

    fn infer(&mut self, features: &FeatureVector) -> Result<Prediction, InferenceError> {
        let out = self.forward(features.as_slice())?;
        match self.output {
            OutputActivation::Softmax => argmax(&out)
                .map(Prediction::Class)
                .ok_or_else(|| InferenceError::MalformedOutput("empty output".into())),
            OutputActivation::Sigmoid => Ok(Prediction::Intensities(out)),
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(v: &mut [f32]) {
    let max = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for x in v.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    for x in v.iter_mut() {
        *x /= sum;
    }
}

/// First index of the largest value.
fn argmax(v: &[f32]) -> Option<usize> {
    v.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &x)| match best {
            Some((_, b)) if b >= x => best,
            _ => Some((i, x)),
        })
        .map(|(i, _)| i)
}
