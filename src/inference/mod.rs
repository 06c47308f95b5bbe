//! Classifier adapters implementing [`InferencePort`](crate::app::ports::InferencePort).

pub mod mlp;
pub mod worker;

pub use mlp::{DenseLayer, MlpModel, OutputActivation};
pub use worker::{InferenceWorker, PendingInference};
