use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed weights: {0}")]
    Shape(String),
    #[error("model expects {expected} inputs, got {actual}")]
    InputWidth { expected: usize, actual: usize },
    #[error("model task failed: {0}")]
    Task(String),
}

/// A regressor scoring one `(1, 1, input_width)` sequence at a time.
pub trait SequenceModel: Send + Sync {
    fn input_width(&self) -> usize;

    /// Scores a single timestep of `input_width` values.
    fn predict(&self, input: &[f64]) -> Result<f64, ModelError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LstmWeights {
    units: usize,
    input_width: usize,
    kernel: Vec<Vec<f64>>,
    recurrent_kernel: Vec<Vec<f64>>,
    bias: Vec<f64>,
    dense_kernel: Vec<f64>,
    dense_bias: f64,
}

/// Single-layer LSTM with a one-unit dense head.
///
/// Gate blocks inside `kernel`, `recurrent_kernel` and `bias` are laid out input, forget,
/// cell, output, each `units` wide.
#[derive(Debug, Clone)]
pub struct LstmRegressor {
    units: usize,
    input_width: usize,
    kernel: Vec<Vec<f64>>,
    recurrent_kernel: Vec<Vec<f64>>,
    bias: Vec<f64>,
    dense_kernel: Vec<f64>,
    dense_bias: f64,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl LstmRegressor {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|err| match err {
            ModelError::Parse { source, .. } => ModelError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let weights: LstmWeights = serde_json::from_str(raw).map_err(|source| ModelError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_weights(weights)
    }

    fn from_weights(weights: LstmWeights) -> Result<Self, ModelError> {
        let gates = weights.units * 4;
        if weights.units == 0 || weights.input_width == 0 {
            return Err(ModelError::Shape("units and inputWidth must be positive".into()));
        }
        check_matrix("kernel", &weights.kernel, weights.input_width, gates)?;
        check_matrix(
            "recurrentKernel",
            &weights.recurrent_kernel,
            weights.units,
            gates,
        )?;
        if weights.bias.len() != gates {
            return Err(ModelError::Shape(format!(
                "bias has {} entries, expected {gates}",
                weights.bias.len()
            )));
        }
        if weights.dense_kernel.len() != weights.units {
            return Err(ModelError::Shape(format!(
                "denseKernel has {} entries, expected {}",
                weights.dense_kernel.len(),
                weights.units
            )));
        }
        Ok(Self {
            units: weights.units,
            input_width: weights.input_width,
            kernel: weights.kernel,
            recurrent_kernel: weights.recurrent_kernel,
            bias: weights.bias,
            dense_kernel: weights.dense_kernel,
            dense_bias: weights.dense_bias,
        })
    }

    /// One LSTM step from `(h, c)`; returns the new `(h, c)`.
    fn step(&self, input: &[f64], h: &[f64], c: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut z = self.bias.clone();
        for (x, row) in input.iter().zip(&self.kernel) {
            for (acc, w) in z.iter_mut().zip(row) {
                *acc += x * w;
            }
        }
        for (h_prev, row) in h.iter().zip(&self.recurrent_kernel) {
            for (acc, w) in z.iter_mut().zip(row) {
                *acc += h_prev * w;
            }
        }

        let n = self.units;
        let mut h_next = vec![0.0; n];
        let mut c_next = vec![0.0; n];
        for unit in 0..n {
            let input_gate = sigmoid(z[unit]);
            let forget_gate = sigmoid(z[n + unit]);
            let candidate = z[2 * n + unit].tanh();
            let output_gate = sigmoid(z[3 * n + unit]);
            c_next[unit] = forget_gate * c[unit] + input_gate * candidate;
            h_next[unit] = output_gate * c_next[unit].tanh();
        }
        (h_next, c_next)
    }
}

fn check_matrix(name: &str, matrix: &[Vec<f64>], rows: usize, cols: usize) -> Result<(), ModelError> {
    if matrix.len() != rows || matrix.iter().any(|row| row.len() != cols) {
        return Err(ModelError::Shape(format!("{name} must be {rows}x{cols}")));
    }
    Ok(())
}

impl SequenceModel for LstmRegressor {
    fn input_width(&self) -> usize {
        self.input_width
    }

    fn predict(&self, input: &[f64]) -> Result<f64, ModelError> {
        if input.len() != self.input_width {
            return Err(ModelError::InputWidth {
                expected: self.input_width,
                actual: input.len(),
            });
        }
        let zeros = vec![0.0; self.units];
        let (h, _) = self.step(input, &zeros, &zeros);
        Ok(h
            .iter()
            .zip(&self.dense_kernel)
            .map(|(h, w)| h * w)
            .sum::<f64>()
            + self.dense_bias)
    }
}
