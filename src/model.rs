//! Frozen quantised sequence model.
//!
//! The artifact is a JSON document (optionally `.gz`) produced by the training
//! pipeline. Weights are int8 with a per-tensor affine quantisation
//! (`real = scale * (q - zero_point)`); they are dequantised exactly once at
//! load, so every forward pass is the same sequence of f32 operations and
//! therefore bit-for-bit repeatable.

use flate2::read::GzDecoder;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::ModelLoadError;
use crate::normalizer::Normalizer;
use crate::types::CHANNELS;

pub const FORMAT_VERSION: u32 = 1;

// ─── Artifact (on-disk shape) ────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuantizedTensor {
    /// `[rows, cols]`
    pub shape: [usize; 2],
    pub scale: f32,
    #[serde(default)]
    pub zero_point: i32,
    pub data: Vec<i8>,
}

impl QuantizedTensor {
    fn dequantize(&self, what: &str) -> Result<Array2<f32>, ModelLoadError> {
        let [rows, cols] = self.shape;
        if rows == 0 || cols == 0 {
            return Err(ModelLoadError::Invalid(format!("{}: empty shape {:?}", what, self.shape)));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ModelLoadError::Invalid(format!("{}: bad scale {}", what, self.scale)));
        }
        if self.data.len() != rows * cols {
            return Err(ModelLoadError::Invalid(format!(
                "{}: expected {} values for shape {:?}, found {}",
                what,
                rows * cols,
                self.shape,
                self.data.len()
            )));
        }
        let values: Vec<f32> = self
            .data
            .iter()
            .map(|&q| self.scale * (q as i32 - self.zero_point) as f32)
            .collect();
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| ModelLoadError::Invalid(format!("{}: {}", what, e)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Gate order i, f, c, o. Kernel `[input, 4u]`, recurrent `[u, 4u]`.
    Lstm {
        units: usize,
        kernel: QuantizedTensor,
        recurrent: QuantizedTensor,
        bias: Vec<f32>,
    },
    Dense {
        units: usize,
        activation: Activation,
        kernel: QuantizedTensor,
        bias: Vec<f32>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub window_size: usize,
    pub channels: usize,
    pub normalizer: Normalizer,
    pub layers: Vec<LayerSpec>,
}

impl ModelArtifact {
    /// Reads `path`, transparently gunzipping `*.gz`.
    pub fn read(path: &Path) -> Result<Self, ModelLoadError> {
        if !path.exists() {
            return Err(ModelLoadError::Missing(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(serde_json::from_reader(reader)?)
    }
}

// ─── Runtime network ─────────────────────────────────────────────────────────

struct LstmLayer {
    units: usize,
    kernel: Array2<f32>,
    recurrent: Array2<f32>,
    bias: Array1<f32>,
}

struct DenseLayer {
    activation: Activation,
    kernel: Array2<f32>,
    bias: Array1<f32>,
}

/// Dequantised, validated network. Immutable after construction.
pub struct QuantizedLstm {
    window_size: usize,
    lstm: Vec<LstmLayer>,
    dense: Vec<DenseLayer>,
    normalizer: Normalizer,
}

fn bias_vector(bias: &[f32], expected: usize, what: &str) -> Result<Array1<f32>, ModelLoadError> {
    if bias.len() != expected {
        return Err(ModelLoadError::Invalid(format!(
            "{}: bias has {} values, expected {}",
            what,
            bias.len(),
            expected
        )));
    }
    if bias.iter().any(|b| !b.is_finite()) {
        return Err(ModelLoadError::Invalid(format!("{}: non-finite bias", what)));
    }
    Ok(Array1::from_vec(bias.to_vec()))
}

impl QuantizedLstm {
    pub fn load(path: &Path, expected_window: usize) -> Result<Self, ModelLoadError> {
        let artifact = ModelArtifact::read(path)?;
        Self::from_artifact(artifact, expected_window)
    }

    /// Structural validation + dequantisation. LSTM layers must come first,
    /// followed by at least one dense layer ending in a single sigmoid unit.
    pub fn from_artifact(artifact: ModelArtifact, expected_window: usize) -> Result<Self, ModelLoadError> {
        if artifact.format_version != FORMAT_VERSION {
            return Err(ModelLoadError::Invalid(format!(
                "unsupported format_version {}",
                artifact.format_version
            )));
        }
        if artifact.channels != CHANNELS {
            return Err(ModelLoadError::Invalid(format!(
                "model expects {} channels, pipeline produces {}",
                artifact.channels, CHANNELS
            )));
        }
        if artifact.window_size != expected_window {
            return Err(ModelLoadError::Invalid(format!(
                "model window_size {} does not match configured {}",
                artifact.window_size, expected_window
            )));
        }
        if !artifact.normalizer.is_well_formed() {
            return Err(ModelLoadError::Invalid("normalizer constants out of range".to_string()));
        }

        let mut lstm = Vec::new();
        let mut dense = Vec::new();
        let mut width = CHANNELS;

        for (index, layer) in artifact.layers.iter().enumerate() {
            let what = format!("layer {}", index);
            match layer {
                LayerSpec::Lstm { units, kernel, recurrent, bias } => {
                    if !dense.is_empty() {
                        return Err(ModelLoadError::Invalid(format!("{}: lstm after dense", what)));
                    }
                    let kernel = kernel.dequantize(&what)?;
                    let recurrent = recurrent.dequantize(&what)?;
                    if kernel.dim() != (width, 4 * units) || recurrent.dim() != (*units, 4 * units) {
                        return Err(ModelLoadError::Invalid(format!(
                            "{}: lstm shapes {:?}/{:?} do not fit input {} units {}",
                            what,
                            kernel.dim(),
                            recurrent.dim(),
                            width,
                            units
                        )));
                    }
                    let bias = bias_vector(bias, 4 * units, &what)?;
                    lstm.push(LstmLayer { units: *units, kernel, recurrent, bias });
                    width = *units;
                }
                LayerSpec::Dense { units, activation, kernel, bias } => {
                    let kernel = kernel.dequantize(&what)?;
                    if kernel.dim() != (width, *units) {
                        return Err(ModelLoadError::Invalid(format!(
                            "{}: dense shape {:?} does not fit input {} units {}",
                            what,
                            kernel.dim(),
                            width,
                            units
                        )));
                    }
                    let bias = bias_vector(bias, *units, &what)?;
                    dense.push(DenseLayer { activation: *activation, kernel, bias });
                    width = *units;
                }
            }
        }

        if lstm.is_empty() {
            return Err(ModelLoadError::Invalid("no sequence layer".to_string()));
        }
        match dense.last() {
            Some(head) if width == 1 && head.activation == Activation::Sigmoid => {}
            _ => {
                return Err(ModelLoadError::Invalid(
                    "output head must be a single sigmoid unit".to_string(),
                ))
            }
        }

        Ok(Self {
            window_size: artifact.window_size,
            lstm,
            dense,
            normalizer: artifact.normalizer,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Multiply-accumulate count of one forward pass; logged at startup next
    /// to the timed warm-up pass.
    pub fn mac_count(&self) -> usize {
        let mut input = CHANNELS;
        let mut macs = 0;
        for layer in &self.lstm {
            macs += self.window_size * (input + layer.units) * 4 * layer.units;
            input = layer.units;
        }
        for layer in &self.dense {
            macs += layer.kernel.len();
        }
        macs
    }

    /// Forward pass over a `[window x channels]` feature view.
    /// Returns the sigmoid output of the head.
    pub fn forward(&self, features: ArrayView2<'_, f32>) -> f32 {
        let mut sequence = features.to_owned();
        let mut last_hidden = Array1::<f32>::zeros(0);

        for layer in &self.lstm {
            let (outputs, hidden) = run_lstm(layer, sequence.view());
            sequence = outputs;
            last_hidden = hidden;
        }

        let mut activations = last_hidden;
        for layer in &self.dense {
            activations = run_dense(layer, activations.view());
        }
        activations.get(0).copied().unwrap_or(0.0)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Returns the full hidden-state sequence and the final hidden state.
fn run_lstm(layer: &LstmLayer, inputs: ArrayView2<'_, f32>) -> (Array2<f32>, Array1<f32>) {
    let u = layer.units;
    let steps = inputs.nrows();
    let mut h = Array1::<f32>::zeros(u);
    let mut c = Array1::<f32>::zeros(u);
    let mut outputs = Array2::<f32>::zeros((steps, u));

    for (t, x) in inputs.rows().into_iter().enumerate() {
        let z = x.dot(&layer.kernel) + h.dot(&layer.recurrent) + &layer.bias;
        for j in 0..u {
            let i_gate = sigmoid(z[j]);
            let f_gate = sigmoid(z[u + j]);
            let g_gate = z[2 * u + j].tanh();
            let o_gate = sigmoid(z[3 * u + j]);
            c[j] = f_gate * c[j] + i_gate * g_gate;
            h[j] = o_gate * c[j].tanh();
        }
        outputs.row_mut(t).assign(&h);
    }
    (outputs, h)
}

fn run_dense(layer: &DenseLayer, input: ArrayView1<'_, f32>) -> Array1<f32> {
    let mut out = input.dot(&layer.kernel) + &layer.bias;
    match layer.activation {
        Activation::Linear => {}
        Activation::Relu => out.mapv_inplace(|v| v.max(0.0)),
        Activation::Sigmoid => out.mapv_inplace(sigmoid),
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn tensor(rows: usize, cols: usize, fill: impl Fn(usize) -> i8) -> QuantizedTensor {
        QuantizedTensor {
            shape: [rows, cols],
            scale: 0.02,
            zero_point: 0,
            data: (0..rows * cols).map(fill).collect(),
        }
    }

    /// Small but complete network: LSTM(4) -> Dense(2, relu) -> Dense(1, sigmoid).
    pub(crate) fn tiny_artifact(window_size: usize) -> ModelArtifact {
        ModelArtifact {
            format_version: FORMAT_VERSION,
            window_size,
            channels: CHANNELS,
            normalizer: Normalizer::from_ranges(2.0, 250.0),
            layers: vec![
                LayerSpec::Lstm {
                    units: 4,
                    kernel: tensor(CHANNELS, 16, |i| ((i * 37) % 101) as i8 - 50),
                    recurrent: tensor(4, 16, |i| ((i * 13) % 61) as i8 - 30),
                    bias: vec![0.0; 16],
                },
                LayerSpec::Dense {
                    units: 2,
                    activation: Activation::Relu,
                    kernel: tensor(4, 2, |i| (i as i32 * 10 - 35) as i8),
                    bias: vec![0.1, -0.1],
                },
                LayerSpec::Dense {
                    units: 1,
                    activation: Activation::Sigmoid,
                    kernel: tensor(2, 1, |i| if i == 0 { 90 } else { -60 }),
                    bias: vec![0.0],
                },
            ],
        }
    }

    fn features(window: usize, value: f32) -> Array2<f32> {
        Array2::from_elem((window, CHANNELS), value)
    }

    #[test]
    fn test_forward_is_deterministic_and_bounded() {
        let model = QuantizedLstm::from_artifact(tiny_artifact(10), 10).unwrap();
        let x = features(10, 0.3);
        let a = model.forward(x.view());
        let b = model.forward(x.view());
        assert_eq!(a.to_bits(), b.to_bits());
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn test_different_inputs_give_different_outputs() {
        let model = QuantizedLstm::from_artifact(tiny_artifact(10), 10).unwrap();
        let calm = model.forward(features(10, 0.0).view());
        let wild = model.forward(features(10, 1.0).view());
        assert_ne!(calm, wild);
    }

    #[test]
    fn test_window_mismatch_rejected() {
        let err = QuantizedLstm::from_artifact(tiny_artifact(10), 50).err().unwrap();
        assert!(matches!(err, ModelLoadError::Invalid(_)));
    }

    #[test]
    fn test_truncated_weights_rejected() {
        let mut artifact = tiny_artifact(10);
        if let LayerSpec::Lstm { kernel, .. } = &mut artifact.layers[0] {
            kernel.data.pop();
        }
        assert!(matches!(
            QuantizedLstm::from_artifact(artifact, 10),
            Err(ModelLoadError::Invalid(_))
        ));
    }

    #[test]
    fn test_head_must_be_sigmoid() {
        let mut artifact = tiny_artifact(10);
        if let Some(LayerSpec::Dense { activation, .. }) = artifact.layers.last_mut() {
            *activation = Activation::Linear;
        }
        assert!(QuantizedLstm::from_artifact(artifact, 10).is_err());
    }

    #[test]
    fn test_missing_artifact() {
        let err = QuantizedLstm::load(Path::new("/nonexistent/model.json"), 50).err().unwrap();
        assert!(matches!(err, ModelLoadError::Missing(_)));
    }

    #[test]
    fn test_garbage_artifact() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not a model").unwrap();
        assert!(matches!(
            QuantizedLstm::load(file.path(), 50),
            Err(ModelLoadError::Format(_))
        ));
    }

    #[test]
    fn test_load_gzipped_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json.gz");
        let file = File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, &tiny_artifact(8)).unwrap();
        encoder.finish().unwrap();

        let model = QuantizedLstm::load(&path, 8).unwrap();
        assert_eq!(model.window_size(), 8);
        assert!(model.mac_count() > 0);
    }
}
