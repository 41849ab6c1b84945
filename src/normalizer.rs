use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::fusion_window::Window;
use crate::types::CHANNELS;

/// Normalised features never leave this band, whatever the raw input.
pub const FEATURE_LIMIT: f32 = 1.0;

/// Per-channel affine constants fixed at training time.
///
/// Raw values are first clamped to `[-full_scale, full_scale]` (the sensor's
/// physical range), then mapped with `(raw - offset) * scale`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelScaling {
    pub scale: f64,
    pub offset: f64,
    pub full_scale: f64,
}

impl ChannelScaling {
    /// Symmetric range mapped onto [-1, 1].
    pub fn symmetric(full_scale: f64) -> Self {
        Self { scale: 1.0 / full_scale, offset: 0.0, full_scale }
    }

    fn apply(&self, raw: f64) -> f32 {
        let clamped = if raw.is_nan() { 0.0 } else { raw.clamp(-self.full_scale, self.full_scale) };
        let value = ((clamped - self.offset) * self.scale) as f32;
        value.clamp(-FEATURE_LIMIT, FEATURE_LIMIT)
    }
}

/// A `[window_size x 6]` feature matrix in model channel order.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureTensor(pub Array2<f32>);

impl FeatureTensor {
    pub fn zeros(window_size: usize) -> Self {
        FeatureTensor(Array2::zeros((window_size, CHANNELS)))
    }

    pub fn rows(&self) -> usize {
        self.0.nrows()
    }

    pub fn view(&self) -> ndarray::ArrayView2<'_, f32> {
        self.0.view()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub channels: [ChannelScaling; CHANNELS],
}

impl Normalizer {
    /// Accelerometer channels scaled by `accel_range_g`, gyro by `gyro_range_dps`.
    pub fn from_ranges(accel_range_g: f64, gyro_range_dps: f64) -> Self {
        let a = ChannelScaling::symmetric(accel_range_g);
        let g = ChannelScaling::symmetric(gyro_range_dps);
        Self { channels: [a, a, a, g, g, g] }
    }

    pub fn is_well_formed(&self) -> bool {
        self.channels.iter().all(|c| {
            c.scale.is_finite() && c.scale != 0.0 && c.offset.is_finite()
                && c.full_scale.is_finite() && c.full_scale > 0.0
        })
    }

    pub fn normalize(&self, window: &Window) -> FeatureTensor {
        let mut tensor = FeatureTensor::zeros(window.len());
        self.normalize_into(window, &mut tensor);
        tensor
    }

    /// Writes into an existing tensor, resizing it only when the window
    /// length changed.
    pub fn normalize_into(&self, window: &Window, out: &mut FeatureTensor) {
        if out.rows() != window.len() {
            *out = FeatureTensor::zeros(window.len());
        }
        for (mut row, sample) in out.0.rows_mut().into_iter().zip(window.samples()) {
            for ((cell, raw), scaling) in row.iter_mut().zip(sample.channels()).zip(&self.channels) {
                *cell = scaling.apply(raw);
            }
        }
    }
}
