//! Energy based voiced/unvoiced classification

use crate::error::{Result, SyncError};
use crate::types::{AudioBlock, VoicingDecision};

/// Compares block RMS against a fixed threshold.
///
/// Samples are normalized by `i16::MAX` before the RMS is taken, so the
/// threshold is expressed on a [0, 1] scale independent of sample format.
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    energy_threshold: f32,
}

impl EnergyClassifier {
    pub fn new(energy_threshold: f32) -> Self {
        Self { energy_threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.energy_threshold
    }

    pub fn classify(&self, block: &AudioBlock) -> Result<VoicingDecision> {
        if block.is_empty() {
            return Err(SyncError::InvalidInput("empty audio block".to_string()));
        }
        if block.sample_rate_hz == 0 {
            return Err(SyncError::InvalidInput("zero sample rate".to_string()));
        }

        let energy = rms(&block.samples);
        Ok(VoicingDecision {
            voiced: energy > self.energy_threshold,
            duration_ms: block.duration_ms(),
        })
    }
}

/// Root mean square of samples normalized to [-1, 1]. Callers guarantee a non-empty slice.
pub fn rms(samples: &[i16]) -> f32 {
    let scale = i16::MAX as f64;
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / scale;
            x * x
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}
