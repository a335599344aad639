use crate::types::AudioBlock;

/// Convert a float sample in [-1, 1] to i16, clamping out-of-range input
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Re-chunks an arbitrary stream of samples into fixed-size blocks.
///
/// Devices hand over whatever buffer size they like; the segmenter wants
/// every block to cover the same duration.
#[derive(Debug, Clone)]
pub struct BlockFramer {
    block_size: usize,
    sample_rate_hz: u32,
    buffer: Vec<i16>,
}

impl BlockFramer {
    /// A `block_size` of zero is treated as one sample
    pub fn new(block_size: usize, sample_rate_hz: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate_hz,
            buffer: Vec::with_capacity(block_size),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Samples waiting for a full block
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioBlock> {
        let mut blocks = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let take = (self.block_size - self.buffer.len()).min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.buffer.len() == self.block_size {
                let samples = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.block_size));
                blocks.push(AudioBlock::new(samples, self.sample_rate_hz));
            }
        }
        blocks
    }

    pub fn push_f32(&mut self, samples: &[f32]) -> Vec<AudioBlock> {
        let converted: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
        self.push(&converted)
    }

    /// Emit whatever is buffered as a short final block
    pub fn flush(&mut self) -> Option<AudioBlock> {
        if self.buffer.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.buffer);
        Some(AudioBlock::new(samples, self.sample_rate_hz))
    }
}
