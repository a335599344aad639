use anyhow::Result;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::traits::BlockSource;
use crate::types::AudioBlock;

pub struct DummyBlockSource;

impl DummyBlockSource {
    pub fn new(_block_size: usize, _sample_rate_hz: u32) -> Result<Self> {
        Err(SyncError::Device(
            "audio capture is not available in this build (missing 'backend-cpal' feature)".to_string(),
        )
        .into())
    }
}

impl BlockSource for DummyBlockSource {
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<AudioBlock>> {
        Err(SyncError::Device("audio capture is not available".to_string()).into())
    }
}
