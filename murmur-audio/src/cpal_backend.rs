//! Microphone capture using cpal

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};
use parking_lot::Mutex;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::framer::{f32_to_i16, BlockFramer};
use crate::traits::BlockSource;
use crate::types::AudioBlock;

fn build_and_run_stream<T, F>(
    device: &Device,
    config: &StreamConfig,
    framer: Arc<Mutex<BlockFramer>>,
    sender: mpsc::UnboundedSender<AudioBlock>,
    convert_fn: F,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    F: Fn(T) -> i16 + Send + 'static,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<i16> = data.iter().map(|&s| convert_fn(s)).collect();
            let blocks = framer.lock().push(&samples);
            for block in blocks {
                if sender.send(block).is_err() {
                    warn!("Audio capture: block channel closed, receiver dropped");
                    return;
                }
            }
        },
        |err| error!("Audio stream error: {}", err),
        None,
    )?;

    stream.play()?;
    info!("Audio stream started and playing");
    Ok(stream)
}

/// Default input device and the stream config chosen for it
struct InputDevice {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl InputDevice {
    fn open(preferred_rate: u32, device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) if !name.is_empty() => host
                .input_devices()
                .ok()
                .and_then(|mut devices| devices.find(|d| d.name().unwrap_or_default() == name))
                .or_else(|| host.default_input_device()),
            _ => host.default_input_device(),
        }
        .ok_or_else(|| SyncError::Device("no input device available".to_string()))?;

        let supported_configs: Vec<_> = device.supported_input_configs()?.collect();
        let supported_config = supported_configs
            .iter()
            .filter(|c| c.channels() <= 2)
            .find(|c| c.sample_format() == SampleFormat::I16)
            .or_else(|| supported_configs.iter().find(|c| c.channels() <= 2))
            .ok_or_else(|| SyncError::Device("no supported audio input config found".to_string()))?;

        let desired_sample_rate = SampleRate(preferred_rate);
        let sample_rate = if supported_config.min_sample_rate() <= desired_sample_rate
            && desired_sample_rate <= supported_config.max_sample_rate()
        {
            desired_sample_rate
        } else {
            supported_config.min_sample_rate()
        };

        let config = StreamConfig {
            channels: 1,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            config,
            sample_format: supported_config.sample_format(),
        })
    }
}

/// Handle to control the capture thread.
/// When dropped, signals the thread to stop and release the device.
pub struct StreamHandle {
    stop_tx: std_mpsc::Sender<()>,
    #[allow(dead_code)]
    thread: Option<JoinHandle<()>>,
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Fixed-size block capture from the default microphone
pub struct CpalBlockSource {
    device_name: String,
    sample_rate_hz: u32,
    block_size: usize,
    stream_handle: Option<StreamHandle>,
}

impl CpalBlockSource {
    pub fn new(block_size: usize, preferred_rate: u32) -> Result<Self> {
        let input = InputDevice::open(preferred_rate, None)?;
        let device_name = input.device.name().unwrap_or_default();
        let sample_rate_hz = input.config.sample_rate.0;
        if sample_rate_hz != preferred_rate {
            warn!(
                "Input device does not support {} Hz, capturing at {} Hz",
                preferred_rate, sample_rate_hz
            );
        }

        Ok(Self {
            device_name,
            sample_rate_hz,
            block_size,
            stream_handle: None,
        })
    }
}

impl BlockSource for CpalBlockSource {
    /// Start capturing and return a receiver of framed blocks.
    ///
    /// cpal::Stream is !Send, so a dedicated thread owns it until the
    /// StreamHandle is dropped.
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<AudioBlock>> {
        let (block_tx, block_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        let device_name = self.device_name.clone();
        let sample_rate_hz = self.sample_rate_hz;
        let block_size = self.block_size;

        let thread = std::thread::spawn(move || {
            info!("Audio capture thread started");
            let input = match InputDevice::open(sample_rate_hz, Some(&device_name)) {
                Ok(input) => input,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };

            let framer = Arc::new(Mutex::new(BlockFramer::new(
                block_size,
                input.config.sample_rate.0,
            )));

            macro_rules! handle_format {
                ($sample_type:ty, $converter:expr) => {
                    build_and_run_stream::<$sample_type, _>(
                        &input.device,
                        &input.config,
                        framer.clone(),
                        block_tx.clone(),
                        $converter,
                    )
                };
            }

            let stream_result = match input.sample_format {
                SampleFormat::I8 => handle_format!(i8, |s| i16::from(s) << 8),
                SampleFormat::I16 => handle_format!(i16, |s| s),
                SampleFormat::I32 => handle_format!(i32, |s| (s >> 16) as i16),
                SampleFormat::U8 => handle_format!(u8, |s| (i16::from(s) - 128) << 8),
                SampleFormat::U16 => handle_format!(u16, |s| (i32::from(s) - 32768) as i16),
                SampleFormat::F32 => handle_format!(f32, f32_to_i16),
                SampleFormat::F64 => handle_format!(f64, |s| f32_to_i16(s as f32)),
                other => Err(anyhow!("Unsupported sample format: {:?}", other)),
            };

            let _stream = match stream_result {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };

            match stop_rx.recv() {
                Ok(_) => info!("Audio capture thread received stop signal"),
                Err(e) => warn!("Audio capture thread stop channel closed: {}", e),
            }
            info!("Audio capture thread exiting");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(anyhow!("{}", e)),
            Err(_) => return Err(anyhow!("Audio thread failed to start")),
        }

        self.stream_handle = Some(StreamHandle {
            stop_tx,
            thread: Some(thread),
        });

        Ok(block_rx)
    }
}
