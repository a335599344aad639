//! `murmur listen`: live turn detection from the microphone

use anyhow::Result;
use config::Settings;
use murmur_audio::{
    BlockSource, ChannelConversationSink, ConversationMessage, MicrophoneSource, SegmenterConfig,
    TurnSegmenter, TurnSignal,
};
use tokio::time::Instant;
use tracing::{info, warn};

pub async fn run(settings: &Settings) -> Result<()> {
    let mut source = MicrophoneSource::new(settings.vad.block_size, settings.vad.sample_rate_hz)?;
    let mut blocks = source.start()?;

    let (mut sink, mut forwarded) = ChannelConversationSink::channel();
    let mut segmenter = TurnSegmenter::new(SegmenterConfig::from(&settings.vad));

    // Stand-in for the conversational service: tally what a turn would upload
    let uploader = tokio::spawn(async move {
        let mut samples = 0usize;
        while let Some(message) = forwarded.recv().await {
            match message {
                ConversationMessage::ActivityStart => samples = 0,
                ConversationMessage::Audio(block) => samples += block.len(),
                ConversationMessage::ActivityEnd => {
                    info!(samples, "Turn audio forwarded");
                }
            }
        }
    });

    println!("Listening. Press Ctrl+C to stop.");
    let started = Instant::now();
    let mut turn_opened = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            block = blocks.recv() => {
                let Some(block) = block else {
                    warn!("Audio source closed");
                    break;
                };
                match segmenter.process_block(block, &mut sink) {
                    Ok(Some(TurnSignal::TurnStart)) => {
                        let now = Instant::now();
                        turn_opened = Some(now);
                        println!("[{:>8.2}s] turn start", (now - started).as_secs_f64());
                    }
                    Ok(Some(TurnSignal::TurnEnd)) => {
                        let now = Instant::now();
                        let length = turn_opened
                            .take()
                            .map(|t| (now - t).as_secs_f64())
                            .unwrap_or_default();
                        println!(
                            "[{:>8.2}s] turn end ({:.2}s)",
                            (now - started).as_secs_f64(),
                            length
                        );
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Dropping audio block: {}", e),
                }
            }
        }
    }

    if segmenter.transport_failures() > 0 {
        warn!(failures = segmenter.transport_failures(), "Some audio was not forwarded");
    }
    drop(sink);
    uploader.await?;
    println!("Stopped.");
    Ok(())
}
