//! Sample source abstraction.
//!
//! A `SampleSource` hands the pipeline a channel of timestamp-ordered
//! [`SampleBlock`]s. The microphone implementation lives in
//! [`crate::audio::CpalSource`]; [`ChannelSource`] feeds blocks produced
//! elsewhere (tests, file playback, other capture stacks).

use crossbeam_channel::{Receiver, Sender};
use tracing::info;

use crate::{
    buffering::SampleBlock,
    error::{Result, SoundtrapError},
};

/// Producer of timestamp-ordered sample blocks.
pub trait SampleSource: Send + 'static {
    /// Begin delivering blocks.
    ///
    /// # Errors
    /// `SoundtrapError::SourceUnavailable` when the device cannot be opened
    /// (permissions, missing hardware, already started). Not retried.
    fn start(&mut self) -> Result<Receiver<SampleBlock>>;

    /// Stop delivering blocks and release the underlying device.
    fn stop(&mut self);
}

/// Source backed by an in-process channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Option<Receiver<SampleBlock>>,
    unavailable: Option<String>,
}

impl ChannelSource {
    /// Unbounded source plus the sender that feeds it.
    pub fn new() -> (Self, Sender<SampleBlock>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            Self {
                rx: Some(rx),
                unavailable: None,
            },
            tx,
        )
    }

    /// Source that yields `blocks` then disconnects.
    pub fn from_blocks(blocks: impl IntoIterator<Item = SampleBlock>) -> Self {
        let (source, tx) = Self::new();
        for block in blocks {
            // Receiver is held by `source`, so this cannot fail.
            let _ = tx.send(block);
        }
        source
    }

    /// Source whose `start` always fails with `SourceUnavailable(reason)`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            rx: None,
            unavailable: Some(reason.into()),
        }
    }
}

impl SampleSource for ChannelSource {
    fn start(&mut self) -> Result<Receiver<SampleBlock>> {
        if let Some(reason) = &self.unavailable {
            return Err(SoundtrapError::SourceUnavailable(reason.clone()));
        }
        let rx = self
            .rx
            .take()
            .ok_or_else(|| SoundtrapError::SourceUnavailable("channel source already started".into()))?;
        info!("channel source started");
        Ok(rx)
    }

    fn stop(&mut self) {
        info!("channel source stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn from_blocks_delivers_then_disconnects() {
        let t0 = Instant::now();
        let mut source = ChannelSource::from_blocks(vec![
            SampleBlock::new(vec![0.1], 1, t0),
            SampleBlock::new(vec![0.2], 1, t0 + std::time::Duration::from_secs(1)),
        ]);
        let rx = source.start().unwrap();
        assert_eq!(rx.iter().count(), 2);
    }

    #[test]
    fn second_start_is_unavailable() {
        let (mut source, _tx) = ChannelSource::new();
        assert!(source.start().is_ok());
        assert!(matches!(
            source.start(),
            Err(SoundtrapError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn unavailable_source_reports_reason() {
        let mut source = ChannelSource::unavailable("permission denied");
        match source.start() {
            Err(SoundtrapError::SourceUnavailable(reason)) => {
                assert_eq!(reason, "permission denied")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
