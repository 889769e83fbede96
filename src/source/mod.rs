// Source adapters
//
// A source adapter is the audio-producing backend of one session: either a
// network-streamed track or the synthesized fallback chord. Both expose the
// same start/stop contract and feed the same analysis tap, so the session
// controller and the visualization loop never care which one is active.

pub mod streamed;
pub mod synth;

use crate::analyzer::SpectrumAnalyzer;
use crate::error::{PlayerError, Result};
use crate::events::EventSink;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub use streamed::StreamedSource;
pub use synth::SynthSource;

/// Uniform control surface over the two source variants
pub trait SourceAdapter: Send {
    /// Begin asynchronous setup and playback. Completion and failure are
    /// reported through the adapter's event sink, never by this call alone.
    fn start(&mut self) -> Result<()>;

    /// Release everything the adapter holds: output stream, oscillators,
    /// decoder, buffered samples. Idempotent; errors are swallowed because
    /// stopping an already-stopped source is not an error condition.
    fn stop(&mut self);

    /// Set the playback position. Only the streamed variant supports this.
    fn seek(&mut self, _position: Duration) -> Result<()> {
        Err(PlayerError::InvalidState(
            "Source does not support seeking".to_string(),
        ))
    }

    fn supports_seek(&self) -> bool {
        false
    }

    /// The analysis tap this adapter routes its output through
    fn analyzer(&self) -> Arc<SpectrumAnalyzer>;
}

/// Creates source adapters for the session controller.
///
/// The seam exists so session behavior can be exercised with mock adapters;
/// the real implementation builds cpal-backed sources.
pub trait SourceFactory: Send + Sync {
    fn create_streamed(&self, locator: &str, events: EventSink) -> Result<Box<dyn SourceAdapter>>;

    fn create_fallback(&self, events: EventSink) -> Result<Box<dyn SourceAdapter>>;
}

/// Factory for real cpal-backed sources
pub struct CpalSourceFactory;

impl SourceFactory for CpalSourceFactory {
    fn create_streamed(&self, locator: &str, events: EventSink) -> Result<Box<dyn SourceAdapter>> {
        Ok(Box::new(StreamedSource::new(locator, events)?))
    }

    fn create_fallback(&self, events: EventSink) -> Result<Box<dyn SourceAdapter>> {
        Ok(Box::new(SynthSource::new(events)?))
    }
}

/// Join an adapter's worker thread, unless the caller *is* the worker (a
/// source can be stopped from its own event, e.g. natural end). In that case
/// the thread is detached and exits on its own stop-flag check.
pub(crate) fn join_worker(worker: &mut Option<thread::JoinHandle<()>>) {
    if let Some(handle) = worker.take() {
        if handle.thread().id() == thread::current().id() {
            return;
        }
        let _ = handle.join();
    }
}
