// Source lifecycle events
//
// Every event carries the generation of the start request that issued it.
// The session controller drops events whose generation no longer matches the
// current session, which is what makes slow-resolving stale starts harmless.

use crate::error::PlayerError;
use std::sync::Arc;
use std::time::Duration;

/// Events emitted by a source adapter during its lifetime
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// Track duration is known (streamed: metadata probed)
    MetadataReady { duration: Duration },

    /// Playback has actually begun; loading indicators can be cleared
    CanPlay,

    /// Periodic position report (throttled by the source)
    TimeUpdate {
        position: Duration,
        duration: Duration,
    },

    /// The source reached its natural end
    Ended,

    /// The source failed to load or play
    Failed { error: PlayerError },
}

/// Sink for source events, bound to one start request.
///
/// The closure captures the session controller and the generation of the
/// start; sources call it from their worker threads.
pub type EventSink = Arc<dyn Fn(SourceEvent) + Send + Sync>;
