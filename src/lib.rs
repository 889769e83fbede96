// Playback session manager for the studio website's media players

pub mod analyzer;
pub mod decoder;
pub mod error;
pub mod events;
pub mod fetch;
pub mod session;
pub mod source;
pub mod state;
pub mod ui;
pub mod visualizer;

// Re-export commonly used types
pub use error::{PlayerError, Result};
pub use events::{EventSink, SourceEvent};
pub use session::{PlayerId, SessionController};
pub use source::{CpalSourceFactory, SourceAdapter, SourceFactory};
pub use state::{SessionState, SessionStateContainer};
pub use ui::{PlayerPanel, UiRegistry};
pub use visualizer::VisualizerHandle;

use std::sync::Arc;

/// Initialize logging for binaries and examples. Honors `RUST_LOG`, defaults
/// to `info`.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Composition root: build the one session controller for a page with
/// `panel_count` audio items, backed by real cpal sources.
pub fn create_session(panel_count: usize) -> SessionController {
    let ui = UiRegistry::with_panel_count(panel_count);
    SessionController::new(ui, Arc::new(CpalSourceFactory))
}
