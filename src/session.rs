// Session controller
//
// The single playback authority for the page. It enforces at-most-one
// active source, mediates toggle/stop/seek requests, and reconciles the UI
// registry on every state change. Asynchronous source callbacks are issued
// with the generation of the start request that created them; a bumped
// generation is how a stop or a newer start invalidates everything still in
// flight (the lost-update guard at the heart of the component).

use crate::error::PlayerError;
use crate::events::{EventSink, SourceEvent};
use crate::source::{SourceAdapter, SourceFactory};
use crate::state::{SessionState, SessionStateContainer};
use crate::ui::UiRegistry;
use crate::visualizer::VisualizerHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Index of an audio item on the page
pub type PlayerId = usize;

struct ActiveSession {
    player: PlayerId,
    generation: u64,
    source: Box<dyn SourceAdapter>,
    visualizer: Option<VisualizerHandle>,
    duration: Duration,
    is_fallback: bool,
}

struct SessionInner {
    state: SessionStateContainer,
    ui: UiRegistry,
    factory: Arc<dyn SourceFactory>,
    active: Mutex<Option<ActiveSession>>,
    generation: AtomicU64,
}

/// Playback session manager.
///
/// Constructed once by the composition root and handed to every UI
/// collaborator by reference; its lifecycle is what guarantees a single
/// session per page. Cloning is cheap and shares the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

impl SessionController {
    pub fn new(ui: UiRegistry, factory: Arc<dyn SourceFactory>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                state: SessionStateContainer::new(),
                ui,
                factory,
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn ui(&self) -> &UiRegistry {
        &self.inner.ui
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// Play/pause trigger for one audio item.
    ///
    /// If the item is already the active playing session this is a toggle
    /// off. Otherwise whatever is active is stopped first, then a streamed
    /// session starts for this item; two sources are never audible at once,
    /// even transiently.
    pub fn toggle(&self, player: PlayerId, locator: &str) {
        let same_player = {
            let active = self.inner.active.lock();
            active.as_ref().map_or(false, |s| s.player == player)
                && self.inner.state.get() == SessionState::Playing
        };

        self.stop();

        if same_player {
            log::info!("Player {} toggled off", player);
            return;
        }

        self.start_streamed(player, locator);
    }

    /// Stop playback and perform the full defensive reset.
    ///
    /// Idempotent: with no active session it still reconciles every panel,
    /// because a previous session may have left stale UI anywhere on the
    /// page. Teardown order matters: the visualization loop is cancelled
    /// before the analyzer it reads from is released.
    pub fn stop(&self) {
        log::debug!("Stop requested");

        // Invalidate every in-flight callback before touching anything
        self.inner.generation.fetch_add(1, Ordering::Relaxed);

        let previous = self.inner.active.lock().take();
        if let Some(mut session) = previous {
            if let Some(visualizer) = session.visualizer.take() {
                visualizer.cancel();
            }
            session.source.stop();
            log::debug!("Released source for player {}", session.player);
        }

        self.set_state(SessionState::Idle);
        self.inner.ui.reset_all();
    }

    /// Route every state change through the transition table
    fn set_state(&self, to: SessionState) {
        if let Err(e) = self.inner.state.transition(to) {
            log::warn!("Rejected session state change: {}", e);
        }
    }

    /// Progress-bar click: seek the active session to the clicked fraction.
    /// Ignored unless `player` is the active session and its source can
    /// seek (the synthesized fallback cannot).
    pub fn seek_to_fraction(&self, player: PlayerId, click_x: f32, track_width: f32) {
        if track_width <= 0.0 {
            return;
        }
        let fraction = (click_x / track_width).clamp(0.0, 1.0);

        let mut active = self.inner.active.lock();
        match active.as_mut() {
            Some(session) if session.player == player && session.source.supports_seek() => {
                let target = session.duration.mul_f64(fraction as f64);
                match session.source.seek(target) {
                    Ok(()) => {
                        let duration = session.duration;
                        self.inner.ui.update_progress(player, target, duration);
                    }
                    Err(e) => log::warn!("Seek failed: {}", e),
                }
            }
            _ => log::debug!("Ignoring seek for inactive player {}", player),
        }
    }

    /// The page became hidden; audible playback must not continue
    pub fn on_visibility_hidden(&self) {
        if self.inner.state.get() == SessionState::Playing {
            log::info!("Page hidden, stopping audio");
            self.stop();
        }
    }

    /// The page is unloading
    pub fn on_page_unload(&self) {
        self.stop();
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn event_sink(&self, player: PlayerId, generation: u64) -> EventSink {
        let controller = self.clone();
        Arc::new(move |event| controller.handle_source_event(player, generation, event))
    }

    fn start_streamed(&self, player: PlayerId, locator: &str) {
        let generation = self.next_generation();
        log::info!("Starting streamed session for player {} ({})", player, locator);

        let sink = self.event_sink(player, generation);
        match self.inner.factory.create_streamed(locator, sink) {
            Ok(source) => self.install_and_start(player, generation, source, false),
            Err(e) => {
                log::warn!("Audio failed to load, falling back to demo audio: {}", e);
                self.start_fallback(player, generation);
            }
        }
    }

    /// Replace a failed streamed start with the synthesized chord, keeping
    /// the same player slot. This is the only recovery path; if the
    /// fallback itself cannot start, the session returns to idle.
    ///
    /// `failed_generation` is the generation of the attempt being replaced.
    /// Failure handling runs on the failed source's worker thread, so a
    /// user request may already have superseded it; a stale fallback must
    /// not tear anything down.
    fn start_fallback(&self, player: PlayerId, failed_generation: u64) {
        if self.inner.generation.load(Ordering::Relaxed) != failed_generation {
            log::debug!("Discarding superseded fallback for player {}", player);
            return;
        }
        self.stop();

        let generation = self.next_generation();
        log::info!("Starting synthesized fallback for player {}", player);

        let sink = self.event_sink(player, generation);
        match self.inner.factory.create_fallback(sink) {
            Ok(source) => self.install_and_start(player, generation, source, true),
            Err(e) => {
                log::warn!("Fallback source unavailable: {}", e);
                if self.inner.generation.load(Ordering::Relaxed) == generation {
                    self.stop();
                }
            }
        }
    }

    /// Install the new session and start its source under one critical
    /// section, gated on the request's generation still being current.
    /// Source construction happens outside any lock (it may block on the
    /// fallback path), so by the time this runs a newer request may own the
    /// session; installing anyway would drop the newer source and resurrect
    /// superseded UI.
    fn install_and_start(
        &self,
        player: PlayerId,
        generation: u64,
        source: Box<dyn SourceAdapter>,
        is_fallback: bool,
    ) {
        let start_result = {
            let mut active = self.inner.active.lock();
            if self.inner.generation.load(Ordering::Relaxed) != generation {
                log::debug!("Discarding superseded start for player {}", player);
                return;
            }

            self.set_state(SessionState::Starting);
            self.inner.ui.set_loading(player, true);
            *active = Some(ActiveSession {
                player,
                generation,
                source,
                visualizer: None,
                duration: Duration::ZERO,
                is_fallback,
            });
            match active.as_mut() {
                Some(session) => session.source.start(),
                None => return,
            }
        };

        if let Err(e) = start_result {
            if self.inner.generation.load(Ordering::Relaxed) != generation {
                return;
            }
            if is_fallback {
                log::warn!("Fallback source failed to start: {}", e);
                self.stop();
            } else {
                log::warn!("Audio failed to load, falling back to demo audio: {}", e);
                self.start_fallback(player, generation);
            }
        }
    }

    /// Entry point for all source callbacks. Every mutation below is gated
    /// on the event's generation still being current.
    fn handle_source_event(&self, player: PlayerId, generation: u64, event: SourceEvent) {
        if self.inner.generation.load(Ordering::Relaxed) != generation {
            log::debug!("Dropping stale event for player {}: {:?}", player, event);
            return;
        }

        match event {
            SourceEvent::MetadataReady { duration } => {
                let mut active = self.inner.active.lock();
                if let Some(session) = current_session(&mut active, generation) {
                    session.duration = duration;
                    self.inner.ui.set_duration_text(player, duration);
                    self.inner.ui.set_loading(player, false);
                }
            }

            SourceEvent::CanPlay => {
                let mut active = self.inner.active.lock();
                if let Some(session) = current_session(&mut active, generation) {
                    self.set_state(SessionState::Playing);
                    self.inner.ui.begin_playback(player);
                    if session.visualizer.is_none() {
                        let surface = self.inner.ui.surface(player);
                        session.visualizer =
                            Some(VisualizerHandle::start(session.source.analyzer(), surface));
                    }
                }
            }

            SourceEvent::TimeUpdate { position, duration } => {
                let mut active = self.inner.active.lock();
                if let Some(session) = current_session(&mut active, generation) {
                    session.duration = duration;
                    self.inner.ui.update_progress(player, position, duration);
                }
            }

            SourceEvent::Ended => {
                log::info!("Player {} reached the end of its source", player);
                self.stop();
            }

            SourceEvent::Failed { error } => self.handle_failure(player, generation, error),
        }
    }

    fn handle_failure(&self, player: PlayerId, generation: u64, error: PlayerError) {
        let was_fallback = {
            let active = self.inner.active.lock();
            match active.as_ref() {
                Some(session) if session.generation == generation => session.is_fallback,
                // A newer session owns the slot; nothing to recover
                Some(_) => {
                    log::debug!("Dropping stale failure for player {}: {}", player, error);
                    return;
                }
                None => true,
            }
        };

        if was_fallback {
            log::warn!("Playback failed with no recovery path: {}", error);
            self.stop();
        } else {
            log::warn!("Audio failed to load, falling back to demo audio: {}", error);
            self.start_fallback(player, generation);
        }
    }

    #[cfg(test)]
    fn visualizer_running(&self) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .map_or(false, |s| s.visualizer.is_some())
    }
}

fn current_session<'a>(
    active: &'a mut Option<ActiveSession>,
    generation: u64,
) -> Option<&'a mut ActiveSession> {
    active.as_mut().filter(|s| s.generation == generation)
}
