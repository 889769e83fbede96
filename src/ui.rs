// UI view-model driven by the session controller
//
// The crate owns no real widgets; it reconciles a registry of player panels
// that a frontend renders. All mutation happens through the session
// controller, which is what lets a stop reset every panel defensively.

use crate::visualizer::Surface;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Default visualizer surface dimensions
pub const SURFACE_WIDTH: usize = 300;
pub const SURFACE_HEIGHT: usize = 100;

/// Time text shown when nothing is playing
pub const IDLE_TIME_TEXT: &str = "0:00 / 0:00";

/// Extra slack around the visible area before a scroll is considered
const VISIBILITY_BUFFER: f32 = 50.0;

/// Padding left between the element and the container edge after a scroll
const SCROLL_PADDING: f32 = 20.0;

/// Scroll deltas at or below this are ignored
const SCROLL_DEAD_ZONE: f32 = 5.0;

/// Play/pause trigger icon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayButtonIcon {
    Play,
    Pause,
}

/// Where a panel's visualizer sits inside the scrollable content, in pixels
#[derive(Debug, Clone, Copy)]
pub struct PanelLayout {
    pub visualizer_top: f32,
    pub visualizer_height: f32,
}

/// Scroll state of the container holding the player panels
#[derive(Debug, Clone, Copy)]
pub struct ScrollViewport {
    pub scroll_top: f32,
    pub viewport_height: f32,
    pub content_height: f32,
}

/// One audio item's visual state
pub struct PlayerPanel {
    pub icon: PlayButtonIcon,
    pub progress: f32,
    pub time_text: String,
    pub visualizer_visible: bool,
    pub loading: bool,
    pub playing: bool,
    layout: PanelLayout,
    surface: Arc<Mutex<Surface>>,
}

impl PlayerPanel {
    fn new(layout: PanelLayout) -> Self {
        Self {
            icon: PlayButtonIcon::Play,
            progress: 0.0,
            time_text: IDLE_TIME_TEXT.to_string(),
            visualizer_visible: false,
            loading: false,
            playing: false,
            layout,
            surface: Arc::new(Mutex::new(Surface::new(SURFACE_WIDTH, SURFACE_HEIGHT))),
        }
    }

    fn reset(&mut self) {
        self.icon = PlayButtonIcon::Play;
        self.progress = 0.0;
        self.time_text = IDLE_TIME_TEXT.to_string();
        self.visualizer_visible = false;
        self.loading = false;
        self.playing = false;
    }
}

/// Read-only copy of a panel's state for frontends and tests
#[derive(Debug, Clone, PartialEq)]
pub struct PanelSnapshot {
    pub icon: PlayButtonIcon,
    pub progress: f32,
    pub time_text: String,
    pub visualizer_visible: bool,
    pub loading: bool,
    pub playing: bool,
}

/// Registry of every player panel on the page
pub struct UiRegistry {
    panels: Vec<Mutex<PlayerPanel>>,
    viewport: Mutex<ScrollViewport>,
}

impl UiRegistry {
    pub fn new(layouts: Vec<PanelLayout>, viewport: ScrollViewport) -> Self {
        Self {
            panels: layouts.into_iter().map(|l| Mutex::new(PlayerPanel::new(l))).collect(),
            viewport: Mutex::new(viewport),
        }
    }

    /// Registry with evenly stacked panels, for tests and simple pages
    pub fn with_panel_count(count: usize) -> Self {
        let panel_height = 160.0;
        let layouts = (0..count)
            .map(|i| PanelLayout {
                visualizer_top: i as f32 * panel_height + 40.0,
                visualizer_height: SURFACE_HEIGHT as f32,
            })
            .collect();
        let viewport = ScrollViewport {
            scroll_top: 0.0,
            viewport_height: 400.0,
            content_height: count as f32 * panel_height,
        };
        Self::new(layouts, viewport)
    }

    pub fn panel_count(&self) -> usize {
        self.panels.len()
    }

    pub fn snapshot(&self, id: usize) -> PanelSnapshot {
        let panel = self.panels[id].lock();
        PanelSnapshot {
            icon: panel.icon,
            progress: panel.progress,
            time_text: panel.time_text.clone(),
            visualizer_visible: panel.visualizer_visible,
            loading: panel.loading,
            playing: panel.playing,
        }
    }

    pub fn surface(&self, id: usize) -> Arc<Mutex<Surface>> {
        self.panels[id].lock().surface.clone()
    }

    pub fn viewport(&self) -> ScrollViewport {
        *self.viewport.lock()
    }

    pub fn set_viewport(&self, viewport: ScrollViewport) {
        *self.viewport.lock() = viewport;
    }

    /// Reset every panel to its idle visual state and clear all loading
    /// indicators. Run on every stop, not just for the active panel.
    pub fn reset_all(&self) {
        for panel in &self.panels {
            panel.lock().reset();
        }
    }

    pub fn set_loading(&self, id: usize, loading: bool) {
        self.panels[id].lock().loading = loading;
    }

    /// Flip a panel into its playing presentation: pause icon, visualizer
    /// shown, loading cleared, and the visualizer scrolled into view.
    pub fn begin_playback(&self, id: usize) {
        {
            let mut panel = self.panels[id].lock();
            panel.icon = PlayButtonIcon::Pause;
            panel.playing = true;
            panel.loading = false;
            panel.visualizer_visible = true;
        }
        self.ensure_visualizer_visible(id);
    }

    pub fn update_progress(&self, id: usize, position: Duration, duration: Duration) {
        let mut panel = self.panels[id].lock();
        panel.progress = if duration.as_secs_f32() > 0.0 {
            (position.as_secs_f32() / duration.as_secs_f32()).clamp(0.0, 1.0)
        } else {
            0.0
        };
        panel.time_text = format!("{} / {}", format_time(position), format_time(duration));
    }

    pub fn set_duration_text(&self, id: usize, duration: Duration) {
        let mut panel = self.panels[id].lock();
        panel.time_text = format!("{} / {}", format_time(Duration::ZERO), format_time(duration));
    }

    /// Scroll the container the minimal distance needed to bring a panel's
    /// visualizer into view. Already-visible (within the buffer) means no
    /// scroll at all; never a jump to the top.
    pub fn ensure_visualizer_visible(&self, id: usize) {
        let layout = self.panels[id].lock().layout;
        let mut viewport = self.viewport.lock();

        if let Some(new_top) = minimal_scroll_target(&viewport, layout) {
            log::debug!(
                "Scrolling visualizer {} into view: {} -> {}",
                id,
                viewport.scroll_top,
                new_top
            );
            viewport.scroll_top = new_top;
        }
    }
}

/// Compute the scroll target that brings `layout` into view, or `None` when
/// the element is already adequately visible or the delta is inside the dead
/// zone.
fn minimal_scroll_target(viewport: &ScrollViewport, layout: PanelLayout) -> Option<f32> {
    let top_in_view = layout.visualizer_top - viewport.scroll_top;
    let bottom_in_view = top_in_view + layout.visualizer_height;

    let visible_top = top_in_view >= -VISIBILITY_BUFFER;
    let visible_bottom = bottom_in_view <= viewport.viewport_height + VISIBILITY_BUFFER;
    if visible_top && visible_bottom {
        return None;
    }

    let mut new_top = viewport.scroll_top;
    if top_in_view < 0.0 {
        // Element starts above the container: scroll up just enough
        new_top = layout.visualizer_top - SCROLL_PADDING;
    } else if bottom_in_view > viewport.viewport_height {
        // Element ends below the container: scroll down just enough
        new_top = viewport.scroll_top + (bottom_in_view - viewport.viewport_height) + SCROLL_PADDING;
    }

    let max_scroll = (viewport.content_height - viewport.viewport_height).max(0.0);
    new_top = new_top.clamp(0.0, max_scroll);

    if (new_top - viewport.scroll_top).abs() > SCROLL_DEAD_ZONE {
        Some(new_top)
    } else {
        None
    }
}

/// Format a duration as `M:SS`
pub fn format_time(time: Duration) -> String {
    let total = time.as_secs();
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::ZERO), "0:00");
        assert_eq!(format_time(Duration::from_secs(5)), "0:05");
        assert_eq!(format_time(Duration::from_secs(65)), "1:05");
        assert_eq!(format_time(Duration::from_secs(600)), "10:00");
    }

    #[test]
    fn test_panels_start_idle() {
        let ui = UiRegistry::with_panel_count(3);
        for id in 0..3 {
            let snap = ui.snapshot(id);
            assert_eq!(snap.icon, PlayButtonIcon::Play);
            assert_eq!(snap.progress, 0.0);
            assert_eq!(snap.time_text, IDLE_TIME_TEXT);
            assert!(!snap.visualizer_visible);
            assert!(!snap.loading);
        }
    }

    #[test]
    fn test_reset_all_clears_every_panel() {
        let ui = UiRegistry::with_panel_count(3);
        ui.begin_playback(1);
        ui.set_loading(2, true);
        ui.update_progress(1, Duration::from_secs(10), Duration::from_secs(40));

        ui.reset_all();

        for id in 0..3 {
            let snap = ui.snapshot(id);
            assert_eq!(snap.icon, PlayButtonIcon::Play);
            assert_eq!(snap.progress, 0.0);
            assert_eq!(snap.time_text, IDLE_TIME_TEXT);
            assert!(!snap.visualizer_visible);
            assert!(!snap.loading);
            assert!(!snap.playing);
        }
    }

    #[test]
    fn test_update_progress_computes_fraction_and_text() {
        let ui = UiRegistry::with_panel_count(1);
        ui.update_progress(0, Duration::from_secs(30), Duration::from_secs(120));
        let snap = ui.snapshot(0);
        assert!((snap.progress - 0.25).abs() < 1e-6);
        assert_eq!(snap.time_text, "0:30 / 2:00");
    }

    #[test]
    fn test_update_progress_with_zero_duration() {
        let ui = UiRegistry::with_panel_count(1);
        ui.update_progress(0, Duration::from_secs(3), Duration::ZERO);
        assert_eq!(ui.snapshot(0).progress, 0.0);
    }

    fn viewport(scroll_top: f32) -> ScrollViewport {
        ScrollViewport {
            scroll_top,
            viewport_height: 400.0,
            content_height: 1600.0,
        }
    }

    #[test]
    fn test_no_scroll_when_already_visible() {
        let layout = PanelLayout {
            visualizer_top: 100.0,
            visualizer_height: 100.0,
        };
        assert_eq!(minimal_scroll_target(&viewport(0.0), layout), None);
    }

    #[test]
    fn test_buffer_tolerates_slightly_offscreen_elements() {
        // Bottom pokes 40px past the viewport, inside the 50px buffer
        let layout = PanelLayout {
            visualizer_top: 340.0,
            visualizer_height: 100.0,
        };
        assert_eq!(minimal_scroll_target(&viewport(0.0), layout), None);
    }

    #[test]
    fn test_scroll_down_is_minimal() {
        let layout = PanelLayout {
            visualizer_top: 700.0,
            visualizer_height: 100.0,
        };
        // Bottom is at 800; needs 400 to be visible plus 20 padding
        let target = minimal_scroll_target(&viewport(0.0), layout).unwrap();
        assert_eq!(target, 420.0);
    }

    #[test]
    fn test_scroll_up_is_minimal() {
        let layout = PanelLayout {
            visualizer_top: 100.0,
            visualizer_height: 100.0,
        };
        let target = minimal_scroll_target(&viewport(600.0), layout).unwrap();
        assert_eq!(target, 80.0);
    }

    #[test]
    fn test_scroll_is_clamped_to_content() {
        let layout = PanelLayout {
            visualizer_top: 1550.0,
            visualizer_height: 100.0,
        };
        let target = minimal_scroll_target(&viewport(0.0), layout).unwrap();
        // max scroll = 1600 - 400
        assert_eq!(target, 1200.0);
    }

    #[test]
    fn test_begin_playback_scrolls_visualizer_into_view() {
        let ui = UiRegistry::with_panel_count(10);
        let before = ui.viewport().scroll_top;
        ui.begin_playback(9);
        assert!(ui.viewport().scroll_top > before);
        assert!(ui.snapshot(9).visualizer_visible);
    }
}
