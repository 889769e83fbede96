// Visualization loop
//
// A render thread owned by the session: it samples the spectrum analyzer and
// paints frequency bars onto the active panel's surface until cancelled. The
// session cancels the loop before releasing the analyzer it reads from.

use crate::analyzer::{SpectrumAnalyzer, BIN_COUNT};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Frame pacing (roughly display refresh rate)
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Background color the fade converges toward
const BACKGROUND: [u8; 3] = [26, 26, 26];

/// Fade strength per frame; low alpha leaves short motion trails
const FADE_ALPHA: f32 = 0.3;

/// Bar width factor over the naive width/bins split
const BAR_WIDTH_SCALE: f32 = 2.5;

/// Gap between bars, pixels
const BAR_GAP: f32 = 1.0;

/// Bars peak at this share of the surface height
const BAR_HEIGHT_SCALE: f32 = 0.8;

// Bar gradient stops, top of bar to bottom
const GRADIENT_TOP: [u8; 3] = [212, 175, 55]; // gold
const GRADIENT_MID: [u8; 3] = [255, 127, 57]; // orange
const GRADIENT_BOTTOM: [u8; 3] = [52, 152, 219]; // blue

/// RGBA drawing surface for one panel's visualizer
pub struct Surface {
    pub width: usize,
    pub height: usize,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: usize, height: usize) -> Self {
        let mut pixels = vec![0u8; width * height * 4];
        for pixel in pixels.chunks_exact_mut(4) {
            pixel[..3].copy_from_slice(&BACKGROUND);
            pixel[3] = 255;
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let offset = (y * self.width + x) * 4;
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ]
    }

    pub fn data(&self) -> &[u8] {
        &self.pixels
    }

    fn set_pixel(&mut self, x: usize, y: usize, rgb: [u8; 3]) {
        let offset = (y * self.width + x) * 4;
        self.pixels[offset..offset + 3].copy_from_slice(&rgb);
        self.pixels[offset + 3] = 255;
    }

    /// Blend every pixel toward the background instead of hard-clearing
    fn fade(&mut self) {
        for pixel in self.pixels.chunks_exact_mut(4) {
            for ch in 0..3 {
                let current = pixel[ch] as f32;
                pixel[ch] = (current + (BACKGROUND[ch] as f32 - current) * FADE_ALPHA) as u8;
            }
        }
    }
}

/// Paint one frame of frequency bars onto the surface
pub fn render_frame(surface: &mut Surface, bins: &[u8; BIN_COUNT]) {
    surface.fade();

    let width = surface.width as f32;
    let height = surface.height as f32;
    let bar_width = (width / BIN_COUNT as f32) * BAR_WIDTH_SCALE;

    let mut x = 0.0f32;
    for &bin in bins.iter() {
        let bar_height = (bin as f32 / 255.0) * height * BAR_HEIGHT_SCALE;
        if bar_height >= 1.0 {
            draw_bar(surface, x, bar_width, bar_height);
        }
        x += bar_width + BAR_GAP;
        if x >= width {
            break;
        }
    }
}

fn draw_bar(surface: &mut Surface, x: f32, bar_width: f32, bar_height: f32) {
    let x0 = x.max(0.0) as usize;
    let x1 = ((x + bar_width) as usize).min(surface.width);
    let y0 = (surface.height as f32 - bar_height) as usize;
    let y1 = surface.height;

    for y in y0..y1 {
        // Vertical gradient across the bar's own height
        let t = (y - y0) as f32 / (y1 - y0).max(1) as f32;
        let rgb = gradient(t);
        for col in x0..x1 {
            surface.set_pixel(col, y, rgb);
        }
    }
}

/// Three-stop gradient, t in 0..1 top to bottom
fn gradient(t: f32) -> [u8; 3] {
    if t <= 0.5 {
        lerp_rgb(GRADIENT_TOP, GRADIENT_MID, t * 2.0)
    } else {
        lerp_rgb(GRADIENT_MID, GRADIENT_BOTTOM, (t - 0.5) * 2.0)
    }
}

fn lerp_rgb(a: [u8; 3], b: [u8; 3], t: f32) -> [u8; 3] {
    let mut out = [0u8; 3];
    for ch in 0..3 {
        out[ch] = (a[ch] as f32 + (b[ch] as f32 - a[ch] as f32) * t) as u8;
    }
    out
}

/// Running visualization loop token.
///
/// Owned by the session's active record; cancelling it is the only way the
/// loop ends, and dropping it cancels too, so a stale loop cannot outlive
/// the session that started it.
pub struct VisualizerHandle {
    cancel: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    thread: Option<thread::JoinHandle<()>>,
}

impl VisualizerHandle {
    /// Spawn the render loop for the given analyzer and surface
    pub fn start(analyzer: Arc<SpectrumAnalyzer>, surface: Arc<Mutex<Surface>>) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));

        let cancel_flag = cancel.clone();
        let frame_count = frames.clone();
        let thread = thread::spawn(move || {
            log::debug!("Visualization loop started");
            let mut bins = [0u8; BIN_COUNT];

            while !cancel_flag.load(Ordering::Relaxed) {
                analyzer.frequency_data(&mut bins);
                render_frame(&mut surface.lock(), &bins);
                frame_count.fetch_add(1, Ordering::Relaxed);
                thread::sleep(FRAME_INTERVAL);
            }

            log::debug!("Visualization loop exited");
        });

        Self {
            cancel,
            frames,
            thread: Some(thread),
        }
    }

    /// Frames rendered so far
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Stop the loop; no further frames are scheduled after this returns
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for VisualizerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
