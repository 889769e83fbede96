// Frequency-domain analysis tap
//
// Both source adapters route their output samples through a SpectrumAnalyzer
// so the visualization loop is source-agnostic: it only ever asks the
// analyzer for the latest frequency data.

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// FFT resolution. Matches the fixed analysis size of the player.
pub const FFT_SIZE: usize = 256;

/// Number of frequency bins exposed to the visualizer (half the resolution)
pub const BIN_COUNT: usize = FFT_SIZE / 2;

/// Hann window coherent gain, compensated for when scaling magnitudes
const HANN_GAIN: f32 = 0.5;

struct SampleWindow {
    samples: [f32; FFT_SIZE],
    write_pos: usize,
}

/// Shared analysis stage fed by the active source's output callback.
///
/// Holds the most recent FFT_SIZE mono samples; `frequency_data` computes a
/// windowed FFT over them on demand and maps magnitudes to 0-255 per bin.
pub struct SpectrumAnalyzer {
    window: Mutex<SampleWindow>,
    planner: Mutex<FftPlanner<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(SampleWindow {
                samples: [0.0; FFT_SIZE],
                write_pos: 0,
            }),
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    /// Feed interleaved output frames into the analysis window.
    ///
    /// Channels are averaged down to mono. Called from audio output
    /// callbacks, so it must stay cheap: one lock, no allocation.
    pub fn push_frames(&self, interleaved: &[f32], channels: usize) {
        if channels == 0 || interleaved.is_empty() {
            return;
        }

        let mut window = self.window.lock();
        for frame in interleaved.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            let pos = window.write_pos;
            window.samples[pos] = mono;
            window.write_pos = (pos + 1) % FFT_SIZE;
        }
    }

    /// Compute the latest frequency-domain sample buffer.
    ///
    /// Each bin is the windowed FFT magnitude scaled so a full-scale sine
    /// lands near 255.
    pub fn frequency_data(&self, out: &mut [u8; BIN_COUNT]) {
        let mut input = [Complex::new(0.0f32, 0.0f32); FFT_SIZE];
        {
            let window = self.window.lock();
            // Oldest sample first so the window function lines up
            for i in 0..FFT_SIZE {
                let idx = (window.write_pos + i) % FFT_SIZE;
                input[i] = Complex::new(window.samples[idx] * hann(i), 0.0);
            }
        }

        let fft = self.planner.lock().plan_fft_forward(FFT_SIZE);
        fft.process(&mut input);

        let scale = 2.0 / (FFT_SIZE as f32 * HANN_GAIN);
        for (bin, value) in out.iter_mut().enumerate() {
            let magnitude = (input[bin].norm() * scale).min(1.0);
            *value = (magnitude * 255.0) as u8;
        }
    }

    /// Clear the analysis window (source released or replaced)
    pub fn reset(&self) {
        let mut window = self.window.lock();
        window.samples = [0.0; FFT_SIZE];
        window.write_pos = 0;
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn hann(index: usize) -> f32 {
    0.5 * (1.0 - ((2.0 * PI * index as f32) / (FFT_SIZE as f32 - 1.0)).cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_frames(bin: usize, amplitude: f32) -> Vec<f32> {
        (0..FFT_SIZE)
            .map(|i| amplitude * (2.0 * PI * bin as f32 * i as f32 / FFT_SIZE as f32).sin())
            .collect()
    }

    #[test]
    fn test_silence_produces_empty_spectrum() {
        let analyzer = SpectrumAnalyzer::new();
        let mut bins = [0u8; BIN_COUNT];
        analyzer.frequency_data(&mut bins);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sine_peaks_in_expected_bin() {
        let analyzer = SpectrumAnalyzer::new();
        analyzer.push_frames(&sine_frames(16, 1.0), 1);

        let mut bins = [0u8; BIN_COUNT];
        analyzer.frequency_data(&mut bins);

        assert!(bins[16] > 200, "peak bin was {}", bins[16]);
        // Bins far from the peak should carry almost nothing
        assert!(bins[64] < 20);
        assert!(bins[100] < 20);
    }

    #[test]
    fn test_stereo_frames_are_mixed_to_mono() {
        let analyzer = SpectrumAnalyzer::new();
        let mono = sine_frames(8, 1.0);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();
        analyzer.push_frames(&stereo, 2);

        let mut bins = [0u8; BIN_COUNT];
        analyzer.frequency_data(&mut bins);
        assert!(bins[8] > 200);
    }

    #[test]
    fn test_reset_clears_window() {
        let analyzer = SpectrumAnalyzer::new();
        analyzer.push_frames(&sine_frames(16, 1.0), 1);
        analyzer.reset();

        let mut bins = [0u8; BIN_COUNT];
        analyzer.frequency_data(&mut bins);
        assert!(bins.iter().all(|&b| b == 0));
    }
}
