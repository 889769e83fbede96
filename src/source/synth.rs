// Synthesized fallback source
//
// A fixed C-major chord (C4, E4, G4) from three oscillators with different
// waveforms, each pitch-wobbled by its own slow LFO so the timbre never sits
// still. Progress is simulated: a 100ms tick advances a clock to a fixed 30
// second duration, after which the source reports its natural end.

use crate::analyzer::SpectrumAnalyzer;
use crate::error::{PlayerError, Result};
use crate::events::{EventSink, SourceEvent};
use crate::source::{join_worker, SourceAdapter};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Chord frequencies: C4, E4, G4
const CHORD_FREQS: [f32; 3] = [261.63, 329.63, 392.0];

/// LFO pitch deviation in Hz
const LFO_DEPTH_HZ: f32 = 10.0;

/// Per-oscillator gain into the shared output stage
const OSCILLATOR_GAIN: f32 = 0.3;

/// Master gain; the chord plays quietly
const MASTER_GAIN: f32 = 0.05;

/// Simulated clock tick
const SIM_TICK: Duration = Duration::from_millis(100);

/// Simulated track duration
const SIM_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
enum Waveform {
    Sine,
    Triangle,
    Sawtooth,
}

impl Waveform {
    /// Evaluate at phase position in 0..1
    fn eval(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (2.0 * PI * phase).sin(),
            Waveform::Triangle => 2.0 * (2.0 * phase - 1.0).abs() - 1.0,
            Waveform::Sawtooth => 2.0 * phase - 1.0,
        }
    }
}

/// One chord voice: an oscillator pitch-modulated by a slow sine LFO
struct Oscillator {
    waveform: Waveform,
    base_freq: f32,
    phase: f32,
    lfo_rate: f32,
    lfo_phase: f32,
}

impl Oscillator {
    fn new(waveform: Waveform, base_freq: f32, lfo_rate: f32) -> Self {
        Self {
            waveform,
            base_freq,
            phase: 0.0,
            lfo_rate,
            lfo_phase: 0.0,
        }
    }

    fn next_sample(&mut self, sample_rate: f32) -> f32 {
        let wobble = (2.0 * PI * self.lfo_phase).sin() * LFO_DEPTH_HZ;
        let freq = self.base_freq + wobble;

        let sample = self.waveform.eval(self.phase);

        self.phase += freq / sample_rate;
        self.phase -= self.phase.floor();
        self.lfo_phase += self.lfo_rate / sample_rate;
        self.lfo_phase -= self.lfo_phase.floor();

        sample
    }
}

/// The full three-oscillator chord behind the shared gain stage
struct ChordVoice {
    oscillators: [Oscillator; 3],
}

impl ChordVoice {
    fn new() -> Self {
        let waveforms = [Waveform::Sine, Waveform::Triangle, Waveform::Sawtooth];
        let oscillators = std::array::from_fn(|i| {
            // LFO rates 0.5, 0.7, 0.9 Hz so the wobbles drift apart
            Oscillator::new(waveforms[i], CHORD_FREQS[i], 0.5 + i as f32 * 0.2)
        });
        Self { oscillators }
    }

    fn next_sample(&mut self, sample_rate: f32) -> f32 {
        let sum: f32 = self
            .oscillators
            .iter_mut()
            .map(|osc| osc.next_sample(sample_rate) * OSCILLATOR_GAIN)
            .sum();
        sum * MASTER_GAIN
    }
}

/// Source adapter producing the synthesized demo chord
pub struct SynthSource {
    events: EventSink,
    analyzer: Arc<SpectrumAnalyzer>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SynthSource {
    pub fn new(events: EventSink) -> Result<Self> {
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| PlayerError::DeviceError("No output device available".to_string()))?;

        Ok(Self {
            events,
            analyzer: Arc::new(SpectrumAnalyzer::new()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }
}

impl SourceAdapter for SynthSource {
    fn start(&mut self) -> Result<()> {
        self.stop_flag.store(false, Ordering::Relaxed);

        let events = self.events.clone();
        let analyzer = self.analyzer.clone();
        let stop_flag = self.stop_flag.clone();

        self.worker = Some(thread::spawn(move || {
            log::info!("Synthesized fallback started");

            match run_chord(&events, analyzer, &stop_flag) {
                Ok(()) => {}
                Err(e) => {
                    log::warn!("Synthesized source failed: {}", e);
                    events(SourceEvent::Failed { error: e });
                }
            }

            log::info!("Synthesized fallback exited");
        }));

        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        // Oscillators live on the worker thread; joining it drops the output
        // stream and with it every oscillator. Double-stops fall through the
        // empty worker slot.
        join_worker(&mut self.worker);
        self.analyzer.reset();
    }

    fn analyzer(&self) -> Arc<SpectrumAnalyzer> {
        self.analyzer.clone()
    }
}

impl Drop for SynthSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the output stream, then drive the simulated progress clock until
/// the stop flag is raised or the fixed duration elapses.
fn run_chord(
    events: &EventSink,
    analyzer: Arc<SpectrumAnalyzer>,
    stop_flag: &Arc<AtomicBool>,
) -> Result<()> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| PlayerError::DeviceError("No output device available".to_string()))?;

    let config = device
        .default_output_config()
        .map_err(|e| PlayerError::DeviceError(format!("No output config: {}", e)))?;
    let sample_rate = config.sample_rate().0 as f32;
    let channels = config.channels() as usize;

    let mut voice = ChordVoice::new();
    let mut tap = Vec::with_capacity(4096);

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                tap.clear();
                for frame in data.chunks_mut(channels) {
                    let sample = voice.next_sample(sample_rate);
                    frame.fill(sample);
                    tap.push(sample);
                }
                analyzer.push_frames(&tap, 1);
            },
            |err| log::error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| PlayerError::InitializationError(format!("Failed to build output stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| PlayerError::PlaybackError(format!("Failed to start stream: {}", e)))?;

    events(SourceEvent::MetadataReady {
        duration: SIM_DURATION,
    });
    events(SourceEvent::CanPlay);

    // Fixed-delay rescheduling, like the player this replaces; drift under
    // load is tolerated, the clock is presentational
    let mut elapsed = Duration::ZERO;
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            return Ok(());
        }
        thread::sleep(SIM_TICK);
        elapsed += SIM_TICK;

        events(SourceEvent::TimeUpdate {
            position: elapsed.min(SIM_DURATION),
            duration: SIM_DURATION,
        });

        if elapsed >= SIM_DURATION {
            log::info!("Synthesized fallback reached its duration");
            events(SourceEvent::Ended);
            return Ok(());
        }
    }
    // Stream (and all three oscillators) dropped here
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oscillator_stays_in_range() {
        let mut osc = Oscillator::new(Waveform::Sawtooth, 261.63, 0.5);
        for _ in 0..48000 {
            let sample = osc.next_sample(48000.0);
            assert!((-1.0..=1.0).contains(&sample));
        }
    }

    #[test]
    fn test_sine_oscillator_completes_cycles() {
        let mut osc = Oscillator::new(Waveform::Sine, 100.0, 0.0);
        // Count rising zero crossings over one second at 100 Hz
        let mut prev = osc.next_sample(48000.0);
        let mut crossings = 0;
        for _ in 0..48000 {
            let sample = osc.next_sample(48000.0);
            if prev < 0.0 && sample >= 0.0 {
                crossings += 1;
            }
            prev = sample;
        }
        // The LFO wobbles the pitch by up to 10 Hz either way
        assert!((90..=110).contains(&crossings), "crossings = {}", crossings);
    }

    #[test]
    fn test_chord_output_is_quiet() {
        let mut voice = ChordVoice::new();
        for _ in 0..48000 {
            let sample = voice.next_sample(48000.0);
            // Three oscillators at 0.3 each through a 0.05 master gain
            assert!(sample.abs() <= 3.0 * OSCILLATOR_GAIN * MASTER_GAIN + 1e-6);
        }
    }

    #[test]
    fn test_waveform_shapes() {
        assert!((Waveform::Sine.eval(0.25) - 1.0).abs() < 1e-5);
        assert!((Waveform::Sawtooth.eval(0.0) + 1.0).abs() < 1e-6);
        assert!((Waveform::Sawtooth.eval(0.75) - 0.5).abs() < 1e-6);
        assert!((Waveform::Triangle.eval(0.0) - 1.0).abs() < 1e-6);
        assert!((Waveform::Triangle.eval(0.5) + 1.0).abs() < 1e-6);
    }
}
