// Streamed source adapter
//
// Pipeline: download with prebuffer -> Symphonia decode -> ring buffer ->
// cpal output stream -> spectrum analyzer tap. The whole pipeline runs on a
// single worker thread that also owns the cpal stream, so the stream never
// has to cross a thread boundary.

use crate::analyzer::SpectrumAnalyzer;
use crate::decoder::{AudioRingBuffer, StreamDecoder};
use crate::error::{PlayerError, Result};
use crate::events::{EventSink, SourceEvent};
use crate::fetch;
use crate::source::{join_worker, SourceAdapter};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Ring buffer size in samples (about two seconds of stereo 48k audio)
const RING_BUFFER_SIZE: usize = 48000 * 2 * 2;

/// Amount to decode before playback starts, in milliseconds
const PRE_BUFFER_MS: u64 = 100;

/// Position report interval
const POSITION_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep while the ring buffer is full
const BUFFER_FULL_SLEEP: Duration = Duration::from_millis(10);

/// Sleep while the decoder has outrun the download and waits for more of
/// the cache file to arrive
const DOWNLOAD_WAIT: Duration = Duration::from_millis(50);

/// Source adapter wrapping a network-streamed track
pub struct StreamedSource {
    locator: String,
    events: EventSink,
    analyzer: Arc<SpectrumAnalyzer>,
    decoder: Arc<Mutex<Option<StreamDecoder>>>,
    ring: Arc<Mutex<AudioRingBuffer>>,
    is_playing: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
    worker: Option<thread::JoinHandle<()>>,
}

impl StreamedSource {
    /// Construct the adapter; fails when no output device is available,
    /// which the session treats like any other load failure.
    pub fn new(locator: &str, events: EventSink) -> Result<Self> {
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| PlayerError::DeviceError("No output device available".to_string()))?;

        Ok(Self {
            locator: locator.to_string(),
            events,
            analyzer: Arc::new(SpectrumAnalyzer::new()),
            decoder: Arc::new(Mutex::new(None)),
            ring: Arc::new(Mutex::new(AudioRingBuffer::new(RING_BUFFER_SIZE))),
            is_playing: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            frames_played: Arc::new(AtomicU64::new(0)),
            worker: None,
        })
    }

    fn spawn_pipeline(&mut self) {
        let locator = self.locator.clone();
        let events = self.events.clone();
        let analyzer = self.analyzer.clone();
        let decoder_slot = self.decoder.clone();
        let ring = self.ring.clone();
        let is_playing = self.is_playing.clone();
        let stop_flag = self.stop_flag.clone();
        let frames_played = self.frames_played.clone();

        self.worker = Some(thread::spawn(move || {
            log::info!("Streamed pipeline started for {}", locator);

            let outcome = run_pipeline(
                &locator,
                &events,
                analyzer,
                decoder_slot,
                ring,
                is_playing.clone(),
                stop_flag,
                frames_played,
            );

            is_playing.store(false, Ordering::Relaxed);
            if let Err(e) = outcome {
                log::warn!("Streamed source failed: {}", e);
                events(SourceEvent::Failed { error: e });
            }

            log::info!("Streamed pipeline exited");
        }));
    }
}

impl SourceAdapter for StreamedSource {
    fn start(&mut self) -> Result<()> {
        self.stop_flag.store(false, Ordering::Relaxed);
        self.spawn_pipeline();
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.is_playing.store(false, Ordering::Relaxed);
        join_worker(&mut self.worker);

        self.ring.lock().clear();
        *self.decoder.lock() = None;
        self.analyzer.reset();
        self.frames_played.store(0, Ordering::Relaxed);
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let position_ms = position.as_millis() as u64;
        log::info!("Seeking to {} ms", position_ms);

        let mut decoder_lock = self.decoder.lock();
        let decoder = decoder_lock
            .as_mut()
            .ok_or_else(|| PlayerError::PlaybackError("No decoder available".to_string()))?;

        decoder.seek(position_ms)?;
        let new_frames = (position_ms * decoder.format.sample_rate as u64) / 1000;
        drop(decoder_lock);

        self.ring.lock().clear();
        self.frames_played.store(new_frames, Ordering::Relaxed);
        Ok(())
    }

    fn supports_seek(&self) -> bool {
        true
    }

    fn analyzer(&self) -> Arc<SpectrumAnalyzer> {
        self.analyzer.clone()
    }
}

impl Drop for StreamedSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Download, decode and play the track. Runs until the stop flag is raised,
/// the track ends, or an error occurs.
#[allow(clippy::too_many_arguments)]
fn run_pipeline(
    locator: &str,
    events: &EventSink,
    analyzer: Arc<SpectrumAnalyzer>,
    decoder_slot: Arc<Mutex<Option<StreamDecoder>>>,
    ring: Arc<Mutex<AudioRingBuffer>>,
    is_playing: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
) -> Result<()> {
    let cache = fetch::cache_path(locator);
    let download = fetch::download_with_prebuffer(locator, &cache)?;
    if stop_flag.load(Ordering::Relaxed) {
        return Ok(());
    }

    let decoder = StreamDecoder::open(&cache)?;
    let sample_rate = decoder.format.sample_rate;
    let channels = decoder.format.channels.max(2);
    let duration = Duration::from_millis(decoder.format.duration_ms);
    *decoder_slot.lock() = Some(decoder);

    events(SourceEvent::MetadataReady { duration });

    // Pre-buffer before the stream starts pulling
    let target = ((PRE_BUFFER_MS * sample_rate as u64) / 1000) as usize * channels as usize;
    prebuffer(&decoder_slot, &ring, target);

    let stream = build_output_stream(
        sample_rate,
        channels,
        ring.clone(),
        is_playing.clone(),
        frames_played.clone(),
        analyzer,
    )?;

    is_playing.store(true, Ordering::Relaxed);
    stream
        .play()
        .map_err(|e| PlayerError::PlaybackError(format!("Failed to start stream: {}", e)))?;
    events(SourceEvent::CanPlay);

    decode_loop(
        events,
        &decoder_slot,
        &ring,
        &stop_flag,
        &frames_played,
        &download,
        sample_rate,
        duration,
    )
    // Stream is dropped here, on the thread that built it
}

#[derive(Debug, PartialEq, Eq)]
enum CacheAction {
    /// The download is still appending to the cache file; try again
    WaitForDownload,
    /// The download died mid-track
    Fail,
    /// The whole file is on disk and fully decoded
    TrackEnded,
}

/// Decide what running out of cache bytes means. The decoder can outrun
/// the background download on slow connections, in which case the end of
/// the file is not the end of the track.
fn cache_exhausted_action(download: &fetch::DownloadProgress) -> CacheAction {
    if !download.is_finished() {
        CacheAction::WaitForDownload
    } else if download.is_failed() {
        CacheAction::Fail
    } else {
        CacheAction::TrackEnded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DownloadProgress;

    #[test]
    fn test_exhausted_cache_waits_while_download_is_behind() {
        let download = DownloadProgress::new();
        assert_eq!(
            cache_exhausted_action(&download),
            CacheAction::WaitForDownload
        );
    }

    #[test]
    fn test_exhausted_cache_ends_track_after_download_completes() {
        let download = DownloadProgress::new();
        download.finish();
        assert_eq!(cache_exhausted_action(&download), CacheAction::TrackEnded);
    }

    #[test]
    fn test_exhausted_cache_fails_when_download_died() {
        let download = DownloadProgress::new();
        download.fail();
        assert_eq!(cache_exhausted_action(&download), CacheAction::Fail);
    }
}

fn build_output_stream(
    sample_rate: u32,
    channels: u16,
    ring: Arc<Mutex<AudioRingBuffer>>,
    is_playing: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
    analyzer: Arc<SpectrumAnalyzer>,
) -> Result<cpal::Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| PlayerError::DeviceError("No output device available".to_string()))?;

    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    log::debug!("Output stream config: {:?}", config);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !is_playing.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                let read = ring.lock().read(data);
                if read < data.len() {
                    data[read..].fill(0.0);
                }

                analyzer.push_frames(&data[..read], channels as usize);
                frames_played.fetch_add((read / channels as usize) as u64, Ordering::Relaxed);
            },
            |err| log::error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| PlayerError::InitializationError(format!("Failed to build output stream: {}", e)))?;

    Ok(stream)
}

fn prebuffer(
    decoder_slot: &Arc<Mutex<Option<StreamDecoder>>>,
    ring: &Arc<Mutex<AudioRingBuffer>>,
    target: usize,
) {
    let mut buffered = 0;
    while buffered < target {
        let samples = {
            let mut decoder_lock = decoder_slot.lock();
            match decoder_lock.as_mut().map(|d| d.decode_next()) {
                Some(Ok(Some(samples))) => samples,
                _ => break,
            }
        };
        let written = ring.lock().write(&samples);
        buffered += written;
        if written < samples.len() {
            break;
        }
    }
    log::debug!("Pre-buffered {} samples", buffered);
}

#[allow(clippy::too_many_arguments)]
fn decode_loop(
    events: &EventSink,
    decoder_slot: &Arc<Mutex<Option<StreamDecoder>>>,
    ring: &Arc<Mutex<AudioRingBuffer>>,
    stop_flag: &Arc<AtomicBool>,
    frames_played: &Arc<AtomicU64>,
    download: &fetch::DownloadProgress,
    sample_rate: u32,
    duration: Duration,
) -> Result<()> {
    let mut last_position_update = Instant::now();

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            return Ok(());
        }

        let decoded = {
            let mut decoder_lock = decoder_slot.lock();
            match decoder_lock.as_mut() {
                Some(decoder) => decoder.decode_next()?,
                None => return Ok(()),
            }
        };

        match decoded {
            Some(samples) => {
                let mut written = 0;
                while written < samples.len() {
                    if stop_flag.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    let w = ring.lock().write(&samples[written..]);
                    if w == 0 {
                        thread::sleep(BUFFER_FULL_SLEEP);
                    } else {
                        written += w;
                    }
                }

                if last_position_update.elapsed() >= POSITION_UPDATE_INTERVAL {
                    let frames = frames_played.load(Ordering::Relaxed);
                    let position = Duration::from_millis((frames * 1000) / sample_rate as u64);
                    events(SourceEvent::TimeUpdate { position, duration });
                    last_position_update = Instant::now();
                }
            }
            None => match cache_exhausted_action(download) {
                CacheAction::WaitForDownload => {
                    thread::sleep(DOWNLOAD_WAIT);
                }
                CacheAction::Fail => {
                    return Err(PlayerError::NetworkError(
                        "Download failed mid-track".to_string(),
                    ));
                }
                CacheAction::TrackEnded => {
                    // Let the ring buffer drain before reporting the end
                    while ring.lock().available_read() > 0 {
                        if stop_flag.load(Ordering::Relaxed) {
                            return Ok(());
                        }
                        thread::sleep(BUFFER_FULL_SLEEP);
                    }
                    log::info!("Streamed track ended");
                    events(SourceEvent::Ended);
                    return Ok(());
                }
            },
        }
    }
}
