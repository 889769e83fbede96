// Streamed track decoding using Symphonia

use crate::error::{PlayerError, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Track format information
#[derive(Debug, Clone)]
pub struct TrackFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
}

/// Decoder for a downloaded streamed track
pub struct StreamDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    pub format: TrackFormat,
}

impl StreamDecoder {
    /// Open and probe a cached track file
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| PlayerError::LoadError(format!("Failed to open file: {}", e)))?;

        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlayerError::LoadError(format!("Failed to probe media: {}", e)))?;

        let format_reader = probed.format;
        let track = format_reader
            .default_track()
            .ok_or_else(|| PlayerError::LoadError("No default track found".to_string()))?;
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlayerError::DecodingError(format!("Failed to create decoder: {}", e)))?;

        let params = &track.codec_params;
        let sample_rate = params.sample_rate.ok_or_else(|| {
            PlayerError::UnsupportedFormat("Sample rate not specified".to_string())
        })?;
        let channels = params
            .channels
            .ok_or_else(|| PlayerError::UnsupportedFormat("Channels not specified".to_string()))?
            .count() as u16;
        let duration_ms = params
            .n_frames
            .map(|frames| (frames * 1000) / sample_rate as u64)
            .unwrap_or(0);

        let format = TrackFormat {
            sample_rate,
            channels,
            duration_ms,
        };

        log::info!(
            "Opened track: {}Hz, {} channels, {} ms",
            format.sample_rate,
            format.channels,
            format.duration_ms
        );

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            format,
        })
    }

    /// Decode the next packet into interleaved f32 samples.
    ///
    /// Returns `Ok(None)` at the natural end of the track. Mono tracks are
    /// widened to stereo so the output stream layout never changes.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(PlayerError::DecodingError(format!(
                        "Failed to read packet: {}",
                        e
                    )));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self
                .decoder
                .decode(&packet)
                .map_err(|e| PlayerError::DecodingError(format!("Failed to decode packet: {}", e)))?;

            let mut samples = interleave_f32(&decoded);
            if self.format.channels == 1 {
                samples = widen_mono(samples);
            }

            return Ok(Some(samples));
        }
    }

    /// Seek to a time position in the track
    pub fn seek(&mut self, position_ms: u64) -> Result<()> {
        let ts = (position_ms * self.format.sample_rate as u64) / 1000;

        self.format_reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| PlayerError::PlaybackError(format!("Seek failed: {}", e)))?;

        self.decoder.reset();
        Ok(())
    }
}

/// Interleave a decoded buffer of any sample layout into f32
fn interleave_f32(buffer: &AudioBufferRef) -> Vec<f32> {
    use symphonia::core::conv::IntoSample;

    macro_rules! interleave {
        ($buf:expr) => {{
            let channels = $buf.spec().channels.count();
            let mut samples = Vec::with_capacity($buf.frames() * channels);
            for frame in 0..$buf.frames() {
                for ch in 0..channels {
                    samples.push($buf.chan(ch)[frame].into_sample());
                }
            }
            samples
        }};
    }

    match buffer {
        AudioBufferRef::U8(buf) => interleave!(buf),
        AudioBufferRef::U16(buf) => interleave!(buf),
        AudioBufferRef::U24(buf) => interleave!(buf),
        AudioBufferRef::U32(buf) => interleave!(buf),
        AudioBufferRef::S8(buf) => interleave!(buf),
        AudioBufferRef::S16(buf) => interleave!(buf),
        AudioBufferRef::S24(buf) => interleave!(buf),
        AudioBufferRef::S32(buf) => interleave!(buf),
        AudioBufferRef::F32(buf) => interleave!(buf),
        AudioBufferRef::F64(buf) => interleave!(buf),
    }
}

fn widen_mono(mono: Vec<f32>) -> Vec<f32> {
    let mut stereo = Vec::with_capacity(mono.len() * 2);
    for sample in mono {
        stereo.push(sample);
        stereo.push(sample);
    }
    stereo
}

/// Sample ring buffer between the decode loop and the output callback
pub struct AudioRingBuffer {
    buffer: Vec<f32>,
    write_pos: usize,
    read_pos: usize,
    size: usize,
}

impl AudioRingBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size],
            write_pos: 0,
            read_pos: 0,
            size,
        }
    }

    pub fn write(&mut self, data: &[f32]) -> usize {
        let to_write = data.len().min(self.available_write());
        for &sample in &data[..to_write] {
            self.buffer[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.size;
        }
        to_write
    }

    pub fn read(&mut self, output: &mut [f32]) -> usize {
        let to_read = output.len().min(self.available_read());
        for slot in &mut output[..to_read] {
            *slot = self.buffer[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.size;
        }
        to_read
    }

    pub fn available_write(&self) -> usize {
        self.size - self.available_read() - 1
    }

    pub fn available_read(&self) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            self.size - (self.read_pos - self.write_pos)
        }
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
    }
}
