// HTTP fetching for streamed tracks
//
// Downloads a locator into a temp cache file. Enough is buffered up front to
// start playback; the rest of the file continues downloading in the
// background with a Range request.

use crate::error::{PlayerError, Result};
use once_cell::sync::Lazy;
use std::fs::File;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Bytes to download before playback may start
const PREBUFFER_BYTES: u64 = 512 * 1024;

/// Copy chunk size
const CHUNK_BYTES: usize = 65536;

/// Bound on the time spent reaching the prebuffer target. The source this
/// player replaces would sit in a loading state forever on a stalled stream;
/// here a stall is treated as a load failure so the fallback can take over.
const LOAD_TIMEOUT: Duration = Duration::from_secs(20);

const MAX_RETRIES: u32 = 3;

static AGENT: Lazy<ureq::Agent> = Lazy::new(|| {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout_read(Duration::from_secs(15))
        .user_agent("studio-player/0.1")
        .redirects(10)
        .build()
});

/// Shared view of a download that continues in the background.
///
/// The decode side consumes the cache file while it is still being written;
/// it must distinguish "no more bytes yet" from "no more bytes ever", so
/// reaching the end of the file before `is_finished` is a wait, not an end
/// of track.
pub struct DownloadProgress {
    bytes_written: AtomicU64,
    finished: AtomicBool,
    failed: AtomicBool,
}

impl DownloadProgress {
    pub(crate) fn new() -> Self {
        Self {
            bytes_written: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// No more bytes will be written, successfully or not
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    fn advance(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    pub(crate) fn fail(&self) {
        self.failed.store(true, Ordering::Relaxed);
        self.finished.store(true, Ordering::Relaxed);
    }
}

/// Download a locator into the temp cache, returning once the prebuffer
/// target (or the whole file, if smaller) is on disk. The returned progress
/// handle tracks the background continuation of the download.
pub fn download_with_prebuffer(locator: &str, dest_path: &str) -> Result<Arc<DownloadProgress>> {
    log::info!("Starting download from: {}", locator);

    let response = retry_request(locator, MAX_RETRIES)?;
    let content_length = response
        .header("Content-Length")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    log::debug!("Content length: {} bytes", content_length);

    let mut file = File::create(dest_path)
        .map_err(|e| PlayerError::IoError(format!("Failed to create temp file: {}", e)))?;

    let progress = Arc::new(DownloadProgress::new());
    let deadline = Instant::now() + LOAD_TIMEOUT;
    let mut reader = response.into_reader();
    let mut buffer = vec![0u8; CHUNK_BYTES];
    let mut downloaded = 0u64;

    loop {
        if Instant::now() > deadline {
            return Err(PlayerError::NetworkError(format!(
                "Download stalled: {} bytes in {:?}",
                downloaded, LOAD_TIMEOUT
            )));
        }

        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| PlayerError::NetworkError(format!("Download failed: {}", e)))?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .map_err(|e| PlayerError::IoError(format!("Write failed: {}", e)))?;
        downloaded += bytes_read as u64;
        progress.advance(bytes_read as u64);

        if downloaded >= PREBUFFER_BYTES {
            file.flush()
                .map_err(|e| PlayerError::IoError(format!("Failed to flush file: {}", e)))?;
            log::info!("Prebuffer complete: {} bytes downloaded", downloaded);
            spawn_background_download(
                locator.to_string(),
                dest_path.to_string(),
                downloaded,
                progress.clone(),
            );
            return Ok(progress);
        }
    }

    file.flush()
        .map_err(|e| PlayerError::IoError(format!("Failed to flush file: {}", e)))?;
    log::info!("Download complete: {} bytes", downloaded);
    progress.finish();
    Ok(progress)
}

/// Continue a partially-downloaded file from `offset` on a detached thread,
/// reporting through the shared progress handle
fn spawn_background_download(
    locator: String,
    dest_path: String,
    offset: u64,
    progress: Arc<DownloadProgress>,
) {
    thread::spawn(move || {
        log::debug!("Background download continuing from byte {}", offset);

        let response = match AGENT
            .get(&locator)
            .set("Range", &format!("bytes={}-", offset))
            .call()
        {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Background download request failed: {}", e);
                progress.fail();
                return;
            }
        };

        let mut file = match std::fs::OpenOptions::new().append(true).open(&dest_path) {
            Ok(file) => file,
            Err(e) => {
                log::warn!("Failed to reopen cache file: {}", e);
                progress.fail();
                return;
            }
        };

        let mut reader = response.into_reader();
        let mut buffer = vec![0u8; CHUNK_BYTES];
        let mut total = offset;
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    progress.finish();
                    break;
                }
                Ok(bytes_read) => {
                    if file.write_all(&buffer[..bytes_read]).is_err() {
                        progress.fail();
                        break;
                    }
                    total += bytes_read as u64;
                    progress.advance(bytes_read as u64);
                }
                Err(e) => {
                    log::warn!("Background download read failed: {}", e);
                    progress.fail();
                    break;
                }
            }
        }
        log::debug!("Background download finished: {} bytes total", total);
    });
}

/// Retry a GET with exponential backoff (500ms, 1s, 2s)
fn retry_request(locator: &str, max_retries: u32) -> Result<ureq::Response> {
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_millis(500 * (1 << (attempt - 1)));
            log::debug!("Retry attempt {} after {:?}", attempt, delay);
            thread::sleep(delay);
        }

        match AGENT.get(locator).call() {
            Ok(response) => return Ok(response),
            Err(e) => {
                log::warn!("Request attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e);
            }
        }
    }

    Err(PlayerError::NetworkError(format!(
        "Request failed after {} attempts: {}",
        max_retries + 1,
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string())
    )))
}

/// Temp cache path for a locator, keyed by a hash of the locator
pub fn cache_path(locator: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    locator.hash(&mut hasher);
    format!(
        "{}/studio_player_{:x}.tmp",
        std::env::temp_dir().display(),
        hasher.finish()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_path_is_stable_per_locator() {
        let a = cache_path("https://example.com/track.mp3");
        let b = cache_path("https://example.com/track.mp3");
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_path_differs_across_locators() {
        let a = cache_path("https://example.com/a.mp3");
        let b = cache_path("https://example.com/b.mp3");
        assert_ne!(a, b);
    }

    #[test]
    fn test_progress_tracks_bytes_and_completion() {
        let progress = DownloadProgress::new();
        assert_eq!(progress.bytes_written(), 0);
        assert!(!progress.is_finished());

        progress.advance(1024);
        progress.advance(512);
        assert_eq!(progress.bytes_written(), 1536);

        progress.finish();
        assert!(progress.is_finished());
        assert!(!progress.is_failed());
    }

    #[test]
    fn test_failed_progress_is_also_finished() {
        let progress = DownloadProgress::new();
        progress.fail();
        assert!(progress.is_finished());
        assert!(progress.is_failed());
    }
}
