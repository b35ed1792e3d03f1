//! Music search through yt-dlp and local playback through a media player
//! process fed over stdin.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

const FEED_CHUNK_SIZE: usize = 64 * 1024;
const FFPLAY_ARGS: [&str; 6] = ["-nodisp", "-autoexit", "-loglevel", "quiet", "-i", "-"];

/// A playable search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    /// Direct audio stream URL.
    pub url: String,
    /// Headers the stream URL must be fetched with.
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub webpage_url: Option<String>,
}

#[async_trait]
pub trait MusicSearch: Send + Sync {
    /// Returns the first result for `query`, or `None` if nothing matched.
    async fn search(&self, query: &str) -> Result<Option<TrackInfo>>;
}

/// Searches YouTube by shelling out to `yt-dlp`.
pub struct YtDlpSearch {
    command: String,
}

impl YtDlpSearch {
    pub fn new(command: String) -> Self {
        Self { command }
    }

    fn args(query: &str) -> Vec<String> {
        vec![
            "-j".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "-f".to_string(),
            "bestaudio/best".to_string(),
            format!("ytsearch1:{query}"),
        ]
    }
}

#[derive(Deserialize)]
struct YtDlpEntry {
    #[serde(default)]
    title: Option<String>,
    url: Option<String>,
    #[serde(default)]
    http_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    webpage_url: Option<String>,
}

/// Parses `yt-dlp -j` output: one JSON document per line, first one wins.
pub fn parse_ytdlp_output(stdout: &str) -> Result<Option<TrackInfo>> {
    let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return Ok(None);
    };
    let entry: YtDlpEntry =
        serde_json::from_str(line).context("yt-dlp printed invalid JSON")?;
    let url = entry.url.context("yt-dlp result has no stream URL")?;
    Ok(Some(TrackInfo {
        title: entry.title.unwrap_or_else(|| "Unknown".to_string()),
        url,
        http_headers: entry.http_headers.unwrap_or_default(),
        duration: entry.duration,
        webpage_url: entry.webpage_url,
    }))
}

#[async_trait]
impl MusicSearch for YtDlpSearch {
    async fn search(&self, query: &str) -> Result<Option<TrackInfo>> {
        info!(query, "Searching YouTube");
        let output = tokio::process::Command::new(&self.command)
            .args(Self::args(query))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", self.command, output.status, stderr.trim());
        }
        parse_ytdlp_output(&String::from_utf8_lossy(&output.stdout))
    }
}

pub trait MusicPlayback: Send + Sync {
    /// Starts playing `track`, stopping whatever was playing before.
    fn start(&self, track: &TrackInfo) -> Result<()>;
    /// Stops playback. Returns false if nothing was playing.
    fn stop(&self) -> bool;
    fn is_playing(&self) -> bool;
}

struct Playback {
    title: String,
    child: Child,
    cancel: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

/// Plays one track at a time through a media-player child process.
///
/// The audio is downloaded on a dedicated OS thread and written to the
/// player's stdin in fixed-size chunks.
pub struct ProcessPlayer {
    command: String,
    args: Vec<String>,
    current: Mutex<Option<Playback>>,
}

impl ProcessPlayer {
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self {
            command,
            args,
            current: Mutex::new(None),
        }
    }

    /// A player running `command` with ffplay's stdin-playback flags.
    pub fn ffplay(command: String) -> Self {
        Self::new(command, FFPLAY_ARGS.iter().map(|a| a.to_string()).collect())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Playback>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn halt(playback: &mut Playback) {
        playback.cancel.store(true, Ordering::SeqCst);
        if let Err(e) = playback.child.kill() {
            debug!(error = %e, "Player process already gone");
        }
        let _ = playback.child.wait();
        // The feeder exits on the next write to the closed pipe.
        drop(playback.feeder.take());
        info!(title = %playback.title, "Stopped playback");
    }
}

fn stream_to_player(
    url: &str,
    headers: &HashMap<String, String>,
    stdin: &mut ChildStdin,
    cancel: &AtomicBool,
) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    let mut response = request
        .send()
        .context("Audio stream request failed")?
        .error_for_status()?;

    let mut buf = vec![0u8; FEED_CHUNK_SIZE];
    while !cancel.load(Ordering::SeqCst) {
        let n = response.read(&mut buf)?;
        if n == 0 {
            break;
        }
        stdin.write_all(&buf[..n])?;
    }
    Ok(())
}

fn feed_stream(
    url: String,
    headers: HashMap<String, String>,
    mut stdin: ChildStdin,
    cancel: Arc<AtomicBool>,
) {
    match stream_to_player(&url, &headers, &mut stdin, &cancel) {
        Ok(()) => debug!("Audio feeder finished"),
        Err(e) if cancel.load(Ordering::SeqCst) => debug!(error = %e, "Audio feeder stopped"),
        Err(e) => error!(error = %e, "Audio feeder failed"),
    }
}

impl MusicPlayback for ProcessPlayer {
    fn start(&self, track: &TrackInfo) -> Result<()> {
        let mut current = self.lock();
        if let Some(mut previous) = current.take() {
            Self::halt(&mut previous);
        }

        let mut child = std::process::Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.command))?;
        let stdin = child.stdin.take().context("Player stdin not captured")?;

        let cancel = Arc::new(AtomicBool::new(false));
        let feeder = {
            let url = track.url.clone();
            let headers = track.http_headers.clone();
            let cancel = cancel.clone();
            std::thread::Builder::new()
                .name("music-feeder".to_string())
                .spawn(move || feed_stream(url, headers, stdin, cancel))
                .context("Failed to spawn audio feeder thread")?
        };

        info!(title = %track.title, "Started playback");
        *current = Some(Playback {
            title: track.title.clone(),
            child,
            cancel,
            feeder: Some(feeder),
        });
        Ok(())
    }

    fn stop(&self) -> bool {
        match self.lock().take() {
            Some(mut playback) => {
                Self::halt(&mut playback);
                true
            }
            None => false,
        }
    }

    fn is_playing(&self) -> bool {
        let mut current = self.lock();
        let running = match current.as_mut() {
            Some(playback) => matches!(playback.child.try_wait(), Ok(None)),
            None => false,
        };
        if !running {
            current.take();
        }
        running
    }
}

impl Drop for ProcessPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Plays a clip on the server host in the background, independent of the
/// music player.
pub fn play_clip_locally(command: &str, audio: Bytes) {
    let command = command.to_string();
    tokio::spawn(async move {
        let spawned = tokio::process::Command::new(&command)
            .args(FFPLAY_ARGS)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, command = %command, "Failed to start local speech playback");
                return;
            }
        };
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&audio).await {
                warn!(error = %e, "Failed to pipe speech to local player");
            }
        }
        let _ = child.wait().await;
    });
}
