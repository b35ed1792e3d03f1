//! Streaming speech-to-text providers.

pub mod deepgram;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use polly_core::generic_types::AsrEvent;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

pub use deepgram::DeepgramTranscriber;

/// How long `close` waits for the provider to flush final results.
const CLOSE_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

/// Opens one vendor ASR connection per session.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Connects for `session_id`. Transcripts, errors and a final `Closed`
    /// notice are delivered on `events`.
    async fn open(&self, session_id: &str, events: mpsc::Sender<AsrEvent>)
    -> Result<TranscriberHandle>;
}

/// The session-side end of a live ASR connection.
pub struct TranscriberHandle {
    session_id: String,
    audio_tx: mpsc::Sender<Bytes>,
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TranscriberHandle {
    pub fn new(
        session_id: String,
        audio_tx: mpsc::Sender<Bytes>,
        close_tx: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            session_id,
            audio_tx,
            close_tx: Some(close_tx),
            task,
        }
    }

    /// Queues PCM16 audio for the vendor.
    pub async fn send_audio(&self, audio: Bytes) -> Result<()> {
        self.audio_tx
            .send(audio)
            .await
            .map_err(|_| anyhow!("ASR connection for {} is closed", self.session_id))
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished() && !self.audio_tx.is_closed()
    }

    /// Asks the provider to finish, waits briefly for it, then aborts.
    pub async fn close(mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        match tokio::time::timeout(CLOSE_GRACE, &mut self.task).await {
            Ok(_) => debug!(session_id = %self.session_id, "ASR connection closed"),
            Err(_) => {
                warn!(session_id = %self.session_id, "ASR connection did not close in time");
                self.task.abort();
            }
        }
    }
}
