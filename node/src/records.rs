//! Append-only records of sent and received messages.
//!
//! Each message becomes one line, `<RFC3339 time>\t<sent|recv>\t<json>`,
//! appended to `<base>_<YYYYMMDD>.rec`, so a new file starts every day.
//! Lines are written by a background task; callers never wait on disk.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Whether a recorded message was sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Sent => "sent",
            Direction::Received => "recv",
        })
    }
}

#[derive(Debug)]
struct RecordLine {
    at: DateTime<Utc>,
    direction: Direction,
    body: String,
}

/// Handle for queueing record lines.
#[derive(Debug, Clone)]
pub struct RecordsWriter {
    tx: mpsc::UnboundedSender<RecordLine>,
}

impl RecordsWriter {
    /// Start the writer task for files named after `base`.
    ///
    /// The task finishes once every handle has been dropped and the queue
    /// has drained.
    pub fn spawn(base: PathBuf) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer(base, rx));
        (Self { tx }, task)
    }

    /// Queue one message body.
    pub fn record(&self, direction: Direction, body: &[u8]) {
        let line = RecordLine {
            at: Utc::now(),
            direction,
            body: String::from_utf8_lossy(body).into_owned(),
        };
        if self.tx.send(line).is_err() {
            tracing::debug!("Records writer has stopped, dropping line");
        }
    }
}

/// File holding the records for `date`.
pub fn records_path(base: &Path, date: NaiveDate) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!("_{}.rec", date.format("%Y%m%d")));
    PathBuf::from(name)
}

async fn run_writer(base: PathBuf, mut rx: mpsc::UnboundedReceiver<RecordLine>) {
    let mut current: Option<(NaiveDate, File)> = None;

    while let Some(line) = rx.recv().await {
        let date = line.at.date_naive();
        if current.as_ref().map(|(d, _)| *d) != Some(date) {
            if let Some((_, mut old)) = current.take() {
                let _ = old.flush().await;
            }
            current = open_for(&base, date).await.map(|file| (date, file));
        }
        let Some((_, file)) = current.as_mut() else {
            continue;
        };

        // Keep each record on one line.
        let body = line.body.replace(['\n', '\r'], " ");
        let text = format!("{}\t{}\t{}\n", line.at.to_rfc3339(), line.direction, body);
        if let Err(e) = file.write_all(text.as_bytes()).await {
            tracing::warn!(error = %e, "Failed to write record, reopening");
            current = None;
        }
    }

    if let Some((_, mut file)) = current {
        if let Err(e) = file.flush().await {
            tracing::warn!(error = %e, "Failed to flush records file");
        }
    }
}

async fn open_for(base: &Path, date: NaiveDate) -> Option<File> {
    let path = records_path(base, date);
    match OpenOptions::new().create(true).append(true).open(&path).await {
        Ok(file) => {
            tracing::debug!(path = %path.display(), "Opened records file");
            Some(file)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to open records file");
            None
        }
    }
}
