//! Upload queue with validation, bounded concurrency and batch progress.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};

use crate::study::validation::{ALLOWED_CONTENT_TYPE, check_file};
use crate::study::{ValidationError, validate_batch};
use crate::web::UploadReport;

use super::context::UiContext;

/// Simultaneous transfers when nothing else is configured.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

// ---------------------------------------------------------------------------
// Transfer seam
// ---------------------------------------------------------------------------

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    /// Declared content type.
    pub content_type: String,
    pub content: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            content,
        }
    }

    /// Read a file from disk. The content type follows the extension the
    /// way a browser file picker declares it.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let content_type = if is_json {
            ALLOWED_CONTENT_TYPE
        } else {
            "application/octet-stream"
        };
        Ok(Self::new(name, content_type, content))
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Progress report of one running transfer.
#[derive(Debug)]
pub enum TransferEvent {
    /// Fraction sent, `0.0..=1.0`.
    Progress(f64),
    /// Server answer, or the transport error.
    Done(Result<UploadReport>),
}

/// A running transfer, polled from [`UploadManager::tick`].
pub trait Transfer {
    fn poll(&mut self) -> Option<TransferEvent>;
}

/// Starts transfers.
pub trait UploadSink {
    fn start(&mut self, file: &UploadFile) -> Box<dyn Transfer>;
}

// ---------------------------------------------------------------------------
// Queue items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Queued,
    /// Passed validation, waiting for a transfer slot.
    Validated,
    Uploading { progress: f64 },
    Succeeded { records: usize },
    Failed { error: String },
}

impl UploadState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: u64,
    pub name: String,
    pub size: u64,
    pub state: UploadState,
}

/// Outcome of a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// At least one file succeeded; the table must reload.
    pub reload: bool,
}

/// `total` counts transferred files; `failed` also counts files rejected
/// by validation.
#[derive(Debug, Default)]
struct Batch {
    total: usize,
    finished: usize,
    succeeded: usize,
    failed: usize,
}

struct Running {
    id: u64,
    transfer: Box<dyn Transfer>,
}

// ---------------------------------------------------------------------------
// UploadManager
// ---------------------------------------------------------------------------

pub struct UploadManager {
    max_concurrent: usize,
    max_size: u64,
    next_id: u64,
    items: Vec<UploadItem>,
    files: Vec<(u64, UploadFile)>,
    queue: VecDeque<u64>,
    running: Vec<Running>,
    batch: Batch,
    peak_running: usize,
}

impl std::fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadManager")
            .field("max_concurrent", &self.max_concurrent)
            .field("items", &self.items)
            .field("queued", &self.queue.len())
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl UploadManager {
    pub fn new(max_concurrent: usize, max_size: u64) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            max_size,
            next_id: 0,
            items: Vec::new(),
            files: Vec::new(),
            queue: VecDeque::new(),
            running: Vec::new(),
            batch: Batch::default(),
            peak_running: 0,
        }
    }

    /// Validate `files` and queue the valid ones. Invalid files fail
    /// immediately with their own message and count as failed in the
    /// batch summary; the others are unaffected.
    pub fn enqueue(&mut self, files: Vec<UploadFile>, ctx: &mut UiContext, now: u64) -> Vec<u64> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            self.next_id += 1;
            let id = self.next_id;
            ids.push(id);
            self.items.push(UploadItem {
                id,
                name: file.name.clone(),
                size: file.size(),
                state: UploadState::Queued,
            });

            match self.validate(&file) {
                Ok(records) => {
                    tracing::debug!(file = %file.name, records, "upload queued");
                    self.set_state(id, UploadState::Validated);
                    self.files.push((id, file));
                    self.queue.push_back(id);
                    self.batch.total += 1;
                }
                Err(e) => {
                    let error = e.to_string();
                    ctx.notifier
                        .error(format!("Fehler bei {}: {error}", file.name), now);
                    self.set_state(id, UploadState::Failed { error });
                    self.batch.failed += 1;
                }
            }
        }
        ids
    }

    fn validate(&self, file: &UploadFile) -> Result<usize, ValidationError> {
        check_file(&file.content_type, file.size(), self.max_size)?;
        let content = std::str::from_utf8(&file.content)
            .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
        Ok(validate_batch(content)?.len())
    }

    /// Admit queued files while slots are free, oldest first.
    pub fn pump(&mut self, sink: &mut dyn UploadSink) {
        while self.running.len() < self.max_concurrent
            && let Some(id) = self.queue.pop_front()
        {
            let Some(pos) = self.files.iter().position(|(fid, _)| *fid == id) else {
                continue;
            };
            let (_, file) = self.files.remove(pos);
            tracing::info!(file = %file.name, size = file.size(), "upload started");
            let transfer = sink.start(&file);
            self.running.push(Running { id, transfer });
            self.peak_running = self.peak_running.max(self.running.len());
            self.set_state(id, UploadState::Uploading { progress: 0.0 });
        }
    }

    /// Drain transfer events, refill slots and close the batch when the
    /// queue is empty and nothing runs.
    pub fn tick(
        &mut self,
        sink: &mut dyn UploadSink,
        ctx: &mut UiContext,
        now: u64,
    ) -> Option<BatchSummary> {
        let mut done = Vec::new();
        for (idx, running) in self.running.iter_mut().enumerate() {
            while let Some(event) = running.transfer.poll() {
                match event {
                    TransferEvent::Progress(fraction) => {
                        let progress = fraction.clamp(0.0, 1.0);
                        if let Some(item) = self.items.iter_mut().find(|i| i.id == running.id) {
                            item.state = UploadState::Uploading { progress };
                        }
                    }
                    TransferEvent::Done(result) => {
                        done.push((idx, result));
                        break;
                    }
                }
            }
        }

        for (idx, result) in done.into_iter().rev() {
            let running = self.running.remove(idx);
            self.finish(running.id, result, ctx, now);
        }

        self.pump(sink);

        let open = self.batch.total > 0 || self.batch.failed > 0;
        if open && self.queue.is_empty() && self.running.is_empty() {
            let batch = std::mem::take(&mut self.batch);
            let summary = BatchSummary {
                succeeded: batch.succeeded,
                failed: batch.failed,
                reload: batch.succeeded > 0,
            };
            if summary.failed == 0 {
                ctx.notifier
                    .success("Alle Dateien wurden erfolgreich hochgeladen", now);
            }
            tracing::info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                "upload batch finished"
            );
            return Some(summary);
        }
        None
    }

    fn finish(&mut self, id: u64, result: Result<UploadReport>, ctx: &mut UiContext, now: u64) {
        let name = self
            .items
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.name.clone())
            .unwrap_or_default();

        let state = match result {
            Ok(report) if report.errors.is_empty() => {
                let records = report.success.iter().map(|f| f.records).sum();
                tracing::info!(file = %name, records, "upload succeeded");
                UploadState::Succeeded { records }
            }
            Ok(report) => {
                let error = report
                    .errors
                    .iter()
                    .map(|e| e.error.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                UploadState::Failed { error }
            }
            Err(e) => UploadState::Failed {
                error: format!("{e:#}"),
            },
        };

        self.batch.finished += 1;
        if let UploadState::Failed { error } = &state {
            tracing::warn!(file = %name, %error, "upload failed");
            ctx.notifier.error(format!("Fehler bei {name}: {error}"), now);
            self.batch.failed += 1;
        } else {
            self.batch.succeeded += 1;
        }
        self.set_state(id, state);
    }

    /// Drop a finished or still waiting item from the list. Running items
    /// stay until their transfer ends.
    pub fn remove(&mut self, id: u64) -> bool {
        let Some(pos) = self.items.iter().position(|i| i.id == id) else {
            return false;
        };
        match self.items[pos].state {
            UploadState::Validated => {
                self.queue.retain(|q| *q != id);
                self.files.retain(|(fid, _)| *fid != id);
                self.batch.total -= 1;
            }
            UploadState::Succeeded { .. } | UploadState::Failed { .. } => {}
            _ => return false,
        }
        self.items.remove(pos);
        true
    }

    fn set_state(&mut self, id: u64, state: UploadState) {
        if let Some(item) = self.items.iter_mut().find(|i| i.id == id) {
            item.state = state;
        }
    }

    /// Overall progress of the current batch in percent: finished files
    /// count fully, running files by their fraction, queued ones as zero.
    pub fn progress(&self) -> u8 {
        if self.batch.total == 0 {
            return 0;
        }
        let in_flight: f64 = self
            .running
            .iter()
            .filter_map(|r| self.items.iter().find(|i| i.id == r.id))
            .map(|item| match item.state {
                UploadState::Uploading { progress } => progress,
                _ => 0.0,
            })
            .sum();
        let done = self.batch.finished as f64 + in_flight;
        ((done / self.batch.total as f64) * 100.0).round().min(100.0) as u8
    }

    pub fn items(&self) -> &[UploadItem] {
        &self.items
    }

    pub fn item(&self, id: u64) -> Option<&UploadItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Highest number of simultaneous transfers seen so far.
    pub fn peak_running(&self) -> usize {
        self.peak_running
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty()
    }
}
