//! HTTP implementations of the row source and the upload sink.
//!
//! Every request runs on its own thread and reports back over a channel;
//! the engine drains the channel when it ticks.

use std::io::{Cursor, Read};
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::{Context, Result, bail};
use reqwest::blocking::multipart::{Form, Part};

use crate::web::UploadReport;

use super::table::{Page, PageResult, RowSource};
use super::upload::{Transfer, TransferEvent, UploadFile, UploadSink};

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// Fetch one page synchronously.
pub fn fetch_page(base_url: &str, page: u32) -> Result<Page> {
    let url = endpoint(base_url, "/api/studies");
    let resp = ureq::get(&url)
        .query("page", &page.to_string())
        .call()
        .with_context(|| format!("GET {url}?page={page} failed"))?;
    resp.into_json::<Page>()
        .context("failed to parse study page")
}

/// Pages from `GET {base}/api/studies`.
#[derive(Debug)]
pub struct HttpRowSource {
    base_url: String,
    tx: Sender<PageResult>,
    rx: Receiver<PageResult>,
}

impl HttpRowSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            base_url: base_url.into(),
            tx,
            rx,
        }
    }
}

impl RowSource for HttpRowSource {
    fn request(&mut self, page: u32) {
        let base_url = self.base_url.clone();
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("rad-page-{page}"))
            .spawn(move || {
                let rows = fetch_page(&base_url, page);
                // receiver gone means the session ended
                let _ = tx.send(PageResult { page, rows });
            });

        if let Err(e) = spawned {
            let _ = self.tx.send(PageResult {
                page,
                rows: Err(anyhow::Error::from(e).context("failed to spawn page fetch")),
            });
        }
    }

    fn poll(&mut self) -> Option<PageResult> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

/// Reader that reports the fraction consumed so far.
struct ProgressReader {
    inner: Cursor<Vec<u8>>,
    total: u64,
    tx: Sender<TransferEvent>,
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 && self.total > 0 {
            let fraction = self.inner.position() as f64 / self.total as f64;
            let _ = self.tx.send(TransferEvent::Progress(fraction));
        }
        Ok(n)
    }
}

/// Transfers to `POST {base}/api/upload`, one multipart request per file.
#[derive(Debug, Clone)]
pub struct HttpUploadSink {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpUploadSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

/// Channel end of a running HTTP transfer.
#[derive(Debug)]
pub struct HttpTransfer {
    rx: Receiver<TransferEvent>,
}

impl Transfer for HttpTransfer {
    fn poll(&mut self) -> Option<TransferEvent> {
        self.rx.try_recv().ok()
    }
}

impl UploadSink for HttpUploadSink {
    fn start(&mut self, file: &UploadFile) -> Box<dyn Transfer> {
        let (tx, rx) = mpsc::channel();
        let url = endpoint(&self.base_url, "/api/upload");
        let client = self.client.clone();
        let file = file.clone();
        let events = tx.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("rad-upload-{}", file.name))
            .spawn(move || {
                let result = send_file(&client, &url, file, events.clone());
                let _ = events.send(TransferEvent::Done(result));
            });

        if let Err(e) = spawned {
            let _ = tx.send(TransferEvent::Done(Err(
                anyhow::Error::from(e).context("failed to spawn upload")
            )));
        }
        Box::new(HttpTransfer { rx })
    }
}

fn send_file(
    client: &reqwest::blocking::Client,
    url: &str,
    file: UploadFile,
    tx: Sender<TransferEvent>,
) -> Result<UploadReport> {
    let total = file.size();
    let reader = ProgressReader {
        inner: Cursor::new(file.content),
        total,
        tx,
    };
    let part = Part::reader_with_length(reader, total)
        .file_name(file.name.clone())
        .mime_str(&file.content_type)
        .with_context(|| format!("invalid content type '{}'", file.content_type))?;
    let form = Form::new().part("files", part);

    let resp = client
        .post(url)
        .multipart(form)
        .send()
        .with_context(|| format!("POST {url} failed"))?;

    let status = resp.status();
    let body = resp.text().context("failed to read upload response")?;
    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        bail!("server answered {status}: {message}");
    }
    serde_json::from_str(&body).context("failed to parse upload response")
}
