//! Explicit UI state handed to the engine components.
//!
//! Everything a browser would keep in `window`/`document` globals lives
//! here: the viewport geometry, client-local storage and the transient
//! message area.

use super::storage::FilterStore;

/// How long a notification stays up unless dismissed.
pub const NOTICE_TTL_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Visible area of the document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    /// Vertical scroll offset of the document.
    pub scroll_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            scroll_y: 0.0,
        }
    }
}

/// Element box in viewport coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(top: f64, left: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Error,
    Success,
}

/// One transient, dismissable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
    pub expires_at: u64,
}

/// Message area. Notices expire [`NOTICE_TTL_MS`] after they were raised.
#[derive(Debug, Default)]
pub struct Notifier {
    next_id: u64,
    notices: Vec<Notice>,
}

impl Notifier {
    pub fn error(&mut self, message: impl Into<String>, now: u64) -> u64 {
        self.push(NoticeLevel::Error, message.into(), now)
    }

    pub fn success(&mut self, message: impl Into<String>, now: u64) -> u64 {
        self.push(NoticeLevel::Success, message.into(), now)
    }

    fn push(&mut self, level: NoticeLevel, message: String, now: u64) -> u64 {
        self.next_id += 1;
        match level {
            NoticeLevel::Error => tracing::warn!(%message, "error notice"),
            NoticeLevel::Success => tracing::info!(%message, "success notice"),
        }
        self.notices.push(Notice {
            id: self.next_id,
            level,
            message,
            expires_at: now + NOTICE_TTL_MS,
        });
        self.next_id
    }

    /// Remove a notice before it expires. Returns whether it was shown.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    /// Drop expired notices.
    pub fn expire(&mut self, now: u64) {
        self.notices.retain(|n| n.expires_at > now);
    }

    /// Notices still on screen at `now`.
    pub fn active(&self, now: u64) -> Vec<&Notice> {
        self.notices.iter().filter(|n| n.expires_at > now).collect()
    }

    /// Every notice not yet expired or dismissed.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn latest_error(&self) -> Option<&Notice> {
        self.notices
            .iter()
            .rev()
            .find(|n| n.level == NoticeLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// UI state shared by all components of one browser session.
pub struct UiContext {
    pub viewport: Viewport,
    pub storage: Box<dyn FilterStore>,
    pub notifier: Notifier,
}

impl UiContext {
    pub fn new(viewport: Viewport, storage: Box<dyn FilterStore>) -> Self {
        Self {
            viewport,
            storage,
            notifier: Notifier::default(),
        }
    }
}

impl std::fmt::Debug for UiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiContext")
            .field("viewport", &self.viewport)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}
