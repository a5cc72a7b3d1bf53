//! # Visitor Sessions
//!
//! Tracks where each visitor is in the booth flow so steps that arrive out of order
//! are rejected instead of acting on stale inputs.
//!
//! ## Stages
//!
//! ```text
//! Identified → LayoutChosen → Captured → Composed → Notified
//! ```
//!
//! Each step names the minimum stage it needs. Going back is always allowed:
//! choosing a layout again restarts from `LayoutChosen`, a retake drops back to
//! `LayoutChosen`, and a new capture after composing restarts from `Captured`.
//!
//! Requests that carry no visitor id bypass the tracker entirely.

use std::{
    collections::HashMap,
    fmt,
    sync::Mutex,
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{BoothError, BoothResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStage {
    Identified,
    LayoutChosen,
    Captured,
    Composed,
    Notified,
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStage::Identified => "identified",
            SessionStage::LayoutChosen => "layout chosen",
            SessionStage::Captured => "captured",
            SessionStage::Composed => "composed",
            SessionStage::Notified => "notified",
        };
        f.write_str(name)
    }
}

/// Public view of one visitor's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub visitor_id: Uuid,
    pub email: String,
    pub stage: SessionStage,
    pub layout_id: Option<String>,
    pub capture: Option<String>,
    pub final_image_url: Option<String>,
}

struct Entry {
    snapshot: SessionSnapshot,
    touched: Instant,
}

/// Per-visitor stage table with idle expiry.
pub struct SessionTracker {
    ttl: Duration,
    sessions: Mutex<HashMap<Uuid, Entry>>,
}

impl SessionTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin (or restart) a visitor's session at `Identified`.
    pub fn start(&self, visitor_id: Uuid, email: &str) -> SessionSnapshot {
        let snapshot = SessionSnapshot {
            visitor_id,
            email: email.to_string(),
            stage: SessionStage::Identified,
            layout_id: None,
            capture: None,
            final_image_url: None,
        };
        self.lock().insert(
            visitor_id,
            Entry {
                snapshot: snapshot.clone(),
                touched: Instant::now(),
            },
        );
        snapshot
    }

    pub fn contains(&self, visitor_id: Uuid) -> bool {
        self.lock().contains_key(&visitor_id)
    }

    pub fn get(&self, visitor_id: Uuid) -> BoothResult<SessionSnapshot> {
        self.lock()
            .get(&visitor_id)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| no_session(visitor_id))
    }

    /// Fail with a `State` error unless the visitor has reached `required`.
    pub fn require(&self, visitor_id: Uuid, required: SessionStage, operation: &str) -> BoothResult<SessionSnapshot> {
        let snapshot = self.get(visitor_id)?;
        if snapshot.stage < required {
            return Err(out_of_order(visitor_id, snapshot.stage, required, operation));
        }
        Ok(snapshot)
    }

    pub fn choose_layout(&self, visitor_id: Uuid, layout_id: &str) -> BoothResult<SessionSnapshot> {
        self.advance(visitor_id, SessionStage::Identified, "choose a layout", |s| {
            s.stage = SessionStage::LayoutChosen;
            s.layout_id = Some(layout_id.to_string());
            s.capture = None;
            s.final_image_url = None;
        })
    }

    pub fn record_capture(&self, visitor_id: Uuid, capture: &str) -> BoothResult<SessionSnapshot> {
        self.advance(visitor_id, SessionStage::LayoutChosen, "fetch a capture", |s| {
            s.stage = SessionStage::Captured;
            s.capture = Some(capture.to_string());
            s.final_image_url = None;
        })
    }

    pub fn discard_capture(&self, visitor_id: Uuid) -> BoothResult<SessionSnapshot> {
        self.advance(visitor_id, SessionStage::LayoutChosen, "retake a photo", |s| {
            s.stage = SessionStage::LayoutChosen;
            s.capture = None;
            s.final_image_url = None;
        })
    }

    pub fn record_composed(
        &self,
        visitor_id: Uuid,
        layout_id: &str,
        final_image_url: &str,
    ) -> BoothResult<SessionSnapshot> {
        self.advance(visitor_id, SessionStage::Captured, "compose", |s| {
            s.stage = SessionStage::Composed;
            s.layout_id = Some(layout_id.to_string());
            s.final_image_url = Some(final_image_url.to_string());
        })
    }

    pub fn record_notified(&self, visitor_id: Uuid) -> BoothResult<SessionSnapshot> {
        self.advance(visitor_id, SessionStage::Composed, "send the photo", |s| {
            s.stage = SessionStage::Notified;
        })
    }

    fn advance(
        &self,
        visitor_id: Uuid,
        required: SessionStage,
        operation: &str,
        update: impl FnOnce(&mut SessionSnapshot),
    ) -> BoothResult<SessionSnapshot> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(&visitor_id).ok_or_else(|| no_session(visitor_id))?;
        if entry.snapshot.stage < required {
            return Err(out_of_order(visitor_id, entry.snapshot.stage, required, operation));
        }

        let from = entry.snapshot.stage;
        update(&mut entry.snapshot);
        entry.touched = Instant::now();
        debug!(%visitor_id, %from, to = %entry.snapshot.stage, "Session advanced");
        Ok(entry.snapshot.clone())
    }

    /// Forget sessions idle for longer than the TTL. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| now.saturating_duration_since(entry.touched) < self.ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn no_session(visitor_id: Uuid) -> BoothError {
    BoothError::not_found("session", format!("no active session for visitor {visitor_id}"))
        .with_recovery_suggestion("Register the visitor first")
}

fn out_of_order(visitor_id: Uuid, current: SessionStage, required: SessionStage, operation: &str) -> BoothError {
    BoothError::state(current.to_string(), operation, format!("requires {required} first"))
        .with_metadata("visitorId", visitor_id.to_string())
        .with_recovery_suggestion(hint_for(required))
}

fn hint_for(required: SessionStage) -> &'static str {
    match required {
        SessionStage::Identified => "Register the visitor first",
        SessionStage::LayoutChosen => "Choose a layout first",
        SessionStage::Captured => "Take a photo first",
        SessionStage::Composed => "Create the final image first",
        SessionStage::Notified => "Send the photo first",
    }
}
