//! Audit and notification doubles shared by the workflow test suites.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::audit::{AuditError, AuditLogEntry, AuditTrail, EntityKind};
use crate::clock::FixedClock;
use crate::config::NotificationConfig;
use crate::notify::{Notification, NotificationDispatcher, Notifier, NotifyError};

#[derive(Default)]
pub(crate) struct MemoryAudit {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAudit {
    pub(crate) fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().expect("audit mutex poisoned").clone()
    }
}

impl AuditTrail for MemoryAudit {
    fn append(&self, entry: AuditLogEntry) -> Result<(), AuditError> {
        self.entries.lock().expect("audit mutex poisoned").push(entry);
        Ok(())
    }

    fn entries_for(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, AuditError> {
        Ok(self
            .entries()
            .into_iter()
            .filter(|entry| entry.entity_type == entity_type && entry.entity_id == entity_id)
            .collect())
    }
}

/// Records every delivered notification; can be switched into a failing mode.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub(crate) fn templates(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|notification| notification.template)
            .collect()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("sms gateway offline".to_string()));
        }
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}

pub(crate) fn dispatcher(notifier: Arc<RecordingNotifier>) -> Arc<NotificationDispatcher> {
    Arc::new(NotificationDispatcher::new(
        notifier,
        NotificationConfig::default(),
    ))
}

pub(crate) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(crate) fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(start_time()))
}

pub(crate) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
