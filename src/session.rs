use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::mailer::{EmailProvider, SenderConfig};
use crate::models::SendOutcome;
use crate::pipeline::PipelineReport;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub report: PipelineReport,
    pub party_size: u32,
    pub radius_m: u32,
    pub sender_email: Option<String>,
    pub provider: Option<EmailProvider>,
    pub sender: Option<SenderConfig>,
    pub outcomes: Vec<SendOutcome>,
    pub flash: Option<Flash>,
    pub touched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flash {
    Info(String),
    Error(String),
}

const MAX_TTL_MINUTES: i64 = 60 * 24 * 30;

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes.clamp(1, MAX_TTL_MINUTES)),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(&self, report: PipelineReport, party_size: u32, radius_m: u32) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let session = Session {
            id: id.clone(),
            report,
            party_size,
            radius_m,
            sender_email: None,
            provider: None,
            sender: None,
            outcomes: Vec::new(),
            flash: None,
            touched_at: Utc::now(),
        };
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        prune(&mut sessions, self.ttl, Utc::now());
        sessions.insert(id.clone(), session);
        tracing::debug!(session = %id, live = sessions.len(), "session created");
        id
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        prune(&mut sessions, self.ttl, Utc::now());
        let session = sessions.get_mut(id)?;
        session.touched_at = Utc::now();
        Some(session.clone())
    }

    pub fn update<F, T>(&self, id: &str, change: F) -> Option<T>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        let session = sessions.get_mut(id)?;
        session.touched_at = Utc::now();
        Some(change(session))
    }

    pub fn take_flash(&self, id: &str) -> Option<Flash> {
        self.update(id, |session| session.flash.take()).flatten()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn age(&self, id: &str, by: Duration) {
        if let Some(session) = self.sessions.lock().expect("session mutex poisoned").get_mut(id) {
            session.touched_at -= by;
        }
    }
}

fn prune(sessions: &mut HashMap<String, Session>, ttl: Duration, now: DateTime<Utc>) {
    let before = sessions.len();
    sessions.retain(|_, session| now - session.touched_at < ttl);
    let dropped = before - sessions.len();
    if dropped > 0 {
        tracing::debug!(dropped, "expired sessions pruned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventInfo;

    fn report() -> PipelineReport {
        PipelineReport {
            url: "https://example.org/event".to_string(),
            event: EventInfo::default(),
            restaurants: Vec::new(),
            drafts: Vec::new(),
            notes: Vec::new(),
        }
    }

    #[test]
    fn create_and_update() {
        let store = SessionStore::new(60);
        let id = store.create(report(), 4, 2000);
        assert_eq!(store.len(), 1);

        let flashed = store.update(&id, |session| {
            session.flash = Some(Flash::Info("saved".to_string()));
            session.party_size
        });
        assert_eq!(flashed, Some(4));
        assert_eq!(store.take_flash(&id), Some(Flash::Info("saved".to_string())));
        assert_eq!(store.take_flash(&id), None);
        assert!(store.update("missing", |_| ()).is_none());
    }

    #[test]
    fn expired_sessions_are_pruned() {
        let store = SessionStore::new(30);
        let old = store.create(report(), 2, 500);
        store.age(&old, Duration::minutes(31));
        let fresh = store.create(report(), 2, 500);

        assert!(store.get(&old).is_none());
        assert!(store.get(&fresh).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ttl_is_kept_within_bounds() {
        assert_eq!(SessionStore::new(i64::MAX).ttl, Duration::minutes(MAX_TTL_MINUTES));
        assert_eq!(SessionStore::new(-5).ttl, Duration::minutes(1));
    }
}
