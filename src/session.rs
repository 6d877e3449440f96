use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Number of question/answer turns kept per session.
pub const MAX_HISTORY_TURNS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub query: String,
    pub response: String,
}

/// Interactive review of one person's records.
#[derive(Debug, Clone)]
pub struct Session {
    /// Whose records are under review.
    pub subject_id: String,
    /// Rendered health data the questions are asked against.
    pub health_data: String,
    pub history: VecDeque<Turn>,
    last_used: DateTime<Utc>,
}

impl Session {
    pub fn new(subject_id: impl Into<String>, health_data: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            health_data: health_data.into(),
            history: VecDeque::new(),
            last_used: Utc::now(),
        }
    }

    pub fn history_text(&self) -> String {
        self.history
            .iter()
            .map(|t| format!("提問: {}\n回答: {}", t.query, t.response))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push_turn(&mut self, turn: Turn) {
        if self.history.len() == MAX_HISTORY_TURNS {
            self.history.pop_front();
        }
        self.history.push_back(turn);
    }
}

/// Server-side interactive sessions keyed by the reviewer's id number.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Opens (or replaces) the caller's session.
    pub async fn open(&self, owner: &str, session: Session) {
        let mut sessions = self.sessions.lock().await;
        self.evict_expired(&mut sessions);
        tracing::info!(
            "Opened interactive session for {} on {}",
            owner,
            session.subject_id
        );
        sessions.insert(owner.to_string(), session);
    }

    /// Snapshot of the caller's live session, refreshing its expiry.
    pub async fn get(&self, owner: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        self.evict_expired(&mut sessions);
        let session = sessions.get_mut(owner)?;
        session.last_used = Utc::now();
        Some(session.clone())
    }

    pub async fn record_turn(&self, owner: &str, turn: Turn) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(owner) {
            session.push_turn(turn);
            session.last_used = Utc::now();
        }
    }

    #[cfg(test)]
    pub async fn close(&self, owner: &str) -> bool {
        self.sessions.lock().await.remove(owner).is_some()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn evict_expired(&self, sessions: &mut HashMap<String, Session>) {
        let cutoff = Utc::now() - self.ttl;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_used > cutoff);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!("Evicted {} expired sessions", evicted);
        }
    }

    #[cfg(test)]
    async fn backdate(&self, owner: &str, by: Duration) {
        if let Some(s) = self.sessions.lock().await.get_mut(owner) {
            s.last_used = s.last_used - by;
        }
    }
}
