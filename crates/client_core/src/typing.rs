use std::time::{Duration, Instant};

use shared::domain::ConsultationId;
use tracing::debug;

#[derive(Debug, Clone)]
struct TypingEntry {
    user_name: String,
    refreshed_at: Instant,
}

#[derive(Debug, Clone)]
pub struct TypingTracker {
    consultation_id: Option<ConsultationId>,
    entries: Vec<TypingEntry>,
    expiry: Option<Duration>,
}

impl TypingTracker {
    pub fn new(expiry: Option<Duration>) -> Self {
        Self {
            consultation_id: None,
            entries: Vec::new(),
            expiry,
        }
    }

    pub fn active(&self) -> Option<&ConsultationId> {
        self.consultation_id.as_ref()
    }

    pub fn activate(&mut self, consultation_id: Option<ConsultationId>) {
        self.consultation_id = consultation_id;
        self.entries.clear();
    }

    pub fn start(
        &mut self,
        consultation_id: Option<&ConsultationId>,
        user_name: &str,
        now: Instant,
    ) -> bool {
        if !self.accepts(consultation_id) || user_name.is_empty() {
            return false;
        }
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.user_name == user_name)
        {
            entry.refreshed_at = now;
            return false;
        }
        self.entries.push(TypingEntry {
            user_name: user_name.to_string(),
            refreshed_at: now,
        });
        true
    }

    pub fn stop(&mut self, consultation_id: Option<&ConsultationId>, user_name: &str) -> bool {
        if !self.accepts(consultation_id) {
            return false;
        }
        let before = self.entries.len();
        self.entries.retain(|entry| entry.user_name != user_name);
        before != self.entries.len()
    }

    pub fn expire(&mut self, now: Instant) -> bool {
        let Some(expiry) = self.expiry else {
            return false;
        };
        let before = self.entries.len();
        self.entries.retain(|entry| {
            let keep = now.saturating_duration_since(entry.refreshed_at) < expiry;
            if !keep {
                debug!(user_name = %entry.user_name, "typing: expired stale indicator");
            }
            keep
        });
        before != self.entries.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.user_name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn accepts(&self, consultation_id: Option<&ConsultationId>) -> bool {
        match (&self.consultation_id, consultation_id) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(active), Some(incoming)) => active == incoming,
        }
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
