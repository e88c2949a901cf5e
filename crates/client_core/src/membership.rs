use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::{domain::ConsultationId, protocol::ClientFrame};
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;

pub struct ChannelMembership {
    connection: Arc<ConnectionManager>,
    active: Mutex<Option<ConsultationId>>,
}

impl ChannelMembership {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            active: Mutex::new(None),
        }
    }

    pub fn active(&self) -> Option<ConsultationId> {
        self.lock_active().clone()
    }

    pub fn join(&self, consultation_id: &ConsultationId) -> bool {
        *self.lock_active() = Some(consultation_id.clone());
        self.send_join(consultation_id)
    }

    pub fn leave(&self, consultation_id: &ConsultationId) -> bool {
        {
            let mut active = self.lock_active();
            if active.as_ref() == Some(consultation_id) {
                *active = None;
            }
        }
        if !self.connection.is_connected() {
            debug!(%consultation_id, "membership: leave not sent, relay offline");
            return false;
        }
        match self
            .connection
            .emit(&ClientFrame::LeaveConsultation(consultation_id.clone()))
        {
            Ok(()) => {
                info!(%consultation_id, "membership: left consultation");
                true
            }
            Err(err) => {
                warn!(%consultation_id, "membership: leave failed: {err}");
                false
            }
        }
    }

    pub fn switch_to(&self, next: Option<&ConsultationId>) {
        let previous = self.active();
        if previous.as_ref() == next && next.is_some() {
            return;
        }
        if let Some(previous) = previous {
            self.leave(&previous);
        }
        if let Some(next) = next {
            self.join(next);
        }
    }

    pub fn rejoin(&self) -> bool {
        match self.active() {
            Some(consultation_id) => self.send_join(&consultation_id),
            None => false,
        }
    }

    fn send_join(&self, consultation_id: &ConsultationId) -> bool {
        let state = self.connection.state();
        if !self.connection.is_connected() {
            warn!(%consultation_id, %state, "membership: join skipped, relay not connected");
            return false;
        }
        match self
            .connection
            .emit(&ClientFrame::JoinConsultation(consultation_id.clone()))
        {
            Ok(()) => {
                info!(%consultation_id, "membership: joined consultation");
                true
            }
            Err(err) => {
                warn!(%consultation_id, "membership: join failed: {err}");
                false
            }
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ConsultationId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/membership_tests.rs"]
mod tests;
