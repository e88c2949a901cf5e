use chrono::{DateTime, Utc};
use shared::domain::{ConsultationId, Message, MessageId, Participant};
use tracing::debug;

/// Maximum distance between an optimistic timestamp and its confirmed copy.
pub const CONFIRMATION_WINDOW_MS: i64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Confirmed { placeholder_id: MessageId },
    Appended,
    Duplicate,
    Ignored,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Appended)
    }
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    consultation_id: ConsultationId,
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new(consultation_id: ConsultationId) -> Self {
        Self {
            consultation_id,
            messages: Vec::new(),
        }
    }

    pub fn consultation_id(&self) -> &ConsultationId {
        &self.consultation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == *id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|message| message.is_pending())
    }

    pub fn seed_history(&mut self, history: impl IntoIterator<Item = Message>) -> usize {
        let mut changed = 0;
        for message in history {
            if self.merge_unsorted(message).changed() {
                changed += 1;
            }
        }
        self.sort();
        changed
    }

    pub fn insert_optimistic(
        &mut self,
        sender: &Participant,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Message {
        let message = Message {
            id: MessageId::placeholder(),
            consultation_id: self.consultation_id.clone(),
            sender_id: sender.user_id.clone(),
            sender_type: sender.sender_type,
            body: body.into(),
            created_at,
            sender_name: sender.display_name.clone(),
        };
        self.messages.push(message.clone());
        self.sort();
        message
    }

    pub fn merge_confirmed(&mut self, message: Message) -> MergeOutcome {
        let outcome = self.merge_unsorted(message);
        if outcome.changed() {
            self.sort();
        }
        outcome
    }

    pub fn discard_pending(&mut self, id: &MessageId) -> bool {
        if !id.is_placeholder() {
            return false;
        }
        let before = self.messages.len();
        self.messages.retain(|message| message.id != *id);
        before != self.messages.len()
    }

    fn merge_unsorted(&mut self, mut message: Message) -> MergeOutcome {
        if message.consultation_id != self.consultation_id {
            debug!(
                consultation_id = %self.consultation_id,
                foreign = %message.consultation_id,
                "store: ignoring message for another consultation"
            );
            return MergeOutcome::Ignored;
        }
        if self.messages.iter().any(|existing| existing.id == message.id) {
            return MergeOutcome::Duplicate;
        }
        if message.is_pending() {
            // Unconfirmed copies only enter through insert_optimistic.
            return MergeOutcome::Ignored;
        }

        if let Some(slot) = self.find_placeholder_for(&message) {
            let existing = &mut self.messages[slot];
            if message.sender_name.is_empty() {
                message.sender_name = std::mem::take(&mut existing.sender_name);
            }
            let placeholder_id = std::mem::replace(existing, message).id;
            debug!(
                consultation_id = %self.consultation_id,
                placeholder_id = %placeholder_id,
                "store: confirmed optimistic message"
            );
            return MergeOutcome::Confirmed { placeholder_id };
        }

        self.messages.push(message);
        MergeOutcome::Appended
    }

    fn find_placeholder_for(&self, confirmed: &Message) -> Option<usize> {
        self.messages.iter().position(|existing| {
            existing.is_pending()
                && existing.sender_id == confirmed.sender_id
                && existing.body == confirmed.body
                && (existing.created_at - confirmed.created_at)
                    .num_milliseconds()
                    .abs()
                    < CONFIRMATION_WINDOW_MS
        })
    }

    fn sort(&mut self) {
        // Stable, so equal timestamps keep their arrival order.
        self.messages.sort_by_key(|message| message.created_at);
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
