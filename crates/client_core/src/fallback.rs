use std::sync::Arc;

use shared::{
    domain::{ConsultationId, Message, Participant},
    protocol::SendMessageRequest,
};
use tracing::{info, warn};

use crate::{backend::MessageBackend, error::SendError};

pub struct FallbackSender {
    backend: Arc<dyn MessageBackend>,
}

impl FallbackSender {
    pub fn new(backend: Arc<dyn MessageBackend>) -> Self {
        Self { backend }
    }

    pub async fn send(
        &self,
        consultation_id: &ConsultationId,
        sender: &Participant,
        body: &str,
    ) -> Result<Message, SendError> {
        let request = SendMessageRequest {
            message: body.to_string(),
            sender_id: sender.user_id.clone(),
            sender_type: sender.sender_type,
        };
        info!(%consultation_id, "fallback: sending over http");
        match self.backend.send_message(consultation_id, &request).await {
            Ok(message) => Ok(message),
            Err(source) => {
                warn!(%consultation_id, "fallback: send failed: {source}");
                Err(SendError::Fallback {
                    restored_body: body.to_string(),
                    source,
                })
            }
        }
    }
}
