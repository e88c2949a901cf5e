use serde::{Deserialize, Serialize};

use crate::{
    domain::{Consultation, ConsultationId, Message, MessageId, SenderType, UserId},
    error::RelayError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    JoinConsultation(ConsultationId),
    LeaveConsultation(ConsultationId),
    SendMessage(OutgoingMessage),
    TypingStart(TypingStart),
    TypingStop(TypingStop),
}

impl ClientFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinConsultation(_) => "join-consultation",
            Self::LeaveConsultation(_) => "leave-consultation",
            Self::SendMessage(_) => "send-message",
            Self::TypingStart(_) => "typing-start",
            Self::TypingStop(_) => "typing-stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub consultation_id: ConsultationId,
    pub sender_id: UserId,
    pub sender_type: SenderType,
    pub body: String,
    pub sender_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStart {
    pub consultation_id: ConsultationId,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStop {
    pub consultation_id: ConsultationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RelayEvent {
    NewMessage(Message),
    MessageSent(MessageAck),
    MessageError(RelayError),
    UserTyping(TypingNotice),
    UserStoppedTyping(TypingNotice),
    JoinedConsultation(MembershipAck),
    LeftConsultation(MembershipAck),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultation_id: Option<ConsultationId>,
    pub user_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultation_id: Option<ConsultationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    pub sender_id: UserId,
    pub sender_type: SenderType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationHistory {
    pub consultation: Consultation,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_use_relay_event_names() {
        let frame = ClientFrame::JoinConsultation(ConsultationId::from("c1"));
        let json = serde_json::to_value(&frame).expect("encode");
        assert_eq!(json["event"], "join-consultation");
        assert_eq!(json["data"], "c1");

        let frame = ClientFrame::TypingStart(TypingStart {
            consultation_id: ConsultationId::from("c1"),
            user_name: "Ali".into(),
        });
        let json = serde_json::to_value(&frame).expect("encode");
        assert_eq!(json["event"], frame.event_name());
        assert_eq!(json["data"]["userName"], "Ali");
        assert_eq!(json["data"]["consultationId"], "c1");
    }

    #[test]
    fn decodes_typing_notice_without_consultation_id() {
        let raw = r#"{"event":"user-stopped-typing","data":{"userName":"Ali"}}"#;
        let event: RelayEvent = serde_json::from_str(raw).expect("decode");
        assert_eq!(
            event,
            RelayEvent::UserStoppedTyping(TypingNotice {
                consultation_id: None,
                user_name: "Ali".into(),
            })
        );
    }

    #[test]
    fn decodes_message_error_payload() {
        let raw = r#"{"event":"message-error","data":{"error":"consultation closed"}}"#;
        let event: RelayEvent = serde_json::from_str(raw).expect("decode");
        assert_eq!(
            event,
            RelayEvent::MessageError(RelayError {
                error: "consultation closed".into(),
            })
        );
    }

    #[test]
    fn fallback_request_uses_backend_field_names() {
        let request = SendMessageRequest {
            message: "Offer accepted".into(),
            sender_id: UserId::from("u1"),
            sender_type: SenderType::Client,
        };
        let json = serde_json::to_value(&request).expect("encode");
        assert_eq!(json["message"], "Offer accepted");
        assert_eq!(json["sender_id"], "u1");
        assert_eq!(json["sender_type"], "client");
    }
}
