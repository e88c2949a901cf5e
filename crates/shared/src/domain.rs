use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PLACEHOLDER_ID_PREFIX: &str = "temp-";

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(ConsultationId);
id_newtype!(UserId);
id_newtype!(MessageId);

impl MessageId {
    pub fn placeholder() -> Self {
        Self(format!("{PLACEHOLDER_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_ID_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Client,
    Designer,
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Designer => f.write_str("designer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Pending,
    Confirmed,
    Processing,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consultation {
    pub id: ConsultationId,
    #[serde(alias = "client_id")]
    pub client_id: UserId,
    #[serde(alias = "designer_id")]
    pub designer_id: UserId,
    #[serde(default, alias = "client_name", skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, alias = "designer_name", skip_serializing_if = "Option::is_none")]
    pub designer_name: Option<String>,
    pub status: ConsultationStatus,
    #[serde(default, alias = "project_type", skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<String>,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl Consultation {
    pub fn display_name_for(&self, sender_id: &UserId, sender_type: SenderType) -> Option<&str> {
        let name = if *sender_id == self.client_id {
            self.client_name.as_deref()
        } else if *sender_id == self.designer_id {
            self.designer_name.as_deref()
        } else {
            match sender_type {
                SenderType::Client => self.client_name.as_deref(),
                SenderType::Designer => self.designer_name.as_deref(),
            }
        };
        name.filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(alias = "consultation_id")]
    pub consultation_id: ConsultationId,
    #[serde(alias = "sender_id")]
    pub sender_id: UserId,
    #[serde(alias = "sender_type")]
    pub sender_type: SenderType,
    #[serde(alias = "message")]
    pub body: String,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "sender_name")]
    pub sender_name: String,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.id.is_placeholder()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub sender_type: SenderType,
    pub display_name: String,
}
