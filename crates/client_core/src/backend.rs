use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    domain::{ConsultationId, Message},
    error::ApiError,
    protocol::{ConsultationHistory, SendMessageRequest},
};

use crate::error::BackendError;

#[async_trait]
pub trait MessageBackend: Send + Sync {
    async fn fetch_history(
        &self,
        consultation_id: &ConsultationId,
    ) -> Result<ConsultationHistory, BackendError>;

    async fn send_message(
        &self,
        consultation_id: &ConsultationId,
        request: &SendMessageRequest,
    ) -> Result<Message, BackendError>;
}

pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn messages_url(&self, consultation_id: &ConsultationId) -> String {
        format!(
            "{}/consultations/{}/messages",
            self.base_url, consultation_id
        )
    }
}

#[async_trait]
impl MessageBackend for HttpBackend {
    async fn fetch_history(
        &self,
        consultation_id: &ConsultationId,
    ) -> Result<ConsultationHistory, BackendError> {
        let response = self
            .http
            .get(self.messages_url(consultation_id))
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn send_message(
        &self,
        consultation_id: &ConsultationId,
        request: &SendMessageRequest,
    ) -> Result<Message, BackendError> {
        let response = self
            .http
            .post(self.messages_url(consultation_id))
            .json(request)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .ok()
        .and_then(|api_error| api_error.describe().map(str::to_string))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body
            }
        });
    Err(BackendError::Rejected {
        status: status.as_u16(),
        message,
    })
}
