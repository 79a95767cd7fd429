use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditLog;
use crate::error::{ErrorKind, Outcome};
use crate::promotions::PromotionSuggestion;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint answered {0}")]
    Status(StatusCode),
}

#[derive(Debug, Serialize)]
struct PromotionPayload<'a> {
    id_cliente: &'a str,
    promociones_sugeridas: &'a [String],
}

#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failures: Vec<(String, String)>,
}

impl DeliveryReport {
    /// Sent count, or a delivery error when nothing went through.
    pub fn outcome(&self) -> Outcome<usize> {
        match (self.sent, self.failures.first()) {
            (0, Some((id, reason))) => Outcome::error(
                ErrorKind::Delivery,
                format!("{} deliveries failed, first {id}: {reason}", self.failures.len()),
            ),
            (0, None) => Outcome::Empty("no promotions to deliver".to_string()),
            (sent, _) => Outcome::Ok(sent),
        }
    }
}

/// Posts suggested promotions to the external CRM workflow. Each suggestion
/// is one request; failures are reported per item and never retried.
pub struct Notifier {
    client: reqwest::Client,
    endpoint: String,
}

impl Notifier {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub async fn send(&self, suggestion: &PromotionSuggestion) -> Result<(), NotifyError> {
        let payload = PromotionPayload {
            id_cliente: &suggestion.id_cliente,
            promociones_sugeridas: &suggestion.promociones_sugeridas,
        };
        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(NotifyError::Status(status)),
        }
    }

    pub async fn deliver_all(
        &self,
        suggestions: &[PromotionSuggestion],
        audit: &mut AuditLog,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for suggestion in suggestions {
            match self.send(suggestion).await {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    audit.failure(format!(
                        "promotion delivery failed for customer {}: {err}",
                        suggestion.id_cliente
                    ));
                    report
                        .failures
                        .push((suggestion.id_cliente.clone(), err.to_string()));
                }
            }
        }
        audit.success(format!(
            "{} promotions delivered to {}",
            report.sent, self.endpoint
        ));
        report
    }
}
