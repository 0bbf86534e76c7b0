use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::{BankClient, BankError, BankOperation, BankRequest, BankResponse};

/// JSON-over-HTTP client for one participant's switch endpoint.
#[derive(Clone)]
pub struct HttpBankClient {
    client: Client,
    base_url: String,
}

impl HttpBankClient {
    pub fn new(base_url: String) -> Self {
        // Deadlines are enforced by the gateway; this is only a backstop.
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self { client, base_url }
    }

    pub fn with_client(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn url_for(&self, operation: BankOperation) -> String {
        let path = match operation {
            BankOperation::Debit => "debits",
            BankOperation::Credit => "credits",
            BankOperation::Reversal => "reversals",
        };
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send(&self, operation: BankOperation, request: &BankRequest) -> Result<BankResponse, BankError> {
        let response = self
            .client
            .post(self.url_for(operation))
            .header("Idempotency-Key", format!("{}:{}", request.transaction_id, operation))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BankError::Timeout(e.to_string())
                } else {
                    BankError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        // 422 carries a business decline in the same body shape as a 200.
        if !(status.is_success() || status == StatusCode::UNPROCESSABLE_ENTITY) {
            return Err(BankError::Transport(format!(
                "{} {} returned {}",
                request.bank_code, operation, status
            )));
        }

        response
            .json::<BankResponse>()
            .await
            .map_err(|e| BankError::Transport(format!("invalid bank response: {}", e)))
    }
}

#[async_trait]
impl BankClient for HttpBankClient {
    async fn authorize_debit(&self, request: &BankRequest) -> Result<BankResponse, BankError> {
        self.send(BankOperation::Debit, request).await
    }

    async fn post_credit(&self, request: &BankRequest) -> Result<BankResponse, BankError> {
        self.send(BankOperation::Credit, request).await
    }

    async fn reverse(&self, request: &BankRequest) -> Result<BankResponse, BankError> {
        self.send(BankOperation::Reversal, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BankRequest {
        BankRequest {
            transaction_id: "T1".to_string(),
            original_transaction_id: None,
            bank_code: "HDFC".to_string(),
            account_number: "001122334455".to_string(),
            counterparty_vpa: "bob@sbi".to_string(),
            amount: 10_000,
            currency: "INR".to_string(),
            deadline: None,
        }
    }

    #[tokio::test]
    async fn approved_debit_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/debits")
            .match_header("idempotency-key", "T1:debit")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"approved":true,"bank_reference":"HDFC123"}"#)
            .create_async()
            .await;

        let client = HttpBankClient::new(server.url());
        let response = client.authorize_debit(&request()).await.unwrap();
        assert!(response.approved);
        assert_eq!(response.bank_reference.as_deref(), Some("HDFC123"));
    }

    #[tokio::test]
    async fn decline_is_a_response_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/credits")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"approved":false,"error_code":"ACCOUNT_CLOSED","error_message":"closed"}"#)
            .create_async()
            .await;

        let client = HttpBankClient::new(server.url());
        let response = client.post_credit(&request()).await.unwrap();
        assert!(!response.approved);
        assert_eq!(response.error_code.as_deref(), Some("ACCOUNT_CLOSED"));
    }

    #[tokio::test]
    async fn server_error_is_transport_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/reversals")
            .with_status(503)
            .create_async()
            .await;

        let client = HttpBankClient::new(server.url());
        let err = client.reverse(&request()).await.unwrap_err();
        assert!(matches!(err, BankError::Transport(_)));
        assert!(err.outcome_unknown());
    }

    #[tokio::test]
    async fn reversal_names_the_debit_it_undoes() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/reversals")
            .match_header("idempotency-key", "T1_REVERSAL:reversal")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"transaction_id":"T1_REVERSAL","original_transaction_id":"T1"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"approved":true,"bank_reference":"HDFCRV1"}"#)
            .create_async()
            .await;

        let reversal = BankRequest {
            transaction_id: "T1_REVERSAL".to_string(),
            original_transaction_id: Some("T1".to_string()),
            ..request()
        };
        let client = HttpBankClient::new(server.url());
        let response = client.reverse(&reversal).await.unwrap();
        assert!(response.approved);
    }
}
