use crate::config::AppConfig;
use crate::errors::{PaymentErrorKind, ServiceError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Classified failure from the payment gateway.
///
/// `Network` covers timeouts and transport failures and is retryable;
/// `Card` is a definitive decline; `Configuration` means the integration
/// itself is broken and is surfaced as an operator alert.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("card error: {0}")]
    Card(String),
    #[error("gateway configuration error: {0}")]
    Configuration(String),
    #[error("gateway network error: {0}")]
    Network(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        let (kind, message) = match &err {
            GatewayError::Card(m) => (PaymentErrorKind::CardError, m.clone()),
            GatewayError::Configuration(m) => {
                // Operator-facing alert; a decline is not.
                error!("Payment gateway misconfigured: {}", m);
                (PaymentErrorKind::ConfigurationError, m.clone())
            }
            GatewayError::Network(m) => (PaymentErrorKind::NetworkError, m.clone()),
        };
        ServiceError::PaymentFailed { kind, message }
    }
}

/// Gateway-side intent for an authorization-in-progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// External-collaborator interface to the payment gateway. The core only
/// depends on this trait; gateway-specific wire details stay behind it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        metadata: serde_json::Value,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn confirm_intent(&self, intent_id: &str) -> Result<(), GatewayError>;

    /// Refund an intent, fully when `amount` is `None`.
    async fn refund(&self, intent_id: &str, amount: Option<Decimal>) -> Result<(), GatewayError>;
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: GatewayErrorDetails,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetails {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: String,
}

/// REST client for the hosted gateway. Amounts go over the wire in minor
/// units, the way card processors expect them.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.payment_gateway_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.payment_gateway_url.trim_end_matches('/').to_string(),
            api_key: config.payment_gateway_api_key.clone(),
        }
    }

    pub fn from_config(config: Arc<AppConfig>) -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new(&config))
    }

    fn api_key(&self) -> Result<&str, GatewayError> {
        self.api_key.as_deref().ok_or_else(|| {
            GatewayError::Configuration("payment_gateway_api_key is not set".to_string())
        })
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, GatewayError> {
        let key = self.api_key()?;
        let url = format!("{}{}", self.base_url, path);

        self.client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    GatewayError::Network(format!("gateway unreachable: {}", e))
                } else {
                    GatewayError::Network(e.to_string())
                }
            })
    }

    /// Maps a non-2xx gateway response onto the error taxonomy.
    async fn classify_failure(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if let Ok(parsed) = serde_json::from_str::<GatewayErrorBody>(&body) {
            return match parsed.error.error_type.as_str() {
                "card_error" => GatewayError::Card(parsed.error.message),
                "authentication_error" | "invalid_request_error" => {
                    GatewayError::Configuration(parsed.error.message)
                }
                _ => GatewayError::Network(parsed.error.message),
            };
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            GatewayError::Configuration(format!("gateway rejected credentials ({})", status))
        } else if status.is_client_error() {
            GatewayError::Card(format!("payment rejected ({})", status))
        } else {
            GatewayError::Network(format!("gateway error ({})", status))
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, metadata))]
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        metadata: serde_json::Value,
    ) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .post(
                "/payment_intents",
                serde_json::json!({
                    "amount": to_minor_units(amount),
                    "currency": currency.to_lowercase(),
                    "metadata": metadata,
                }),
            )
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        let intent: IntentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Network(format!("malformed gateway response: {}", e)))?;

        Ok(PaymentIntent {
            intent_id: intent.id,
            client_secret: intent.client_secret,
        })
    }

    #[instrument(skip(self))]
    async fn confirm_intent(&self, intent_id: &str) -> Result<(), GatewayError> {
        let response = self
            .post(
                &format!("/payment_intents/{}/confirm", intent_id),
                serde_json::json!({}),
            )
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn refund(&self, intent_id: &str, amount: Option<Decimal>) -> Result<(), GatewayError> {
        let mut body = serde_json::json!({ "payment_intent": intent_id });
        if let Some(amount) = amount {
            body["amount"] = serde_json::json!(to_minor_units(amount));
        }

        let response = self.post("/refunds", body).await?;

        if !response.status().is_success() {
            let err = Self::classify_failure(response).await;
            warn!(intent_id, error = %err, "Refund request failed");
            return Err(err);
        }
        Ok(())
    }
}

/// Converts a decimal amount to integer minor units (cents).
fn to_minor_units(amount: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .unwrap_or(0)
        .max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(31.99)), 3199);
        assert_eq!(to_minor_units(dec!(0.01)), 1);
        assert_eq!(to_minor_units(Decimal::ZERO), 0);
        // Sub-cent precision rounds to the nearest cent
        assert_eq!(to_minor_units(dec!(10.005)), 1001);
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        );
        let gateway = HttpPaymentGateway::new(&cfg);

        let err = gateway.api_key().unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn gateway_errors_map_to_classified_service_errors() {
        let card: ServiceError = GatewayError::Card("declined".into()).into();
        assert!(matches!(
            card,
            ServiceError::PaymentFailed {
                kind: PaymentErrorKind::CardError,
                ..
            }
        ));

        let network: ServiceError = GatewayError::Network("timeout".into()).into();
        assert!(matches!(
            network,
            ServiceError::PaymentFailed {
                kind: PaymentErrorKind::NetworkError,
                ..
            }
        ));

        let config: ServiceError = GatewayError::Configuration("no key".into()).into();
        assert!(matches!(
            config,
            ServiceError::PaymentFailed {
                kind: PaymentErrorKind::ConfigurationError,
                ..
            }
        ));
    }
}
