//! HTTP client for the hosted-checkout payment API.

use super::{
    ChargeRequest, GatewayError, PAYMENT_EXPIRY_MINUTES, PaymentGateway, PaymentSession,
    StatusSnapshot,
};
use crate::config::GatewayConfig;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

const SANDBOX_CHECKOUT_URL: &str = "https://app.sandbox.midtrans.com/snap/v1/transactions";
const PRODUCTION_CHECKOUT_URL: &str = "https://app.midtrans.com/snap/v1/transactions";
const SANDBOX_API_URL: &str = "https://api.sandbox.midtrans.com/v2";
const PRODUCTION_API_URL: &str = "https://api.midtrans.com/v2";

/// Hosted-checkout gateway client.
#[derive(Clone)]
pub struct SnapGateway {
    client: Client,
    server_key: String,
    checkout_url: String,
    api_url: String,
    finish_url: Option<String>,
    error_url: Option<String>,
}

impl std::fmt::Debug for SnapGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapGateway")
            .field("checkout_url", &self.checkout_url)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl SnapGateway {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the HTTP client cannot be built.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let (checkout_url, api_url) = if config.production {
            (PRODUCTION_CHECKOUT_URL, PRODUCTION_API_URL)
        } else {
            (SANDBOX_CHECKOUT_URL, SANDBOX_API_URL)
        };
        Ok(Self {
            client,
            server_key: config.server_key.clone(),
            checkout_url: checkout_url.to_string(),
            api_url: api_url.to_string(),
            finish_url: config.finish_url.clone(),
            error_url: config.error_url.clone(),
        })
    }

    fn charge_body(&self, request: &ChargeRequest) -> serde_json::Value {
        let mut body = json!({
            "transaction_details": {
                "order_id": request.order_id,
                "gross_amount": request.amount.as_major(),
            },
            "customer_details": {
                "first_name": request.customer.name,
                "email": request.customer.email,
            },
            "item_details": [{
                "id": request.item.id,
                "name": request.item.name,
                "price": request.item.price.as_major(),
                "quantity": request.item.quantity,
            }],
            "expiry": {
                "unit": "minute",
                "duration": PAYMENT_EXPIRY_MINUTES,
            },
        });
        if let Some(method) = &request.payment_method {
            body["enabled_payments"] = json!([method]);
        }
        if self.finish_url.is_some() || self.error_url.is_some() {
            body["callbacks"] = json!({
                "finish": self.finish_url,
                "error": self.error_url,
            });
        }
        body
    }

    fn classify_send_error(err: &reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl PaymentGateway for SnapGateway {
    fn create_payment(
        &self,
        request: ChargeRequest,
    ) -> BoxFuture<'_, Result<PaymentSession, GatewayError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.checkout_url)
                .basic_auth(&self.server_key, Some(""))
                .header("accept", "application/json")
                .json(&self.charge_body(&request))
                .send()
                .await
                .map_err(|e| Self::classify_send_error(&e))?;

            match response.status() {
                StatusCode::OK | StatusCode::CREATED => response
                    .json::<PaymentSession>()
                    .await
                    .map_err(|e| GatewayError::Decode(e.to_string())),
                status => {
                    let body = response.text().await.unwrap_or_default();
                    tracing::warn!(
                        order_id = %request.order_id,
                        status = status.as_u16(),
                        "Gateway refused payment session"
                    );
                    Err(GatewayError::Rejected {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
        })
    }

    fn transaction_status(
        &self,
        order_id: &str,
    ) -> BoxFuture<'_, Result<StatusSnapshot, GatewayError>> {
        let url = format!("{}/{order_id}/status", self.api_url);
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .basic_auth(&self.server_key, Some(""))
                .header("accept", "application/json")
                .send()
                .await
                .map_err(|e| Self::classify_send_error(&e))?;

            match response.status() {
                StatusCode::OK => response
                    .json::<StatusSnapshot>()
                    .await
                    .map_err(|e| GatewayError::Decode(e.to_string())),
                status => Err(GatewayError::Rejected {
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                }),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gateway::{Customer, LineItem};
    use crate::types::Money;

    fn config(production: bool) -> GatewayConfig {
        GatewayConfig {
            server_key: "server-key".to_string(),
            client_key: "client-key".to_string(),
            production,
            timeout: 30,
            finish_url: Some("https://app.example/finish".to_string()),
            error_url: None,
            mock: false,
        }
    }

    fn request(payment_method: Option<&str>) -> ChargeRequest {
        ChargeRequest {
            order_id: "ticket-1700000000".to_string(),
            amount: Money::from_cents(15_000_000),
            customer: Customer {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
            },
            item: LineItem {
                id: "event-1".to_string(),
                name: "Rust Meetup".to_string(),
                price: Money::from_cents(15_000_000),
                quantity: 1,
            },
            payment_method: payment_method.map(str::to_string),
        }
    }

    #[test]
    fn sandbox_unless_production() {
        let sandbox = SnapGateway::from_config(&config(false)).unwrap();
        assert!(sandbox.checkout_url.contains("sandbox"));
        let production = SnapGateway::from_config(&config(true)).unwrap();
        assert!(!production.api_url.contains("sandbox"));
    }

    #[test]
    fn charge_body_carries_expiry_item_and_callbacks() {
        let gateway = SnapGateway::from_config(&config(false)).unwrap();
        let body = gateway.charge_body(&request(Some("gopay")));

        assert_eq!(body["transaction_details"]["order_id"], "ticket-1700000000");
        assert_eq!(body["transaction_details"]["gross_amount"], 150_000.0);
        assert_eq!(body["item_details"][0]["quantity"], 1);
        assert_eq!(body["expiry"]["duration"], 60);
        assert_eq!(body["enabled_payments"][0], "gopay");
        assert_eq!(body["callbacks"]["finish"], "https://app.example/finish");
    }

    #[test]
    fn charge_body_without_method_hint_allows_all() {
        let gateway = SnapGateway::from_config(&config(false)).unwrap();
        let body = gateway.charge_body(&request(None));
        assert!(body.get("enabled_payments").is_none());
    }
}
