//! Payment gate.
//!
//! Business logic only sees the `PaymentGate` trait. Which implementation is
//! used is decided once, in `select_gate`, from configuration.

use crate::config::AppConfig;
use crate::error::PaymentError;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const STRIPE_API: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_secret: String,
    pub amount: u64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
    Pending,
}

pub trait PaymentGate: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_intent(
        &self,
        amount: u64,
        currency: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PaymentIntent, PaymentError>;

    /// Reports the status of an intent. Must give up after `timeout`.
    fn confirm(&self, intent_id: &str, timeout: Duration) -> Result<PaymentStatus, PaymentError>;
}

pub type SharedGate = Arc<dyn PaymentGate>;

fn random_hex(len_bytes: usize) -> String {
    let mut bytes = vec![0u8; len_bytes];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Development gate: every intent succeeds after a fixed delay.
pub struct MockGate {
    delay: Duration,
}

impl MockGate {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl PaymentGate for MockGate {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_intent(
        &self,
        amount: u64,
        currency: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PaymentIntent, PaymentError> {
        let intent_id = format!("pi_{}", random_hex(8));
        let client_secret = format!("{}_secret_{}", intent_id, random_hex(16));
        debug!(intent_id = %intent_id, amount, currency, ?metadata, "Mock payment intent created");

        Ok(PaymentIntent {
            intent_id,
            client_secret,
            amount,
            currency: currency.to_string(),
        })
    }

    fn confirm(&self, intent_id: &str, timeout: Duration) -> Result<PaymentStatus, PaymentError> {
        if self.delay > timeout {
            thread::sleep(timeout);
            return Err(PaymentError::Timeout(timeout));
        }
        thread::sleep(self.delay);

        if intent_id.trim().is_empty() {
            return Ok(PaymentStatus::Failed);
        }
        Ok(PaymentStatus::Succeeded)
    }
}

#[derive(Deserialize)]
struct StripeIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

/// Gate backed by the Stripe PaymentIntents API.
pub struct StripeGate {
    client: reqwest::blocking::Client,
    secret_key: String,
    base_url: String,
}

impl StripeGate {
    pub fn new(secret_key: String) -> Self {
        Self::with_base_url(secret_key, STRIPE_API.to_string())
    }

    pub fn with_base_url(secret_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            secret_key,
            base_url,
        }
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<StripeIntent, PaymentError> {
        let response = request
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(PaymentError::Provider(message));
        }

        response
            .json::<StripeIntent>()
            .map_err(|e| PaymentError::Provider(e.to_string()))
    }
}

fn map_transport_error(err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::Timeout(Duration::ZERO)
    } else if err.is_connect() {
        PaymentError::Unreachable(err.to_string())
    } else {
        PaymentError::Provider(err.to_string())
    }
}

pub fn map_stripe_status(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Succeeded,
        "canceled" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

impl PaymentGate for StripeGate {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn create_intent(
        &self,
        amount: u64,
        currency: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PaymentIntent, PaymentError> {
        let mut form = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), currency.to_string()),
        ];
        if let Some(name) = metadata.get("fileName") {
            form.push(("description".to_string(), format!("Premium scan for {}", name)));
        }
        for (key, value) in metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let intent = self.send(
            self.client
                .post(format!("{}/payment_intents", self.base_url))
                .form(&form),
        )?;

        Ok(PaymentIntent {
            client_secret: intent.client_secret.unwrap_or_default(),
            intent_id: intent.id,
            amount,
            currency: currency.to_string(),
        })
    }

    fn confirm(&self, intent_id: &str, timeout: Duration) -> Result<PaymentStatus, PaymentError> {
        if !is_intent_id(intent_id) {
            return Err(PaymentError::Provider(format!(
                "malformed payment intent id {:?}",
                intent_id
            )));
        }

        let intent = self
            .send(
                self.client
                    .get(format!("{}/payment_intents/{}", self.base_url, intent_id))
                    .timeout(timeout),
            )
            .map_err(|e| match e {
                PaymentError::Timeout(_) => PaymentError::Timeout(timeout),
                other => other,
            })?;

        Ok(map_stripe_status(&intent.status))
    }
}

/// `pi_` followed by alphanumerics only, so the id is safe to put in a URL path.
pub fn is_intent_id(id: &str) -> bool {
    id.strip_prefix("pi_")
        .map_or(false, |rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric()))
}

/// Rejects empty, non-test and obviously placeholder keys.
pub fn is_usable_stripe_key(key: &str) -> bool {
    key.starts_with("sk_test_")
        && key.len() > 50
        && !key.contains("your_stripe_secret_key")
        && !key.contains("placeholder")
}

pub fn select_gate(config: &AppConfig) -> SharedGate {
    match config.stripe_secret_key.as_deref() {
        Some(key) if is_usable_stripe_key(key) => {
            info!("Stripe payment gate initialized");
            Arc::new(StripeGate::new(key.to_string()))
        }
        Some(_) => {
            warn!("STRIPE_SECRET_KEY is not a usable test key, using mock payment gate");
            Arc::new(MockGate::new(config.mock_payment_delay))
        }
        None => {
            info!("Using mock payment gate for development");
            Arc::new(MockGate::new(config.mock_payment_delay))
        }
    }
}
