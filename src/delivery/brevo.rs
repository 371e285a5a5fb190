//! Brevo transactional SMS and email over its JSON REST API.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::{json, Value};

use super::{normalize_phone_number, Delivery, DeliveryError, DeliveryReceipt, OutboundMessage};
use crate::config::BrevoConfig;
use crate::models::Channel;

pub struct BrevoDelivery {
    client: Client,
    options: BrevoConfig,
}

impl BrevoDelivery {
    pub fn new(options: BrevoConfig) -> Self {
        Self {
            client: Client::new(),
            options,
        }
    }

    fn sms_body(&self, message: &OutboundMessage) -> Value {
        json!({
            "sender": self.options.sms_sender,
            "recipient": normalize_phone_number(&message.to),
            "content": message.text,
            "type": "transactional",
        })
    }

    fn email_body(&self, message: &OutboundMessage) -> Value {
        let sender = json!({
            "name": self.options.email_from_name,
            "email": self.options.email_from_address,
        });
        json!({
            "sender": sender,
            "to": [{ "email": message.to, "name": message.to_name }],
            "subject": message.subject.clone().unwrap_or_default(),
            "textContent": message.text,
            "replyTo": sender,
            "headers": { "X-Secret-Santa-Match-ID": message.match_id },
            "params": { "groupName": message.group_name },
        })
    }
}

#[async_trait]
impl Delivery for BrevoDelivery {
    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let (url, body) = match message.channel {
            Channel::Sms => (&self.options.sms_url, self.sms_body(message)),
            Channel::Email => (&self.options.email_url, self.email_body(message)),
        };

        let response = self
            .client
            .post(url)
            .header("api-key", &self.options.api_key)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::new(format!("request to Brevo failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::new(format!(
                "Brevo returned {}: {}",
                status, error_body
            )));
        }

        // Brevo answers SMS with a numeric id and email with a string one.
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        let message_id = match payload.get("messageId") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => "unknown".to_string(),
        };

        Ok(DeliveryReceipt { message_id })
    }
}
