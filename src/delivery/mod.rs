//! Delivery collaborator: sends a composed assignment message to a giver.
//!
//! The lifecycle manager only depends on the [`Delivery`] trait; provider
//! payloads live in the implementations.

mod brevo;

pub use brevo::BrevoDelivery;

use async_trait::async_trait;

use crate::models::{Channel, Member};

/// A message ready to hand to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub match_id: String,
    /// Phone number or email address, depending on the channel
    pub to: String,
    pub to_name: String,
    /// Email only
    pub subject: Option<String>,
    pub text: String,
    pub group_name: String,
}

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

/// Provider rejected the message or could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryError {
    pub reason: String,
}

impl DeliveryError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for DeliveryError {}

#[async_trait]
pub trait Delivery: Send + Sync {
    /// Send one message. Success means the provider accepted it.
    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Stand-in used when no provider key is configured; every send fails.
pub struct UnconfiguredDelivery;

#[async_trait]
impl Delivery for UnconfiguredDelivery {
    async fn deliver(&self, _message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        Err(DeliveryError::new("delivery provider is not configured"))
    }
}

/// The sentence every giver receives.
pub fn assignment_text(giver: &Member, recipient: &Member) -> String {
    format!(
        "Hi {}, you are the Secret Santa for {} {}!",
        giver.first_name, recipient.first_name, recipient.last_name
    )
}

/// Email subject line for a group.
pub fn email_subject(group_name: &str) -> String {
    format!("{} - Your Secret Santa Assignment", group_name)
}

/// Contact address the channel delivers to, if the giver has one.
pub fn contact_for(giver: &Member, channel: Channel) -> Option<&str> {
    let field = match channel {
        Channel::Sms => giver.phone_number.as_deref(),
        Channel::Email => giver.email.as_deref(),
    };
    field.map(str::trim).filter(|v| !v.is_empty())
}

/// Normalise a phone number to `+<digits>`, assuming US numbers when no
/// country code is given.
pub fn normalize_phone_number(raw: &str) -> String {
    let raw = raw.trim();
    let prefixed = if raw.starts_with('+') {
        raw.to_string()
    } else if raw.starts_with('1') {
        format!("+{}", raw)
    } else {
        format!("+1{}", raw)
    };
    let digits: String = prefixed.chars().filter(char::is_ascii_digit).collect();
    format!("+{}", digits)
}
