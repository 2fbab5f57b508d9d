//! Notification channels.
//!
//! One trait, several transports, resolved per severity tier rather than by
//! a single named channel: a preventive nudge only needs the console and
//! push, while an emergency goes out over every transport that's
//! configured. Dispatch happens off the request path, fanned out across
//! whichever channels a tier selects.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::GatewayConfig;
use crate::types::Severity;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("channel not configured: {0}")]
    NotConfigured(String),
    #[error("send failed: {0}")]
    SendFailed(String),
}

#[derive(Debug, Clone)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

/// Always-available fallback, logs to tracing. Used in tests and when no
/// other channel is configured.
pub struct ConsoleChannel;

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        tracing::info!(severity = %payload.severity, title = %payload.title, "console notification: {}", payload.body);
        Ok(())
    }
}

/// ntfy.sh-compatible push notifications.
pub struct PushChannel {
    client: reqwest::Client,
    url: String,
    topic: String,
}

impl PushChannel {
    pub fn from_config(config: &GatewayConfig) -> Option<Self> {
        let topic = config.notifications.ntfy_topic.clone()?;
        let url = config
            .notifications
            .ntfy_url
            .clone()
            .unwrap_or_else(|| "https://ntfy.sh".to_string());
        Some(Self {
            client: reqwest::Client::new(),
            url,
            topic,
        })
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let endpoint = format!("{}/{}", self.url.trim_end_matches('/'), self.topic);
        let resp = self
            .client
            .post(&endpoint)
            .header("Title", payload.title.clone())
            .body(payload.body.clone())
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!(
                "ntfy responded {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// SMTP email via lettre.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailChannel {
    pub fn from_config(config: &GatewayConfig) -> Option<Self> {
        let host = config.notifications.smtp_host.clone()?;
        let user = config.notifications.smtp_user.clone()?;
        let password = config.notifications.smtp_password.clone()?;
        let to_addr = config.notifications.alert_email_to.clone()?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .ok()?
            .credentials(Credentials::new(user.clone(), password))
            .build();
        let from = format!("gateway@{host}").parse().ok()?;
        let to = to_addr.parse().ok()?;
        Some(Self { transport, from, to })
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(payload.title.clone())
            .body(payload.body.clone())
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

/// SMS via Twilio's REST API. No maintained Twilio SDK crate exists in the
/// ecosystem, so this goes over `reqwest` directly, same as other vendor-API
/// channels in the pack.
pub struct SmsChannel {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
    to: String,
}

impl SmsChannel {
    pub fn from_config(config: &GatewayConfig) -> Option<Self> {
        Some(Self {
            client: reqwest::Client::new(),
            account_sid: config.notifications.twilio_account_sid.clone()?,
            auth_token: config.notifications.twilio_auth_token.clone()?,
            from: config.notifications.twilio_from_number.clone()?,
            to: config.notifications.twilio_to_number.clone()?,
        })
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let body = format!("{}\n{}", payload.title, payload.body);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", self.from.as_str()), ("To", self.to.as_str()), ("Body", body.as_str())])
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!(
                "twilio responded {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// WhatsApp via Twilio's messaging API, same account credentials as SMS but
/// a distinct from/to pair (Twilio requires the `whatsapp:` prefix on both).
pub struct WhatsAppChannel {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
    to: String,
}

impl WhatsAppChannel {
    pub fn from_config(config: &GatewayConfig) -> Option<Self> {
        Some(Self {
            client: reqwest::Client::new(),
            account_sid: config.notifications.twilio_account_sid.clone()?,
            auth_token: config.notifications.twilio_auth_token.clone()?,
            from: format!("whatsapp:{}", config.notifications.whatsapp_from_number.clone()?),
            to: format!("whatsapp:{}", config.notifications.whatsapp_to_number.clone()?),
        })
    }
}

#[async_trait]
impl NotificationChannel for WhatsAppChannel {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let body = format!("{}\n{}", payload.title, payload.body);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", self.from.as_str()), ("To", self.to.as_str()), ("Body", body.as_str())])
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!(
                "twilio responded {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Resolves channel names to concrete implementations and maps a severity
/// to the set of channels a tier-routing policy says should carry it.
pub struct ChannelRegistry {
    channels: std::collections::HashMap<String, std::sync::Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut channels: std::collections::HashMap<String, std::sync::Arc<dyn NotificationChannel>> =
            std::collections::HashMap::new();
        channels.insert("console".to_string(), std::sync::Arc::new(ConsoleChannel));
        if let Some(push) = PushChannel::from_config(config) {
            channels.insert("push".to_string(), std::sync::Arc::new(push));
        }
        if let Some(email) = EmailChannel::from_config(config) {
            channels.insert("email".to_string(), std::sync::Arc::new(email));
        }
        if let Some(sms) = SmsChannel::from_config(config) {
            channels.insert("sms".to_string(), std::sync::Arc::new(sms));
        }
        if let Some(whatsapp) = WhatsAppChannel::from_config(config) {
            channels.insert("whatsapp".to_string(), std::sync::Arc::new(whatsapp));
        }
        Self { channels }
    }

    pub fn resolve(&self, name: &str) -> std::sync::Arc<dyn NotificationChannel> {
        self.channels
            .get(name)
            .cloned()
            .unwrap_or_else(|| std::sync::Arc::new(ConsoleChannel))
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn available_names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    /// Dispatch to every channel the severity's tier selects, in parallel,
    /// logging (not propagating) individual channel failures so one broken
    /// transport never blocks the others.
    pub async fn dispatch_tier(&self, severity: Severity, payload: &NotificationPayload) {
        let futures = channels_for_severity(severity)
            .into_iter()
            .map(|name| {
                let channel = self.resolve(name);
                let payload = payload.clone();
                async move {
                    if let Err(e) = channel.send(&payload).await {
                        tracing::warn!(error = %e, channel = %channel.name(), "notification dispatch failed");
                    }
                }
            });
        futures::future::join_all(futures).await;
    }
}

/// Severity -> channel-set tier routing. Higher severities accumulate
/// channels rather than switching to a different one: an emergency still
/// rings the console and push, plus email/sms/whatsapp on top.
pub fn channels_for_severity(severity: Severity) -> Vec<&'static str> {
    let mut channels = vec!["console", "push"];
    if severity >= Severity::Warning {
        channels.push("email");
    }
    if severity >= Severity::Critical {
        channels.push("sms");
    }
    if severity >= Severity::Emergency {
        channels.push("whatsapp");
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_channel_always_succeeds() {
        let channel = ConsoleChannel;
        let payload = NotificationPayload {
            title: "test".into(),
            body: "body".into(),
            severity: Severity::Info,
        };
        channel.send(&payload).await.unwrap();
    }

    #[test]
    fn registry_falls_back_to_console() {
        let registry = ChannelRegistry::from_config(&GatewayConfig::default());
        assert_eq!(registry.resolve("nonexistent").name(), "console");
    }

    #[test]
    fn tier_routing_accumulates_channels_by_severity() {
        assert_eq!(channels_for_severity(Severity::Preventive), vec!["console", "push"]);
        assert_eq!(channels_for_severity(Severity::Warning), vec!["console", "push", "email"]);
        assert_eq!(
            channels_for_severity(Severity::Critical),
            vec!["console", "push", "email", "sms"]
        );
        assert_eq!(
            channels_for_severity(Severity::Emergency),
            vec!["console", "push", "email", "sms", "whatsapp"]
        );
    }
}
