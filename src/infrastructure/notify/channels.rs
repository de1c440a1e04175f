//! Concrete delivery channels.
//!
//! Each channel owns its byte budget, inter-chunk delay and wire format;
//! the dispatcher only sees the `Channel` trait.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::infrastructure::notify::markdown;

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    /// Per-chunk UTF-8 byte budget.
    fn max_bytes(&self) -> usize;
    /// Pause between chunks to stay under upstream rate limits.
    fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(1500)
    }
    async fn send_chunk(&self, chunk: &str) -> Result<()>;
}

/// Session-scoped reply sink: bound to the conversation that triggered
/// the task rather than a standing webhook. The bot platform adapters
/// implement this.
#[async_trait]
pub trait ContextReply: Send + Sync {
    fn platform(&self) -> &str;
    async fn reply(&self, content: &str) -> Result<()>;
}

fn ensure_ok(status: reqwest::StatusCode, channel: &str, body: &str) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        bail!("{} returned HTTP {}: {}", channel, status, body)
    }
}

// ---------------------------------------------------------------------------
// WeCom-style webhook
// ---------------------------------------------------------------------------

pub struct WechatChannel {
    pub client: reqwest::Client,
    pub webhook_url: String,
    pub max_bytes: usize,
    /// "markdown" or "text".
    pub msg_type: String,
}

#[async_trait]
impl Channel for WechatChannel {
    fn name(&self) -> &'static str {
        "wechat"
    }

    fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn inter_chunk_delay(&self) -> Duration {
        // WeCom throttles webhooks hard; 2.5s keeps bursts under the cap.
        Duration::from_millis(2500)
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let payload = if self.msg_type == "text" {
            json!({ "msgtype": "text", "text": { "content": markdown::to_plain_text(chunk) } })
        } else {
            json!({ "msgtype": "markdown", "markdown": { "content": chunk } })
        };
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("wechat webhook request failed")?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        ensure_ok(status, "wechat", &body)?;
        // WeCom reports errors inside a 200 body.
        if body.contains("\"errcode\"") && !body.contains("\"errcode\":0") {
            bail!("wechat rejected message: {}", body);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Feishu-style webhook
// ---------------------------------------------------------------------------

pub struct FeishuChannel {
    pub client: reqwest::Client,
    pub webhook_url: String,
    pub max_bytes: usize,
}

#[async_trait]
impl Channel for FeishuChannel {
    fn name(&self) -> &'static str {
        "feishu"
    }

    fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let payload = json!({
            "msg_type": "text",
            "content": { "text": markdown::to_plain_text(chunk) },
        });
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("feishu webhook request failed")?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        ensure_ok(status, "feishu", &body)?;
        if body.contains("\"code\"") && !body.contains("\"code\":0") {
            bail!("feishu rejected message: {}", body);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Telegram bot API
// ---------------------------------------------------------------------------

pub struct TelegramChannel {
    pub client: reqwest::Client,
    pub bot_token: String,
    pub chat_id: String,
}

impl TelegramChannel {
    async fn post_message(&self, text: &str, parse_mode: Option<&str>) -> Result<reqwest::Response> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let mut payload = json!({ "chat_id": self.chat_id, "text": text });
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = json!(mode);
        }
        self.client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("telegram request failed")
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn max_bytes(&self) -> usize {
        // Telegram caps at 4096 characters; a byte budget is stricter
        // for CJK text and therefore always safe.
        4096
    }

    fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(1000)
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let converted = markdown::to_telegram(chunk);
        let resp = self.post_message(&converted, Some("Markdown")).await?;
        if resp.status().is_success() {
            return Ok(());
        }

        // Markdown parse failures come back as 400; retry as plain text.
        debug!("telegram markdown rejected, retrying as plain text");
        let plain = markdown::to_plain_text(chunk);
        let resp = self.post_message(&plain, None).await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        ensure_ok(status, "telegram", &body)
    }
}

// ---------------------------------------------------------------------------
// Discord webhook (embed-based)
// ---------------------------------------------------------------------------

pub struct DiscordChannel {
    pub client: reqwest::Client,
    pub webhook_url: String,
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn max_bytes(&self) -> usize {
        // Embed description cap is 4096 characters.
        4096
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let payload = json!({
            "embeds": [{ "description": chunk, "color": 0x1a5276 }]
        });
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("discord webhook request failed")?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        ensure_ok(status, "discord", &body)
    }
}

// ---------------------------------------------------------------------------
// Generic custom webhooks
// ---------------------------------------------------------------------------

pub struct CustomWebhookChannel {
    pub client: reqwest::Client,
    pub urls: Vec<String>,
    pub bearer_token: Option<String>,
}

impl CustomWebhookChannel {
    fn payload_for(url: &str, chunk: &str) -> serde_json::Value {
        // DingTalk robots want their own envelope; everything else gets
        // a plain `content` JSON body.
        let is_dingtalk = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h == "oapi.dingtalk.com"))
            .unwrap_or(false);
        if is_dingtalk {
            json!({
                "msgtype": "markdown",
                "markdown": { "title": "股票分析報告", "text": chunk },
            })
        } else {
            json!({ "content": chunk })
        }
    }
}

#[async_trait]
impl Channel for CustomWebhookChannel {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn max_bytes(&self) -> usize {
        20_000
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let mut any_ok = false;
        for url in &self.urls {
            let mut req = self.client.post(url).json(&Self::payload_for(url, chunk));
            if let Some(token) = &self.bearer_token {
                req = req.bearer_auth(token);
            }
            match req.send().await {
                Ok(resp) if resp.status().is_success() => any_ok = true,
                Ok(resp) => warn!("custom webhook {} returned {}", url, resp.status()),
                Err(e) => warn!("custom webhook {} failed: {}", url, e),
            }
        }
        if any_ok {
            Ok(())
        } else {
            bail!("every custom webhook failed")
        }
    }
}

// ---------------------------------------------------------------------------
// Pushover
// ---------------------------------------------------------------------------

pub struct PushoverChannel {
    pub client: reqwest::Client,
    pub user_key: String,
    pub api_token: String,
}

#[async_trait]
impl Channel for PushoverChannel {
    fn name(&self) -> &'static str {
        "pushover"
    }

    fn max_bytes(&self) -> usize {
        1024
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let message = markdown::to_plain_text(chunk);
        let resp = self
            .client
            .post("https://api.pushover.net/1/messages.json")
            .form(&[
                ("token", self.api_token.as_str()),
                ("user", self.user_key.as_str()),
                ("message", message.as_str()),
            ])
            .send()
            .await
            .context("pushover request failed")?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        ensure_ok(status, "pushover", &body)
    }
}

// ---------------------------------------------------------------------------
// Email (SMTP autodetected from the sender domain)
// ---------------------------------------------------------------------------

/// (domain, smtp host, port, implicit TLS). Unknown domains fall back to
/// `smtp.{domain}:465` with implicit TLS.
const SMTP_TABLE: [(&str, &str, u16, bool); 12] = [
    ("qq.com", "smtp.qq.com", 465, true),
    ("foxmail.com", "smtp.qq.com", 465, true),
    ("163.com", "smtp.163.com", 465, true),
    ("126.com", "smtp.126.com", 465, true),
    ("gmail.com", "smtp.gmail.com", 587, false),
    ("outlook.com", "smtp-mail.outlook.com", 587, false),
    ("hotmail.com", "smtp-mail.outlook.com", 587, false),
    ("live.com", "smtp-mail.outlook.com", 587, false),
    ("sina.com", "smtp.sina.com", 465, true),
    ("sohu.com", "smtp.sohu.com", 465, true),
    ("aliyun.com", "smtp.aliyun.com", 465, true),
    ("139.com", "smtp.139.com", 465, true),
];

pub fn smtp_for_domain(domain: &str) -> (String, u16, bool) {
    for (d, host, port, ssl) in SMTP_TABLE {
        if d == domain {
            return (host.to_string(), port, ssl);
        }
    }
    (format!("smtp.{}", domain), 465, true)
}

pub struct EmailChannel {
    pub sender: String,
    pub sender_name: String,
    pub password: String,
    pub receivers: Vec<String>,
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn max_bytes(&self) -> usize {
        // Mail bodies are effectively unbounded for our report sizes.
        5_000_000
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let domain = self
            .sender
            .rsplit_once('@')
            .map(|(_, d)| d.to_lowercase())
            .context("sender address has no domain")?;
        let (host, port, implicit_tls) = smtp_for_domain(&domain);
        debug!("email: {} -> {}:{} (tls={})", domain, host, port, implicit_tls);

        let transport: AsyncSmtpTransport<Tokio1Executor> = if implicit_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
        }
        .context("smtp transport setup failed")?
        .port(port)
        .credentials(Credentials::new(self.sender.clone(), self.password.clone()))
        .build();

        let date_str = chrono::Local::now().format("%Y-%m-%d");
        let subject = format!("📈 股票智能分析報告 - {}", date_str);
        let html = markdown::to_html(chunk);

        let receivers = if self.receivers.is_empty() {
            // No explicit recipients: send to self.
            std::slice::from_ref(&self.sender)
        } else {
            &self.receivers[..]
        };

        for receiver in receivers {
            let email = Message::builder()
                .from(
                    format!("{} <{}>", self.sender_name, self.sender)
                        .parse()
                        .context("invalid sender mailbox")?,
                )
                .to(receiver.parse().context("invalid receiver mailbox")?)
                .subject(&subject)
                .header(ContentType::TEXT_HTML)
                .body(html.clone())
                .context("failed to build email")?;
            transport
                .send(email)
                .await
                .context("failed to send email")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session reply (stream mode)
// ---------------------------------------------------------------------------

pub struct SessionReplyChannel {
    pub reply: std::sync::Arc<dyn ContextReply>,
}

#[async_trait]
impl Channel for SessionReplyChannel {
    fn name(&self) -> &'static str {
        "session"
    }

    fn max_bytes(&self) -> usize {
        20_000
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        self.reply.reply(chunk).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smtp_autodetect_known_domains() {
        assert_eq!(smtp_for_domain("qq.com"), ("smtp.qq.com".into(), 465, true));
        assert_eq!(
            smtp_for_domain("gmail.com"),
            ("smtp.gmail.com".into(), 587, false)
        );
    }

    #[test]
    fn smtp_autodetect_unknown_domain_guesses() {
        assert_eq!(
            smtp_for_domain("example.org"),
            ("smtp.example.org".into(), 465, true)
        );
    }

    #[test]
    fn dingtalk_urls_get_their_own_envelope() {
        let p = CustomWebhookChannel::payload_for(
            "https://oapi.dingtalk.com/robot/send?access_token=x",
            "內容",
        );
        assert_eq!(p["msgtype"], "markdown");

        let p = CustomWebhookChannel::payload_for("https://hooks.example.com/x", "內容");
        assert_eq!(p["content"], "內容");
    }
}
