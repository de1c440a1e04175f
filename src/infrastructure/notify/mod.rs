pub mod channels;
pub mod chunker;
pub mod markdown;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use self::channels::{
    Channel, ContextReply, CustomWebhookChannel, DiscordChannel, EmailChannel, FeishuChannel,
    PushoverChannel, SessionReplyChannel, TelegramChannel, WechatChannel,
};

/// Fans a markdown report out to every configured channel with
/// per-channel chunking. At-most-once per channel: a failed channel is
/// logged and skipped, never retried here. Overall success means at
/// least one channel accepted the message.
pub struct NotificationService {
    channels: Vec<Box<dyn Channel>>,
    reports_dir: PathBuf,
}

impl NotificationService {
    pub fn from_config(config: &Config, session_reply: Option<Arc<dyn ContextReply>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let mut channels: Vec<Box<dyn Channel>> = Vec::new();

        if let Some(url) = &config.wechat_webhook_url {
            channels.push(Box::new(WechatChannel {
                client: client.clone(),
                webhook_url: url.clone(),
                max_bytes: config.wechat_max_bytes,
                msg_type: config.wechat_msg_type.clone(),
            }));
        }
        if let Some(url) = &config.feishu_webhook_url {
            channels.push(Box::new(FeishuChannel {
                client: client.clone(),
                webhook_url: url.clone(),
                max_bytes: config.feishu_max_bytes,
            }));
        }
        if let (Some(token), Some(chat_id)) =
            (&config.telegram_bot_token, &config.telegram_chat_id)
        {
            channels.push(Box::new(TelegramChannel {
                client: client.clone(),
                bot_token: token.clone(),
                chat_id: chat_id.clone(),
            }));
        }
        if let Some(url) = &config.discord_webhook_url {
            channels.push(Box::new(DiscordChannel {
                client: client.clone(),
                webhook_url: url.clone(),
            }));
        }
        if !config.custom_webhook_urls.is_empty() {
            channels.push(Box::new(CustomWebhookChannel {
                client: client.clone(),
                urls: config.custom_webhook_urls.clone(),
                bearer_token: config.custom_webhook_bearer_token.clone(),
            }));
        }
        if let (Some(user), Some(token)) = (&config.pushover_user_key, &config.pushover_api_token)
        {
            channels.push(Box::new(PushoverChannel {
                client: client.clone(),
                user_key: user.clone(),
                api_token: token.clone(),
            }));
        }
        if let (Some(sender), Some(password)) = (&config.email_sender, &config.email_password) {
            channels.push(Box::new(EmailChannel {
                sender: sender.clone(),
                sender_name: config.email_sender_name.clone(),
                password: password.clone(),
                receivers: config.email_receivers.clone(),
            }));
        }
        if let Some(reply) = session_reply {
            channels.push(Box::new(SessionReplyChannel { reply }));
        }

        if channels.is_empty() {
            info!("No notification channels configured");
        } else {
            info!(
                "Notification channels: {}",
                channels
                    .iter()
                    .map(|c| c.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Self {
            channels,
            reports_dir: config.reports_dir.clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        !self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deliver `content` to every channel. Returns true when at least
    /// one channel accepted every chunk it was given.
    pub async fn send(&self, content: &str) -> bool {
        let mut any_success = false;

        for channel in &self.channels {
            let chunks = chunker::chunk_markdown(content, channel.max_bytes());
            let total = chunks.len();
            let mut delivered = 0;

            for (i, chunk) in chunks.iter().enumerate() {
                match channel.send_chunk(chunk).await {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!("{} chunk {}/{} failed: {}", channel.name(), i + 1, total, e);
                        break;
                    }
                }
                if i + 1 < total {
                    tokio::time::sleep(channel.inter_chunk_delay()).await;
                }
            }

            if delivered == total {
                info!("{}: delivered {} chunk(s)", channel.name(), total);
                any_success = true;
            }
        }

        any_success
    }

    /// Write the report next to the process as
    /// `reports/<filename>` and return the path.
    pub async fn save_report_to_file(&self, content: &str, filename: &str) -> Result<PathBuf> {
        let dir = Path::new(&self.reports_dir);
        tokio::fs::create_dir_all(dir)
            .await
            .context("failed to create reports directory")?;
        let path = dir.join(filename);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingChannel {
        budget: usize,
        fail: bool,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingChannel {
        fn new(budget: usize, fail: bool) -> (Box<Self>, Arc<Mutex<Vec<String>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Box::new(Self {
                    budget,
                    fail,
                    sent: sent.clone(),
                }),
                sent,
            )
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn max_bytes(&self) -> usize {
            self.budget
        }
        fn inter_chunk_delay(&self) -> Duration {
            Duration::from_millis(1)
        }
        async fn send_chunk(&self, chunk: &str) -> Result<()> {
            if self.fail {
                anyhow::bail!("down");
            }
            self.sent.lock().unwrap().push(chunk.to_string());
            Ok(())
        }
    }

    fn service_with(channels: Vec<Box<dyn Channel>>) -> NotificationService {
        NotificationService {
            channels,
            reports_dir: PathBuf::from("./reports"),
        }
    }

    #[tokio::test]
    async fn one_failed_channel_does_not_block_others() {
        let (ok, sent) = RecordingChannel::new(100_000, false);
        let (bad, _) = RecordingChannel::new(100_000, true);
        let service = service_with(vec![bad, ok]);

        assert!(service.send("報告內容").await);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn all_channels_down_is_overall_failure() {
        let (bad, _) = RecordingChannel::new(100_000, true);
        let service = service_with(vec![bad]);
        assert!(!service.send("報告內容").await);
    }

    #[tokio::test]
    async fn long_reports_are_chunked_per_channel_budget() {
        let sections: Vec<String> = (0..6)
            .map(|i| format!("### 股票{}\n{}", i, "字".repeat(400)))
            .collect();
        let content = sections.join("\n---\n");
        let expected = chunker::chunk_markdown(&content, 3000).len();
        assert!(expected > 1);

        let (channel, sent) = RecordingChannel::new(3000, false);
        let service = service_with(vec![channel]);
        assert!(service.send(&content).await);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), expected);
        for chunk in sent.iter() {
            assert!(chunk.len() <= 3000);
        }
    }
}
