//! 消息转发模块
//!
//! 把命中规则的消息扇出到该规则配置的各个目标，逐目标落转发日志。
//! 目标之间互不影响：一个目标失败只记该目标的失败行，不回滚、不阻塞
//! 兄弟目标。投递语义为至少一次、不自动重试，失败行保持失败直到运营
//! 手工重发（`redispatch`）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{Result, SmsRelayError};
use crate::storage::dao::{ForwardLogDao, LinkDao, MessageDao, RuleDao};
use crate::storage::entities::{
    ForwardLog, ForwardStatus, ForwardTargetKind, Message, Rule,
};
use crate::storage::SmsStore;

/// 单目标的投递结果
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    pub log_id: i64,
    pub rule_id: i64,
    pub target_kind: ForwardTargetKind,
    pub status: ForwardStatus,
    pub error: Option<String>,
}

/// Webhook 出站发送器。出站请求必须有界超时。
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<()>;
}

/// 邮件出站发送器
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<()>;
}

/// 基于 reqwest 的 Webhook 发送器
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmsRelayError::Config(format!("构建 HTTP 客户端失败: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| SmsRelayError::Dispatch(format!("Webhook 请求失败: {}", e)))?;
        response
            .error_for_status()
            .map_err(|e| SmsRelayError::Dispatch(format!("Webhook 响应异常: {}", e)))?;
        Ok(())
    }
}

/// 占位邮件发送器：仅记录日志即视为投递成功（SMTP 对接不在范围内）
pub struct LoggingEmailSender;

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send(&self, address: &str, subject: &str, _body: &str) -> Result<()> {
        info!("邮件转发（仅记录）: to={}, subject={}", address, subject);
        Ok(())
    }
}

/// 转发调度器
pub struct ForwardDispatcher {
    store: SmsStore,
    webhook: Arc<dyn WebhookSender>,
    email: Arc<dyn EmailSender>,
}

impl ForwardDispatcher {
    pub fn new(store: SmsStore, webhook_timeout: Duration) -> Result<Self> {
        Ok(Self {
            store,
            webhook: Arc::new(HttpWebhookSender::new(webhook_timeout)?),
            email: Arc::new(LoggingEmailSender),
        })
    }

    /// 注入自定义发送器（测试与扩展用）
    pub fn with_senders(
        store: SmsStore,
        webhook: Arc<dyn WebhookSender>,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        Self { store, webhook, email }
    }

    /// 把消息投递到规则的全部已配置目标，每个目标各记一行转发日志。
    /// 规则命中统计在这里一并更新（与目标成败无关）。
    pub async fn dispatch(&self, message: &Message, rule: &Rule) -> Result<Vec<ForwardOutcome>> {
        let message_id = message
            .id
            .ok_or_else(|| SmsRelayError::InvalidData("消息缺少 id".to_string()))?;
        let rule_id = rule
            .id
            .ok_or_else(|| SmsRelayError::InvalidData("规则缺少 id".to_string()))?;

        let mut outcomes = Vec::new();
        for target in resolve_targets(rule) {
            let attempt = self.attempt(message, rule, target).await;
            let (status, error) = match attempt {
                Ok(()) => (ForwardStatus::Success, None),
                Err(e) => (ForwardStatus::Failed, Some(e.to_string())),
            };

            let log = ForwardLog {
                id: None,
                message_id,
                rule_id,
                target_kind: target,
                target_id: target_id_for(rule, target),
                status,
                error: error.clone(),
                forwarded_at: Utc::now().timestamp_millis(),
            };
            let log_id = self
                .store
                .with_conn(|conn| ForwardLogDao::new(conn).insert(&log))?;

            match status {
                ForwardStatus::Success => {
                    info!("消息 {} 经规则 {} 转发到 {} 成功", message_id, rule_id, target.as_str())
                }
                _ => warn!(
                    "消息 {} 经规则 {} 转发到 {} 失败: {}",
                    message_id,
                    rule_id,
                    target.as_str(),
                    error.as_deref().unwrap_or("-")
                ),
            }

            outcomes.push(ForwardOutcome {
                log_id,
                rule_id,
                target_kind: target,
                status,
                error,
            });
        }

        self.store
            .with_conn(|conn| RuleDao::new(conn).bump_match_stats(rule_id))?;

        Ok(outcomes)
    }

    /// 运营手工重发一条失败日志：追加新行，不改旧行
    pub async fn redispatch(&self, log_id: i64) -> Result<ForwardOutcome> {
        let (log, message, rule) = self.store.with_conn(|conn| {
            let log = ForwardLogDao::new(conn)
                .get_by_id(log_id)?
                .ok_or_else(|| SmsRelayError::NotFound(format!("转发日志不存在: {}", log_id)))?;
            let message = MessageDao::new(conn)
                .get_by_id(log.message_id)?
                .ok_or_else(|| SmsRelayError::NotFound(format!("消息不存在: {}", log.message_id)))?;
            let rule = RuleDao::new(conn)
                .get_by_id(log.rule_id)?
                .ok_or_else(|| SmsRelayError::NotFound(format!("规则不存在: {}", log.rule_id)))?;
            Ok((log, message, rule))
        })?;

        let attempt = self.attempt(&message, &rule, log.target_kind).await;
        let (status, error) = match attempt {
            Ok(()) => (ForwardStatus::Success, None),
            Err(e) => (ForwardStatus::Failed, Some(e.to_string())),
        };

        let new_log = ForwardLog {
            id: None,
            message_id: log.message_id,
            rule_id: log.rule_id,
            target_kind: log.target_kind,
            target_id: log.target_id,
            status,
            error: error.clone(),
            forwarded_at: Utc::now().timestamp_millis(),
        };
        let new_id = self
            .store
            .with_conn(|conn| ForwardLogDao::new(conn).insert(&new_log))?;

        Ok(ForwardOutcome {
            log_id: new_id,
            rule_id: log.rule_id,
            target_kind: log.target_kind,
            status,
            error,
        })
    }

    /// 单目标投递尝试。配置缺失直接失败，不发起出站请求。
    async fn attempt(
        &self,
        message: &Message,
        rule: &Rule,
        target: ForwardTargetKind,
    ) -> Result<()> {
        match target {
            ForwardTargetKind::Link => {
                let link_id = rule.target_link_id.ok_or_else(|| {
                    SmsRelayError::Config("转发目标链接未配置".to_string())
                })?;
                // 存库关联即投递完成，客户端取回时实时重新匹配，不复制消息体
                let link = self
                    .store
                    .with_conn(|conn| LinkDao::new(conn).get_by_id(link_id))?
                    .ok_or_else(|| {
                        SmsRelayError::NotFound(format!("转发目标链接不存在: {}", link_id))
                    })?;
                if !link.is_active {
                    return Err(SmsRelayError::Dispatch(format!(
                        "转发目标链接已禁用: {}",
                        link_id
                    )));
                }
                Ok(())
            }
            ForwardTargetKind::Webhook => {
                let url = rule
                    .forward_config
                    .webhook_url
                    .as_deref()
                    .ok_or_else(|| SmsRelayError::Config("Webhook URL未配置".to_string()))?;
                let payload = json!({
                    "message_id": message.id,
                    "sender": message.sender,
                    "content": message.content,
                    "timestamp": message.timestamp,
                    "device_id": message.device_id,
                    "rule_id": rule.id,
                    "rule_name": rule.name,
                });
                self.webhook.send(url, &payload).await
            }
            ForwardTargetKind::Email => {
                let address = rule
                    .forward_config
                    .email_address
                    .as_deref()
                    .ok_or_else(|| SmsRelayError::Config("邮箱地址未配置".to_string()))?;
                let subject = format!("来自 {} 的消息", message.sender);
                self.email.send(address, &subject, &message.content).await
            }
        }
    }
}

/// 规则的有效目标列表：主目标在前，其余已配置的目标跟随，去重
fn resolve_targets(rule: &Rule) -> Vec<ForwardTargetKind> {
    let mut targets = vec![rule.target];
    if rule.target != ForwardTargetKind::Webhook && rule.forward_config.webhook_url.is_some() {
        targets.push(ForwardTargetKind::Webhook);
    }
    if rule.target != ForwardTargetKind::Email && rule.forward_config.email_address.is_some() {
        targets.push(ForwardTargetKind::Email);
    }
    if rule.target != ForwardTargetKind::Link && rule.target_link_id.is_some() {
        targets.push(ForwardTargetKind::Link);
    }
    targets
}

fn target_id_for(rule: &Rule, target: ForwardTargetKind) -> Option<i64> {
    match target {
        ForwardTargetKind::Link => rule.target_link_id,
        _ => None,
    }
}
