//! 客户取回服务
//!
//! 拿链接 token 的一方通过这里访问：先过节流闸门，放行后返回
//! 配额视图；取验证码时再按归属账号的启用规则实时匹配设备消息，
//! 逐条附上提取到的最优验证码。拒绝以封闭原因枚举返回，调用方
//! 自行渲染，不当作存储错误。

use chrono::Utc;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::error::{Result, SmsRelayError};
use crate::extractor::{CodeCandidate, CodeExtractor};
use crate::matcher;
use crate::storage::dao::{LinkDao, MessageDao, RuleDao};
use crate::storage::entities::{Link, LinkStatus, Message};
use crate::storage::SmsStore;
use crate::throttle::{self, AccessOutcome, DenyReason};

/// 链接配额视图
#[derive(Debug, Clone)]
pub struct LinkStatusView {
    pub status: LinkStatus,
    pub is_active: bool,
    pub access_count: i64,
    pub max_access_count: i64,
    pub verification_count: i64,
    pub max_verification_count: i64,
    /// 会话窗口（分钟）
    pub session_interval: i64,
    /// 存储并上报，但不参与节流判定
    pub verification_interval: i64,
    pub verification_wait_time: i64,
    pub expires_at: Option<i64>,
}

impl LinkStatusView {
    fn from_link(link: &Link) -> Self {
        Self {
            status: link.status,
            is_active: link.is_active,
            access_count: link.access_count,
            max_access_count: link.max_access_count,
            verification_count: link.verification_count,
            max_verification_count: link.max_verification_count,
            session_interval: link.session_interval,
            verification_interval: link.verification_interval,
            verification_wait_time: link.verification_wait_time,
            expires_at: link.expires_at,
        }
    }
}

/// 节流拒绝的渲染载体
#[derive(Debug, Clone)]
pub struct Denied {
    pub reason: DenyReason,
    /// 会话窗口剩余毫秒，有值时调用方可提示稍后再试
    pub lockout_remaining_ms: Option<i64>,
}

/// 访问裁决
#[derive(Debug, Clone)]
pub enum AccessDecision {
    Granted {
        view: LinkStatusView,
        outcome: AccessOutcome,
    },
    Denied(Denied),
}

/// 带验证码标注的消息
#[derive(Debug, Clone)]
pub struct AnnotatedMessage {
    pub message: Message,
    pub code: Option<CodeCandidate>,
}

/// 取码裁决
#[derive(Debug, Clone)]
pub enum VerificationDecision {
    Granted {
        view: LinkStatusView,
        messages: Vec<AnnotatedMessage>,
    },
    Denied(Denied),
}

/// 客户取回服务
pub struct RetrievalService {
    store: SmsStore,
    config: RelayConfig,
    extractor: CodeExtractor,
}

impl RetrievalService {
    pub fn new(store: SmsStore, config: RelayConfig) -> Self {
        Self {
            store,
            config,
            extractor: CodeExtractor::new(),
        }
    }

    /// 访问链接。放行时按会话窗口计数并落库，拒绝时返回原因。
    pub fn access(&self, token: &str) -> Result<AccessDecision> {
        let now = Utc::now().timestamp_millis();
        self.store.with_conn(|conn| {
            let dao = LinkDao::new(conn);
            let mut link = dao
                .get_by_token(token)?
                .ok_or_else(|| SmsRelayError::NotFound(format!("链接不存在: {}", token)))?;

            match throttle::check_access(&mut link, now) {
                Ok(outcome) => {
                    if outcome == AccessOutcome::Counted {
                        dao.update_throttle_state(&link)?;
                    }
                    debug!("链接 {} 访问放行: {:?}", token, outcome);
                    Ok(AccessDecision::Granted {
                        view: LinkStatusView::from_link(&link),
                        outcome,
                    })
                }
                Err(reason) => {
                    info!("链接 {} 访问拒绝: {}", token, reason.as_str());
                    Ok(AccessDecision::Denied(Denied {
                        lockout_remaining_ms: throttle::remaining_lockout_ms(&link, now),
                        reason,
                    }))
                }
            }
        })
    }

    /// 取验证码。放行后按启用规则实时匹配设备消息（新在前），
    /// 没有启用规则时退回最近几条原始消息。
    /// 没有可返回的消息时直接空手而归，不消耗取码配额。
    pub fn pull_verification(&self, token: &str) -> Result<VerificationDecision> {
        let now = Utc::now().timestamp_millis();
        self.store.with_conn(|conn| {
            let dao = LinkDao::new(conn);
            let mut link = dao
                .get_by_token(token)?
                .ok_or_else(|| SmsRelayError::NotFound(format!("链接不存在: {}", token)))?;

            if let Err(reason) = throttle::verification_permitted(&link, now) {
                info!("链接 {} 取码拒绝: {}", token, reason.as_str());
                return Ok(VerificationDecision::Denied(Denied {
                    lockout_remaining_ms: throttle::remaining_lockout_ms(&link, now),
                    reason,
                }));
            }

            let rules = RuleDao::new(conn).list_active_by_account(link.account_id)?;
            let messages = MessageDao::new(conn).list_by_device_desc(link.device_id, None)?;

            let selected: Vec<&Message> = if rules.is_empty() {
                messages
                    .iter()
                    .take(self.config.fallback_display_count as usize)
                    .collect()
            } else {
                // 列表已按优先级降序，显示条数取最高优先级规则的配置
                let limit = rules
                    .first()
                    .map(|r| r.display_count as usize)
                    .unwrap_or(5);
                matcher::match_messages(&messages, &rules, limit)
            };

            if selected.is_empty() {
                debug!("链接 {} 取码无匹配消息, 配额保持 {}/{}",
                    token, link.verification_count, link.max_verification_count);
                return Ok(VerificationDecision::Granted {
                    view: LinkStatusView::from_link(&link),
                    messages: Vec::new(),
                });
            }

            if let Err(reason) = throttle::check_verification(&mut link, now) {
                return Ok(VerificationDecision::Denied(Denied {
                    lockout_remaining_ms: throttle::remaining_lockout_ms(&link, now),
                    reason,
                }));
            }
            dao.update_throttle_state(&link)?;

            let annotated = selected
                .into_iter()
                .map(|m| AnnotatedMessage {
                    code: self.extractor.best(&m.content, &m.sender),
                    message: m.clone(),
                })
                .collect();

            Ok(VerificationDecision::Granted {
                view: LinkStatusView::from_link(&link),
                messages: annotated,
            })
        })
    }
}
