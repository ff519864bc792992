//! 数据实体定义 - 对应数据库表结构
//!
//! Account/Device/Link/Rule/Message 之间只通过整数 id 互相引用，
//! 形成查找图而非对象图，避免 Account ↔ 主设备、Rule ↔ 目标链接的环。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SmsRelayError;

/// 账号实体 - 对应 account 表
///
/// 仅作为规则/链接的归属方存在，字段保持最小。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Option<i64>,
    pub name: String,
    pub username: String,
    /// 主设备 id，消息检索时从这里解析设备
    pub primary_device_id: Option<i64>,
    pub status: String,
    pub created_at: i64, // 毫秒时间戳
}

/// 设备实体 - 对应 device 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<i64>,
    /// 设备侧上报用的外部标识
    pub device_key: String,
    pub name: String,
    pub is_online: bool,
    /// 最后心跳时间（毫秒时间戳），从未上报过为 None
    pub last_heartbeat: Option<i64>,
    pub created_at: i64,
}

/// 消息方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Received,
    Sent,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Received => "received",
            Direction::Sent => "sent",
        }
    }
}

impl FromStr for Direction {
    type Err = SmsRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Direction::Received),
            "sent" => Ok(Direction::Sent),
            other => Err(SmsRelayError::InvalidData(format!(
                "未知的消息方向: {}",
                other
            ))),
        }
    }
}

/// 消息实体 - 对应 message 表
///
/// 入库后不可变：只由采集端创建，只由管理端删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<i64>,
    pub device_id: i64,
    pub sender: String,
    pub content: String,
    /// 消息发生时间（毫秒时间戳）
    pub timestamp: i64,
    pub direction: Direction,
    /// 自由分类标签 (verification/promotion/normal)
    pub category: String,
    pub created_at: i64,
}

/// 规则匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    Exact,
    Fuzzy,
    Regex,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Fuzzy => "fuzzy",
            MatchKind::Regex => "regex",
        }
    }
}

impl FromStr for MatchKind {
    type Err = SmsRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchKind::Exact),
            "fuzzy" => Ok(MatchKind::Fuzzy),
            "regex" => Ok(MatchKind::Regex),
            other => Err(SmsRelayError::InvalidData(format!(
                "未知的匹配方式: {}",
                other
            ))),
        }
    }
}

/// 转发目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardTargetKind {
    /// 存库关联到链接，客户端取回时实时重新匹配
    Link,
    Webhook,
    Email,
}

impl ForwardTargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardTargetKind::Link => "link",
            ForwardTargetKind::Webhook => "webhook",
            ForwardTargetKind::Email => "email",
        }
    }
}

impl FromStr for ForwardTargetKind {
    type Err = SmsRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link" => Ok(ForwardTargetKind::Link),
            "webhook" => Ok(ForwardTargetKind::Webhook),
            "email" => Ok(ForwardTargetKind::Email),
            other => Err(SmsRelayError::InvalidData(format!(
                "未知的转发目标类型: {}",
                other
            ))),
        }
    }
}

/// 转发目标配置（forward_config 列的 JSON 内容）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

/// 转发规则实体 - 对应 rule 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Option<i64>,
    pub account_id: i64,
    pub name: String,
    /// 发送方匹配模式，空或 "*" 为通配
    pub sender_pattern: String,
    pub sender_match: MatchKind,
    /// 内容匹配模式，空或 "*" 为通配
    pub content_pattern: String,
    pub content_match: MatchKind,
    pub is_active: bool,
    /// 数字越大优先级越高
    pub priority: i32,
    /// 客户端一次可见的匹配消息条数
    pub display_count: u32,
    pub target: ForwardTargetKind,
    /// target 为 Link 时指向 link 表
    pub target_link_id: Option<i64>,
    pub forward_config: ForwardConfig,
    pub match_count: i64,
    pub last_match_time: Option<i64>,
    pub created_at: i64,
}

impl Rule {
    /// 保存前校验：regex 模式必须可编译，Link 目标必须配置目标链接。
    /// 匹配期的 regex 编译失败按不匹配处理，但管理端应在这里提前拒绝。
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.sender_match == MatchKind::Regex && !is_universal(&self.sender_pattern) {
            regex::Regex::new(&self.sender_pattern).map_err(|e| {
                SmsRelayError::InvalidData(format!("发送方正则无法编译: {}", e))
            })?;
        }
        if self.content_match == MatchKind::Regex && !is_universal(&self.content_pattern) {
            regex::Regex::new(&self.content_pattern).map_err(|e| {
                SmsRelayError::InvalidData(format!("内容正则无法编译: {}", e))
            })?;
        }
        if self.target == ForwardTargetKind::Link && self.target_link_id.is_none() {
            return Err(SmsRelayError::InvalidData(
                "链接类型的转发目标必须配置 target_link_id".to_string(),
            ));
        }
        Ok(())
    }
}

/// 空白或 "*" 的模式是全匹配
pub fn is_universal(pattern: &str) -> bool {
    let trimmed = pattern.trim();
    trimmed.is_empty() || trimmed == "*"
}

/// 链接生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Unused,
    Used,
    Expired,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Unused => "unused",
            LinkStatus::Used => "used",
            LinkStatus::Expired => "expired",
        }
    }
}

impl FromStr for LinkStatus {
    type Err = SmsRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unused" => Ok(LinkStatus::Unused),
            "used" => Ok(LinkStatus::Used),
            "expired" => Ok(LinkStatus::Expired),
            other => Err(SmsRelayError::InvalidData(format!(
                "未知的链接状态: {}",
                other
            ))),
        }
    }
}

/// 账号链接实体 - 对应 link 表
///
/// 计数器在激活期间只增不减，仅管理端显式重置可以清零。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: Option<i64>,
    pub account_id: i64,
    pub device_id: i64,
    /// 不透明访问令牌
    pub token: String,
    pub status: LinkStatus,
    pub is_active: bool,
    /// 0 表示不限制
    pub max_access_count: i64,
    pub access_count: i64,
    /// 0 表示不限制
    pub max_verification_count: i64,
    pub verification_count: i64,
    /// 验证码冷却间隔（秒）。数据模型保留此字段，但当前生效的
    /// 校验路径只按次数限流，不做时间冷却。
    pub verification_interval: i64,
    /// 访问会话窗口（分钟），窗口内重复访问不计数
    pub session_interval: i64,
    /// 客户端侧建议等待时间（秒），服务端不据此限流
    pub verification_wait_time: i64,
    pub last_access_time: Option<i64>,
    pub last_verification_time: Option<i64>,
    /// 绝对过期时间（毫秒时间戳），None 为永不过期
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

impl Link {
    /// 运营侧批量生成链接时的初始形态
    pub fn new(account_id: i64, device_id: i64) -> Self {
        Self {
            id: None,
            account_id,
            device_id,
            token: uuid::Uuid::new_v4().to_string(),
            status: LinkStatus::Unused,
            is_active: true,
            max_access_count: 5,
            access_count: 0,
            max_verification_count: 5,
            verification_count: 0,
            verification_interval: 10,
            session_interval: 5,
            verification_wait_time: 0,
            last_access_time: None,
            last_verification_time: None,
            expires_at: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 转发结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardStatus {
    Pending,
    Success,
    Failed,
}

impl ForwardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardStatus::Pending => "pending",
            ForwardStatus::Success => "success",
            ForwardStatus::Failed => "failed",
        }
    }
}

impl FromStr for ForwardStatus {
    type Err = SmsRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ForwardStatus::Pending),
            "success" => Ok(ForwardStatus::Success),
            "failed" => Ok(ForwardStatus::Failed),
            other => Err(SmsRelayError::InvalidData(format!(
                "未知的转发状态: {}",
                other
            ))),
        }
    }
}

/// 转发日志实体 - 对应 forward_log 表
///
/// 每次 (消息 × 规则 × 目标) 的投递尝试追加一行，只增不改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardLog {
    pub id: Option<i64>,
    pub message_id: i64,
    pub rule_id: i64,
    pub target_kind: ForwardTargetKind,
    pub target_id: Option<i64>,
    pub status: ForwardStatus,
    pub error: Option<String>,
    pub forwarded_at: i64,
}

impl fmt::Display for ForwardLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ForwardLog(message={}, rule={}, target={}, status={})",
            self.message_id,
            self.rule_id,
            self.target_kind.as_str(),
            self.status.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trip() {
        assert_eq!("fuzzy".parse::<MatchKind>().unwrap(), MatchKind::Fuzzy);
        assert_eq!(MatchKind::Regex.as_str(), "regex");
        assert!("nope".parse::<MatchKind>().is_err());
        assert_eq!("expired".parse::<LinkStatus>().unwrap(), LinkStatus::Expired);
        assert_eq!("webhook".parse::<ForwardTargetKind>().unwrap(), ForwardTargetKind::Webhook);
        assert_eq!("failed".parse::<ForwardStatus>().unwrap(), ForwardStatus::Failed);
    }

    #[test]
    fn test_rule_validate_rejects_bad_regex() {
        let mut rule = sample_rule();
        rule.sender_match = MatchKind::Regex;
        rule.sender_pattern = "[unclosed".to_string();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_rule_validate_link_target_needs_id() {
        let mut rule = sample_rule();
        rule.target = ForwardTargetKind::Link;
        rule.target_link_id = None;
        assert!(rule.validate().is_err());

        rule.target_link_id = Some(1);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_universal_pattern() {
        assert!(is_universal(""));
        assert!(is_universal("  "));
        assert!(is_universal("*"));
        assert!(!is_universal("91*"));
    }

    fn sample_rule() -> Rule {
        Rule {
            id: Some(1),
            account_id: 1,
            name: "测试规则".to_string(),
            sender_pattern: "*".to_string(),
            sender_match: MatchKind::Fuzzy,
            content_pattern: "*".to_string(),
            content_match: MatchKind::Fuzzy,
            is_active: true,
            priority: 0,
            display_count: 5,
            target: ForwardTargetKind::Link,
            target_link_id: Some(1),
            forward_config: ForwardConfig::default(),
            match_count: 0,
            last_match_time: None,
            created_at: 0,
        }
    }
}
