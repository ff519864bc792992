//! 链接访问限流模块
//!
//! 链接状态机：active-unused → active-used → {访问耗尽 | 验证码耗尽 | 过期}，
//! 任何状态都可被管理端标记停用。拒绝永远带可区分的原因，调用方据此
//! 渲染具体提示；计数器从不自动回落，只有管理端显式重置。
//!
//! 这里只做纯状态机变换（`&mut Link`），持久化由调用方通过 `LinkDao` 回写。

use thiserror::Error;

use crate::storage::entities::{Link, LinkStatus};

/// 限流拒绝原因（封闭集合，不设泛化变体）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("链接已失效")]
    Inactive,
    #[error("链接已过期")]
    Expired,
    #[error("访问次数已达上限")]
    AccessExhausted,
    #[error("验证码获取次数已达上限")]
    VerificationExhausted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Inactive => "inactive",
            DenyReason::Expired => "expired",
            DenyReason::AccessExhausted => "access-exhausted",
            DenyReason::VerificationExhausted => "verification-exhausted",
        }
    }
}

/// 访问校验通过后的口径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// 新会话，计数 +1
    Counted,
    /// 会话窗口内的重复访问，放行但不计数
    SameSession,
}

/// 只读的访问资格判定，不动任何计数器
pub fn access_permitted(link: &Link, now_ms: i64) -> Result<(), DenyReason> {
    if !link.is_active {
        return Err(DenyReason::Inactive);
    }
    if link.status == LinkStatus::Expired {
        return Err(DenyReason::Expired);
    }
    if let Some(expires_at) = link.expires_at {
        if expires_at < now_ms {
            return Err(DenyReason::Expired);
        }
    }
    if link.max_access_count > 0 && link.access_count >= link.max_access_count {
        return Err(DenyReason::AccessExhausted);
    }
    Ok(())
}

/// 访问检查。会话窗口（`session_interval` 分钟）内的重复访问视作同一次
/// 浏览，放行且不计数；窗口外计数 +1 并刷新最后访问时间。
/// 首次计数把链接从 unused 推进到 used。
pub fn check_access(link: &mut Link, now_ms: i64) -> Result<AccessOutcome, DenyReason> {
    access_permitted(link, now_ms)?;

    if let Some(last) = link.last_access_time {
        let window_ms = link.session_interval * 60 * 1000;
        if now_ms - last < window_ms {
            tracing::debug!("会话窗口内重复访问: link={}, 计数保持 {}/{}",
                link.token, link.access_count, link.max_access_count);
            return Ok(AccessOutcome::SameSession);
        }
    }

    link.access_count += 1;
    link.last_access_time = Some(now_ms);
    if link.status == LinkStatus::Unused {
        link.status = LinkStatus::Used;
    }
    tracing::debug!("访问计数: link={}, {}/{}",
        link.token, link.access_count, link.max_access_count);
    Ok(AccessOutcome::Counted)
}

/// 只读的取码资格判定：访问资格加次数闸门，不动任何计数器。
/// 调用方可先行判定，确认真有消息可返回后再走 `check_verification` 计数。
pub fn verification_permitted(link: &Link, now_ms: i64) -> Result<(), DenyReason> {
    access_permitted(link, now_ms)?;

    if link.max_verification_count > 0
        && link.verification_count >= link.max_verification_count
    {
        return Err(DenyReason::VerificationExhausted);
    }
    Ok(())
}

/// 验证码拉取检查。先过访问资格（只读，不触发访问计数），再过次数闸门：
/// `max_verification_count == 0` 表示不限次。通过即计数 +1 并刷新时间戳。
///
/// 数据模型里保留的 `verification_interval` 冷却字段在此路径上刻意不生效，
/// 当前只按次数限流。
pub fn check_verification(link: &mut Link, now_ms: i64) -> Result<(), DenyReason> {
    verification_permitted(link, now_ms)?;

    link.verification_count += 1;
    link.last_verification_time = Some(now_ms);
    if link.status == LinkStatus::Unused {
        link.status = LinkStatus::Used;
    }
    tracing::debug!("验证码计数: link={}, {}/{}",
        link.token, link.verification_count, link.max_verification_count);
    Ok(())
}

/// 管理端显式重置：唯一会让计数器回落的路径
pub fn admin_reset(link: &mut Link) {
    link.access_count = 0;
    link.verification_count = 0;
    link.last_access_time = None;
    link.last_verification_time = None;
    link.status = LinkStatus::Unused;
    link.is_active = true;
    tracing::info!("链接已重置: {}", link.token);
}

/// 过期链接的剩余锁定提示（毫秒），给调用方渲染用
pub fn remaining_lockout_ms(link: &Link, now_ms: i64) -> Option<i64> {
    link.expires_at.and_then(|expires_at| {
        if expires_at < now_ms {
            None
        } else {
            Some(expires_at - now_ms)
        }
    })
}
