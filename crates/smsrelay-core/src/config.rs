//! 运行配置
//!
//! 集中管理核心服务的可调参数，避免散落在各模块里的硬编码值。

use std::time::Duration;

/// 核心服务配置
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// 在线状态扫描间隔
    pub monitor_interval: Duration,
    /// 心跳离线阈值
    pub offline_threshold: Duration,
    /// Webhook 转发超时（出站请求必须有界）
    pub webhook_timeout: Duration,
    /// 无活跃规则时客户端默认显示条数
    pub fallback_display_count: u32,
    /// 去重缓存保留时间
    pub dedup_retention: Duration,
    /// 去重缓存最大条目数
    pub dedup_max_entries: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(5),
            offline_threshold: Duration::from_secs(60),
            webhook_timeout: Duration::from_secs(10),
            fallback_display_count: 3,
            dedup_retention: Duration::from_secs(3600),
            dedup_max_entries: 10_000,
        }
    }
}
