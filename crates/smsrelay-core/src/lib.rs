//! SMS Relay Core - 短信中继核心库
//!
//! 把设备端上报的短信接入、存储，并按规则转发给消费方，包括：
//! - 📥 批量入库：字段校验、TTL 缓存 + 库内双层去重、自动分类
//! - 🎯 规则匹配：精确 / 模糊（`*` 通配）/ 正则三种方式，按优先级裁决
//! - 🔑 验证码提取：按来源地区分层的模式库，带置信度与上下文
//! - 🚦 访问节流：链接级会话窗口计数与取码配额，管理员可重置
//! - 📤 转发分发：链接存储 / Webhook / 邮件多目标扇出，逐目标留痕
//! - 💓 设备监控：心跳上报与离线扫描，状态事件广播
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use smsrelay_core::{IncomingSms, IngestPipeline, RelayConfig, RetrievalService, SmsStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SmsStore::open(std::path::Path::new("/path/to/relay.db"))?;
//!     let config = RelayConfig::default();
//!
//!     // 设备端批量上报
//!     let pipeline = IngestPipeline::new(store.clone(), &config)?;
//!     let report = pipeline
//!         .ingest_batch(
//!             "device-key-001",
//!             vec![IncomingSms {
//!                 sender: "10690757".to_string(),
//!                 content: "【云服务】您的验证码是8317".to_string(),
//!                 timestamp: 1_700_000_000_000,
//!             }],
//!         )
//!         .await?;
//!     println!("已保存 {} 条", report.saved);
//!
//!     // 消费方凭链接 token 取码
//!     let retrieval = RetrievalService::new(store, config);
//!     let decision = retrieval.pull_verification("link-token")?;
//!     println!("{:?}", decision);
//!
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod config;
pub mod error;
pub mod extractor;
pub mod forwarder;
pub mod ingest;
pub mod matcher;
pub mod monitor;
pub mod retrieval;
pub mod storage;
pub mod throttle;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出常用类型
pub use config::RelayConfig;
pub use error::{Result, SmsRelayError};
pub use extractor::{CodeCandidate, CodeExtractor, CodeSummary, Region};
pub use forwarder::{EmailSender, ForwardDispatcher, ForwardOutcome, WebhookSender};
pub use ingest::{IncomingSms, IngestPipeline, IngestReport};
pub use monitor::{LivenessEvent, PresenceMonitor};
pub use retrieval::{
    AccessDecision, AnnotatedMessage, Denied, LinkStatusView, RetrievalService,
    VerificationDecision,
};
pub use storage::entities::{
    Account, Device, ForwardLog, ForwardStatus, ForwardTargetKind, Link, LinkStatus, MatchKind,
    Message, Rule,
};
pub use storage::SmsStore;
pub use throttle::{AccessOutcome, DenyReason};
