//! 短信入库管道
//!
//! 设备端批量上报短信，这里逐条做字段校验、两层去重（内存 TTL 缓存在
//! 前、库内存在性检查兜底）、自动分类，然后对归属账号的启用规则逐条
//! 触发转发。单条出错不影响批次内其它条目，结果计数按条返回。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::{Result, SmsRelayError};
use crate::forwarder::ForwardDispatcher;
use crate::matcher;
use crate::storage::dao::{AccountDao, DeviceDao, MessageDao, RuleDao};
use crate::storage::entities::{Direction, Message, Rule};
use crate::storage::SmsStore;

/// 设备上报的单条短信
#[derive(Debug, Clone)]
pub struct IncomingSms {
    pub sender: String,
    pub content: String,
    /// 短信原始时间戳（毫秒）
    pub timestamp: i64,
}

/// 批量入库结果计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub saved: usize,
    pub duplicate: usize,
    pub error: usize,
}

/// 有界 TTL 去重缓存。键是消息指纹，过期条目惰性清理，
/// 容量打满时先清过期、再淘汰最旧。
struct DedupCache {
    ttl: Duration,
    max_entries: usize,
    seen: HashMap<String, Instant>,
}

impl DedupCache {
    fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            seen: HashMap::new(),
        }
    }

    /// 返回该指纹是否已见过；未见过则登记
    fn check_and_insert(&mut self, key: String) -> bool {
        let now = Instant::now();
        if let Some(at) = self.seen.get(&key) {
            if now.duration_since(*at) <= self.ttl {
                return true;
            }
        }
        if self.seen.len() >= self.max_entries {
            self.purge(now);
        }
        self.seen.insert(key, now);
        false
    }

    fn purge(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen.retain(|_, at| now.duration_since(*at) <= ttl);
        while self.seen.len() >= self.max_entries {
            let oldest = self
                .seen
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.seen.remove(&k);
                }
                None => break,
            }
        }
    }
}

/// 消息指纹：设备、发送方、内容、精确时间戳共同构成去重键
fn dedup_key(device_id: i64, sender: &str, content: &str, timestamp: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_id.to_le_bytes());
    hasher.update(sender.as_bytes());
    hasher.update(b"|");
    hasher.update(content.as_bytes());
    hasher.update(timestamp.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// 内容关键词分类，拿不准一律归 normal
fn categorize(content: &str) -> &'static str {
    let lower = content.to_lowercase();
    const VERIFICATION: &[&str] = &[
        "验证码", "校验码", "动态码", "安全码", "verification", "otp", "passcode",
    ];
    const PROMOTION: &[&str] = &[
        "退订", "优惠", "折扣", "促销", "回t", "unsubscribe", "sale",
    ];
    if VERIFICATION.iter().any(|k| lower.contains(k)) {
        "verification"
    } else if PROMOTION.iter().any(|k| lower.contains(k)) {
        "promotion"
    } else {
        "normal"
    }
}

/// 入库管道
pub struct IngestPipeline {
    store: SmsStore,
    dispatcher: ForwardDispatcher,
    cache: Mutex<DedupCache>,
}

impl IngestPipeline {
    pub fn new(store: SmsStore, config: &RelayConfig) -> Result<Self> {
        let dispatcher = ForwardDispatcher::new(store.clone(), config.webhook_timeout)?;
        Ok(Self::with_dispatcher(store, config, dispatcher))
    }

    pub fn with_dispatcher(
        store: SmsStore,
        config: &RelayConfig,
        dispatcher: ForwardDispatcher,
    ) -> Self {
        Self {
            store,
            dispatcher,
            cache: Mutex::new(DedupCache::new(config.dedup_retention, config.dedup_max_entries)),
        }
    }

    /// 批量入库。设备必须已注册；条目校验失败计 error，重复计
    /// duplicate，落库成功计 saved。保存后的消息立即走转发。
    pub async fn ingest_batch(
        &self,
        device_key: &str,
        entries: Vec<IncomingSms>,
    ) -> Result<IngestReport> {
        let device_id = self.store.with_conn(|conn| {
            let device = DeviceDao::new(conn)
                .get_by_key(device_key)?
                .ok_or_else(|| SmsRelayError::NotFound(format!("设备不存在: {}", device_key)))?;
            device
                .id
                .ok_or_else(|| SmsRelayError::InvalidData("设备缺少 id".to_string()))
        })?;

        // 规则按归属账号一次性装载，整批复用
        let rules = self.store.with_conn(|conn| {
            match AccountDao::new(conn).get_by_primary_device(device_id)? {
                Some(account) => match account.id {
                    Some(account_id) => RuleDao::new(conn).list_active_by_account(account_id),
                    None => Ok(Vec::new()),
                },
                None => Ok(Vec::new()),
            }
        })?;

        let mut report = IngestReport::default();
        for entry in entries {
            match self.ingest_one(device_id, &entry, &rules).await {
                Ok(Ingested::Saved) => report.saved += 1,
                Ok(Ingested::Duplicate) => report.duplicate += 1,
                Err(e) => {
                    warn!("短信入库失败: sender={}, err={}", entry.sender, e);
                    report.error += 1;
                }
            }
        }
        debug!(
            "批量入库完成: device={}, saved={}, duplicate={}, error={}",
            device_key, report.saved, report.duplicate, report.error
        );
        Ok(report)
    }

    async fn ingest_one(
        &self,
        device_id: i64,
        entry: &IncomingSms,
        rules: &[Rule],
    ) -> Result<Ingested> {
        let sender = entry.sender.trim();
        let content = entry.content.trim();
        if sender.is_empty() || content.is_empty() {
            return Err(SmsRelayError::InvalidData(
                "发送方与内容不能为空".to_string(),
            ));
        }

        let key = dedup_key(device_id, sender, content, entry.timestamp);
        if self.cache.lock().check_and_insert(key) {
            return Ok(Ingested::Duplicate);
        }

        let saved = self.store.with_conn(|conn| {
            let dao = MessageDao::new(conn);
            if dao.exists(device_id, sender, content, entry.timestamp)? {
                return Ok(None);
            }
            let mut message = Message {
                id: None,
                device_id,
                sender: sender.to_string(),
                content: content.to_string(),
                timestamp: entry.timestamp,
                direction: Direction::Received,
                category: categorize(content).to_string(),
                created_at: Utc::now().timestamp_millis(),
            };
            message.id = Some(dao.insert(&message)?);
            Ok(Some(message))
        })?;

        let message = match saved {
            Some(message) => message,
            None => return Ok(Ingested::Duplicate),
        };

        // 转发失败只记日志行，不影响入库计数
        for rule in matcher::select_rules(&message, rules) {
            if let Err(e) = self.dispatcher.dispatch(&message, rule).await {
                warn!(
                    "消息 {} 规则 {:?} 转发异常: {}",
                    message.id.unwrap_or(-1),
                    rule.id,
                    e
                );
            }
        }

        Ok(Ingested::Saved)
    }
}

enum Ingested {
    Saved,
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::dao::ForwardLogDao;
    use crate::storage::entities::ForwardStatus;
    use crate::test_support::{init_tracing, insert_account, insert_device, sample_rule};

    fn entry(sender: &str, content: &str, timestamp: i64) -> IncomingSms {
        IncomingSms {
            sender: sender.to_string(),
            content: content.to_string(),
            timestamp,
        }
    }

    fn pipeline(store: &SmsStore) -> IngestPipeline {
        IngestPipeline::new(store.clone(), &RelayConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_batch_counts_saved_duplicate_error() {
        init_tracing();
        let store = SmsStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                insert_device(conn, "dev-001");
                Ok(())
            })
            .unwrap();

        let report = pipeline(&store)
            .ingest_batch(
                "dev-001",
                vec![
                    entry("10690757", "您的验证码是8317", 1000),
                    entry("10690757", "您的验证码是8317", 1000),
                    entry("", "缺发送方", 1001),
                    entry("10690757", "另一条消息", 2000),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            report,
            IngestReport {
                saved: 2,
                duplicate: 1,
                error: 1
            }
        );
    }

    #[tokio::test]
    async fn test_same_text_different_timestamp_is_not_duplicate() {
        let store = SmsStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                insert_device(conn, "dev-002");
                Ok(())
            })
            .unwrap();

        let report = pipeline(&store)
            .ingest_batch(
                "dev-002",
                vec![
                    entry("95533", "您尾号1234的账户入账100元", 1000),
                    entry("95533", "您尾号1234的账户入账100元", 5000),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.saved, 2);
        assert_eq!(report.duplicate, 0);
    }

    #[tokio::test]
    async fn test_db_existence_backstops_fresh_cache() {
        let store = SmsStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                insert_device(conn, "dev-003");
                Ok(())
            })
            .unwrap();

        // 第一个管道实例落库
        pipeline(&store)
            .ingest_batch("dev-003", vec![entry("95533", "入账通知", 1000)])
            .await
            .unwrap();

        // 新实例缓存为空，靠库内检查兜底
        let report = pipeline(&store)
            .ingest_batch("dev-003", vec![entry("95533", "入账通知", 1000)])
            .await
            .unwrap();
        assert_eq!(report.duplicate, 1);
        assert_eq!(report.saved, 0);
    }

    #[tokio::test]
    async fn test_saved_message_is_categorized_and_forwarded() {
        let store = SmsStore::open_in_memory().unwrap();
        let rule_id = store
            .with_conn(|conn| {
                let account_id = insert_account(conn);
                let device_id = insert_device(conn, "dev-004");
                AccountDao::new(conn).set_primary_device(account_id, device_id)?;
                let mut rule = sample_rule(account_id);
                rule.forward_config.webhook_url = None;
                rule.target = crate::storage::entities::ForwardTargetKind::Email;
                rule.forward_config.email_address = Some("ops@example.com".to_string());
                RuleDao::new(conn).insert(&rule)
            })
            .unwrap();

        pipeline(&store)
            .ingest_batch(
                "dev-004",
                vec![entry("10690757", "【云服务】您的验证码是8317", 1000)],
            )
            .await
            .unwrap();

        store
            .with_conn(|conn| {
                let messages = MessageDao::new(conn).list_by_device_desc(
                    DeviceDao::new(conn).get_by_key("dev-004")?.unwrap().id.unwrap(),
                    None,
                )?;
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].category, "verification");

                let logs =
                    ForwardLogDao::new(conn).list_by_message(messages[0].id.unwrap())?;
                assert_eq!(logs.len(), 1);
                assert_eq!(logs[0].rule_id, rule_id);
                assert_eq!(logs[0].status, ForwardStatus::Success);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_categorize_keywords() {
        assert_eq!(categorize("您的验证码是8317"), "verification");
        assert_eq!(categorize("Your OTP is 472913"), "verification");
        assert_eq!(categorize("限时优惠，回T退订"), "promotion");
        assert_eq!(categorize("今晚一起吃饭吗"), "normal");
    }

    #[test]
    fn test_dedup_cache_ttl_and_bound() {
        let mut cache = DedupCache::new(Duration::from_secs(3600), 2);
        assert!(!cache.check_and_insert("a".to_string()));
        assert!(cache.check_and_insert("a".to_string()));
        assert!(!cache.check_and_insert("b".to_string()));
        // 容量打满时淘汰最旧，新键仍可登记
        assert!(!cache.check_and_insert("c".to_string()));
        assert!(cache.seen.len() <= 2);
    }
}
