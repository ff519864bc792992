//! 测试公共工具：内存库里的最小数据集构造

use rusqlite::Connection;

use crate::storage::dao::{AccountDao, DeviceDao};
use crate::storage::entities::{
    Account, Device, Direction, ForwardConfig, ForwardTargetKind, MatchKind, Message, Rule,
};

/// 把 tracing 输出接到测试捕获，重复初始化静默忽略
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn insert_account(conn: &Connection) -> i64 {
    AccountDao::new(conn)
        .insert(&Account {
            id: None,
            name: "测试账号".to_string(),
            username: "tester".to_string(),
            primary_device_id: None,
            status: "active".to_string(),
            created_at: 0,
        })
        .unwrap()
}

pub fn insert_device(conn: &Connection, key: &str) -> i64 {
    DeviceDao::new(conn)
        .insert(&Device {
            id: None,
            device_key: key.to_string(),
            name: "测试设备".to_string(),
            is_online: true,
            last_heartbeat: Some(0),
            created_at: 0,
        })
        .unwrap()
}

pub fn sample_message(device_id: i64, sender: &str, content: &str, timestamp: i64) -> Message {
    Message {
        id: None,
        device_id,
        sender: sender.to_string(),
        content: content.to_string(),
        timestamp,
        direction: Direction::Received,
        category: "normal".to_string(),
        created_at: timestamp,
    }
}

/// 全通配、webhook 目标的规则底板，测试按需改字段
pub fn sample_rule(account_id: i64) -> Rule {
    Rule {
        id: None,
        account_id,
        name: "测试规则".to_string(),
        sender_pattern: "*".to_string(),
        sender_match: MatchKind::Fuzzy,
        content_pattern: "*".to_string(),
        content_match: MatchKind::Fuzzy,
        is_active: true,
        priority: 0,
        display_count: 5,
        target: ForwardTargetKind::Webhook,
        target_link_id: None,
        forward_config: ForwardConfig {
            webhook_url: Some("http://127.0.0.1:1/hook".to_string()),
            email_address: None,
        },
        match_count: 0,
        last_match_time: None,
        created_at: 0,
    }
}
