//! SQLite 存储模块
//!
//! 本模块提供：
//! - WAL 模式的 SQLite 连接管理
//! - 固定版本化的表结构（显式可空字段，不做运行时字段探测）
//! - 各表的数据访问层（DAO）
//!
//! 单写进程假设：所有写入经过同一个连接锁，不做跨实例协调。

pub mod dao;
pub mod entities;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::{Result, SmsRelayError};

/// SQLite 存储组件
///
/// 连接由互斥锁保护，DAO 在持锁期间以 `&Connection` 借用操作。
#[derive(Clone)]
pub struct SmsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SmsStore {
    /// 打开（或创建）磁盘数据库
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| SmsRelayError::Database(format!("打开数据库失败: {}", e)))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| SmsRelayError::Database(format!("设置 WAL 模式失败: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| SmsRelayError::Database(format!("设置同步模式失败: {}", e)))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| SmsRelayError::Database(format!("启用外键约束失败: {}", e)))?;

        create_tables(&conn)?;

        tracing::info!("存储初始化完成: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 打开内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在连接锁内执行一段存储操作
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

/// 建表。结构从一开始就是固定 schema，字段可空性显式声明。
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            username TEXT NOT NULL DEFAULT '',
            primary_device_id INTEGER,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS device (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL DEFAULT '',
            is_online INTEGER NOT NULL DEFAULT 0,
            last_heartbeat INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL REFERENCES device(id),
            sender TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            direction TEXT NOT NULL DEFAULT 'received',
            category TEXT NOT NULL DEFAULT 'normal',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_message_device_time
            ON message(device_id, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_message_dedup
            ON message(device_id, sender, timestamp);

        CREATE TABLE IF NOT EXISTS rule (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES account(id),
            name TEXT NOT NULL,
            sender_pattern TEXT NOT NULL DEFAULT '',
            sender_match TEXT NOT NULL DEFAULT 'fuzzy',
            content_pattern TEXT NOT NULL DEFAULT '',
            content_match TEXT NOT NULL DEFAULT 'fuzzy',
            is_active INTEGER NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 0,
            display_count INTEGER NOT NULL DEFAULT 5,
            target TEXT NOT NULL DEFAULT 'link',
            target_link_id INTEGER,
            forward_config TEXT NOT NULL DEFAULT '{}',
            match_count INTEGER NOT NULL DEFAULT 0,
            last_match_time INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rule_account ON rule(account_id, is_active);

        CREATE TABLE IF NOT EXISTS link (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES account(id),
            device_id INTEGER NOT NULL REFERENCES device(id),
            token TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'unused',
            is_active INTEGER NOT NULL DEFAULT 1,
            max_access_count INTEGER NOT NULL DEFAULT 5,
            access_count INTEGER NOT NULL DEFAULT 0,
            max_verification_count INTEGER NOT NULL DEFAULT 5,
            verification_count INTEGER NOT NULL DEFAULT 0,
            verification_interval INTEGER NOT NULL DEFAULT 10,
            session_interval INTEGER NOT NULL DEFAULT 5,
            verification_wait_time INTEGER NOT NULL DEFAULT 0,
            last_access_time INTEGER,
            last_verification_time INTEGER,
            expires_at INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS forward_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id INTEGER NOT NULL REFERENCES message(id),
            rule_id INTEGER NOT NULL REFERENCES rule(id),
            target_kind TEXT NOT NULL,
            target_id INTEGER,
            status TEXT NOT NULL DEFAULT 'pending',
            error TEXT,
            forwarded_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_forward_log_message ON forward_log(message_id);
        ",
    )
    .map_err(|e| SmsRelayError::Database(format!("建表失败: {}", e)))?;

    Ok(())
}
