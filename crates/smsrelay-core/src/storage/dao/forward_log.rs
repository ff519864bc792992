//! 转发日志数据访问层
//!
//! 追加型表：每次投递尝试一行，失败行保持失败，直到运营手工重发。

use rusqlite::{params, Connection, Row};

use crate::error::{Result, SmsRelayError};
use crate::storage::entities::{ForwardLog, ForwardStatus, ForwardTargetKind};

/// 转发日志数据访问对象
pub struct ForwardLogDao<'a> {
    conn: &'a Connection,
}

impl<'a> ForwardLogDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, log: &ForwardLog) -> Result<i64> {
        let sql = "INSERT INTO forward_log (
            message_id, rule_id, target_kind, target_id, status, error, forwarded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

        self.conn.execute(
            sql,
            params![
                log.message_id,
                log.rule_id,
                log.target_kind.as_str(),
                log.target_id,
                log.status.as_str(),
                log.error,
                log.forwarded_at,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<ForwardLog>> {
        let mut stmt = self.conn.prepare("SELECT * FROM forward_log WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| row_to_log(row))?;
        match rows.next() {
            Some(Ok(log)) => Ok(Some(log)),
            Some(Err(e)) => Err(SmsRelayError::Database(format!("查询转发日志失败: {}", e))),
            None => Ok(None),
        }
    }

    pub fn list_by_message(&self, message_id: i64) -> Result<Vec<ForwardLog>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM forward_log WHERE message_id = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![message_id], |row| row_to_log(row))?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }

    /// 运营侧排障视图：最近的日志，可按规则过滤
    pub fn list_recent(&self, rule_id: Option<i64>, limit: u32) -> Result<Vec<ForwardLog>> {
        let mut logs = Vec::new();
        match rule_id {
            Some(rid) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM forward_log WHERE rule_id = ?1
                     ORDER BY forwarded_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![rid, limit], |row| row_to_log(row))?;
                for row in rows {
                    logs.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM forward_log ORDER BY forwarded_at DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], |row| row_to_log(row))?;
                for row in rows {
                    logs.push(row?);
                }
            }
        }
        Ok(logs)
    }
}

fn row_to_log(row: &Row) -> rusqlite::Result<ForwardLog> {
    let target_kind: String = row.get("target_kind")?;
    let status: String = row.get("status")?;

    let bad_text = |field: &str, value: &str| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("bad {}: {}", field, value).into(),
        )
    };

    Ok(ForwardLog {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        rule_id: row.get("rule_id")?,
        target_kind: target_kind
            .parse::<ForwardTargetKind>()
            .map_err(|_| bad_text("target_kind", &target_kind))?,
        target_id: row.get("target_id")?,
        status: status
            .parse::<ForwardStatus>()
            .map_err(|_| bad_text("status", &status))?,
        error: row.get("error")?,
        forwarded_at: row.get("forwarded_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SmsStore;
    use crate::test_support::{insert_account, insert_device, sample_message, sample_rule};
    use crate::storage::dao::{MessageDao, RuleDao};

    #[test]
    fn test_append_and_list() {
        let store = SmsStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let account_id = insert_account(conn);
                let device_id = insert_device(conn, "dev-001");
                let message_id = MessageDao::new(conn)
                    .insert(&sample_message(device_id, "95588", "hi", 1000))
                    .unwrap();
                let rule_id = RuleDao::new(conn).insert(&sample_rule(account_id)).unwrap();

                let dao = ForwardLogDao::new(conn);
                dao.insert(&ForwardLog {
                    id: None,
                    message_id,
                    rule_id,
                    target_kind: ForwardTargetKind::Webhook,
                    target_id: None,
                    status: ForwardStatus::Failed,
                    error: Some("Webhook URL未配置".to_string()),
                    forwarded_at: 1,
                })
                .unwrap();
                dao.insert(&ForwardLog {
                    id: None,
                    message_id,
                    rule_id,
                    target_kind: ForwardTargetKind::Link,
                    target_id: Some(1),
                    status: ForwardStatus::Success,
                    error: None,
                    forwarded_at: 2,
                })
                .unwrap();

                let logs = dao.list_by_message(message_id).unwrap();
                assert_eq!(logs.len(), 2);
                assert_eq!(logs[0].status, ForwardStatus::Failed);
                assert_eq!(logs[1].status, ForwardStatus::Success);

                let recent = dao.list_recent(Some(rule_id), 10).unwrap();
                assert_eq!(recent.len(), 2);
                Ok(())
            })
            .unwrap();
    }
}
