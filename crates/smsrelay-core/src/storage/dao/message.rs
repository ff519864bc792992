//! 消息数据访问层
//!
//! 消息入库后不可变：这里只有插入、查询与管理端删除，没有更新。

use rusqlite::{params, Connection, Row};

use crate::error::{Result, SmsRelayError};
use crate::storage::entities::{Direction, Message};

/// 消息数据访问对象
pub struct MessageDao<'a> {
    conn: &'a Connection,
}

impl<'a> MessageDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 插入新消息，返回行 id
    pub fn insert(&self, message: &Message) -> Result<i64> {
        let sql = "INSERT INTO message (
            device_id, sender, content, timestamp, direction, category, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

        self.conn.execute(
            sql,
            params![
                message.device_id,
                message.sender,
                message.content,
                message.timestamp,
                message.direction.as_str(),
                message.category,
                message.created_at,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// 落库前查重：键为 (设备, 发送方, 内容, 精确时间戳)
    pub fn exists(&self, device_id: i64, sender: &str, content: &str, timestamp: i64) -> Result<bool> {
        let sql = "SELECT 1 FROM message
                   WHERE device_id = ?1 AND sender = ?2 AND content = ?3 AND timestamp = ?4
                   LIMIT 1";
        match self
            .conn
            .query_row(sql, params![device_id, sender, content, timestamp], |_| Ok(()))
        {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(SmsRelayError::Database(format!("查重失败: {}", e))),
        }
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Message>> {
        let sql = "SELECT * FROM message WHERE id = ?1";
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query_map(params![id], |row| row_to_message(row))?;
        match rows.next() {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(SmsRelayError::Database(format!("查询消息失败: {}", e))),
            None => Ok(None),
        }
    }

    /// 设备消息按时间倒序（最新在前）
    pub fn list_by_device_desc(&self, device_id: i64, limit: Option<u32>) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        match limit {
            Some(n) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM message WHERE device_id = ?1
                     ORDER BY timestamp DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![device_id, n], |row| row_to_message(row))?;
                for row in rows {
                    messages.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM message WHERE device_id = ?1 ORDER BY timestamp DESC",
                )?;
                let rows = stmt.query_map(params![device_id], |row| row_to_message(row))?;
                for row in rows {
                    messages.push(row?);
                }
            }
        }
        Ok(messages)
    }

    pub fn count_by_device(&self, device_id: i64) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM message WHERE device_id = ?1",
            params![device_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 管理端删除，消息的唯一可变路径
    pub fn delete(&self, id: i64) -> Result<()> {
        let affected = self
            .conn
            .execute("DELETE FROM message WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(SmsRelayError::NotFound(format!("消息不存在: {}", id)));
        }
        Ok(())
    }
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let direction: String = row.get("direction")?;
    Ok(Message {
        id: row.get("id")?,
        device_id: row.get("device_id")?,
        sender: row.get("sender")?,
        content: row.get("content")?,
        timestamp: row.get("timestamp")?,
        direction: direction.parse::<Direction>().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("bad direction: {}", direction).into(),
            )
        })?,
        category: row.get("category")?,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SmsStore;
    use crate::test_support::{insert_device, sample_message};

    #[test]
    fn test_insert_and_get() {
        let store = SmsStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let device_id = insert_device(conn, "dev-001");
                let dao = MessageDao::new(conn);
                let id = dao
                    .insert(&sample_message(device_id, "10690757", "您的验证码是8317", 1000))
                    .unwrap();
                assert!(id > 0);

                let loaded = dao.get_by_id(id).unwrap().unwrap();
                assert_eq!(loaded.sender, "10690757");
                assert_eq!(loaded.direction, Direction::Received);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_exists_requires_exact_timestamp() {
        let store = SmsStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let device_id = insert_device(conn, "dev-001");
                let dao = MessageDao::new(conn);
                dao.insert(&sample_message(device_id, "95588", "hello", 1000)).unwrap();

                assert!(dao.exists(device_id, "95588", "hello", 1000).unwrap());
                // 时间戳不同视为新消息
                assert!(!dao.exists(device_id, "95588", "hello", 2000).unwrap());
                assert!(!dao.exists(device_id, "95588", "world", 1000).unwrap());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_list_desc_order() {
        let store = SmsStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let device_id = insert_device(conn, "dev-001");
                let dao = MessageDao::new(conn);
                dao.insert(&sample_message(device_id, "a", "first", 1000)).unwrap();
                dao.insert(&sample_message(device_id, "b", "second", 3000)).unwrap();
                dao.insert(&sample_message(device_id, "c", "third", 2000)).unwrap();

                let all = dao.list_by_device_desc(device_id, None).unwrap();
                let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, vec!["second", "third", "first"]);

                let limited = dao.list_by_device_desc(device_id, Some(2)).unwrap();
                assert_eq!(limited.len(), 2);
                Ok(())
            })
            .unwrap();
    }
}
