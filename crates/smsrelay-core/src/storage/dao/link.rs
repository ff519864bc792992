//! 账号链接数据访问层
//!
//! 限流计数的读-改-写在 `SmsStore` 的连接锁内完成，
//! 单进程内不会并发越过上限；跨进程部署不在设计范围。

use rusqlite::{params, Connection, Row};

use crate::error::{Result, SmsRelayError};
use crate::storage::entities::{Link, LinkStatus};

/// 链接数据访问对象
pub struct LinkDao<'a> {
    conn: &'a Connection,
}

impl<'a> LinkDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, link: &Link) -> Result<i64> {
        let sql = "INSERT INTO link (
            account_id, device_id, token, status, is_active,
            max_access_count, access_count, max_verification_count, verification_count,
            verification_interval, session_interval, verification_wait_time,
            last_access_time, last_verification_time, expires_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)";

        self.conn.execute(
            sql,
            params![
                link.account_id,
                link.device_id,
                link.token,
                link.status.as_str(),
                link.is_active as i32,
                link.max_access_count,
                link.access_count,
                link.max_verification_count,
                link.verification_count,
                link.verification_interval,
                link.session_interval,
                link.verification_wait_time,
                link.last_access_time,
                link.last_verification_time,
                link.expires_at,
                link.created_at,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// 运营侧批量生成
    pub fn insert_batch(&self, account_id: i64, device_id: i64, count: usize) -> Result<Vec<i64>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.insert(&Link::new(account_id, device_id))?);
        }
        tx.commit()?;
        Ok(ids)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Link>> {
        self.query_one("SELECT * FROM link WHERE id = ?1", params![id])
    }

    pub fn get_by_token(&self, token: &str) -> Result<Option<Link>> {
        self.query_one("SELECT * FROM link WHERE token = ?1", params![token])
    }

    /// 回写限流状态机可变的全部字段
    pub fn update_throttle_state(&self, link: &Link) -> Result<()> {
        let id = link
            .id
            .ok_or_else(|| SmsRelayError::InvalidData("链接缺少 id".to_string()))?;
        let affected = self.conn.execute(
            "UPDATE link SET
                status = ?1, is_active = ?2,
                access_count = ?3, verification_count = ?4,
                last_access_time = ?5, last_verification_time = ?6
             WHERE id = ?7",
            params![
                link.status.as_str(),
                link.is_active as i32,
                link.access_count,
                link.verification_count,
                link.last_access_time,
                link.last_verification_time,
                id,
            ],
        )?;
        if affected == 0 {
            return Err(SmsRelayError::NotFound(format!("链接不存在: {}", id)));
        }
        Ok(())
    }

    pub fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE link SET is_active = ?1 WHERE id = ?2",
            params![active as i32, id],
        )?;
        if affected == 0 {
            return Err(SmsRelayError::NotFound(format!("链接不存在: {}", id)));
        }
        Ok(())
    }

    fn query_one(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<Link>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query_map(params, |row| row_to_link(row))?;
        match rows.next() {
            Some(Ok(link)) => Ok(Some(link)),
            Some(Err(e)) => Err(SmsRelayError::Database(format!("查询链接失败: {}", e))),
            None => Ok(None),
        }
    }
}

fn row_to_link(row: &Row) -> rusqlite::Result<Link> {
    let status: String = row.get("status")?;
    Ok(Link {
        id: row.get("id")?,
        account_id: row.get("account_id")?,
        device_id: row.get("device_id")?,
        token: row.get("token")?,
        status: status.parse::<LinkStatus>().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("bad status: {}", status).into(),
            )
        })?,
        is_active: row.get::<_, i32>("is_active")? != 0,
        max_access_count: row.get("max_access_count")?,
        access_count: row.get("access_count")?,
        max_verification_count: row.get("max_verification_count")?,
        verification_count: row.get("verification_count")?,
        verification_interval: row.get("verification_interval")?,
        session_interval: row.get("session_interval")?,
        verification_wait_time: row.get("verification_wait_time")?,
        last_access_time: row.get("last_access_time")?,
        last_verification_time: row.get("last_verification_time")?,
        expires_at: row.get("expires_at")?,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SmsStore;
    use crate::test_support::{insert_account, insert_device};

    #[test]
    fn test_batch_insert_unique_tokens() {
        let store = SmsStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let account_id = insert_account(conn);
                let device_id = insert_device(conn, "dev-001");
                let dao = LinkDao::new(conn);

                let ids = dao.insert_batch(account_id, device_id, 3).unwrap();
                assert_eq!(ids.len(), 3);

                let mut tokens = std::collections::HashSet::new();
                for id in ids {
                    let link = dao.get_by_id(id).unwrap().unwrap();
                    assert_eq!(link.status, LinkStatus::Unused);
                    tokens.insert(link.token);
                }
                assert_eq!(tokens.len(), 3);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_throttle_state_round_trip() {
        let store = SmsStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let account_id = insert_account(conn);
                let device_id = insert_device(conn, "dev-001");
                let dao = LinkDao::new(conn);

                let id = dao.insert(&Link::new(account_id, device_id)).unwrap();
                let mut link = dao.get_by_id(id).unwrap().unwrap();

                link.status = LinkStatus::Used;
                link.access_count = 2;
                link.last_access_time = Some(5000);
                dao.update_throttle_state(&link).unwrap();

                let reloaded = dao.get_by_token(&link.token).unwrap().unwrap();
                assert_eq!(reloaded.status, LinkStatus::Used);
                assert_eq!(reloaded.access_count, 2);
                assert_eq!(reloaded.last_access_time, Some(5000));
                Ok(())
            })
            .unwrap();
    }
}
