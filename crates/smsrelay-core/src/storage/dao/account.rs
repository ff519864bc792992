//! 账号数据访问层
//!
//! 账号只是规则与链接的归属方，这里保持最小操作集。

use rusqlite::{params, Connection, Row};

use crate::error::{Result, SmsRelayError};
use crate::storage::entities::Account;

/// 账号数据访问对象
pub struct AccountDao<'a> {
    conn: &'a Connection,
}

impl<'a> AccountDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, account: &Account) -> Result<i64> {
        let sql = "INSERT INTO account (name, username, primary_device_id, status, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5)";
        self.conn.execute(
            sql,
            params![
                account.name,
                account.username,
                account.primary_device_id,
                account.status,
                account.created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        let mut stmt = self.conn.prepare("SELECT * FROM account WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| row_to_account(row))?;
        match rows.next() {
            Some(Ok(account)) => Ok(Some(account)),
            Some(Err(e)) => Err(SmsRelayError::Database(format!("查询账号失败: {}", e))),
            None => Ok(None),
        }
    }

    /// 按主设备反查归属账号，入库分发时用
    pub fn get_by_primary_device(&self, device_id: i64) -> Result<Option<Account>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM account WHERE primary_device_id = ?1")?;
        let mut rows = stmt.query_map(params![device_id], |row| row_to_account(row))?;
        match rows.next() {
            Some(Ok(account)) => Ok(Some(account)),
            Some(Err(e)) => Err(SmsRelayError::Database(format!("查询账号失败: {}", e))),
            None => Ok(None),
        }
    }

    pub fn set_primary_device(&self, id: i64, device_id: i64) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE account SET primary_device_id = ?1 WHERE id = ?2",
            params![device_id, id],
        )?;
        if affected == 0 {
            return Err(SmsRelayError::NotFound(format!("账号不存在: {}", id)));
        }
        Ok(())
    }
}

fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get("id")?,
        name: row.get("name")?,
        username: row.get("username")?,
        primary_device_id: row.get("primary_device_id")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
    })
}
