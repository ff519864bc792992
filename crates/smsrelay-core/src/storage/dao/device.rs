//! 设备数据访问层

use rusqlite::{params, Connection, Row};

use crate::error::{Result, SmsRelayError};
use crate::storage::entities::Device;

/// 设备数据访问对象
pub struct DeviceDao<'a> {
    conn: &'a Connection,
}

impl<'a> DeviceDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, device: &Device) -> Result<i64> {
        let sql = "INSERT INTO device (device_key, name, is_online, last_heartbeat, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5)";
        self.conn.execute(
            sql,
            params![
                device.device_key,
                device.name,
                device.is_online as i32,
                device.last_heartbeat,
                device.created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Device>> {
        self.query_one("SELECT * FROM device WHERE id = ?1", params![id])
    }

    pub fn get_by_key(&self, device_key: &str) -> Result<Option<Device>> {
        self.query_one("SELECT * FROM device WHERE device_key = ?1", params![device_key])
    }

    /// 当前在线的设备，供状态监控扫描
    pub fn list_online(&self) -> Result<Vec<Device>> {
        let mut stmt = self.conn.prepare("SELECT * FROM device WHERE is_online = 1")?;
        let rows = stmt.query_map([], |row| row_to_device(row))?;
        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    /// 记录心跳：刷新时间戳并置为在线
    pub fn record_heartbeat(&self, id: i64, at: i64) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE device SET last_heartbeat = ?1, is_online = 1 WHERE id = ?2",
            params![at, id],
        )?;
        if affected == 0 {
            return Err(SmsRelayError::NotFound(format!("设备不存在: {}", id)));
        }
        Ok(())
    }

    pub fn set_online(&self, id: i64, online: bool) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE device SET is_online = ?1 WHERE id = ?2",
            params![online as i32, id],
        )?;
        if affected == 0 {
            return Err(SmsRelayError::NotFound(format!("设备不存在: {}", id)));
        }
        Ok(())
    }

    fn query_one(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<Device>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query_map(params, |row| row_to_device(row))?;
        match rows.next() {
            Some(Ok(device)) => Ok(Some(device)),
            Some(Err(e)) => Err(SmsRelayError::Database(format!("查询设备失败: {}", e))),
            None => Ok(None),
        }
    }
}

fn row_to_device(row: &Row) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get("id")?,
        device_key: row.get("device_key")?,
        name: row.get("name")?,
        is_online: row.get::<_, i32>("is_online")? != 0,
        last_heartbeat: row.get("last_heartbeat")?,
        created_at: row.get("created_at")?,
    })
}
