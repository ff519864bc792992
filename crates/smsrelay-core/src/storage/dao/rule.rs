//! 转发规则数据访问层

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::error::{Result, SmsRelayError};
use crate::storage::entities::{ForwardConfig, ForwardTargetKind, MatchKind, Rule};

/// 规则数据访问对象
pub struct RuleDao<'a> {
    conn: &'a Connection,
}

impl<'a> RuleDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 插入规则。保存期校验在这里强制：不可编译的 regex 在入库前就被拒绝。
    pub fn insert(&self, rule: &Rule) -> Result<i64> {
        rule.validate()?;

        let sql = "INSERT INTO rule (
            account_id, name, sender_pattern, sender_match, content_pattern, content_match,
            is_active, priority, display_count, target, target_link_id, forward_config,
            match_count, last_match_time, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

        self.conn.execute(
            sql,
            params![
                rule.account_id,
                rule.name,
                rule.sender_pattern,
                rule.sender_match.as_str(),
                rule.content_pattern,
                rule.content_match.as_str(),
                rule.is_active as i32,
                rule.priority,
                rule.display_count,
                rule.target.as_str(),
                rule.target_link_id,
                serde_json::to_string(&rule.forward_config)?,
                rule.match_count,
                rule.last_match_time,
                rule.created_at,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Rule>> {
        let mut stmt = self.conn.prepare("SELECT * FROM rule WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| row_to_rule(row))?;
        match rows.next() {
            Some(Ok(rule)) => Ok(Some(rule)),
            Some(Err(e)) => Err(SmsRelayError::Database(format!("查询规则失败: {}", e))),
            None => Ok(None),
        }
    }

    /// 账号的活跃规则，按优先级降序、id 升序（决定匹配评估顺序）
    pub fn list_active_by_account(&self, account_id: i64) -> Result<Vec<Rule>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM rule WHERE account_id = ?1 AND is_active = 1
             ORDER BY priority DESC, id ASC",
        )?;
        let rows = stmt.query_map(params![account_id], |row| row_to_rule(row))?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row?);
        }
        Ok(rules)
    }

    /// 匹配统计：匹配器唯一允许的规则变更
    pub fn bump_match_stats(&self, id: i64) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let affected = self.conn.execute(
            "UPDATE rule SET match_count = match_count + 1, last_match_time = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        if affected == 0 {
            return Err(SmsRelayError::NotFound(format!("规则不存在: {}", id)));
        }
        Ok(())
    }

    pub fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE rule SET is_active = ?1 WHERE id = ?2",
            params![active as i32, id],
        )?;
        if affected == 0 {
            return Err(SmsRelayError::NotFound(format!("规则不存在: {}", id)));
        }
        Ok(())
    }
}

fn row_to_rule(row: &Row) -> rusqlite::Result<Rule> {
    let sender_match: String = row.get("sender_match")?;
    let content_match: String = row.get("content_match")?;
    let target: String = row.get("target")?;
    let config_json: String = row.get("forward_config")?;

    let bad_text = |field: &str, value: &str| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("bad {}: {}", field, value).into(),
        )
    };

    Ok(Rule {
        id: row.get("id")?,
        account_id: row.get("account_id")?,
        name: row.get("name")?,
        sender_pattern: row.get("sender_pattern")?,
        sender_match: sender_match
            .parse::<MatchKind>()
            .map_err(|_| bad_text("sender_match", &sender_match))?,
        content_pattern: row.get("content_pattern")?,
        content_match: content_match
            .parse::<MatchKind>()
            .map_err(|_| bad_text("content_match", &content_match))?,
        is_active: row.get::<_, i32>("is_active")? != 0,
        priority: row.get("priority")?,
        display_count: row.get("display_count")?,
        target: target
            .parse::<ForwardTargetKind>()
            .map_err(|_| bad_text("target", &target))?,
        target_link_id: row.get("target_link_id")?,
        forward_config: serde_json::from_str::<ForwardConfig>(&config_json)
            .map_err(|_| bad_text("forward_config", &config_json))?,
        match_count: row.get("match_count")?,
        last_match_time: row.get("last_match_time")?,
        created_at: row.get("created_at")?,
    })
}
