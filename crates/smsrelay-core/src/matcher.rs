//! 规则匹配模块
//!
//! 判定一条消息是否满足规则的发送方/内容条件。匹配过程设计为
//! 失败关闭：无法编译的 regex、空模式都只产生「不匹配」，从不报错。

use regex::RegexBuilder;

use crate::storage::entities::{is_universal, MatchKind, Message, Rule};

/// 消息是否同时满足规则的发送方与内容条件。未启用的规则永不匹配。
pub fn matches(message: &Message, rule: &Rule) -> bool {
    if !rule.is_active {
        return false;
    }

    field_matches(&message.sender, &rule.sender_pattern, rule.sender_match)
        && field_matches(&message.content, &rule.content_pattern, rule.content_match)
}

/// 从候选规则中选出全部匹配的规则，按优先级降序、id 升序。
pub fn select_rules<'a>(message: &Message, rules: &'a [Rule]) -> Vec<&'a Rule> {
    let mut matched: Vec<&Rule> = rules.iter().filter(|rule| matches(message, rule)).collect();
    matched.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.id.unwrap_or(i64::MAX).cmp(&b.id.unwrap_or(i64::MAX)))
    });
    matched
}

/// 客户端取回路径用：从（已按时间倒序的）消息里挑出命中任一规则的，
/// 单条消息匹配到一个规则即停，总量到 limit 即停。
pub fn match_messages<'a>(messages: &'a [Message], rules: &[Rule], limit: usize) -> Vec<&'a Message> {
    let mut matched = Vec::new();
    for message in messages {
        if rules.iter().any(|rule| matches(message, rule)) {
            matched.push(message);
            if matched.len() >= limit {
                break;
            }
        }
    }
    matched
}

/// 单维度匹配。空或 "*" 的模式是全匹配（该维度跳过）。
fn field_matches(value: &str, pattern: &str, kind: MatchKind) -> bool {
    if is_universal(pattern) {
        return true;
    }
    let pattern = pattern.trim();

    match kind {
        MatchKind::Exact => value == pattern,
        MatchKind::Fuzzy => fuzzy_matches(value, pattern),
        MatchKind::Regex => match regex::Regex::new(pattern) {
            Ok(re) => re.is_match(value),
            // 编译失败按不匹配处理，保存期校验负责提前拦截
            Err(_) => false,
        },
    }
}

/// 模糊匹配，始终忽略大小写。
///
/// - `"91*"`   前缀匹配
/// - `"*91"`   后缀匹配
/// - `"*91*"`  包含匹配
/// - 中间带 `*` 的模式翻译为 `.*` 正则整体匹配
/// - 不含 `*` 退化为包含匹配
fn fuzzy_matches(value: &str, pattern: &str) -> bool {
    let value_lower = value.to_lowercase();
    let pattern_lower = pattern.to_lowercase();

    let starts = pattern_lower.starts_with('*');
    let ends = pattern_lower.ends_with('*');
    let inner = pattern_lower.trim_matches('*');

    // 剥掉边缘 * 之后仍有 * 的，是内嵌通配模式
    if inner.contains('*') {
        return wildcard_regex_matches(&value_lower, &pattern_lower);
    }

    match (starts, ends) {
        (true, true) => value_lower.contains(inner),
        (false, true) => value_lower.starts_with(inner),
        (true, false) => value_lower.ends_with(inner),
        (false, false) => value_lower.contains(inner),
    }
}

/// `*` → `.*`，其余字符按字面量转义。不加锚点，子串命中即算匹配
fn wildcard_regex_matches(value: &str, pattern: &str) -> bool {
    let translated: String = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    match RegexBuilder::new(&translated)
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    }
}
