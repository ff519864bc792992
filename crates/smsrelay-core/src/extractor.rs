//! 智能验证码提取模块
//!
//! 三层模板逐层匹配：国内关键词模式、国际关键词模式、通用兜底模式。
//! 先根据发送方号码形态和正文字符构成判定地区，再决定层级优先顺序。
//! 提取永不报错：解析不出来就是空结果。

use regex::{Regex, RegexBuilder};
use tracing::debug;

/// 短信来源地区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Domestic,
    International,
    Unknown,
}

/// 验证码候选
#[derive(Debug, Clone)]
pub struct CodeCandidate {
    pub code: String,
    /// 置信度 0-1
    pub confidence: f64,
    /// 命中的模式类别标签
    pub category: &'static str,
    /// 在原文中的字节区间
    pub position: (usize, usize),
    /// 带【】标记的上下文片段
    pub context: String,
}

/// 按置信度分组的提取摘要
#[derive(Debug, Clone)]
pub struct CodeSummary {
    pub high_confidence: Vec<CodeCandidate>,
    pub medium_confidence: Vec<CodeCandidate>,
    pub low_confidence: Vec<CodeCandidate>,
    pub best: Option<CodeCandidate>,
    pub region: Region,
}

struct CodePattern {
    regex: Regex,
    category: &'static str,
    confidence: f64,
}

impl CodePattern {
    fn new(pattern: &str, category: &'static str, confidence: f64, case_insensitive: bool) -> Self {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .expect("内置验证码模式必须可编译");
        Self {
            regex,
            category,
            confidence,
        }
    }
}

// 中文关键词与验证码之间允许少量非字母数字字符（如 是/：/空格）
const CN_GLUE: &str = r"[^A-Za-z0-9]{0,3}";
// 英文关键词后允许 "is" 之类的系动词再接验证码
const EN_GLUE: &str = r"[^A-Za-z0-9]*(?:is[^A-Za-z0-9]+)?";

/// 验证码提取器，模式在构造时编译一次
pub struct CodeExtractor {
    domestic: Vec<CodePattern>,
    international: Vec<CodePattern>,
    generic: Vec<CodePattern>,
    exclusions: Vec<Regex>,
    mobile_re: Regex,
    cjk_re: Regex,
    latin_word_re: Regex,
}

impl CodeExtractor {
    pub fn new() -> Self {
        let code = r"([A-Za-z0-9]{4,8})";

        let domestic = vec![
            CodePattern::new(&format!("短信验证码{}{}", CN_GLUE, code), "domestic_sms_code", 0.95, true),
            CodePattern::new(&format!("验证码{}{}", CN_GLUE, code), "domestic_keyword_prefix", 0.95, true),
            CodePattern::new(&format!("{}[^A-Za-z0-9]*验证码", code), "domestic_keyword_suffix", 0.90, true),
            CodePattern::new(&format!("动态码{}{}", CN_GLUE, code), "domestic_dynamic_code", 0.90, true),
            CodePattern::new(&format!("登录验证码{}{}", CN_GLUE, code), "domestic_login_code", 0.90, true),
            CodePattern::new(&format!("安全码{}{}", CN_GLUE, code), "domestic_security_code", 0.85, true),
            CodePattern::new(&format!("【.*?】.*?{}", code), "domestic_bracket_format", 0.85, true),
        ];

        let international = vec![
            CodePattern::new(&format!("verification code{}{}", EN_GLUE, code), "international_verification_code", 0.95, true),
            CodePattern::new(&format!(r"OTP\b{}{}", EN_GLUE, code), "international_otp", 0.90, true),
            CodePattern::new(&format!("security code{}{}", EN_GLUE, code), "international_security_code", 0.90, true),
            CodePattern::new(&format!(r"PIN\b{}{}", EN_GLUE, code), "international_pin", 0.85, true),
            CodePattern::new(&format!("login code{}{}", EN_GLUE, code), "international_login_code", 0.85, true),
            CodePattern::new(&format!("access code{}{}", EN_GLUE, code), "international_access_code", 0.85, true),
            CodePattern::new(&format!("confirm code{}{}", EN_GLUE, code), "international_confirm_code", 0.85, true),
            CodePattern::new(&format!(r"code\b{}{}", EN_GLUE, code), "international_code", 0.80, true),
        ];

        let generic = vec![
            CodePattern::new(r"\b(\d{6})\b", "generic_6_digits", 0.70, true),
            CodePattern::new(r"\b(\d{5})\b", "generic_5_digits", 0.65, true),
            CodePattern::new(r"\b(\d{4})\b", "generic_4_digits", 0.60, true),
            CodePattern::new(r"\b(\d{8})\b", "generic_8_digits", 0.60, true),
            CodePattern::new(r"\b([A-Za-z0-9]{6})\b", "generic_6_alphanumeric", 0.50, true),
            // 大写字母串保持大小写敏感，否则普通单词全中招
            CodePattern::new(r"\b([A-Z]{4,6})\b", "generic_uppercase_letters", 0.40, false),
        ];

        let exclusions = vec![
            Regex::new(r"^[1-9]000$").expect("排除模式必须可编译"),
            Regex::new(r"^202[0-4]$").expect("排除模式必须可编译"),
        ];

        Self {
            domestic,
            international,
            generic,
            exclusions,
            mobile_re: Regex::new(r"^1[3-9]\d{9}$").expect("号码模式必须可编译"),
            cjk_re: Regex::new(r"[一-鿿]").expect("CJK 模式必须可编译"),
            latin_word_re: Regex::new(r"\b[A-Za-z]+\b").expect("单词模式必须可编译"),
        }
    }

    /// 判定短信来源地区：先看发送方号码形态，再看正文字符构成
    pub fn detect_region(&self, sender: &str, content: &str) -> Region {
        if !sender.is_empty() {
            if sender.starts_with("+86")
                || sender.starts_with("86")
                || self.mobile_re.is_match(sender)
                || (sender.len() == 11 && sender.bytes().all(|b| b.is_ascii_digit()))
            {
                return Region::Domestic;
            }
            if sender.starts_with('+') {
                return Region::International;
            }
        }

        let cjk_count = self.cjk_re.find_iter(content).count();
        let latin_words = self.latin_word_re.find_iter(content).count();

        if cjk_count > latin_words {
            Region::Domestic
        } else if latin_words > cjk_count && latin_words > 3 {
            Region::International
        } else {
            Region::Unknown
        }
    }

    /// 排除明显不是验证码的数字串
    fn is_excluded(&self, code: &str) -> bool {
        if self.exclusions.iter().any(|re| re.is_match(code)) {
            return true;
        }
        // 单一数字重复（0000、1111 ……）
        let mut chars = code.chars();
        if let Some(first) = chars.next() {
            if first.is_ascii_digit() && chars.all(|c| c == first) && code.len() > 1 {
                return true;
            }
        }
        // 连号
        if matches!(code, "1234" | "4321" | "0123" | "9876") {
            return true;
        }
        // 网址/协议词
        let lower = code.to_lowercase();
        if matches!(lower.as_str(), "http" | "https" | "www" | "com" | "org" | "net") {
            return true;
        }
        // 点分 IP 形态（候选本身含点时）
        if code.split('.').count() == 4
            && code.split('.').all(|part| {
                !part.is_empty() && part.len() <= 3 && part.bytes().all(|b| b.is_ascii_digit())
            })
        {
            return true;
        }
        false
    }

    /// 提取全部候选验证码，按置信度降序
    pub fn extract(&self, content: &str, sender: &str) -> Vec<CodeCandidate> {
        let region = self.detect_region(sender, content);

        let tiers: [&[CodePattern]; 3] = match region {
            Region::Domestic | Region::Unknown => {
                [&self.domestic, &self.international, &self.generic]
            }
            Region::International => [&self.international, &self.domestic, &self.generic],
        };

        let mut results: Vec<CodeCandidate> = Vec::new();
        for tier in tiers {
            for pattern in tier {
                for caps in pattern.regex.captures_iter(content) {
                    let m = match caps.get(1) {
                        Some(m) => m,
                        None => continue,
                    };
                    let code = m.as_str();

                    if self.is_excluded(code) {
                        debug!("排除候选验证码: {}", code);
                        continue;
                    }
                    // 同值只保留首次出现
                    if results.iter().any(|r| r.code == code) {
                        continue;
                    }

                    results.push(CodeCandidate {
                        code: code.to_string(),
                        confidence: pattern.confidence,
                        category: pattern.category,
                        position: (m.start(), m.end()),
                        context: build_context(content, m.start(), m.end()),
                    });
                }
            }
        }

        // 稳定排序：同置信度保持层级发现顺序
        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            "验证码提取完成: sender={}, region={:?}, 候选 {} 个",
            sender,
            region,
            results.len()
        );
        results
    }

    /// 置信度最高的候选
    pub fn best(&self, content: &str, sender: &str) -> Option<CodeCandidate> {
        self.extract(content, sender).into_iter().next()
    }

    /// 按置信度分组的摘要视图
    pub fn summarize(&self, content: &str, sender: &str) -> CodeSummary {
        let results = self.extract(content, sender);
        let best = results.first().cloned();
        let mut summary = CodeSummary {
            high_confidence: Vec::new(),
            medium_confidence: Vec::new(),
            low_confidence: Vec::new(),
            best,
            region: self.detect_region(sender, content),
        };
        for candidate in results {
            if candidate.confidence >= 0.8 {
                summary.high_confidence.push(candidate);
            } else if candidate.confidence >= 0.6 {
                summary.medium_confidence.push(candidate);
            } else {
                summary.low_confidence.push(candidate);
            }
        }
        summary
    }
}

impl Default for CodeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// 验证码前后各取 20 个字符做上下文，命中处用【】标出
fn build_context(content: &str, start: usize, end: usize) -> String {
    let prefix: String = {
        let mut chars: Vec<char> = content[..start].chars().rev().take(20).collect();
        chars.reverse();
        chars.into_iter().collect()
    };
    let suffix: String = content[end..].chars().take(20).collect();
    format!("{}【{}】{}", prefix, &content[start..end], suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> CodeExtractor {
        CodeExtractor::new()
    }

    #[test]
    fn test_region_detection() {
        let ex = extractor();
        assert_eq!(ex.detect_region("10690757", "您的验证码是8317"), Region::Domestic);
        assert_eq!(ex.detect_region("13912345678", "x"), Region::Domestic);
        assert_eq!(ex.detect_region("+8613912345678", "x"), Region::Domestic);
        assert_eq!(ex.detect_region("+15550001111", "Your OTP is 482910"), Region::International);
        assert_eq!(ex.detect_region("", "您的验证码是8317，请勿泄露"), Region::Domestic);
        assert_eq!(
            ex.detect_region("", "Please use the code below to sign in now"),
            Region::International
        );
        assert_eq!(ex.detect_region("", "8317"), Region::Unknown);
    }

    #[test]
    fn test_domestic_labeled_extraction() {
        let ex = extractor();
        let results = ex.extract("您的验证码是8317，请勿泄露", "10690757");
        assert!(!results.is_empty());
        assert_eq!(results[0].code, "8317");
        assert!(results[0].confidence >= 0.9);
    }

    #[test]
    fn test_international_otp_extraction() {
        let ex = extractor();
        let results = ex.extract("Your OTP is 482910", "+15550001111");
        assert!(!results.is_empty());
        assert_eq!(results[0].code, "482910");
        assert!(results[0].confidence >= 0.8);
    }

    #[test]
    fn test_bracket_format() {
        let ex = extractor();
        let best = ex.best("【淘宝网】验证码573019，您正在登录", "10690123").unwrap();
        assert_eq!(best.code, "573019");
        assert!(best.confidence >= 0.85);
    }

    #[test]
    fn test_generic_fallback_digits() {
        let ex = extractor();
        let best = ex.best("temporary number 40271 for this device", "").unwrap();
        assert_eq!(best.code, "40271");
        assert!(best.confidence < 0.8);
    }

    #[test]
    fn test_excluded_codes_never_returned() {
        let ex = extractor();
        for body in [
            "您的验证码是2024，请勿泄露",
            "您的验证码是1000，请勿泄露",
            "您的验证码是1111，请勿泄露",
            "您的验证码是1234，请勿泄露",
        ] {
            let results = ex.extract(body, "10690757");
            assert!(
                results.iter().all(|r| !matches!(r.code.as_str(), "2024" | "1000" | "1111" | "1234")),
                "body={}",
                body
            );
        }
    }

    #[test]
    fn test_url_words_excluded() {
        let ex = extractor();
        assert!(ex.is_excluded("http"));
        assert!(ex.is_excluded("HTTPS"));
        assert!(ex.is_excluded("www"));
        assert!(!ex.is_excluded("8317"));
    }

    #[test]
    fn test_duplicate_codes_kept_once() {
        let ex = extractor();
        let results = ex.extract("验证码8317，重发验证码8317", "10690757");
        let count = results.iter().filter(|r| r.code == "8317").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_results_sorted_by_confidence() {
        let ex = extractor();
        let results = ex.extract("验证码8317，另一串数字 904852", "10690757");
        for pair in results.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn test_context_brackets_code() {
        let ex = extractor();
        let best = ex.best("您的验证码是8317，请勿泄露", "10690757").unwrap();
        assert!(best.context.contains("【8317】"));
    }

    #[test]
    fn test_no_candidates_is_empty_not_error() {
        let ex = extractor();
        assert!(ex.extract("今天中午吃什么", "13912345678").is_empty());
        assert!(ex.best("", "").is_none());
    }

    #[test]
    fn test_summary_grouping() {
        let ex = extractor();
        let summary = ex.summarize("您的验证码是8317，请勿泄露", "10690757");
        assert_eq!(summary.region, Region::Domestic);
        assert!(summary.best.is_some());
        assert!(!summary.high_confidence.is_empty());
    }
}
