//! 日志脱敏工具
//!
//! 调用方的 API key 与上游 provider 的密钥都不能原样进入日志。

use std::fmt;

/// 上游错误体写入日志时的最大长度
pub const MAX_LOGGED_BODY_CHARS: usize = 512;

/// 脱敏后的 API key，只保留前 8 个字符
#[derive(Clone, Debug)]
pub struct SensitiveApiKey<'a> {
    inner: &'a str,
}

impl<'a> SensitiveApiKey<'a> {
    pub fn new(key: &'a str) -> Self {
        Self { inner: key }
    }
}

impl fmt::Display for SensitiveApiKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.inner.chars().take(8).collect();
        if self.inner.chars().count() <= 8 {
            write!(f, "***")
        } else {
            write!(f, "{}***", visible)
        }
    }
}

/// 看起来像密钥的值（sk-、pk- 等前缀或 Bearer 凭证）
pub fn is_sensitive_key(value: &str) -> bool {
    let value = value.strip_prefix("Bearer ").unwrap_or(value);
    ["sk-", "pk-", "sess-", "key-"]
        .iter()
        .any(|prefix| value.starts_with(prefix))
}

/// 敏感值脱敏，普通值原样返回
pub fn sanitize_log_value(value: &str) -> String {
    if is_sensitive_key(value) {
        SensitiveApiKey::new(value).to_string()
    } else {
        value.to_string()
    }
}

/// 上游返回的错误体：逐词脱敏并截断
pub fn sanitize_upstream_body(body: &str) -> String {
    let sanitized = body
        .split(' ')
        .map(|word| {
            let trimmed = word.trim_matches(|c: char| c == '"' || c == '\'' || c == ',');
            if is_sensitive_key(trimmed) {
                word.replace(trimmed, &SensitiveApiKey::new(trimmed).to_string())
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if sanitized.chars().count() > MAX_LOGGED_BODY_CHARS {
        let truncated: String = sanitized.chars().take(MAX_LOGGED_BODY_CHARS).collect();
        format!("{}...", truncated)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_api_key_display() {
        let sanitized = SensitiveApiKey::new("sk-live-abcdef123456");
        assert_eq!(format!("{}", sanitized), "sk-live-***");
    }

    #[test]
    fn test_sensitive_api_key_short() {
        assert_eq!(format!("{}", SensitiveApiKey::new("sk-abc")), "***");
    }

    #[test]
    fn test_is_sensitive_key() {
        assert!(is_sensitive_key("sk-proj-123"));
        assert!(is_sensitive_key("Bearer sk-proj-123"));
        assert!(is_sensitive_key("pk-test123"));
        assert!(!is_sensitive_key("gpt-image-1"));
        assert!(!is_sensitive_key("alice"));
    }

    #[test]
    fn test_sanitize_log_value() {
        assert_eq!(sanitize_log_value("sk-proj-abcdef"), "sk-proj-***");
        assert_eq!(sanitize_log_value("alice"), "alice");
    }

    #[test]
    fn test_sanitize_upstream_body_masks_keys() {
        let body = r#"{"error": "Incorrect API key provided: "sk-proj-abcdef123456", check it"}"#;
        let sanitized = sanitize_upstream_body(body);
        assert!(!sanitized.contains("abcdef123456"));
        assert!(sanitized.contains("sk-proj-***"));
    }

    #[test]
    fn test_sanitize_upstream_body_truncates() {
        let body = "x".repeat(MAX_LOGGED_BODY_CHARS + 10);
        let sanitized = sanitize_upstream_body(&body);
        assert_eq!(sanitized.chars().count(), MAX_LOGGED_BODY_CHARS + 3);
        assert!(sanitized.ends_with("..."));
    }
}
