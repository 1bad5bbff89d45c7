//! 业务规则验证
//!
//! 聊天策略的各项阈值，以及消息内容的脚本注入/刷屏检测。

use std::sync::OnceLock;

use chrono::Duration;
use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::MessageContent;

/// 聊天策略
///
/// 阈值都可配置，默认值即产品当前使用的取值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPolicy {
    /// 单条消息最大字符数
    pub max_content_chars: usize,
    /// 单个会话保留的最大消息数
    pub max_messages_per_conversation: usize,
    /// 群聊最大参与者数
    pub max_participants: usize,
    /// 滑动窗口内每个发送者最多可发的消息数
    pub rate_limit_messages: u32,
    /// 滑动窗口长度（秒）
    pub rate_limit_window_secs: u64,
    /// 发送后允许编辑的时长（秒）
    pub edit_window_secs: u64,
    /// 是否启用内容检测
    pub content_guard: bool,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            max_content_chars: 5000,
            max_messages_per_conversation: 10_000,
            max_participants: 100,
            rate_limit_messages: 10,
            rate_limit_window_secs: 60,
            edit_window_secs: 120,
            content_guard: true,
        }
    }
}

impl ChatPolicy {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::seconds(self.rate_limit_window_secs as i64)
    }

    pub fn edit_window(&self) -> Duration {
        Duration::seconds(self.edit_window_secs as i64)
    }

    /// 校验并规整消息内容
    ///
    /// 空白/超长属于输入错误；命中内容检测属于业务规则违反。
    pub fn validate_content(&self, raw: &str) -> DomainResult<MessageContent> {
        let content = MessageContent::parse(raw, self.max_content_chars)?;
        if self.content_guard {
            ContentGuard::check(content.as_str())?;
        }
        Ok(content)
    }

    /// 检查发送频率，`recent_sends` 是窗口内该发送者已发的消息数
    pub fn check_rate(&self, recent_sends: usize) -> DomainResult<()> {
        if recent_sends >= self.rate_limit_messages as usize {
            return Err(DomainError::RateLimited {
                limit: self.rate_limit_messages,
                window_secs: self.rate_limit_window_secs,
            });
        }
        Ok(())
    }
}

/// 同一字符连续出现达到该次数视为刷屏
const REPEATED_CHAR_THRESHOLD: usize = 30;

static SUSPICIOUS_PATTERNS: OnceLock<RegexSet> = OnceLock::new();

fn suspicious_patterns() -> &'static RegexSet {
    SUSPICIOUS_PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"(?i)<\s*script",
            r"(?i)javascript\s*:",
            r"(?i)\bon[a-z]+\s*=",
        ])
        .unwrap_or_else(|error| panic!("content guard patterns failed to compile: {error}"))
    })
}

/// 消息内容检测
pub struct ContentGuard;

impl ContentGuard {
    pub fn check(content: &str) -> DomainResult<()> {
        if suspicious_patterns().is_match(content) {
            return Err(DomainError::policy("消息包含可疑脚本内容"));
        }
        if Self::has_repeated_run(content) {
            return Err(DomainError::policy("消息包含大量重复字符"));
        }
        Ok(())
    }

    fn has_repeated_run(content: &str) -> bool {
        let mut previous = None;
        let mut run = 0usize;
        for c in content.chars() {
            if Some(c) == previous {
                run += 1;
            } else {
                previous = Some(c);
                run = 1;
            }
            if run >= REPEATED_CHAR_THRESHOLD {
                return true;
            }
        }
        false
    }
}
