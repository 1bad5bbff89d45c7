use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

const MAX_USER_ID_LEN: usize = 128;
const ROOM_ID_SEPARATOR: char = '_';

/// 用户唯一标识。
///
/// 由外部身份系统分配，这里只保证去掉首尾空白后非空、长度有限、
/// 且不包含空白或控制字符。`_` 是私聊房间ID的分隔符，不允许出现在用户ID中。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::validation("user_id", "用户ID不能为空"));
        }
        if value.chars().count() > MAX_USER_ID_LEN {
            return Err(DomainError::validation("user_id", "用户ID过长"));
        }
        if value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(DomainError::validation(
                "user_id",
                "用户ID不能包含空白或控制字符",
            ));
        }
        if value.contains(ROOM_ID_SEPARATOR) {
            return Err(DomainError::validation("user_id", "用户ID不能包含下划线"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// 消息唯一标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("message_id", "消息ID不能为空"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MessageId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<MessageId> for String {
    fn from(value: MessageId) -> Self {
        value.0
    }
}

const DIRECT_ROOM_PREFIX: &str = "direct_";
const GROUP_ROOM_PREFIX: &str = "group_";

/// 聊天室唯一标识。
///
/// 私聊房间由两个参与者排序后拼接得到，谁先发起都会落到同一个房间。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("room_id", "房间ID不能为空"));
        }
        Ok(Self(value))
    }

    /// 私聊房间：`direct_{较小id}_{较大id}`
    ///
    /// 用户ID里没有分隔符，所以不同的用户对不会得到同一个房间ID。
    pub fn direct(a: &UserId, b: &UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{DIRECT_ROOM_PREFIX}{low}{ROOM_ID_SEPARATOR}{high}"))
    }

    /// 群聊房间使用随机后缀
    pub fn group() -> Self {
        Self(format!("{GROUP_ROOM_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_direct(&self) -> bool {
        self.0.starts_with(DIRECT_ROOM_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

/// 配对记录唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchId(pub Uuid);

impl MatchId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MatchId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<MatchId> for Uuid {
    fn from(value: MatchId) -> Self {
        value.0
    }
}

/// 消息正文内容。
///
/// 保存的是去掉首尾空白后的文本；长度上限由聊天策略决定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn parse(value: impl Into<String>, max_chars: usize) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("content", "消息内容不能为空"));
        }
        if trimmed.chars().count() > max_chars {
            return Err(DomainError::validation(
                "content",
                format!("消息内容不能超过{max_chars}个字符"),
            ));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_rejects_blank_and_whitespace() {
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("   ").is_err());
        assert!(UserId::parse("a b").is_err());
        assert!(UserId::parse("x".repeat(129)).is_err());

        let id = UserId::parse("  u1 ").unwrap();
        assert_eq!(id.as_str(), "u1");
    }

    #[test]
    fn test_direct_room_id_is_order_independent() {
        let a = UserId::parse("alice").unwrap();
        let b = UserId::parse("bob").unwrap();

        assert_eq!(RoomId::direct(&a, &b), RoomId::direct(&b, &a));
        assert_eq!(RoomId::direct(&a, &b).as_str(), "direct_alice_bob");
        assert!(RoomId::direct(&a, &b).is_direct());
        assert!(!RoomId::group().is_direct());
    }

    #[test]
    fn test_direct_room_id_distinguishes_pairs_around_separator() {
        assert!(UserId::parse("a_b").is_err());
        assert!(UserId::parse("b_c").is_err());

        let a = UserId::parse("a").unwrap();
        let b = UserId::parse("b").unwrap();
        let c = UserId::parse("c").unwrap();
        let ab = UserId::parse("ab").unwrap();
        let bc = UserId::parse("bc").unwrap();
        assert_ne!(RoomId::direct(&ab, &c), RoomId::direct(&a, &bc));
        assert_ne!(RoomId::direct(&a, &b), RoomId::direct(&a, &c));
    }

    #[test]
    fn test_message_content_trims_and_limits() {
        let content = MessageContent::parse("  hello  ", 5000).unwrap();
        assert_eq!(content.as_str(), "hello");

        assert!(MessageContent::parse("   ", 5000).is_err());
        assert!(MessageContent::parse("x".repeat(5001), 5000).is_err());
        assert!(MessageContent::parse("x".repeat(5000), 5000).is_ok());
    }

    #[test]
    fn test_user_id_deserialization_is_validated() {
        let ok: Result<UserId, _> = serde_json::from_str("\"u1\"");
        assert!(ok.is_ok());

        let blank: Result<UserId, _> = serde_json::from_str("\"  \"");
        assert!(blank.is_err());
    }
}
