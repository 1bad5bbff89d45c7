//! 配对与聊天的核心领域模型
//!
//! 包含配对聚合、会话/消息聚合、聊天策略以及它们产生的领域事件。

pub mod business_rules;
pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use business_rules::*;
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
