//! 领域事件定义
//!
//! 聚合在一次成功的状态变更之后产生的事实，只在进程内流转。

pub mod domain_event;

pub use domain_event::*;
