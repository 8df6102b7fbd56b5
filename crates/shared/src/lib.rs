//! 共享库
//!
//! 包含配置、错误处理、Pub/Sub 订阅客户端与可观测性等基础设施代码。

pub mod config;
pub mod error;
pub mod observability;
pub mod pubsub;
pub mod test_utils;
