//! 领域层：消息日志、投递游标以及离线批次的组装规则

pub mod batch;
pub mod model;
pub mod push_policy;
pub mod repository;

pub use batch::{BATCH_BUDGET, BatchBuilder, check_record_size};
pub use model::{CursorKey, LogKind};
pub use push_policy::{OfflinePush, is_self_echo, offline_push};
pub use repository::{CursorStore, MessageLog};
