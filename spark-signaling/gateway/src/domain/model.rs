//! 领域模型

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use spark_im_core::protocol::Message;

/// 群容量上限
pub const GROUP_CAPACITY: usize = 500;

/// 群消息投递策略，创建时确定，之后不再改变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// 普通群：每个成员一份副本，走各自的点对点队列
    Normal,
    /// 超级群：只写一次群日志，成员按各自游标读取
    Super,
}

impl GroupKind {
    pub fn from_super_flag(is_super: bool) -> Self {
        if is_super { Self::Super } else { Self::Normal }
    }

    pub fn is_super(self) -> bool {
        matches!(self, Self::Super)
    }
}

/// 群组
///
/// 成员集合不可变，修改时整体替换（写时复制），读者拿到的永远是完整快照。
#[derive(Debug, Clone)]
pub struct Group {
    pub gid: i64,
    pub appid: i64,
    pub owner: i64,
    pub title: String,
    pub description: String,
    pub is_private: bool,
    pub is_allow_invite: bool,
    pub kind: GroupKind,
    pub members: Arc<HashSet<i64>>,
}

impl Group {
    pub fn is_member(&self, uid: i64) -> bool {
        self.members.contains(&uid)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// 生成新增成员后的副本
    pub fn with_member(&self, uid: i64) -> Self {
        let mut members = (*self.members).clone();
        members.insert(uid);
        Self {
            members: Arc::new(members),
            ..self.clone()
        }
    }

    /// 生成移除成员后的副本
    pub fn without_member(&self, uid: i64) -> Self {
        let mut members = (*self.members).clone();
        members.remove(&uid);
        Self {
            members: Arc::new(members),
            ..self.clone()
        }
    }
}

/// 已持久化消息的来源队列，决定 ACK 时推进哪个游标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    Peer,
    Group { gid: i64 },
}

/// 待下发给客户端的已持久化消息
#[derive(Debug, Clone)]
pub struct EMessage {
    pub msgid: i64,
    pub kind: DeliveryKind,
    pub msg: Message,
}

/// 好友与群组操作的透传通知内容
#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload {
    pub cmd: i32,
    pub from: i64,
    pub to: i64,
    pub msg: String,
}
