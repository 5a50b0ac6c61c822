use spark_im_core::protocol::command::{PUBLISH, PUBLISH_GROUP};

/// 日志记录归属的队列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// 点对点队列，receiver 为 uid
    Peer,
    /// 超级群消息，receiver 为 gid
    Group,
}

impl LogKind {
    /// 记录在日志中使用的外层命令字
    pub fn record_cmd(self) -> u32 {
        match self {
            LogKind::Peer => PUBLISH,
            LogKind::Group => PUBLISH_GROUP,
        }
    }

    pub fn from_record_cmd(cmd: u32) -> Option<Self> {
        match cmd {
            PUBLISH => Some(LogKind::Peer),
            PUBLISH_GROUP => Some(LogKind::Group),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LogKind::Peer => "peer",
            LogKind::Group => "group",
        }
    }
}

/// 投递游标的键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKey {
    Peer {
        appid: i64,
        uid: i64,
        device_id: i64,
    },
    Group {
        appid: i64,
        gid: i64,
        uid: i64,
        device_id: i64,
    },
}

impl CursorKey {
    /// 快照文件中使用的扁平键
    pub fn storage_key(&self) -> String {
        match self {
            CursorKey::Peer {
                appid,
                uid,
                device_id,
            } => format!("peer_{appid}_{uid}_{device_id}"),
            CursorKey::Group {
                appid,
                gid,
                uid,
                device_id,
            } => format!("group_{appid}_{gid}_{uid}_{device_id}"),
        }
    }

    /// 分片使用的队列键：点对点为 uid，群为 gid
    pub fn shard_key(&self) -> i64 {
        match self {
            CursorKey::Peer { uid, .. } => *uid,
            CursorKey::Group { gid, .. } => *gid,
        }
    }
}
