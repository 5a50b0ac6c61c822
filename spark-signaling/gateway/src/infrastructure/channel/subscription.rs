use spark_im_core::protocol::command::{
    SUBSCRIBE, SUBSCRIBE_GROUP, SUBSCRIBE_ROOM, UNSUBSCRIBE, UNSUBSCRIBE_GROUP, UNSUBSCRIBE_ROOM,
};
use spark_im_core::protocol::{AppGroupMemberId, AppRoomId, AppUserId, Body, Message};

/// 通道上的一项订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSubscription {
    User { appid: i64, uid: i64 },
    Room { appid: i64, room_id: i64 },
    GroupMember { appid: i64, gid: i64, uid: i64 },
}

impl ChannelSubscription {
    /// 订阅或退订帧
    pub fn frame(&self, subscribe: bool) -> Message {
        match *self {
            Self::User { appid, uid } => Message::new(
                if subscribe { SUBSCRIBE } else { UNSUBSCRIBE },
                Body::AppUser(AppUserId { appid, uid }),
            ),
            Self::Room { appid, room_id } => Message::new(
                if subscribe {
                    SUBSCRIBE_ROOM
                } else {
                    UNSUBSCRIBE_ROOM
                },
                Body::AppRoom(AppRoomId { appid, room_id }),
            ),
            Self::GroupMember { appid, gid, uid } => Message::new(
                if subscribe {
                    SUBSCRIBE_GROUP
                } else {
                    UNSUBSCRIBE_GROUP
                },
                Body::AppGroupMember(AppGroupMemberId { appid, gid, uid }),
            ),
        }
    }
}
