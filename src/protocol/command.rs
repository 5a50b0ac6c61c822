//! 命令字常量
//!
//! 数值是线上稳定常量，集群内所有角色必须保持一致。

pub const HEARTBEAT: u32 = 1;
pub const AUTH: u32 = 2;
pub const AUTH_STATUS: u32 = 3;
pub const IM: u32 = 4;
pub const ACK: u32 = 5;
pub const RST: u32 = 6;
pub const GROUP_NOTIFICATION: u32 = 7;
pub const GROUP_IM: u32 = 8;
pub const PEER_ACK: u32 = 9;
pub const INPUTING: u32 = 10;
pub const SUBSCRIBE_ONLINE_STATE: u32 = 11;
pub const ONLINE_STATE: u32 = 12;
pub const PING: u32 = 13;
pub const PONG: u32 = 14;
pub const AUTH_TOKEN: u32 = 15;
pub const LOGIN_POINT: u32 = 16;
pub const RT: u32 = 17;
pub const ENTER_ROOM: u32 = 18;
pub const LEAVE_ROOM: u32 = 19;
pub const ROOM_IM: u32 = 20;
pub const SYSTEM: u32 = 21;
pub const UNREAD_COUNT: u32 = 22;
pub const CUSTOMER_SERVICE: u32 = 23;

// 透传消息
pub const TRANSMIT_USER: u32 = 24;
pub const TRANSMIT_GROUP: u32 = 25;
pub const TRANSMIT_ROOM: u32 = 26;

pub const VOIP_CONTROL: u32 = 64;

// 服务器间路由消息
pub const PUBLISH_OFFLINE: u32 = 128;
pub const SUBSCRIBE: u32 = 130;
pub const UNSUBSCRIBE: u32 = 131;
pub const PUBLISH: u32 = 132;
pub const SUBSCRIBE_GROUP: u32 = 133;
pub const UNSUBSCRIBE_GROUP: u32 = 134;
pub const PUBLISH_GROUP: u32 = 135;
pub const SUBSCRIBE_ROOM: u32 = 136;
pub const UNSUBSCRIBE_ROOM: u32 = 137;
pub const PUBLISH_ROOM: u32 = 138;
pub const SERVER_REGISTER: u32 = 139;
pub const SERVER_REGISTER_STORAGE: u32 = 140;

// 好友
pub const CONTACT_INVITE: u32 = 200;
pub const CONTACT_INVITE_RESP: u32 = 201;
pub const CONTACT_ACCEPT: u32 = 202;
pub const CONTACT_ACCEPT_RESP: u32 = 203;
pub const CONTACT_REFUSE: u32 = 204;
pub const CONTACT_REFUSE_RESP: u32 = 205;
pub const CONTACT_DEL: u32 = 206;
pub const CONTACT_DEL_RESP: u32 = 207;
pub const CONTACT_BLACK: u32 = 208;
pub const CONTACT_BLACK_RESP: u32 = 209;
pub const CONTACT_UNBLACK: u32 = 210;
pub const CONTACT_UNBLACK_RESP: u32 = 211;

// 群组管理
pub const GROUP_CREATE: u32 = 220;
pub const GROUP_CREATE_RESP: u32 = 221;
pub const GROUP_SELF_JOIN: u32 = 222;
pub const GROUP_SELF_JOIN_RESP: u32 = 223;
pub const GROUP_INVITE_JOIN: u32 = 224;
pub const GROUP_INVITE_JOIN_RESP: u32 = 225;
pub const GROUP_REMOVE: u32 = 226;
pub const GROUP_REMOVE_RESP: u32 = 227;
pub const GROUP_QUIT: u32 = 228;
pub const GROUP_QUIT_RESP: u32 = 229;
pub const GROUP_DEL: u32 = 230;
pub const GROUP_DEL_RESP: u32 = 231;

// 存储服务 RPC
pub const SAVE_AND_ENQUEUE: u32 = 240;
pub const DEQUEUE: u32 = 241;
pub const LOAD_OFFLINE: u32 = 242;
pub const RESULT: u32 = 243;
pub const LOAD_HISTORY: u32 = 244;
pub const SAVE_AND_ENQUEUE_GROUP: u32 = 245;
pub const DEQUEUE_GROUP: u32 = 246;
pub const LOAD_GROUP_OFFLINE: u32 = 247;

/// 平台号
pub const PLATFORM_IOS: u8 = 1;
pub const PLATFORM_ANDROID: u8 = 2;
pub const PLATFORM_WEB: u8 = 3;

/// 服务端下发消息默认使用的协议版本
pub const DEFAULT_VERSION: u8 = 1;

/// 好友与群组操作的透传回调类型
///
/// 以 JSON `{"cmd", "from", "to", "msg"}` 放在 `TRANSMIT_USER` 消息内容中。
pub mod callback {
    pub const FRIEND_INVITE: i32 = 1;
    pub const FRIEND_DEL: i32 = 2;
    pub const FRIEND_ACCEPT: i32 = 3;
    pub const FRIEND_REFUSE: i32 = 4;
    pub const FRIEND_ADD: i32 = 5;
    pub const GROUP_JOIN: i32 = 6;
    pub const GROUP_REMOVE: i32 = 7;
    pub const GROUP_DEL: i32 = 8;
}

/// 响应状态码
///
/// 各业务响应的非零状态码含义由命令自行定义，`INTERNAL` 在所有命令中通用。
pub mod status {
    pub const OK: i32 = 0;
    pub const INTERNAL: i32 = 99;
}
