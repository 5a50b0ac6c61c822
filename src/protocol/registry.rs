//! 命令字 → 解码器静态表
//!
//! 进程启动时构建一次，通过 `Arc` 注入到需要解码的组件中。

use std::collections::HashMap;

use super::body::*;
use super::codec::utf8;
use super::command::*;
use super::frame::{FrameHeader, HEADER_SIZE};
use super::Message;
use crate::error::{ProtocolError, ProtocolResult};

type DecodeFn = fn(u8, &[u8], &CommandRegistry) -> ProtocolResult<Body>;

struct CommandEntry {
    name: &'static str,
    decode: DecodeFn,
}

/// 命令注册表
pub struct CommandRegistry {
    entries: HashMap<u32, CommandEntry>,
}

macro_rules! payload {
    ($reg:ident, $cmd:expr, $variant:ident, $ty:ty) => {
        $reg.insert($cmd, stringify!($cmd), |version, buf, _| {
            <$ty as WirePayload>::decode(version, buf).map(Body::$variant)
        })
    };
}

fn decode_empty(_version: u8, buf: &[u8], _registry: &CommandRegistry) -> ProtocolResult<Body> {
    if buf.is_empty() {
        Ok(Body::Empty)
    } else {
        Err(ProtocolError::malformed("empty payload", format!("{} unexpected bytes", buf.len())))
    }
}

fn decode_text(_version: u8, buf: &[u8], _registry: &CommandRegistry) -> ProtocolResult<Body> {
    utf8("text payload", buf).map(Body::Text)
}

fn decode_app(_version: u8, buf: &[u8], registry: &CommandRegistry) -> ProtocolResult<Body> {
    AppMessage::decode(buf, registry).map(|app| Body::App(Box::new(app)))
}

impl CommandRegistry {
    /// 构建包含全部标准命令的注册表
    pub fn standard() -> Self {
        let mut reg = Self {
            entries: HashMap::new(),
        };

        reg.insert(HEARTBEAT, "HEARTBEAT", decode_empty);
        reg.insert(PING, "PING", decode_empty);
        reg.insert(PONG, "PONG", decode_empty);
        reg.insert(RST, "RST", decode_empty);

        payload!(reg, AUTH, Auth, Authentication);
        payload!(reg, AUTH_STATUS, AuthStatus, AuthenticationStatus);
        payload!(reg, AUTH_TOKEN, AuthToken, AuthenticationToken);
        payload!(reg, LOGIN_POINT, LoginPoint, LoginPoint);
        payload!(reg, IM, Im, ImMessage);
        payload!(reg, GROUP_IM, Im, ImMessage);
        payload!(reg, TRANSMIT_USER, Im, ImMessage);
        payload!(reg, TRANSMIT_GROUP, Im, ImMessage);
        payload!(reg, ACK, Ack, MessageAck);
        payload!(reg, PEER_ACK, PeerAck, PeerAck);
        payload!(reg, INPUTING, Inputing, Inputing);
        payload!(reg, SUBSCRIBE_ONLINE_STATE, SubscribeState, SubscribeState);
        payload!(reg, ONLINE_STATE, OnlineState, OnlineState);
        payload!(reg, RT, Rt, RtMessage);
        payload!(reg, ROOM_IM, Rt, RtMessage);
        payload!(reg, TRANSMIT_ROOM, Rt, RtMessage);
        payload!(reg, ENTER_ROOM, Room, RoomId);
        payload!(reg, LEAVE_ROOM, Room, RoomId);
        reg.insert(GROUP_NOTIFICATION, "GROUP_NOTIFICATION", decode_text);
        reg.insert(SYSTEM, "SYSTEM", decode_text);
        payload!(reg, UNREAD_COUNT, UnreadCount, UnreadCount);
        payload!(reg, CUSTOMER_SERVICE, CustomerService, CustomerServiceMessage);
        payload!(reg, VOIP_CONTROL, VoipControl, VoipControl);

        payload!(reg, SUBSCRIBE, AppUser, AppUserId);
        payload!(reg, UNSUBSCRIBE, AppUser, AppUserId);
        payload!(reg, SUBSCRIBE_GROUP, AppGroupMember, AppGroupMemberId);
        payload!(reg, UNSUBSCRIBE_GROUP, AppGroupMember, AppGroupMemberId);
        payload!(reg, SUBSCRIBE_ROOM, AppRoom, AppRoomId);
        payload!(reg, UNSUBSCRIBE_ROOM, AppRoom, AppRoomId);
        reg.insert(PUBLISH, "PUBLISH", decode_app);
        reg.insert(PUBLISH_OFFLINE, "PUBLISH_OFFLINE", decode_app);
        reg.insert(PUBLISH_GROUP, "PUBLISH_GROUP", decode_app);
        reg.insert(PUBLISH_ROOM, "PUBLISH_ROOM", decode_app);
        payload!(reg, SERVER_REGISTER, ServerRegister, ServerRegister);
        payload!(reg, SERVER_REGISTER_STORAGE, ServerRegister, ServerRegister);

        payload!(reg, CONTACT_INVITE, ContactInvite, ContactInvite);
        payload!(reg, CONTACT_ACCEPT, Contact, ContactRequest);
        payload!(reg, CONTACT_REFUSE, Contact, ContactRequest);
        payload!(reg, CONTACT_DEL, Contact, ContactRequest);
        payload!(reg, CONTACT_BLACK, Contact, ContactRequest);
        payload!(reg, CONTACT_UNBLACK, Contact, ContactRequest);
        payload!(reg, CONTACT_INVITE_RESP, ContactResp, ContactResponse);
        payload!(reg, CONTACT_ACCEPT_RESP, ContactResp, ContactResponse);
        payload!(reg, CONTACT_REFUSE_RESP, ContactResp, ContactResponse);
        payload!(reg, CONTACT_DEL_RESP, ContactResp, ContactResponse);
        payload!(reg, CONTACT_BLACK_RESP, ContactResp, ContactResponse);
        payload!(reg, CONTACT_UNBLACK_RESP, ContactResp, ContactResponse);

        payload!(reg, GROUP_CREATE, GroupCreate, GroupCreate);
        payload!(reg, GROUP_CREATE_RESP, GroupCreateResp, GroupCreateResponse);
        payload!(reg, GROUP_SELF_JOIN, Group, GroupRequest);
        payload!(reg, GROUP_QUIT, Group, GroupRequest);
        payload!(reg, GROUP_DEL, Group, GroupRequest);
        payload!(reg, GROUP_INVITE_JOIN, GroupInvite, GroupInvite);
        payload!(reg, GROUP_REMOVE, GroupRemove, GroupRemove);
        payload!(reg, GROUP_SELF_JOIN_RESP, Status, StatusResponse);
        payload!(reg, GROUP_INVITE_JOIN_RESP, Status, StatusResponse);
        payload!(reg, GROUP_REMOVE_RESP, Status, StatusResponse);
        payload!(reg, GROUP_QUIT_RESP, Status, StatusResponse);
        payload!(reg, GROUP_DEL_RESP, Status, StatusResponse);

        reg.insert(SAVE_AND_ENQUEUE, "SAVE_AND_ENQUEUE", decode_app);
        reg.insert(SAVE_AND_ENQUEUE_GROUP, "SAVE_AND_ENQUEUE_GROUP", decode_app);
        payload!(reg, DEQUEUE, Dequeue, Dequeue);
        payload!(reg, DEQUEUE_GROUP, DequeueGroup, DequeueGroup);
        payload!(reg, LOAD_OFFLINE, LoadOffline, LoadOffline);
        payload!(reg, LOAD_GROUP_OFFLINE, LoadGroupOffline, LoadGroupOffline);
        payload!(reg, LOAD_HISTORY, LoadHistory, LoadHistory);
        payload!(reg, RESULT, Result, RpcResult);

        reg
    }

    fn insert(&mut self, cmd: u32, name: &'static str, decode: DecodeFn) {
        self.entries.insert(cmd, CommandEntry { name, decode });
    }

    /// 命令名，用于日志
    pub fn name(&self, cmd: u32) -> &'static str {
        self.entries.get(&cmd).map(|e| e.name).unwrap_or("UNKNOWN")
    }

    pub fn contains(&self, cmd: u32) -> bool {
        self.entries.contains_key(&cmd)
    }

    /// 全部已注册命令（无序）
    pub fn commands(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    /// 解码消息体
    ///
    /// 未注册命令：空包解码为 `Body::Empty`，非空包返回错误。
    pub fn decode_body(&self, cmd: u32, version: u8, buf: &[u8]) -> ProtocolResult<Body> {
        match self.entries.get(&cmd) {
            Some(entry) => (entry.decode)(version, buf, self),
            None if buf.is_empty() => Ok(Body::Empty),
            None => Err(ProtocolError::UnknownCommand { cmd, len: buf.len() }),
        }
    }

    /// 从内存缓冲区解码一个完整帧，返回消息和消耗的字节数
    pub fn decode_frame(&self, buf: &[u8]) -> ProtocolResult<(Message, usize)> {
        let header = FrameHeader::parse(buf)?;
        let end = HEADER_SIZE + header.length;
        if buf.len() < end {
            return Err(ProtocolError::Truncated {
                what: "frame body",
                need: end,
                got: buf.len(),
            });
        }
        let body = self.decode_body(header.cmd, header.version, &buf[HEADER_SIZE..end])?;
        let msg = Message {
            cmd: header.cmd,
            seq: header.seq,
            version: header.version,
            body,
        };
        Ok((msg, end))
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
