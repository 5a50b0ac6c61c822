//! 消息体定义
//!
//! `Body` 是按命令字区分的封闭标签联合，每种载荷实现自己的编解码。
//! 同一载荷可能被多个命令复用（例如 `ImMessage` 同时用于 IM、GROUP_IM 与透传）。

use bytes::{BufMut, Bytes, BytesMut};

use super::codec::{BodyReader, put_str_u16, put_str_u8};
use super::frame::{HEADER_SIZE, encode_frame_into};
use super::registry::CommandRegistry;
use super::Message;
use crate::error::{ProtocolError, ProtocolResult};

/// 单个载荷的编解码约定
pub(crate) trait WirePayload: Sized {
    fn encode(&self, version: u8, buf: &mut BytesMut);
    fn decode(version: u8, buf: &[u8]) -> ProtocolResult<Self>;
}

/// 消息体
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// 无载荷（心跳、PING/PONG 以及未知命令的空包）
    Empty,
    Auth(Authentication),
    AuthStatus(AuthenticationStatus),
    AuthToken(AuthenticationToken),
    LoginPoint(LoginPoint),
    Im(ImMessage),
    Ack(MessageAck),
    PeerAck(PeerAck),
    Inputing(Inputing),
    SubscribeState(SubscribeState),
    OnlineState(OnlineState),
    Rt(RtMessage),
    Room(RoomId),
    Text(String),
    UnreadCount(UnreadCount),
    CustomerService(CustomerServiceMessage),
    VoipControl(VoipControl),
    AppUser(AppUserId),
    AppRoom(AppRoomId),
    AppGroupMember(AppGroupMemberId),
    App(Box<AppMessage>),
    ServerRegister(ServerRegister),
    ContactInvite(ContactInvite),
    Contact(ContactRequest),
    ContactResp(ContactResponse),
    GroupCreate(GroupCreate),
    GroupCreateResp(GroupCreateResponse),
    Group(GroupRequest),
    GroupInvite(GroupInvite),
    GroupRemove(GroupRemove),
    Status(StatusResponse),
    Dequeue(Dequeue),
    DequeueGroup(DequeueGroup),
    LoadOffline(LoadOffline),
    LoadGroupOffline(LoadGroupOffline),
    LoadHistory(LoadHistory),
    Result(RpcResult),
}

impl Body {
    /// 按指定版本编码消息体
    pub fn encode(&self, version: u8, buf: &mut BytesMut) {
        match self {
            Body::Empty => {}
            Body::Auth(p) => p.encode(version, buf),
            Body::AuthStatus(p) => p.encode(version, buf),
            Body::AuthToken(p) => p.encode(version, buf),
            Body::LoginPoint(p) => p.encode(version, buf),
            Body::Im(p) => p.encode(version, buf),
            Body::Ack(p) => p.encode(version, buf),
            Body::PeerAck(p) => p.encode(version, buf),
            Body::Inputing(p) => p.encode(version, buf),
            Body::SubscribeState(p) => p.encode(version, buf),
            Body::OnlineState(p) => p.encode(version, buf),
            Body::Rt(p) => p.encode(version, buf),
            Body::Room(p) => p.encode(version, buf),
            Body::Text(text) => buf.put_slice(text.as_bytes()),
            Body::UnreadCount(p) => p.encode(version, buf),
            Body::CustomerService(p) => p.encode(version, buf),
            Body::VoipControl(p) => p.encode(version, buf),
            Body::AppUser(p) => p.encode(version, buf),
            Body::AppRoom(p) => p.encode(version, buf),
            Body::AppGroupMember(p) => p.encode(version, buf),
            Body::App(p) => p.encode(buf),
            Body::ServerRegister(p) => p.encode(version, buf),
            Body::ContactInvite(p) => p.encode(version, buf),
            Body::Contact(p) => p.encode(version, buf),
            Body::ContactResp(p) => p.encode(version, buf),
            Body::GroupCreate(p) => p.encode(version, buf),
            Body::GroupCreateResp(p) => p.encode(version, buf),
            Body::Group(p) => p.encode(version, buf),
            Body::GroupInvite(p) => p.encode(version, buf),
            Body::GroupRemove(p) => p.encode(version, buf),
            Body::Status(p) => p.encode(version, buf),
            Body::Dequeue(p) => p.encode(version, buf),
            Body::DequeueGroup(p) => p.encode(version, buf),
            Body::LoadOffline(p) => p.encode(version, buf),
            Body::LoadGroupOffline(p) => p.encode(version, buf),
            Body::LoadHistory(p) => p.encode(version, buf),
            Body::Result(p) => p.encode(version, buf),
        }
    }

    /// IM 类载荷（IM / GROUP_IM / 透传）
    pub fn as_im(&self) -> Option<&ImMessage> {
        match self {
            Body::Im(im) => Some(im),
            _ => None,
        }
    }

    /// 携带发送者的载荷返回发送者 uid
    pub fn sender(&self) -> Option<i64> {
        match self {
            Body::Im(p) => Some(p.sender),
            Body::CustomerService(p) => Some(p.sender),
            Body::Rt(p) => Some(p.sender),
            Body::VoipControl(p) => Some(p.sender),
            Body::Inputing(p) => Some(p.sender),
            _ => None,
        }
    }
}

/// 旧版认证（仅携带 uid）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Authentication {
    pub uid: i64,
}

impl WirePayload for Authentication {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.uid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("authentication", buf);
        Ok(Self { uid: r.i64()? })
    }
}

/// 认证结果，版本 0 额外携带 ip
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthenticationStatus {
    pub status: i32,
    pub ip: i32,
}

impl WirePayload for AuthenticationStatus {
    fn encode(&self, version: u8, buf: &mut BytesMut) {
        buf.put_i32(self.status);
        if version == 0 {
            buf.put_i32(self.ip);
        }
    }

    fn decode(version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("authentication status", buf);
        if version == 0 {
            r.require(8)?;
            Ok(Self {
                status: r.i32()?,
                ip: r.i32()?,
            })
        } else {
            Ok(Self {
                status: r.i32()?,
                ip: 0,
            })
        }
    }
}

/// 令牌认证请求
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthenticationToken {
    pub platform_id: u8,
    pub token: String,
    pub device_id: String,
}

impl WirePayload for AuthenticationToken {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_u8(self.platform_id);
        put_str_u8(buf, &self.token);
        put_str_u8(buf, &self.device_id);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("authentication token", buf);
        r.require(4)?;
        let platform_id = r.u8()?;
        let token_len = r.u8()? as usize;
        let token = r.string(token_len)?;
        let device_len = r.u8()? as usize;
        let device_id = r.string(device_len)?;
        Ok(Self {
            platform_id,
            token,
            device_id,
        })
    }
}

/// 其他端登录通知
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoginPoint {
    pub up_timestamp: i32,
    pub platform_id: u8,
    pub device_id: String,
}

impl WirePayload for LoginPoint {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i32(self.up_timestamp);
        buf.put_u8(self.platform_id);
        buf.put_slice(self.device_id.as_bytes());
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("login point", buf);
        r.require(6)?;
        Ok(Self {
            up_timestamp: r.i32()?,
            platform_id: r.u8()?,
            device_id: r.rest_string()?,
        })
    }
}

/// 点对点 / 群组 / 透传消息
///
/// 版本 0：`sender receiver msgid content`
/// 版本 1 及以上：`sender receiver timestamp msgid content`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImMessage {
    pub sender: i64,
    pub receiver: i64,
    pub timestamp: i32,
    pub msgid: i32,
    pub content: String,
}

impl WirePayload for ImMessage {
    fn encode(&self, version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
        if version != 0 {
            buf.put_i32(self.timestamp);
        }
        buf.put_i32(self.msgid);
        buf.put_slice(self.content.as_bytes());
    }

    fn decode(version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("im message", buf);
        if version == 0 {
            r.require(20)?;
            Ok(Self {
                sender: r.i64()?,
                receiver: r.i64()?,
                timestamp: 0,
                msgid: r.i32()?,
                content: r.rest_string()?,
            })
        } else {
            r.require(24)?;
            Ok(Self {
                sender: r.i64()?,
                receiver: r.i64()?,
                timestamp: r.i32()?,
                msgid: r.i32()?,
                content: r.rest_string()?,
            })
        }
    }
}

/// 客户端确认，引用下行帧的 seq
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageAck {
    pub seq: u32,
}

impl WirePayload for MessageAck {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_u32(self.seq);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("ack", buf);
        Ok(Self { seq: r.u32()? })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PeerAck {
    pub sender: i64,
    pub receiver: i64,
    pub msgid: i32,
}

impl WirePayload for PeerAck {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
        buf.put_i32(self.msgid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("peer ack", buf);
        r.require(20)?;
        Ok(Self {
            sender: r.i64()?,
            receiver: r.i64()?,
            msgid: r.i32()?,
        })
    }
}

/// 正在输入
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Inputing {
    pub sender: i64,
    pub receiver: i64,
}

impl WirePayload for Inputing {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("inputing", buf);
        r.require(16)?;
        Ok(Self {
            sender: r.i64()?,
            receiver: r.i64()?,
        })
    }
}

/// 订阅在线状态
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubscribeState {
    pub uids: Vec<i64>,
}

impl WirePayload for SubscribeState {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_u32(self.uids.len() as u32);
        for uid in &self.uids {
            buf.put_i64(*uid);
        }
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("subscribe state", buf);
        let count = r.u32()? as usize;
        r.require(count.saturating_mul(8))?;
        let mut uids = Vec::with_capacity(count);
        for _ in 0..count {
            uids.push(r.i64()?);
        }
        Ok(Self { uids })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OnlineState {
    pub sender: i64,
    pub online: i32,
}

impl WirePayload for OnlineState {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.sender);
        buf.put_i32(self.online);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("online state", buf);
        r.require(12)?;
        Ok(Self {
            sender: r.i64()?,
            online: r.i32()?,
        })
    }
}

/// 实时消息（RT / ROOM_IM / TRANSMIT_ROOM），不持久化
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RtMessage {
    pub sender: i64,
    pub receiver: i64,
    pub content: String,
}

impl WirePayload for RtMessage {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
        buf.put_slice(self.content.as_bytes());
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("rt message", buf);
        r.require(16)?;
        Ok(Self {
            sender: r.i64()?,
            receiver: r.i64()?,
            content: r.rest_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RoomId(pub i64);

impl WirePayload for RoomId {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.0);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("room id", buf);
        Ok(Self(r.i64()?))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnreadCount {
    pub count: i32,
}

impl WirePayload for UnreadCount {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i32(self.count);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("unread count", buf);
        Ok(Self { count: r.i32()? })
    }
}

/// 客服消息
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomerServiceMessage {
    pub customer_id: i64,
    pub sender: i64,
    pub receiver: i64,
    pub timestamp: i32,
    pub content: String,
}

impl WirePayload for CustomerServiceMessage {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.customer_id);
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
        buf.put_i32(self.timestamp);
        buf.put_slice(self.content.as_bytes());
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("customer service message", buf);
        r.require(28)?;
        Ok(Self {
            customer_id: r.i64()?,
            sender: r.i64()?,
            receiver: r.i64()?,
            timestamp: r.i32()?,
            content: r.rest_string()?,
        })
    }
}

/// VOIP 信令，内容为不透明字节且不能为空
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VoipControl {
    pub sender: i64,
    pub receiver: i64,
    pub content: Bytes,
}

impl WirePayload for VoipControl {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
        buf.put_slice(&self.content);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("voip control", buf);
        r.require(17)?;
        Ok(Self {
            sender: r.i64()?,
            receiver: r.i64()?,
            content: Bytes::copy_from_slice(r.rest()),
        })
    }
}

pub const VOIP_COMMAND_DIAL: i32 = 1;
pub const VOIP_COMMAND_DIAL_VIDEO: i32 = 9;

impl VoipControl {
    /// 拨号信令携带的拨号次数，非拨号信令返回 0
    ///
    /// 内容前 4 字节是信令类型，拨号信令随后 4 字节是拨号次数。
    pub fn dial_count(&self) -> i32 {
        let mut r = BodyReader::new("voip content", &self.content);
        match r.i32() {
            Ok(VOIP_COMMAND_DIAL) | Ok(VOIP_COMMAND_DIAL_VIDEO) => r.i32().unwrap_or(0),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AppUserId {
    pub appid: i64,
    pub uid: i64,
}

impl WirePayload for AppUserId {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.appid);
        buf.put_i64(self.uid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("app user id", buf);
        r.require(16)?;
        Ok(Self {
            appid: r.i64()?,
            uid: r.i64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AppRoomId {
    pub appid: i64,
    pub room_id: i64,
}

impl WirePayload for AppRoomId {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.appid);
        buf.put_i64(self.room_id);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("app room id", buf);
        r.require(16)?;
        Ok(Self {
            appid: r.i64()?,
            room_id: r.i64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AppGroupMemberId {
    pub appid: i64,
    pub gid: i64,
    pub uid: i64,
}

impl WirePayload for AppGroupMemberId {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.appid);
        buf.put_i64(self.gid);
        buf.put_i64(self.uid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("app group member id", buf);
        r.require(24)?;
        Ok(Self {
            appid: r.i64()?,
            gid: r.i64()?,
            uid: r.i64()?,
        })
    }
}

/// 服务器间信封
///
/// 内层是一个完整的自描述帧，转发方不需要理解内层载荷。
/// `msgid == 0` 表示消息尚未持久化。
#[derive(Debug, Clone, PartialEq)]
pub struct AppMessage {
    pub appid: i64,
    pub receiver: i64,
    pub msgid: i64,
    pub device_id: i64,
    pub msg: Message,
}

/// 信封固定部分长度
pub const APP_MESSAGE_FIXED: usize = 34;

impl AppMessage {
    pub fn new(appid: i64, receiver: i64, device_id: i64, msg: Message) -> Self {
        Self {
            appid,
            receiver,
            msgid: 0,
            device_id,
            msg,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64(self.appid);
        buf.put_i64(self.receiver);
        buf.put_i64(self.msgid);
        buf.put_i64(self.device_id);
        let mut inner = BytesMut::with_capacity(HEADER_SIZE + 64);
        encode_frame_into(&self.msg, &mut inner);
        buf.put_u16(inner.len().min(u16::MAX as usize) as u16);
        buf.put_slice(&inner);
    }

    pub fn decode(buf: &[u8], registry: &CommandRegistry) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("app message", buf);
        r.require(APP_MESSAGE_FIXED)?;
        let appid = r.i64()?;
        let receiver = r.i64()?;
        let msgid = r.i64()?;
        let device_id = r.i64()?;
        let inner_len = r.u16()? as usize;
        let inner = r.bytes(inner_len)?;
        let (msg, consumed) = registry.decode_frame(inner)?;
        if consumed != inner.len() {
            return Err(ProtocolError::malformed(
                "app message",
                format!("inner frame uses {consumed} of {} bytes", inner.len()),
            ));
        }
        Ok(Self {
            appid,
            receiver,
            msgid,
            device_id,
            msg,
        })
    }
}

/// 服务器注册，连接建立后的第一帧
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerRegister {
    pub server_id: String,
}

impl WirePayload for ServerRegister {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_slice(self.server_id.as_bytes());
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        if buf.is_empty() {
            return Err(ProtocolError::malformed("server register", "empty server id"));
        }
        Ok(Self {
            server_id: BodyReader::new("server register", buf).rest_string()?,
        })
    }
}

/// 好友邀请
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContactInvite {
    pub sender: i64,
    pub receiver: i64,
    pub reason: String,
}

impl WirePayload for ContactInvite {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
        buf.put_slice(self.reason.as_bytes());
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("contact invite", buf);
        r.require(16)?;
        Ok(Self {
            sender: r.i64()?,
            receiver: r.i64()?,
            reason: r.rest_string()?,
        })
    }
}

/// 接受 / 拒绝 / 删除 / 拉黑 / 取消拉黑
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContactRequest {
    pub sender: i64,
    pub receiver: i64,
}

impl WirePayload for ContactRequest {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("contact request", buf);
        r.require(16)?;
        Ok(Self {
            sender: r.i64()?,
            receiver: r.i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContactResponse {
    pub status: i32,
    pub sender: i64,
    pub receiver: i64,
}

impl WirePayload for ContactResponse {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i32(self.status);
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("contact response", buf);
        r.require(20)?;
        Ok(Self {
            status: r.i32()?,
            sender: r.i64()?,
            receiver: r.i64()?,
        })
    }
}

/// 创建群组
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupCreate {
    pub is_private: bool,
    pub is_allow_invite: bool,
    pub is_super: bool,
    pub title: String,
    pub description: String,
    pub members: Vec<i64>,
}

impl WirePayload for GroupCreate {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_u8(self.is_private as u8);
        buf.put_u8(self.is_allow_invite as u8);
        buf.put_u8(self.is_super as u8);
        put_str_u16(buf, &self.title);
        put_str_u16(buf, &self.description);
        buf.put_u32(self.members.len() as u32);
        for uid in &self.members {
            buf.put_i64(*uid);
        }
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("group create", buf);
        r.require(11)?;
        let is_private = r.u8()? != 0;
        let is_allow_invite = r.u8()? != 0;
        let is_super = r.u8()? != 0;
        let title_len = r.u16()? as usize;
        let title = r.string(title_len)?;
        let desc_len = r.u16()? as usize;
        let description = r.string(desc_len)?;
        let members = read_members(&mut r)?;
        Ok(Self {
            is_private,
            is_allow_invite,
            is_super,
            title,
            description,
            members,
        })
    }
}

fn read_members(r: &mut BodyReader<'_>) -> ProtocolResult<Vec<i64>> {
    let count = r.u32()? as usize;
    r.require(count.saturating_mul(8))?;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        members.push(r.i64()?);
    }
    Ok(members)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupCreateResponse {
    pub status: i32,
    pub gid: i64,
}

impl WirePayload for GroupCreateResponse {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i32(self.status);
        buf.put_i64(self.gid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("group create response", buf);
        r.require(12)?;
        Ok(Self {
            status: r.i32()?,
            gid: r.i64()?,
        })
    }
}

/// 只携带群组 id 的请求（主动加群 / 退群 / 解散）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupRequest {
    pub gid: i64,
}

impl WirePayload for GroupRequest {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.gid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("group request", buf);
        Ok(Self { gid: r.i64()? })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupInvite {
    pub gid: i64,
    pub members: Vec<i64>,
}

impl WirePayload for GroupInvite {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.gid);
        buf.put_u32(self.members.len() as u32);
        for uid in &self.members {
            buf.put_i64(*uid);
        }
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("group invite", buf);
        r.require(12)?;
        let gid = r.i64()?;
        let members = read_members(&mut r)?;
        Ok(Self { gid, members })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupRemove {
    pub gid: i64,
    pub uid: i64,
}

impl WirePayload for GroupRemove {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.gid);
        buf.put_i64(self.uid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("group remove", buf);
        r.require(16)?;
        Ok(Self {
            gid: r.i64()?,
            uid: r.i64()?,
        })
    }
}

/// 只携带状态码的响应
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusResponse {
    pub status: i32,
}

impl WirePayload for StatusResponse {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i32(self.status);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("status response", buf);
        Ok(Self { status: r.i32()? })
    }
}

/// 推进点对点投递游标
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dequeue {
    pub appid: i64,
    pub receiver: i64,
    pub device_id: i64,
    pub msgid: i64,
}

impl WirePayload for Dequeue {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.appid);
        buf.put_i64(self.receiver);
        buf.put_i64(self.device_id);
        buf.put_i64(self.msgid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("dequeue", buf);
        r.require(32)?;
        Ok(Self {
            appid: r.i64()?,
            receiver: r.i64()?,
            device_id: r.i64()?,
            msgid: r.i64()?,
        })
    }
}

/// 推进超级群成员的读游标
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DequeueGroup {
    pub appid: i64,
    pub gid: i64,
    pub uid: i64,
    pub device_id: i64,
    pub msgid: i64,
}

impl WirePayload for DequeueGroup {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.appid);
        buf.put_i64(self.gid);
        buf.put_i64(self.uid);
        buf.put_i64(self.device_id);
        buf.put_i64(self.msgid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("dequeue group", buf);
        r.require(40)?;
        Ok(Self {
            appid: r.i64()?,
            gid: r.i64()?,
            uid: r.i64()?,
            device_id: r.i64()?,
            msgid: r.i64()?,
        })
    }
}

/// 拉取离线消息，`after_msgid` 用于分批续拉
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadOffline {
    pub appid: i64,
    pub uid: i64,
    pub device_id: i64,
    pub after_msgid: i64,
}

impl WirePayload for LoadOffline {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.appid);
        buf.put_i64(self.uid);
        buf.put_i64(self.device_id);
        buf.put_i64(self.after_msgid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("load offline", buf);
        r.require(32)?;
        Ok(Self {
            appid: r.i64()?,
            uid: r.i64()?,
            device_id: r.i64()?,
            after_msgid: r.i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadGroupOffline {
    pub appid: i64,
    pub gid: i64,
    pub uid: i64,
    pub device_id: i64,
    pub after_msgid: i64,
}

impl WirePayload for LoadGroupOffline {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.appid);
        buf.put_i64(self.gid);
        buf.put_i64(self.uid);
        buf.put_i64(self.device_id);
        buf.put_i64(self.after_msgid);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("load group offline", buf);
        r.require(40)?;
        Ok(Self {
            appid: r.i64()?,
            gid: r.i64()?,
            uid: r.i64()?,
            device_id: r.i64()?,
            after_msgid: r.i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadHistory {
    pub appid: i64,
    pub uid: i64,
    pub limit: u32,
}

impl WirePayload for LoadHistory {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_i64(self.appid);
        buf.put_i64(self.uid);
        buf.put_u32(self.limit);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("load history", buf);
        r.require(20)?;
        Ok(Self {
            appid: r.i64()?,
            uid: r.i64()?,
            limit: r.u32()?,
        })
    }
}

/// 存储 RPC 应答
///
/// `req_seq` 引用请求帧的 seq，帧头的 seq 仍按方向单调递增。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RpcResult {
    pub req_seq: u32,
    pub status: i32,
    pub content: Bytes,
}

impl WirePayload for RpcResult {
    fn encode(&self, _version: u8, buf: &mut BytesMut) {
        buf.put_u32(self.req_seq);
        buf.put_i32(self.status);
        buf.put_slice(&self.content);
    }

    fn decode(_version: u8, buf: &[u8]) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("rpc result", buf);
        r.require(8)?;
        Ok(Self {
            req_seq: r.u32()?,
            status: r.i32()?,
            content: Bytes::copy_from_slice(r.rest()),
        })
    }
}

impl RpcResult {
    /// 以 8 字节大端整数解释内容（保存消息返回的 msgid）
    pub fn content_i64(&self) -> ProtocolResult<i64> {
        let mut r = BodyReader::new("rpc result content", &self.content);
        r.i64()
    }
}

/// 一批离线 / 历史消息，作为 `RpcResult` 的内容传输
///
/// `last_msgid` 是本批扫描到的最大 msgid（包含被过滤掉的记录），
/// 调用方以它作为下一批的 `after_msgid`。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OfflineBatch {
    pub more: bool,
    pub last_msgid: i64,
    pub messages: Vec<AppMessage>,
}

impl OfflineBatch {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.more as u8);
        buf.put_i64(self.last_msgid);
        buf.put_u16(self.messages.len().min(u16::MAX as usize) as u16);
        for msg in self.messages.iter().take(u16::MAX as usize) {
            let mut record = BytesMut::new();
            msg.encode(&mut record);
            buf.put_u16(record.len().min(u16::MAX as usize) as u16);
            buf.put_slice(&record);
        }
    }

    pub fn decode(buf: &[u8], registry: &CommandRegistry) -> ProtocolResult<Self> {
        let mut r = BodyReader::new("offline batch", buf);
        r.require(11)?;
        let more = r.u8()? != 0;
        let last_msgid = r.i64()?;
        let count = r.u16()? as usize;
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            let len = r.u16()? as usize;
            let raw = r.bytes(len)?;
            messages.push(AppMessage::decode(raw, registry)?);
        }
        if r.remaining() != 0 {
            return Err(ProtocolError::malformed("offline batch", "trailing bytes"));
        }
        Ok(Self {
            more,
            last_msgid,
            messages,
        })
    }

    /// 记录编码后占用的字节数（含 2 字节长度前缀）
    pub fn record_size(msg: &AppMessage) -> usize {
        let mut record = BytesMut::new();
        msg.encode(&mut record);
        record.len() + 2
    }
}

/// 批次固定头部长度
pub const OFFLINE_BATCH_FIXED: usize = 11;
