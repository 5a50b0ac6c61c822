//! # 线协议
//!
//! 客户端与服务器、服务器与服务器之间共用同一套二进制协议：
//!
//! - `frame`：16 字节定长帧头 + 消息体，长度上限 32 KiB
//! - `body`：按命令字区分的载荷（标签联合），部分载荷按版本选择布局
//! - `registry`：命令字到解码器的静态表，启动时构建并注入
//! - `command`：命令字、平台号等线上常量

mod body;
mod codec;
pub mod command;
mod frame;
mod registry;

pub use body::*;
pub use frame::{
    FrameHeader, HEADER_SIZE, MAX_BODY_SIZE, encode_message, read_message, write_message,
};
pub use registry::CommandRegistry;

/// 逻辑消息
///
/// `seq` 只在单个连接的单个方向上有意义，发送前由写循环重新赋值。
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub cmd: u32,
    pub seq: u32,
    pub version: u8,
    pub body: Body,
}

impl Message {
    /// 以默认版本构造消息
    pub fn new(cmd: u32, body: Body) -> Self {
        Self {
            cmd,
            seq: 0,
            version: command::DEFAULT_VERSION,
            body,
        }
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }
}
