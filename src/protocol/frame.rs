//! 帧格式
//!
//! `[length:4][seq:4][cmd:4][version:1][reserved:3][body:length]`，全部大端。
//! `length` 必须小于 32 KiB，超限或读不满都视为致命错误。

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Message;
use super::registry::CommandRegistry;
use crate::error::{ProtocolError, ProtocolResult};

pub const HEADER_SIZE: usize = 16;
pub const MAX_BODY_SIZE: usize = 32 * 1024;

/// 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub seq: u32,
    pub cmd: u32,
    pub version: u8,
}

impl FrameHeader {
    pub fn parse(buf: &[u8]) -> ProtocolResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                what: "frame header",
                need: HEADER_SIZE,
                got: buf.len(),
            });
        }
        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if length >= MAX_BODY_SIZE {
            return Err(ProtocolError::InvalidLength(length));
        }
        Ok(Self {
            length,
            seq: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            cmd: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            version: buf[12],
        })
    }
}

/// 把完整帧追加到 `buf`，不检查长度上限
pub(crate) fn encode_frame_into(msg: &Message, buf: &mut BytesMut) {
    let start = buf.len();
    buf.put_bytes(0, HEADER_SIZE);
    msg.body.encode(msg.version, buf);
    let length = (buf.len() - start - HEADER_SIZE) as u32;

    let header = &mut buf[start..start + HEADER_SIZE];
    header[0..4].copy_from_slice(&length.to_be_bytes());
    header[4..8].copy_from_slice(&msg.seq.to_be_bytes());
    header[8..12].copy_from_slice(&msg.cmd.to_be_bytes());
    header[12] = msg.version;
}

/// 编码一条消息为完整帧
pub fn encode_message(msg: &Message) -> ProtocolResult<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + 64);
    encode_frame_into(msg, &mut buf);
    let length = buf.len() - HEADER_SIZE;
    if length >= MAX_BODY_SIZE {
        return Err(ProtocolError::InvalidLength(length));
    }
    Ok(buf.freeze())
}

/// 从流中读取一条完整消息
pub async fn read_message<R>(reader: &mut R, registry: &CommandRegistry) -> ProtocolResult<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    if let Err(err) = reader.read_exact(&mut header_buf).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(ProtocolError::Closed);
        }
        return Err(err.into());
    }
    let header = FrameHeader::parse(&header_buf)?;

    let mut body = vec![0u8; header.length];
    reader.read_exact(&mut body).await?;

    let body = registry.decode_body(header.cmd, header.version, &body)?;
    Ok(Message {
        cmd: header.cmd,
        seq: header.seq,
        version: header.version,
        body,
    })
}

/// 编码并写出一条消息
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(msg)?;
    writer.write_all(&frame).await?;
    Ok(())
}
