//! 定长字段读写辅助
//!
//! 所有读取都先检查剩余长度，截断的输入返回 `ProtocolError::Truncated`，不会 panic。

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// 大端字段读取器
pub(crate) struct BodyReader<'a> {
    what: &'static str,
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(what: &'static str, buf: &'a [u8]) -> Self {
        Self { what, buf }
    }

    /// 要求剩余字节不少于 `min`
    pub(crate) fn require(&self, min: usize) -> ProtocolResult<()> {
        if self.buf.remaining() < min {
            return Err(ProtocolError::Truncated {
                what: self.what,
                need: min,
                got: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub(crate) fn u8(&mut self) -> ProtocolResult<u8> {
        self.require(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self) -> ProtocolResult<u16> {
        self.require(2)?;
        Ok(self.buf.get_u16())
    }

    pub(crate) fn i32(&mut self) -> ProtocolResult<i32> {
        self.require(4)?;
        Ok(self.buf.get_i32())
    }

    pub(crate) fn u32(&mut self) -> ProtocolResult<u32> {
        self.require(4)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn i64(&mut self) -> ProtocolResult<i64> {
        self.require(8)?;
        Ok(self.buf.get_i64())
    }

    pub(crate) fn bytes(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        self.require(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn string(&mut self, len: usize) -> ProtocolResult<String> {
        let raw = self.bytes(len)?;
        utf8(self.what, raw)
    }

    /// 读取剩余全部字节作为字符串
    pub(crate) fn rest_string(self) -> ProtocolResult<String> {
        utf8(self.what, self.buf)
    }

    pub(crate) fn rest(self) -> &'a [u8] {
        self.buf
    }
}

/// 非法 UTF-8 按格式错误拒绝，不做替换
pub(crate) fn utf8(what: &'static str, raw: &[u8]) -> ProtocolResult<String> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|err| ProtocolError::malformed(what, err.to_string()))
}

/// 写入带 1 字节长度前缀的字符串，超长部分截断
pub(crate) fn put_str_u8(buf: &mut BytesMut, value: &str) {
    let raw = truncate_utf8(value, u8::MAX as usize);
    buf.put_u8(raw.len() as u8);
    buf.put_slice(raw);
}

/// 写入带 2 字节长度前缀的字符串，超长部分截断
pub(crate) fn put_str_u16(buf: &mut BytesMut, value: &str) {
    let raw = truncate_utf8(value, u16::MAX as usize);
    buf.put_u16(raw.len() as u16);
    buf.put_slice(raw);
}

fn truncate_utf8(value: &str, max: usize) -> &[u8] {
    if value.len() <= max {
        return value.as_bytes();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value.as_bytes()[..end]
}
