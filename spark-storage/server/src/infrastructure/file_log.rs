//! 文件消息日志
//!
//! 文件布局：
//! - 32 字节文件头：`MAGIC:4 VERSION:4 保留:24`
//! - 记录：`MAGIC:4 帧 MAGIC:4`，帧为 `PUBLISH`（点对点）或 `PUBLISH_GROUP`（群）包裹的 AppMessage
//!
//! 记录在文件中的偏移即 msgid。打开时顺序扫描重建内存索引，只有越过文件末尾的
//! 尾部残缺记录会被截断；其它位置的损坏拒绝打开。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, SeekFrom};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use spark_im_core::ProtocolError;
use spark_im_core::protocol::{
    AppMessage, Body, CommandRegistry, FrameHeader, HEADER_SIZE, Message, encode_message,
};

use crate::domain::model::LogKind;
use crate::domain::repository::MessageLog;
use crate::error::{Result, StorageError};

pub const MAGIC: u32 = 0x494d_494d;
pub const VERSION: u32 = 1 << 16;
pub const LOG_HEADER_SIZE: u64 = 32;
const MESSAGE_FILE: &str = "messages";

#[derive(Debug, Default)]
struct LogIndex {
    peers: HashMap<(i64, i64), Vec<i64>>,
    groups: HashMap<(i64, i64), Vec<i64>>,
}

impl LogIndex {
    fn queues(&self, kind: LogKind) -> &HashMap<(i64, i64), Vec<i64>> {
        match kind {
            LogKind::Peer => &self.peers,
            LogKind::Group => &self.groups,
        }
    }

    fn insert(&mut self, kind: LogKind, appid: i64, key: i64, msgid: i64) {
        let queues = match kind {
            LogKind::Peer => &mut self.peers,
            LogKind::Group => &mut self.groups,
        };
        queues.entry((appid, key)).or_default().push(msgid);
    }
}

struct LogFile {
    file: File,
    end: u64,
}

pub struct FileMessageLog {
    path: PathBuf,
    registry: Arc<CommandRegistry>,
    sync_writes: bool,
    file: Mutex<LogFile>,
    index: RwLock<LogIndex>,
}

impl FileMessageLog {
    /// 打开（或创建）`root/messages` 并重建索引
    pub async fn open(root: &Path, registry: Arc<CommandRegistry>, sync_writes: bool) -> Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let path = root.join(MESSAGE_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        let (index, end) = rebuild(&mut file, &registry).await?;
        info!(
            path = %path.display(),
            end,
            peer_queues = index.peers.len(),
            group_queues = index.groups.len(),
            "message log opened"
        );

        Ok(Self {
            path,
            registry,
            sync_writes,
            file: Mutex::new(LogFile { file, end }),
            index: RwLock::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MessageLog for FileMessageLog {
    async fn append(&self, kind: LogKind, msg: &AppMessage) -> Result<i64> {
        let mut stored = msg.clone();
        stored.msgid = 0;
        let frame = encode_message(&Message::new(kind.record_cmd(), Body::App(Box::new(stored))))
            .map_err(|err| match err {
                ProtocolError::InvalidLength(len) => StorageError::RecordTooLarge(len),
                other => other.into(),
            })?;

        let mut record = BytesMut::with_capacity(frame.len() + 8);
        record.put_u32(MAGIC);
        record.put_slice(&frame);
        record.put_u32(MAGIC);

        let mut log = self.file.lock().await;
        let msgid = log.end;
        log.file.seek(SeekFrom::Start(msgid)).await?;
        if let Err(err) = write_record(&mut log.file, &record, self.sync_writes).await {
            // 写失败时丢弃半条记录，保证下一次追加仍从完整边界开始
            if let Err(truncate_err) = log.file.set_len(msgid).await {
                warn!(?truncate_err, msgid, "failed to roll back partial record");
            }
            return Err(err.into());
        }
        log.end += record.len() as u64;

        let msgid = msgid as i64;
        self.index
            .write()
            .await
            .insert(kind, msg.appid, msg.receiver, msgid);
        debug!(msgid, kind = kind.label(), appid = msg.appid, receiver = msg.receiver, "record appended");
        Ok(msgid)
    }

    async fn read(&self, msgid: i64) -> Result<AppMessage> {
        let mut log = self.file.lock().await;
        if msgid < LOG_HEADER_SIZE as i64 || msgid as u64 >= log.end {
            return Err(StorageError::Corrupted(format!("msgid {msgid} out of range")));
        }
        log.file.seek(SeekFrom::Start(msgid as u64)).await?;
        let (_, mut app, _) = read_record(&mut log.file, &self.registry)
            .await
            .map_err(|err| match err {
                RecordError::Io(err) => StorageError::Io(err),
                other => StorageError::Corrupted(format!("record {msgid}: {other}")),
            })?;
        app.msgid = msgid;
        Ok(app)
    }

    async fn last_msgid(&self, kind: LogKind, appid: i64, key: i64) -> i64 {
        let index = self.index.read().await;
        index
            .queues(kind)
            .get(&(appid, key))
            .and_then(|ids| ids.last().copied())
            .unwrap_or(0)
    }

    async fn msgids_after(&self, kind: LogKind, appid: i64, key: i64, after: i64) -> Vec<i64> {
        let index = self.index.read().await;
        match index.queues(kind).get(&(appid, key)) {
            Some(ids) => {
                let start = ids.partition_point(|id| *id <= after);
                ids[start..].to_vec()
            }
            None => Vec::new(),
        }
    }
}

async fn write_record(file: &mut File, record: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(record).await?;
    file.flush().await?;
    if sync {
        file.sync_data().await?;
    }
    Ok(())
}

/// 单条记录的读取失败
#[derive(Debug, Error)]
enum RecordError {
    /// 记录延伸到文件末尾之外
    #[error("record extends past end of file")]
    Truncated,

    #[error("io error: {0}")]
    Io(std::io::Error),

    #[error("{0}")]
    Invalid(String),
}

impl From<std::io::Error> for RecordError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(err)
        }
    }
}

/// 读取当前位置的一条记录，返回记录及其在文件中占用的字节数
async fn read_record<R>(
    reader: &mut R,
    registry: &CommandRegistry,
) -> std::result::Result<(LogKind, AppMessage, u64), RecordError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let magic = reader.read_u32().await?;
    if magic != MAGIC {
        return Err(RecordError::Invalid(format!("bad leading magic {magic:#x}")));
    }

    let mut frame = vec![0u8; HEADER_SIZE];
    reader.read_exact(&mut frame).await?;
    let header =
        FrameHeader::parse(&frame).map_err(|err| RecordError::Invalid(err.to_string()))?;
    frame.resize(HEADER_SIZE + header.length, 0);
    reader.read_exact(&mut frame[HEADER_SIZE..]).await?;

    let magic = reader.read_u32().await?;
    if magic != MAGIC {
        return Err(RecordError::Invalid(format!("bad trailing magic {magic:#x}")));
    }

    let size = (frame.len() + 8) as u64;
    let (msg, _) = registry
        .decode_frame(&frame)
        .map_err(|err| RecordError::Invalid(err.to_string()))?;
    let kind = LogKind::from_record_cmd(msg.cmd)
        .ok_or_else(|| RecordError::Invalid(format!("unexpected cmd {}", msg.cmd)))?;
    match msg.body {
        Body::App(app) => Ok((kind, *app, size)),
        _ => Err(RecordError::Invalid("record is not an app message".to_string())),
    }
}

async fn write_header(file: &mut File) -> Result<()> {
    let mut header = BytesMut::with_capacity(LOG_HEADER_SIZE as usize);
    header.put_u32(MAGIC);
    header.put_u32(VERSION);
    header.put_bytes(0, LOG_HEADER_SIZE as usize - 8);
    file.seek(SeekFrom::Start(0)).await?;
    file.write_all(&header).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

async fn rebuild(file: &mut File, registry: &CommandRegistry) -> Result<(LogIndex, u64)> {
    let len = file.metadata().await?.len();
    if len == 0 {
        write_header(file).await?;
        return Ok((LogIndex::default(), LOG_HEADER_SIZE));
    }
    if len < LOG_HEADER_SIZE {
        return Err(StorageError::Corrupted(format!("file header truncated at {len} bytes")));
    }

    file.seek(SeekFrom::Start(0)).await?;
    let mut index = LogIndex::default();
    let mut offset = LOG_HEADER_SIZE;
    let mut torn = false;
    {
        let mut reader = BufReader::new(&mut *file);
        let magic = reader.read_u32().await?;
        let version = reader.read_u32().await?;
        if magic != MAGIC || version != VERSION {
            return Err(StorageError::Corrupted(format!(
                "unexpected file header magic={magic:#x} version={version:#x}"
            )));
        }
        let mut pad = [0u8; LOG_HEADER_SIZE as usize - 8];
        reader.read_exact(&mut pad).await?;

        while offset < len {
            match read_record(&mut reader, registry).await {
                Ok((kind, app, size)) => {
                    index.insert(kind, app.appid, app.receiver, offset as i64);
                    offset += size;
                }
                Err(RecordError::Truncated) => {
                    torn = true;
                    break;
                }
                Err(RecordError::Io(err)) => return Err(err.into()),
                Err(RecordError::Invalid(reason)) => {
                    return Err(StorageError::Corrupted(format!(
                        "record at offset {offset}: {reason}"
                    )));
                }
            }
        }
    }

    if torn {
        warn!(offset, len, "torn record at log tail, truncating");
        file.set_len(offset).await?;
        file.sync_data().await?;
    }
    Ok((index, offset))
}
