//! 已认证客户端的共享句柄
//!
//! 会话读循环认证成功后创建，登记到本地在线目录。其它会话与服务器通道通过它
//! 向客户端投递消息，全部是非阻塞操作。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use spark_im_core::protocol::Message;
use spark_im_core::protocol::command::DEFAULT_VERSION;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::domain::EMessage;

pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// 读写两个任务共享的会话状态
#[derive(Debug)]
pub struct SessionShared {
    id: ClientId,
    version: AtomicU8,
    unacked: Mutex<HashMap<u32, EMessage>>,
    close: watch::Sender<bool>,
}

impl SessionShared {
    pub fn new() -> Self {
        let (close, _) = watch::channel(false);
        Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            version: AtomicU8::new(DEFAULT_VERSION),
            unacked: Mutex::new(HashMap::new()),
            close,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// 下发帧使用的协议版本
    pub fn version(&self) -> u8 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_version(&self, version: u8) {
        self.version.store(version, Ordering::Release);
    }

    pub fn track_unacked(&self, seq: u32, msg: EMessage) {
        match self.unacked.lock() {
            Ok(mut unacked) => unacked.insert(seq, msg),
            Err(poisoned) => poisoned.into_inner().insert(seq, msg),
        };
    }

    pub fn take_unacked(&self, seq: u32) -> Option<EMessage> {
        match self.unacked.lock() {
            Ok(mut unacked) => unacked.remove(&seq),
            Err(poisoned) => poisoned.into_inner().remove(&seq),
        }
    }

    pub fn unacked_len(&self) -> usize {
        match self.unacked.lock() {
            Ok(unacked) => unacked.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// 请求关闭连接，读写两个任务都会退出
    pub fn close(&self) {
        self.close.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close.borrow()
    }

    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close.subscribe()
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

/// 已认证客户端
#[derive(Debug)]
pub struct ClientHandle {
    pub appid: i64,
    pub uid: i64,
    pub device_id: i64,
    pub platform: u8,
    pub device: String,
    shared: Arc<SessionShared>,
    wt: mpsc::Sender<Option<Message>>,
    ewt: mpsc::Sender<EMessage>,
}

impl ClientHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        appid: i64,
        uid: i64,
        device_id: i64,
        platform: u8,
        device: String,
        shared: Arc<SessionShared>,
        wt: mpsc::Sender<Option<Message>>,
        ewt: mpsc::Sender<EMessage>,
    ) -> Self {
        Self {
            appid,
            uid,
            device_id,
            platform,
            device,
            shared,
            wt,
            ewt,
        }
    }

    pub fn id(&self) -> ClientId {
        self.shared.id()
    }

    /// 同一用户从同一设备发出的消息不回显
    pub fn is_self_echo(&self, sender: Option<i64>, device_id: i64) -> bool {
        sender == Some(self.uid) && device_id == self.device_id
    }

    /// 投递不持久化的实时消息，队列满时丢弃
    pub fn deliver(&self, msg: Message) -> bool {
        match self.wt.try_send(Some(msg)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(uid = self.uid, client_id = self.id(), "control queue full, realtime message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// 投递已持久化的消息
    ///
    /// 队列满时关闭会话，消息在客户端重连后从存储重新下发。
    pub fn enqueue_live(&self, msg: EMessage) -> bool {
        match self.ewt.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(uid = self.uid, client_id = self.id(), "live queue full, closing slow client");
                self.shared.close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(uid = self.uid, client_id = self.id(), "live queue closed");
                false
            }
        }
    }

    pub fn close(&self) {
        self.shared.close();
    }
}
