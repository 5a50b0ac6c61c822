use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use spark_im_core::link::{LinkHandler, ServerLink};
use spark_im_core::protocol::command::{
    self, DEQUEUE, DEQUEUE_GROUP, LOAD_GROUP_OFFLINE, LOAD_HISTORY, LOAD_OFFLINE, RESULT,
    SAVE_AND_ENQUEUE, SAVE_AND_ENQUEUE_GROUP, SERVER_REGISTER_STORAGE, SUBSCRIBE, SUBSCRIBE_GROUP,
    UNSUBSCRIBE, UNSUBSCRIBE_GROUP,
};
use spark_im_core::protocol::{Body, Message, RpcResult};
use spark_im_core::routing::Subscription;
use tracing::{debug, info, warn};

use crate::application::StorageService;
use crate::error::{Result, StorageError};

/// 存储服务的链接处理器
///
/// 订阅类帧在读循环内同步处理，保证先于同一链接上后续的离线加载生效；
/// RPC 请求各自派生任务执行，结果以 `RESULT` 回写。
pub struct StorageLinkHandler {
    service: Arc<StorageService>,
}

impl StorageLinkHandler {
    pub fn new(service: Arc<StorageService>) -> Self {
        Self { service }
    }

    async fn handle_subscription(&self, link: &Arc<ServerLink>, msg: &Message) {
        let routes = self.service.routes();
        match (msg.cmd, &msg.body) {
            (SUBSCRIBE, Body::AppUser(id)) => {
                routes
                    .subscribe(link.id(), id.appid, Subscription::User { uid: id.uid })
                    .await;
            }
            (UNSUBSCRIBE, Body::AppUser(id)) => {
                routes
                    .unsubscribe(link.id(), id.appid, Subscription::User { uid: id.uid })
                    .await;
            }
            (SUBSCRIBE_GROUP, Body::AppGroupMember(id)) => {
                let sub = Subscription::GroupMember {
                    gid: id.gid,
                    uid: id.uid,
                };
                routes.subscribe(link.id(), id.appid, sub).await;
            }
            (UNSUBSCRIBE_GROUP, Body::AppGroupMember(id)) => {
                let sub = Subscription::GroupMember {
                    gid: id.gid,
                    uid: id.uid,
                };
                routes.unsubscribe(link.id(), id.appid, sub).await;
            }
            _ => warn!(cmd = msg.cmd, link_id = link.id(), "unexpected subscription payload"),
        }
    }
}

#[async_trait]
impl LinkHandler for StorageLinkHandler {
    fn register_cmd(&self) -> u32 {
        SERVER_REGISTER_STORAGE
    }

    async fn on_registered(&self, link: &Arc<ServerLink>) {
        self.service.routes().add_link(link.clone()).await;
    }

    async fn on_message(&self, link: &Arc<ServerLink>, msg: Message) {
        match msg.cmd {
            SUBSCRIBE | UNSUBSCRIBE | SUBSCRIBE_GROUP | UNSUBSCRIBE_GROUP => {
                self.handle_subscription(link, &msg).await;
            }
            SAVE_AND_ENQUEUE | SAVE_AND_ENQUEUE_GROUP | DEQUEUE | DEQUEUE_GROUP | LOAD_OFFLINE
            | LOAD_GROUP_OFFLINE | LOAD_HISTORY => {
                let service = self.service.clone();
                let link = link.clone();
                tokio::spawn(async move {
                    let req_seq = msg.seq;
                    let cmd = msg.cmd;
                    let reply = match handle_request(&service, msg).await {
                        Ok(content) => RpcResult {
                            req_seq,
                            status: command::status::OK,
                            content,
                        },
                        Err(err) => {
                            warn!(%err, cmd, req_seq, link_id = link.id(), "storage request failed");
                            RpcResult {
                                req_seq,
                                status: command::status::INTERNAL,
                                content: Bytes::new(),
                            }
                        }
                    };
                    link.send(Message::new(RESULT, Body::Result(reply))).await;
                });
            }
            other => debug!(cmd = other, link_id = link.id(), "ignored frame on storage link"),
        }
    }

    async fn on_closed(&self, link: &Arc<ServerLink>) {
        self.service.routes().remove_link(link.id()).await;
        info!(
            link_id = link.id(),
            server_id = link.server_id().unwrap_or_default(),
            "storage link closed"
        );
    }
}

/// 执行一个 RPC 请求，返回 `RESULT` 的内容部分
pub async fn handle_request(service: &StorageService, msg: Message) -> Result<Bytes> {
    let mut content = BytesMut::new();
    match msg.body {
        Body::App(app) if msg.cmd == SAVE_AND_ENQUEUE => {
            content.put_i64(service.save_peer(*app).await?);
        }
        Body::App(app) if msg.cmd == SAVE_AND_ENQUEUE_GROUP => {
            content.put_i64(service.save_group(*app).await?);
        }
        Body::Dequeue(req) => {
            content.put_i64(service.dequeue(req).await?);
        }
        Body::DequeueGroup(req) => {
            content.put_i64(service.dequeue_group(req).await?);
        }
        Body::LoadOffline(req) => service.load_offline(req).await?.encode(&mut content),
        Body::LoadGroupOffline(req) => service.load_group_offline(req).await?.encode(&mut content),
        Body::LoadHistory(req) => service.load_history(req).await?.encode(&mut content),
        _ => return Err(StorageError::BadRequest(msg.cmd)),
    }
    Ok(content.freeze())
}
