//! 认证与离线积压加载

use std::net::IpAddr;
use std::sync::Arc;

use spark_im_core::protocol::command::{AUTH_STATUS, PLATFORM_WEB};
use spark_im_core::protocol::{AuthenticationStatus, AuthenticationToken, Body, Message, OfflineBatch};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::Session;
use crate::application::client::ClientHandle;
use crate::domain::{DeliveryKind, EMessage, LoginPointRecord};
use crate::error::Result;
use crate::infrastructure::StorageClient;

impl Session {
    pub(super) async fn handle_auth_token(&mut self, auth: AuthenticationToken, version: u8) {
        if let Some(client) = &self.client {
            info!(uid = client.uid, "repeat authentication ignored");
            return;
        }
        self.shared.set_version(version);

        let services = self.services.clone();
        let (appid, uid) = match services.tokens.load(&auth.token).await {
            Ok((appid, uid)) if uid != 0 => (appid, uid),
            Ok(_) => {
                info!(token = %auth.token, "token does not map to a user");
                self.reply_auth_status(1).await;
                return;
            }
            Err(err) => {
                info!(?err, token = %auth.token, "token lookup failed");
                self.reply_auth_status(1).await;
                return;
            }
        };

        let device_id = if auth.platform_id != PLATFORM_WEB && !auth.device_id.is_empty() {
            match services.devices.device_id(&auth.device_id, auth.platform_id).await {
                Ok(device_id) => device_id,
                Err(err) => {
                    warn!(?err, uid, device = %auth.device_id, "device id lookup failed");
                    self.reply_auth_status(1).await;
                    return;
                }
            }
        } else {
            0
        };

        self.reply_auth_status(0).await;

        let point = LoginPointRecord {
            appid,
            uid,
            platform: auth.platform_id,
            device: auth.device_id.clone(),
            server_id: services.server_id.clone(),
        };
        if let Err(err) = services.login_points.add(&point).await {
            warn!(?err, uid, "failed to record login point");
        }

        let client = Arc::new(ClientHandle::new(
            appid,
            uid,
            device_id,
            auth.platform_id,
            auth.device_id,
            self.shared.clone(),
            self.wt.clone(),
            self.ewt.clone(),
        ));
        services.presence.add_client(&client).await;
        services.metrics.clients_authenticated.inc();
        self.client = Some(client);

        if let Err(err) = services.storage.subscribe_user(appid, uid).await {
            warn!(?err, uid, "failed to subscribe user on storage");
        }
        if let Err(err) = services.route.subscribe_user(appid, uid).await {
            warn!(?err, uid, "failed to subscribe user on route");
        }

        let super_groups: Vec<i64> = services
            .groups
            .find_user_groups(appid, uid)
            .await
            .iter()
            .filter(|group| group.kind.is_super())
            .map(|group| group.gid)
            .collect();
        for gid in &super_groups {
            self.subscribe_group(appid, *gid, uid).await;
        }

        info!(
            uid,
            appid,
            device_id,
            platform = auth.platform_id,
            client_id = self.shared.id(),
            "client authenticated"
        );

        // 设备号为 0 的客户端没有离线游标
        let Some(owt) = self.owt.take() else {
            return;
        };
        if device_id == 0 {
            return;
        }
        let storage = services.storage.clone();
        tokio::spawn(async move {
            load_backlog(storage, appid, uid, device_id, super_groups, owt).await;
        });
    }

    async fn reply_auth_status(&self, status: i32) {
        let ip = match self.peer.map(|peer| peer.ip()) {
            Some(IpAddr::V4(ip)) => u32::from(ip) as i32,
            _ => 0,
        };
        self.send(Message::new(
            AUTH_STATUS,
            Body::AuthStatus(AuthenticationStatus { status, ip }),
        ))
        .await;
    }

    /// 在存储通道订阅超级群成员，断开时按记录退订
    pub(super) async fn subscribe_group(&mut self, appid: i64, gid: i64, uid: i64) {
        if self.group_subscriptions.contains(&gid) {
            return;
        }
        match self.services.storage.subscribe_group_member(appid, gid, uid).await {
            Ok(()) => self.group_subscriptions.push(gid),
            Err(err) => warn!(?err, gid, uid, "failed to subscribe group member"),
        }
    }
}

/// 先加载点对点积压，再依次加载每个超级群的积压，全部写入 `owt`
///
/// 函数返回时 `owt` 被释放，写任务随后切换到在线队列。
async fn load_backlog(
    storage: Arc<StorageClient>,
    appid: i64,
    uid: i64,
    device_id: i64,
    groups: Vec<i64>,
    owt: mpsc::Sender<EMessage>,
) {
    let peer = drain_batches(&owt, DeliveryKind::Peer, |after| {
        storage.load_offline(appid, uid, device_id, after)
    })
    .await;
    let mut total = match peer {
        Ok(count) => count,
        Err(err) => {
            warn!(?err, uid, "failed to load offline messages");
            0
        }
    };

    for gid in groups {
        let loaded = drain_batches(&owt, DeliveryKind::Group { gid }, |after| {
            storage.load_group_offline(appid, gid, uid, device_id, after)
        })
        .await;
        match loaded {
            Ok(count) => total += count,
            Err(err) => warn!(?err, uid, gid, "failed to load group offline messages"),
        }
    }
    debug!(uid, device_id, messages = total, "offline backlog loaded");
}

/// 按 `more` 标记循环拉取，直到积压取完或写任务退出
async fn drain_batches<F, Fut>(
    owt: &mpsc::Sender<EMessage>,
    kind: DeliveryKind,
    mut load: F,
) -> Result<usize>
where
    F: FnMut(i64) -> Fut,
    Fut: std::future::Future<Output = Result<OfflineBatch>>,
{
    let mut after = 0;
    let mut count = 0;
    loop {
        let batch = load(after).await?;
        for app in batch.messages {
            let emsg = EMessage {
                msgid: app.msgid,
                kind,
                msg: app.msg,
            };
            if owt.send(emsg).await.is_err() {
                return Ok(count);
            }
            count += 1;
        }
        if !batch.more || batch.last_msgid <= after {
            return Ok(count);
        }
        after = batch.last_msgid;
    }
}
