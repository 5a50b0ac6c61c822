//! 群组管理命令
//!
//! 状态码按命令各自定义，见各处理函数文档。

use std::collections::HashSet;
use std::sync::Arc;

use spark_im_core::current_micros;
use spark_im_core::protocol::command::*;
use spark_im_core::protocol::{Body, GroupCreateResponse, Message, StatusResponse};
use tracing::{info, warn};

use super::Session;
use crate::application::client::ClientHandle;
use crate::domain::{CallbackPayload, GROUP_CAPACITY, Group, GroupKind};
use crate::error::GatewayError;

/// 群号：微秒时间戳拼接 uid 低 6 位，时间戳部分回绕到正数区间
pub fn generate_gid(uid: i64) -> i64 {
    let prefix = current_micros().rem_euclid(i64::MAX / 1_000_000);
    prefix * 1_000_000 + uid.rem_euclid(1_000_000)
}

impl Session {
    async fn reply_status(&self, cmd: u32, status: i32) {
        self.send(Message::new(cmd, Body::Status(StatusResponse { status })))
            .await;
    }

    async fn notify_group(&self, client: &ClientHandle, cmd: i32, gid: i64, receiver: i64) {
        let payload = CallbackPayload {
            cmd,
            from: client.uid,
            to: gid,
            msg: String::new(),
        };
        self.notify(client, receiver, payload).await;
    }

    /// 退订本会话在超级群上的订阅
    async fn unsubscribe_group(&mut self, appid: i64, gid: i64, uid: i64) {
        let Some(pos) = self.group_subscriptions.iter().position(|g| *g == gid) else {
            return;
        };
        self.group_subscriptions.swap_remove(pos);
        if let Err(err) = self
            .services
            .storage
            .unsubscribe_group_member(appid, gid, uid)
            .await
        {
            warn!(?err, gid, uid, "failed to unsubscribe group member");
        }
    }

    /// 建群：1 超过 500 人，2 落库失败；成功时返回群号
    pub(super) async fn handle_group_create(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        let Body::GroupCreate(create) = msg.body else {
            return;
        };
        let uid = client.uid;
        let mut members: HashSet<i64> = create.members.iter().copied().collect();
        members.insert(uid);
        if members.len() > GROUP_CAPACITY {
            self.reply_group_create(1, 0).await;
            return;
        }

        let group = Group {
            gid: generate_gid(uid),
            appid: client.appid,
            owner: uid,
            title: create.title,
            description: create.description,
            is_private: create.is_private,
            is_allow_invite: create.is_allow_invite,
            kind: GroupKind::from_super_flag(create.is_super),
            members: Arc::new(members),
        };
        let group = match self.services.groups.create_group(group).await {
            Ok(group) => group,
            Err(err) => {
                warn!(?err, uid, "failed to create group");
                self.reply_group_create(2, 0).await;
                return;
            }
        };

        for member in group.members.iter().filter(|member| **member != uid) {
            self.notify_group(client, callback::GROUP_JOIN, group.gid, *member)
                .await;
        }
        if group.kind.is_super() {
            self.subscribe_group(client.appid, group.gid, uid).await;
        }
        info!(gid = group.gid, owner = uid, kind = ?group.kind, members = group.member_count(), "group created");
        self.reply_group_create(status::OK, group.gid).await;
    }

    async fn reply_group_create(&self, status: i32, gid: i64) {
        self.send(Message::new(
            GROUP_CREATE_RESP,
            Body::GroupCreateResp(GroupCreateResponse { status, gid }),
        ))
        .await;
    }

    /// 主动入群：1 群不存在，2 群主本人，3 私有群，4 已满，5 加入失败
    pub(super) async fn handle_group_self_join(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        let Body::Group(request) = msg.body else {
            return;
        };
        let uid = client.uid;
        let status = match self.services.groups.find_app_group(client.appid, request.gid).await {
            None => 1,
            Some(group) if group.owner == uid => 2,
            Some(group) if group.is_private => 3,
            Some(group) if group.is_member(uid) => status::OK,
            Some(group) if group.member_count() >= GROUP_CAPACITY => 4,
            Some(group) => match self.services.groups.add_member(group.gid, uid).await {
                Ok(_) => {
                    if group.kind.is_super() {
                        self.subscribe_group(client.appid, group.gid, uid).await;
                    }
                    info!(gid = group.gid, uid, "joined group");
                    status::OK
                }
                Err(GatewayError::GroupFull { .. }) => 4,
                Err(err) => {
                    warn!(?err, gid = group.gid, uid, "failed to join group");
                    5
                }
            },
        };
        self.reply_status(GROUP_SELF_JOIN_RESP, status).await;
    }

    /// 邀请入群：1 群不存在，2 非群主且不允许邀请，3 邀请者不是成员，4 超过 500 人
    pub(super) async fn handle_group_invite_join(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        let Body::GroupInvite(invite) = msg.body else {
            return;
        };
        let uid = client.uid;
        let status = match self.services.groups.find_app_group(client.appid, invite.gid).await {
            None => 1,
            Some(group) if group.owner != uid && !group.is_allow_invite => 2,
            Some(group) if !group.is_member(uid) => 3,
            Some(group) => match self.services.groups.add_members(group.gid, &invite.members).await {
                Ok(added) => {
                    for member in &added {
                        self.notify_group(client, callback::GROUP_JOIN, group.gid, *member)
                            .await;
                    }
                    info!(gid = group.gid, inviter = uid, added = added.len(), "members invited");
                    status::OK
                }
                Err(GatewayError::GroupFull { .. }) => 4,
                Err(err) => {
                    warn!(?err, gid = group.gid, "failed to add invited members");
                    status::INTERNAL
                }
            },
        };
        self.reply_status(GROUP_INVITE_JOIN_RESP, status).await;
    }

    /// 移除成员：1 群不存在，2 非群主，3 目标是群主，4 失败
    pub(super) async fn handle_group_remove(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        let Body::GroupRemove(remove) = msg.body else {
            return;
        };
        let uid = client.uid;
        let status = match self.services.groups.find_app_group(client.appid, remove.gid).await {
            None => 1,
            Some(group) if group.owner != uid => 2,
            Some(group) if group.owner == remove.uid => 3,
            Some(group) => match self.services.groups.remove_member(group.gid, remove.uid).await {
                Ok(true) => {
                    self.notify_group(client, callback::GROUP_REMOVE, group.gid, remove.uid)
                        .await;
                    info!(gid = group.gid, member = remove.uid, "member removed");
                    status::OK
                }
                Ok(false) => 4,
                Err(err) => {
                    warn!(?err, gid = group.gid, member = remove.uid, "failed to remove member");
                    4
                }
            },
        };
        self.reply_status(GROUP_REMOVE_RESP, status).await;
    }

    /// 退群：1 群不存在，2 群主本人，3 失败
    pub(super) async fn handle_group_quit(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        let Body::Group(request) = msg.body else {
            return;
        };
        let uid = client.uid;
        let status = match self.services.groups.find_app_group(client.appid, request.gid).await {
            None => 1,
            Some(group) if group.owner == uid => 2,
            Some(group) => match self.services.groups.remove_member(group.gid, uid).await {
                Ok(true) => {
                    self.unsubscribe_group(client.appid, group.gid, uid).await;
                    info!(gid = group.gid, uid, "quit group");
                    status::OK
                }
                Ok(false) => 3,
                Err(err) => {
                    warn!(?err, gid = group.gid, uid, "failed to quit group");
                    3
                }
            },
        };
        self.reply_status(GROUP_QUIT_RESP, status).await;
    }

    /// 解散群：1 群不存在，2 非群主
    pub(super) async fn handle_group_del(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        let Body::Group(request) = msg.body else {
            return;
        };
        let uid = client.uid;
        let status = match self.services.groups.find_app_group(client.appid, request.gid).await {
            None => 1,
            Some(group) if group.owner != uid => 2,
            Some(group) => match self.services.groups.remove_group(group.gid).await {
                Ok(_) => {
                    for member in group.members.iter() {
                        self.notify_group(client, callback::GROUP_DEL, group.gid, *member)
                            .await;
                    }
                    self.unsubscribe_group(client.appid, group.gid, uid).await;
                    info!(gid = group.gid, owner = uid, "group deleted");
                    status::OK
                }
                Err(err) => {
                    warn!(?err, gid = group.gid, "failed to delete group");
                    status::INTERNAL
                }
            },
        };
        self.reply_status(GROUP_DEL_RESP, status).await;
    }
}
