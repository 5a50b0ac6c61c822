//! 好友与黑名单
//!
//! 请求中的发送者一律取会话的 uid。每个请求恰好回复一次，校验之后的关系库失败回复 `INTERNAL`。

use spark_im_core::protocol::command::*;
use spark_im_core::protocol::{Body, ContactResponse, Message};
use tracing::{info, warn};

use super::Session;
use crate::application::client::ClientHandle;
use crate::domain::CallbackPayload;

impl Session {
    async fn reply_contact(&self, cmd: u32, status: i32, sender: i64, receiver: i64) {
        self.send(Message::new(
            cmd,
            Body::ContactResp(ContactResponse {
                status,
                sender,
                receiver,
            }),
        ))
        .await;
    }

    async fn notify_contact(&self, client: &ClientHandle, cmd: i32, receiver: i64, msg: String) {
        let payload = CallbackPayload {
            cmd,
            from: client.uid,
            to: receiver,
            msg,
        };
        self.notify(client, receiver, payload).await;
    }

    /// 好友申请
    ///
    /// 1 自己，2 已是好友，3 被对方拉黑，4 对方不存在。成功时解除自己对对方的拉黑。
    pub(super) async fn handle_contact_invite(&mut self, client: &ClientHandle, msg: Message) {
        let Body::ContactInvite(invite) = msg.body else {
            return;
        };
        let (uid, receiver) = (client.uid, invite.receiver);
        let users = self.services.users.clone();

        let status = if receiver == uid {
            1
        } else if users.is_friend(uid, receiver).await {
            2
        } else if users.is_black(receiver, uid).await {
            3
        } else {
            match users.relations().user_exists(receiver).await {
                Ok(false) => 4,
                Ok(true) => {
                    if users.is_black(uid, receiver).await {
                        if let Err(err) = users.remove_black(uid, receiver).await {
                            warn!(?err, uid, receiver, "failed to lift blacklist on invite");
                        }
                    }
                    self.notify_contact(client, callback::FRIEND_INVITE, receiver, invite.reason)
                        .await;
                    status::OK
                }
                Err(err) => {
                    warn!(?err, receiver, "user lookup failed");
                    status::INTERNAL
                }
            }
        };
        self.reply_contact(CONTACT_INVITE_RESP, status, uid, receiver).await;
    }

    /// 接受好友申请
    ///
    /// 1 自己，2 已是好友，4 对方不存在。双方之间的拉黑全部解除。
    pub(super) async fn handle_contact_accept(&mut self, client: &ClientHandle, msg: Message) {
        let Body::Contact(request) = msg.body else {
            return;
        };
        let (uid, receiver) = (client.uid, request.receiver);
        let users = self.services.users.clone();

        let status = if receiver == uid {
            1
        } else if users.is_friend(uid, receiver).await {
            2
        } else {
            match users.relations().user_exists(receiver).await {
                Ok(false) => 4,
                Ok(true) => {
                    for (owner, target) in [(uid, receiver), (receiver, uid)] {
                        if users.is_black(owner, target).await {
                            if let Err(err) = users.remove_black(owner, target).await {
                                warn!(?err, owner, target, "failed to lift blacklist on accept");
                            }
                        }
                    }
                    match users.add_friend(uid, receiver).await {
                        Ok(()) => {
                            self.notify_contact(client, callback::FRIEND_ACCEPT, receiver, String::new())
                                .await;
                            self.notify_contact(client, callback::FRIEND_ADD, receiver, String::new())
                                .await;
                            info!(uid, friend = receiver, "friendship established");
                            status::OK
                        }
                        Err(err) => {
                            warn!(?err, uid, receiver, "failed to add friend");
                            status::INTERNAL
                        }
                    }
                }
                Err(err) => {
                    warn!(?err, receiver, "user lookup failed");
                    status::INTERNAL
                }
            }
        };
        self.reply_contact(CONTACT_ACCEPT_RESP, status, uid, receiver).await;
    }

    /// 拒绝好友申请：1 自己，2 已是好友，3 被对方拉黑
    pub(super) async fn handle_contact_refuse(&mut self, client: &ClientHandle, msg: Message) {
        let Body::Contact(request) = msg.body else {
            return;
        };
        let (uid, receiver) = (client.uid, request.receiver);
        let users = &self.services.users;

        let status = if receiver == uid {
            1
        } else if users.is_friend(uid, receiver).await {
            2
        } else if users.is_black(receiver, uid).await {
            3
        } else {
            self.notify_contact(client, callback::FRIEND_REFUSE, receiver, String::new())
                .await;
            status::OK
        };
        self.reply_contact(CONTACT_REFUSE_RESP, status, uid, receiver).await;
    }

    /// 删除好友：1 自己，2 不是好友
    pub(super) async fn handle_contact_del(&mut self, client: &ClientHandle, msg: Message) {
        let Body::Contact(request) = msg.body else {
            return;
        };
        let (uid, receiver) = (client.uid, request.receiver);
        let users = self.services.users.clone();

        let status = if receiver == uid {
            1
        } else if !users.is_friend(uid, receiver).await {
            2
        } else {
            match users.remove_friend(uid, receiver).await {
                Ok(()) => {
                    self.notify_contact(client, callback::FRIEND_DEL, receiver, String::new())
                        .await;
                    status::OK
                }
                Err(err) => {
                    warn!(?err, uid, receiver, "failed to remove friend");
                    status::INTERNAL
                }
            }
        };
        self.reply_contact(CONTACT_DEL_RESP, status, uid, receiver).await;
    }

    /// 拉黑：1 自己，3 失败
    pub(super) async fn handle_contact_black(&mut self, client: &ClientHandle, msg: Message) {
        let Body::Contact(request) = msg.body else {
            return;
        };
        let (uid, receiver) = (client.uid, request.receiver);

        let status = if receiver == uid {
            1
        } else {
            match self.services.users.add_black(uid, receiver).await {
                Ok(()) => status::OK,
                Err(err) => {
                    warn!(?err, uid, receiver, "failed to add blacklist entry");
                    3
                }
            }
        };
        self.reply_contact(CONTACT_BLACK_RESP, status, uid, receiver).await;
    }

    /// 解除拉黑：1 自己，2 失败
    pub(super) async fn handle_contact_unblack(&mut self, client: &ClientHandle, msg: Message) {
        let Body::Contact(request) = msg.body else {
            return;
        };
        let (uid, receiver) = (client.uid, request.receiver);

        let status = if receiver == uid {
            1
        } else {
            match self.services.users.remove_black(uid, receiver).await {
                Ok(()) => status::OK,
                Err(err) => {
                    warn!(?err, uid, receiver, "failed to remove blacklist entry");
                    2
                }
            }
        };
        self.reply_contact(CONTACT_UNBLACK_RESP, status, uid, receiver).await;
    }
}
