//! 离线推送规则
//!
//! 只有接收方没有任何订阅链接时才会调用；这里决定一条刚持久化的记录是否值得推送、推给谁。

use spark_im_core::protocol::command::{CUSTOMER_SERVICE, GROUP_IM, IM};
use spark_im_core::protocol::{AppMessage, Body};
use spark_im_core::push::{GroupPushNotification, PeerPushNotification};

#[derive(Debug, Clone)]
pub enum OfflinePush {
    Peer(PeerPushNotification),
    Group(GroupPushNotification),
}

/// 点对点队列中的记录对应的推送
///
/// 发给自己其他设备的副本不推送。
pub fn offline_push(record: &AppMessage) -> Option<OfflinePush> {
    let uid = record.receiver;
    match (record.msg.cmd, &record.msg.body) {
        (IM, Body::Im(im)) if im.receiver == uid => Some(OfflinePush::Peer(PeerPushNotification {
            appid: record.appid,
            sender: im.sender,
            receiver: uid,
            content: im.content.clone(),
        })),
        (GROUP_IM, Body::Im(im)) if im.sender != uid => {
            Some(OfflinePush::Group(GroupPushNotification {
                appid: record.appid,
                sender: im.sender,
                receivers: vec![uid],
                content: im.content.clone(),
                group_id: im.receiver,
            }))
        }
        (CUSTOMER_SERVICE, Body::CustomerService(cs)) if cs.sender != uid => {
            Some(OfflinePush::Peer(PeerPushNotification {
                appid: record.appid,
                sender: cs.sender,
                receiver: uid,
                content: cs.content.clone(),
            }))
        }
        _ => None,
    }
}

/// 记录是否由 `uid` 的 `device_id` 设备发出
pub fn is_self_echo(record: &AppMessage, uid: i64, device_id: i64) -> bool {
    record.device_id == device_id && record.msg.body.sender() == Some(uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_im_core::protocol::{CustomerServiceMessage, ImMessage, Message};

    fn im_record(cmd: u32, sender: i64, receiver: i64, queue: i64) -> AppMessage {
        AppMessage::new(
            1,
            queue,
            5,
            Message::new(
                cmd,
                Body::Im(ImMessage {
                    sender,
                    receiver,
                    content: "hi".to_string(),
                    ..Default::default()
                }),
            ),
        )
    }

    #[test]
    fn test_peer_push_only_for_receiver_copy() {
        assert!(matches!(
            offline_push(&im_record(IM, 10, 20, 20)),
            Some(OfflinePush::Peer(p)) if p.receiver == 20 && p.sender == 10
        ));
        assert!(offline_push(&im_record(IM, 10, 20, 10)).is_none());
    }

    #[test]
    fn test_group_push_skips_sender() {
        match offline_push(&im_record(GROUP_IM, 10, 300, 20)) {
            Some(OfflinePush::Group(p)) => {
                assert_eq!(p.receivers, vec![20]);
                assert_eq!(p.group_id, 300);
            }
            other => panic!("unexpected push {other:?}"),
        }
        assert!(offline_push(&im_record(GROUP_IM, 10, 300, 10)).is_none());
    }

    #[test]
    fn test_customer_service_push() {
        let record = AppMessage::new(
            1,
            20,
            5,
            Message::new(
                CUSTOMER_SERVICE,
                Body::CustomerService(CustomerServiceMessage {
                    customer_id: 1,
                    sender: 10,
                    receiver: 20,
                    timestamp: 0,
                    content: "help".to_string(),
                }),
            ),
        );
        assert!(matches!(offline_push(&record), Some(OfflinePush::Peer(_))));
    }

    #[test]
    fn test_self_echo() {
        let record = im_record(IM, 10, 20, 10);
        assert!(is_self_echo(&record, 10, 5));
        assert!(!is_self_echo(&record, 10, 6));
        assert!(!is_self_echo(&record, 20, 5));
    }
}
