//! 存储应用服务测试：持久化、离线加载、游标推进与推送

use std::sync::Arc;

use spark_im_core::link::ServerLink;
use spark_im_core::metrics::StorageMetrics;
use spark_im_core::protocol::command::{GROUP_IM, IM, PUBLISH, PUBLISH_GROUP};
use spark_im_core::protocol::{
    AppMessage, Body, CommandRegistry, Dequeue, DequeueGroup, ImMessage, LoadGroupOffline,
    LoadHistory, LoadOffline, Message, OfflineBatch,
};
use spark_im_core::push::{MemoryPushQueue, PUSH_QUEUE};
use spark_im_core::routing::{RouteTable, Subscription};
use spark_storage_server::application::StorageService;
use spark_storage_server::domain::BATCH_BUDGET;
use spark_storage_server::error::StorageError;
use spark_storage_server::infrastructure::{FileCursorStore, FileMessageLog};
use tempfile::TempDir;
use tokio::sync::mpsc;

const APPID: i64 = 7;
const DEVICE: i64 = 3;

struct Fixture {
    _dir: TempDir,
    service: StorageService,
    routes: Arc<RouteTable>,
    push: Arc<MemoryPushQueue>,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(CommandRegistry::standard());
    let log = Arc::new(FileMessageLog::open(dir.path(), registry, false).await.unwrap());
    let cursors = Arc::new(FileCursorStore::open(dir.path()).await.unwrap());
    let routes = Arc::new(RouteTable::new());
    let push = Arc::new(MemoryPushQueue::new());
    let service = StorageService::new(
        log,
        cursors,
        routes.clone(),
        push.clone(),
        Arc::new(StorageMetrics::new()),
        10,
    );
    Fixture {
        _dir: dir,
        service,
        routes,
        push,
    }
}

fn im(cmd: u32, sender: i64, receiver: i64, content: &str) -> Message {
    Message::new(
        cmd,
        Body::Im(ImMessage {
            sender,
            receiver,
            timestamp: 1,
            msgid: 0,
            content: content.to_string(),
        }),
    )
}

fn load(uid: i64, after_msgid: i64) -> LoadOffline {
    LoadOffline {
        appid: APPID,
        uid,
        device_id: DEVICE,
        after_msgid,
    }
}

/// 测试：离线消息按 msgid 升序返回，确认后不再返回
#[tokio::test]
async fn test_offline_ascending_and_ack_clears_backlog() {
    let f = fixture().await;
    let mut ids = Vec::new();
    for i in 0..5 {
        let app = AppMessage::new(APPID, 20, 9, im(IM, 10, 20, &format!("m{i}")));
        ids.push(f.service.save_peer(app).await.unwrap());
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let batch = f.service.load_offline(load(20, 0)).await.unwrap();
    assert!(!batch.more);
    let got: Vec<i64> = batch.messages.iter().map(|m| m.msgid).collect();
    assert_eq!(got, ids);

    // 确认前三条
    f.service
        .dequeue(Dequeue {
            appid: APPID,
            receiver: 20,
            device_id: DEVICE,
            msgid: ids[2],
        })
        .await
        .unwrap();
    let batch = f.service.load_offline(load(20, 0)).await.unwrap();
    let got: Vec<i64> = batch.messages.iter().map(|m| m.msgid).collect();
    assert_eq!(got, ids[3..].to_vec());

    // 旧的确认不会回退游标
    f.service
        .dequeue(Dequeue {
            appid: APPID,
            receiver: 20,
            device_id: DEVICE,
            msgid: ids[0],
        })
        .await
        .unwrap();
    let batch = f.service.load_offline(load(20, 0)).await.unwrap();
    assert_eq!(batch.messages.len(), 2);

    f.service
        .dequeue(Dequeue {
            appid: APPID,
            receiver: 20,
            device_id: DEVICE,
            msgid: ids[4],
        })
        .await
        .unwrap();
    assert!(f.service.load_offline(load(20, 0)).await.unwrap().messages.is_empty());
}

/// 测试：游标按设备独立
#[tokio::test]
async fn test_cursor_is_per_device() {
    let f = fixture().await;
    let msgid = f
        .service
        .save_peer(AppMessage::new(APPID, 20, 9, im(IM, 10, 20, "x")))
        .await
        .unwrap();
    f.service
        .dequeue(Dequeue {
            appid: APPID,
            receiver: 20,
            device_id: DEVICE,
            msgid,
        })
        .await
        .unwrap();

    let other = LoadOffline {
        device_id: DEVICE + 1,
        ..load(20, 0)
    };
    assert_eq!(f.service.load_offline(other).await.unwrap().messages.len(), 1);
    assert!(f.service.load_offline(load(20, 0)).await.unwrap().messages.is_empty());
}

/// 测试：本设备发出的副本不出现在离线消息中，但分页位置越过它
#[tokio::test]
async fn test_offline_skips_self_echo() {
    let f = fixture().await;
    // uid 20 从 DEVICE 发给 30，保存到自己队列的副本
    let echo = f
        .service
        .save_peer(AppMessage::new(APPID, 20, DEVICE, im(IM, 20, 30, "mine")))
        .await
        .unwrap();
    let incoming = f
        .service
        .save_peer(AppMessage::new(APPID, 20, 99, im(IM, 30, 20, "theirs")))
        .await
        .unwrap();

    let batch = f.service.load_offline(load(20, 0)).await.unwrap();
    assert_eq!(batch.messages.len(), 1);
    assert_eq!(batch.messages[0].msgid, incoming);
    assert_eq!(batch.last_msgid, incoming);
    assert!(echo < incoming);
}

/// 测试：大量离线消息分批返回，按 last_msgid 续拉得到完整升序序列
#[tokio::test]
async fn test_offline_pagination() {
    let f = fixture().await;
    let content = "x".repeat(1000);
    let mut ids = Vec::new();
    for _ in 0..80 {
        let app = AppMessage::new(APPID, 20, 9, im(IM, 10, 20, &content));
        ids.push(f.service.save_peer(app).await.unwrap());
    }

    let mut collected = Vec::new();
    let mut after = 0;
    let mut rounds = 0;
    loop {
        let batch = f.service.load_offline(load(20, after)).await.unwrap();
        collected.extend(batch.messages.iter().map(|m| m.msgid));
        after = batch.last_msgid;
        rounds += 1;
        if !batch.more {
            break;
        }
    }
    assert!(rounds > 1);
    assert_eq!(collected, ids);
}

/// 测试：在线时发布给订阅链接，离线时写入推送队列
#[tokio::test]
async fn test_publish_or_push() {
    let f = fixture().await;

    f.service
        .save_peer(AppMessage::new(APPID, 20, 9, im(IM, 10, 20, "offline")))
        .await
        .unwrap();
    let pushed = f.push.drain();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].0, PUSH_QUEUE);
    assert!(pushed[0].1.contains("\"receiver\":20"));

    let (tx, mut rx) = mpsc::channel(8);
    let link = Arc::new(ServerLink::new("127.0.0.1:9".parse().unwrap(), tx));
    f.routes.add_link(link.clone()).await;
    f.routes
        .subscribe(link.id(), APPID, Subscription::User { uid: 20 })
        .await;

    let msgid = f
        .service
        .save_peer(AppMessage::new(APPID, 20, 9, im(IM, 10, 20, "online")))
        .await
        .unwrap();
    let published = rx.recv().await.unwrap();
    assert_eq!(published.cmd, PUBLISH);
    match published.body {
        Body::App(app) => {
            assert_eq!(app.msgid, msgid);
            assert_eq!(app.receiver, 20);
        }
        other => panic!("unexpected body {other:?}"),
    }
    assert!(f.push.drain().is_empty());
}

/// 测试：超级群消息发布给有成员在线的链接，群游标按成员推进
#[tokio::test]
async fn test_group_log_and_cursor() {
    let f = fixture().await;
    let (tx, mut rx) = mpsc::channel(8);
    let link = Arc::new(ServerLink::new("127.0.0.1:9".parse().unwrap(), tx));
    f.routes.add_link(link.clone()).await;
    f.routes
        .subscribe(link.id(), APPID, Subscription::GroupMember { gid: 500, uid: 20 })
        .await;

    let first = f
        .service
        .save_group(AppMessage::new(APPID, 500, 9, im(GROUP_IM, 10, 500, "g1")))
        .await
        .unwrap();
    let second = f
        .service
        .save_group(AppMessage::new(APPID, 500, 9, im(GROUP_IM, 10, 500, "g2")))
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap().cmd, PUBLISH_GROUP);
    assert_eq!(rx.recv().await.unwrap().cmd, PUBLISH_GROUP);

    let req = LoadGroupOffline {
        appid: APPID,
        gid: 500,
        uid: 30,
        device_id: DEVICE,
        after_msgid: 0,
    };
    let batch = f.service.load_group_offline(req.clone()).await.unwrap();
    let got: Vec<i64> = batch.messages.iter().map(|m| m.msgid).collect();
    assert_eq!(got, vec![first, second]);

    f.service
        .dequeue_group(DequeueGroup {
            appid: APPID,
            gid: 500,
            uid: 30,
            device_id: DEVICE,
            msgid: first,
        })
        .await
        .unwrap();
    let batch = f.service.load_group_offline(req).await.unwrap();
    assert_eq!(batch.messages.len(), 1);
    assert_eq!(batch.messages[0].msgid, second);
}

/// 测试：超级群离线最多返回最新的 100 条
#[tokio::test]
async fn test_group_offline_is_capped() {
    let f = fixture().await;
    let mut ids = Vec::new();
    for i in 0..120 {
        let app = AppMessage::new(APPID, 600, 9, im(GROUP_IM, 10, 600, &format!("{i}")));
        ids.push(f.service.save_group(app).await.unwrap());
    }
    let batch = f
        .service
        .load_group_offline(LoadGroupOffline {
            appid: APPID,
            gid: 600,
            uid: 30,
            device_id: DEVICE,
            after_msgid: 0,
        })
        .await
        .unwrap();
    let got: Vec<i64> = batch.messages.iter().map(|m| m.msgid).collect();
    assert_eq!(got, ids[20..].to_vec());
}

/// 测试：历史消息返回最新的 limit 条，升序
#[tokio::test]
async fn test_load_history() {
    let f = fixture().await;
    let mut ids = Vec::new();
    for i in 0..10 {
        let app = AppMessage::new(APPID, 20, 9, im(IM, 10, 20, &format!("{i}")));
        ids.push(f.service.save_peer(app).await.unwrap());
    }
    let batch = f
        .service
        .load_history(LoadHistory {
            appid: APPID,
            uid: 20,
            limit: 3,
        })
        .await
        .unwrap();
    let got: Vec<i64> = batch.messages.iter().map(|m| m.msgid).collect();
    assert_eq!(got, ids[7..].to_vec());
}

/// 测试：超出最后写入位置的确认被截断
#[tokio::test]
async fn test_ack_is_clamped_to_last_written() {
    let f = fixture().await;
    let msgid = f
        .service
        .save_peer(AppMessage::new(APPID, 20, 9, im(IM, 10, 20, "x")))
        .await
        .unwrap();
    let cursor = f
        .service
        .dequeue(Dequeue {
            appid: APPID,
            receiver: 20,
            device_id: DEVICE,
            msgid: msgid + 1_000_000,
        })
        .await
        .unwrap();
    assert_eq!(cursor, msgid);

    let next = f
        .service
        .save_peer(AppMessage::new(APPID, 20, 9, im(IM, 10, 20, "y")))
        .await
        .unwrap();
    let batch = f.service.load_offline(load(20, 0)).await.unwrap();
    assert_eq!(batch.messages.len(), 1);
    assert_eq!(batch.messages[0].msgid, next);
}

/// 测试：放不进单个离线批次的消息在写入时被拒绝，不会落盘后再丢失
#[tokio::test]
async fn test_oversized_message_is_rejected_at_write() {
    let f = fixture().await;
    let base = OfflineBatch::record_size(&AppMessage::new(APPID, 20, 9, im(IM, 10, 20, "")));
    let largest = "a".repeat(BATCH_BUDGET - base);

    let msgid = f
        .service
        .save_peer(AppMessage::new(APPID, 20, 9, im(IM, 10, 20, &largest)))
        .await
        .unwrap();
    let err = f
        .service
        .save_peer(AppMessage::new(APPID, 20, 9, im(IM, 10, 20, &format!("{largest}a"))))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RecordTooLarge(size) if size == BATCH_BUDGET + 1));

    let batch = f.service.load_offline(load(20, 0)).await.unwrap();
    assert!(!batch.more);
    assert_eq!(batch.messages.len(), 1);
    assert_eq!(batch.messages[0].msgid, msgid);
    assert_eq!(batch.messages[0].msg.body.as_im().unwrap().content.len(), largest.len());
}
