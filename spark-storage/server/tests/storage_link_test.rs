//! 存储服务链接测试：通过真实 TCP 连接走完注册、订阅、保存、离线与确认

use std::time::Duration;

use spark_im_core::protocol::command::{
    IM, LOAD_OFFLINE, PUBLISH, RESULT, SAVE_AND_ENQUEUE, SERVER_REGISTER_STORAGE, SUBSCRIBE,
    DEQUEUE, status,
};
use spark_im_core::protocol::{
    AppMessage, AppUserId, Body, CommandRegistry, Dequeue, ImMessage, LoadOffline, Message,
    OfflineBatch, ServerRegister, read_message, write_message,
};
use spark_storage_server::ApplicationBootstrap;
use spark_storage_server::config::StorageConfig;
use spark_storage_server::service::wire;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;

struct Client {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    registry: CommandRegistry,
    seq: u32,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer,
            registry: CommandRegistry::standard(),
            seq: 0,
        }
    }

    async fn send(&mut self, cmd: u32, body: Body) -> u32 {
        self.seq += 1;
        let mut msg = Message::new(cmd, body);
        msg.seq = self.seq;
        write_message(&mut self.writer, &msg).await.unwrap();
        self.seq
    }

    async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), read_message(&mut self.reader, &self.registry))
            .await
            .expect("timed out waiting for frame")
            .unwrap()
    }

    /// 读到对应请求的 RESULT 为止，中间的 PUBLISH 一并返回
    async fn result_for(&mut self, req_seq: u32) -> (spark_im_core::protocol::RpcResult, Vec<Message>) {
        let mut others = Vec::new();
        loop {
            let msg = self.recv().await;
            match msg.body {
                Body::Result(result) if msg.cmd == RESULT && result.req_seq == req_seq => {
                    return (result, others);
                }
                _ => others.push(msg),
            }
        }
    }
}

fn im(sender: i64, receiver: i64, content: &str) -> Message {
    Message::new(
        IM,
        Body::Im(ImMessage {
            sender,
            receiver,
            timestamp: 1,
            msgid: 0,
            content: content.to_string(),
        }),
    )
}

/// 测试：注册前的帧被丢弃；注册后保存、发布、离线加载与确认完整可用
#[tokio::test]
async fn test_storage_link_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        storage_root: dir.path().to_path_buf(),
        flush_interval: Duration::from_millis(50),
        ..StorageConfig::default()
    };
    let context = wire::build(config).await.unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(ApplicationBootstrap::run_with_listener(
        context,
        listener,
        async move {
            let _ = stop_rx.await;
        },
    ));

    let mut client = Client::connect(addr).await;

    // 未注册时的保存请求不会被处理
    let dropped = client
        .send(
            SAVE_AND_ENQUEUE,
            Body::App(Box::new(AppMessage::new(1, 20, 5, im(10, 20, "dropped")))),
        )
        .await;

    client
        .send(
            SERVER_REGISTER_STORAGE,
            Body::ServerRegister(ServerRegister {
                server_id: "gateway-test".to_string(),
            }),
        )
        .await;
    client
        .send(SUBSCRIBE, Body::AppUser(AppUserId { appid: 1, uid: 20 }))
        .await;

    let req = client
        .send(
            SAVE_AND_ENQUEUE,
            Body::App(Box::new(AppMessage::new(1, 20, 5, im(10, 20, "hello")))),
        )
        .await;
    let (result, others) = client.result_for(req).await;
    assert_eq!(result.status, status::OK);
    let msgid = result.content_i64().unwrap();

    // 发布可能先于或晚于 RESULT 到达
    let publish = match others.into_iter().find(|m| m.cmd == PUBLISH) {
        Some(msg) => msg,
        None => client.recv().await,
    };
    assert_eq!(publish.cmd, PUBLISH);
    match &publish.body {
        Body::App(app) => assert_eq!(app.msgid, msgid),
        other => panic!("unexpected body {other:?}"),
    }

    let load = LoadOffline {
        appid: 1,
        uid: 20,
        device_id: 8,
        after_msgid: 0,
    };
    let req = client.send(LOAD_OFFLINE, Body::LoadOffline(load.clone())).await;
    let (result, _) = client.result_for(req).await;
    let registry = CommandRegistry::standard();
    let batch = OfflineBatch::decode(&result.content, &registry).unwrap();
    assert_eq!(batch.messages.len(), 1, "frame sent before register must be dropped");
    assert_eq!(batch.messages[0].msgid, msgid);
    assert_ne!(dropped, req);

    let req = client
        .send(
            DEQUEUE,
            Body::Dequeue(Dequeue {
                appid: 1,
                receiver: 20,
                device_id: 8,
                msgid,
            }),
        )
        .await;
    let (result, _) = client.result_for(req).await;
    assert_eq!(result.status, status::OK);

    let req = client.send(LOAD_OFFLINE, Body::LoadOffline(load)).await;
    let (result, _) = client.result_for(req).await;
    let batch = OfflineBatch::decode(&result.content, &registry).unwrap();
    assert!(batch.messages.is_empty());

    let _ = stop_tx.send(());
    server.await.unwrap().unwrap();
    assert!(dir.path().join("received.json").exists());
}
