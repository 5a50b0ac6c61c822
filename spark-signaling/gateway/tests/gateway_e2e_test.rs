//! 会话网关端到端测试：真实的存储服务、路由服务与一到两个网关，客户端走 TCP

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use spark_im_core::protocol::command::*;
use spark_im_core::protocol::{
    AuthenticationToken, Body, CommandRegistry, ContactInvite, ContactRequest, GroupCreate,
    ImMessage, MAX_BODY_SIZE, Message, MessageAck, RtMessage, read_message, write_message,
};
use spark_signaling_gateway::application::SessionServices;
use spark_signaling_gateway::config::GatewayConfig;
use spark_signaling_gateway::domain::DeviceRegistry;
use spark_signaling_gateway::infrastructure::MemoryCollaborators;
use spark_signaling_gateway::service::wire::Collaborators;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;

const APPID: i64 = 7;

struct Cluster {
    storage: SocketAddr,
    route: SocketAddr,
    memory: MemoryCollaborators,
    stops: Vec<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl Cluster {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let storage_config = spark_storage_server::config::StorageConfig {
            storage_root: dir.path().to_path_buf(),
            flush_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let storage_context = spark_storage_server::service::wire::build(storage_config)
            .await
            .unwrap();
        let (storage, storage_stop) = listen(|listener, stop| {
            tokio::spawn(spark_storage_server::ApplicationBootstrap::run_with_listener(
                storage_context,
                listener,
                async move {
                    let _ = stop.await;
                },
            ));
        })
        .await;

        let route_context = spark_signaling_route::service::wire::build(Default::default())
            .await
            .unwrap();
        let (route, route_stop) = listen(|listener, stop| {
            tokio::spawn(spark_signaling_route::ApplicationBootstrap::run_with_listener(
                route_context,
                listener,
                async move {
                    let _ = stop.await;
                },
            ));
        })
        .await;

        let memory = MemoryCollaborators::new();
        for (token, uid) in [("alice", 100), ("bob", 200)] {
            memory.tokens.insert(token, APPID, uid).await;
            memory.relations.add_user(uid).await;
        }

        Self {
            storage,
            route,
            memory,
            stops: vec![storage_stop, route_stop],
            _dir: dir,
        }
    }

    async fn start_gateway(&mut self, server_id: &str) -> (SocketAddr, Arc<SessionServices>) {
        let config = GatewayConfig {
            server_id: server_id.to_string(),
            storage_addrs: vec![self.storage.to_string()],
            route_addrs: vec![self.route.to_string()],
            ..GatewayConfig::default()
        };
        let context =
            spark_signaling_gateway::service::wire::build(config, Collaborators::from(&self.memory))
                .unwrap();
        let services = context.services.clone();
        let (addr, stop) = listen(|listener, stop| {
            tokio::spawn(spark_signaling_gateway::ApplicationBootstrap::run_with_listener(
                context,
                listener,
                async move {
                    let _ = stop.await;
                },
            ));
        })
        .await;
        self.stops.push(stop);
        (addr, services)
    }

    fn stop(self) {
        for stop in self.stops {
            let _ = stop.send(());
        }
    }
}

async fn listen<F>(spawn: F) -> (SocketAddr, oneshot::Sender<()>)
where
    F: FnOnce(TcpListener, oneshot::Receiver<()>),
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel();
    spawn(listener, stop_rx);
    (addr, stop_tx)
}

struct TestClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    registry: CommandRegistry,
    seq: u32,
}

impl TestClient {
    /// 连接并认证，断言认证成功
    async fn login(addr: SocketAddr, token: &str, device: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader,
            writer,
            registry: CommandRegistry::standard(),
            seq: 0,
        };
        client
            .send(
                AUTH_TOKEN,
                Body::AuthToken(AuthenticationToken {
                    platform_id: PLATFORM_ANDROID,
                    token: token.to_string(),
                    device_id: device.to_string(),
                }),
            )
            .await;
        let status = client.recv().await;
        assert_eq!(status.cmd, AUTH_STATUS);
        assert!(matches!(status.body, Body::AuthStatus(ref s) if s.status == 0));
        client
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

    async fn send_im(&mut self, sender: i64, receiver: i64, content: &str) -> u32 {
        self.send(
            IM,
            Body::Im(ImMessage {
                sender,
                receiver,
                timestamp: 0,
                msgid: 0,
                content: content.to_string(),
            }),
        )
        .await
    }

    async fn ack(&mut self, seq: u32) {
        self.send(ACK, Body::Ack(MessageAck { seq })).await;
    }

    /// 读帧直到收到指定命令，返回它之前跳过的帧
    async fn recv_cmd(&mut self, cmd: u32) -> (Message, Vec<Message>) {
        let mut skipped = Vec::new();
        loop {
            let msg = self.recv().await;
            if msg.cmd == cmd {
                return (msg, skipped);
            }
            skipped.push(msg);
        }
    }

    /// PING 往返：读循环按顺序处理，PONG 到达说明之前的请求都已处理完
    async fn sync(&mut self) -> Vec<Message> {
        self.send(PING, Body::Empty).await;
        let (_, skipped) = self.recv_cmd(PONG).await;
        skipped
    }
}

fn im_content(msg: &Message) -> &str {
    match &msg.body {
        Body::Im(im) => im.content.as_str(),
        other => panic!("expected IM body, got {other:?}"),
    }
}

/// 测试：离线消息上线后按序下发，确认后重连不再收到积压
#[tokio::test]
async fn test_offline_online_ack_reconnect() {
    let mut cluster = Cluster::start().await;
    let (gateway, services) = cluster.start_gateway("gateway-a").await;

    let mut alice = TestClient::login(gateway, "alice", "alice-phone").await;
    for text in ["one", "two", "three"] {
        let seq = alice.send_im(100, 200, text).await;
        let (ack, _) = alice.recv_cmd(ACK).await;
        assert!(matches!(ack.body, Body::Ack(ref a) if a.seq == seq));
    }

    let mut bob = TestClient::login(gateway, "bob", "bob-phone").await;
    let mut received = Vec::new();
    while received.len() < 3 {
        let msg = bob.recv().await;
        assert_eq!(msg.cmd, IM);
        received.push(im_content(&msg).to_string());
        bob.ack(msg.seq).await;
    }
    assert_eq!(received, ["one", "two", "three"]);
    assert!(bob.sync().await.is_empty());
    drop(bob);

    let mut bob = TestClient::login(gateway, "bob", "bob-phone").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(bob.sync().await.is_empty(), "acked messages must not be redelivered");

    let history = services.storage.load_history(APPID, 200, 10).await.unwrap();
    let contents: Vec<&str> = history.messages.iter().map(|app| im_content(&app.msg)).collect();
    assert_eq!(contents, ["one", "two", "three"]);

    cluster.stop();
}

/// 测试：未确认的消息在重连后重新下发
#[tokio::test]
async fn test_unacked_messages_are_redelivered() {
    let mut cluster = Cluster::start().await;
    let (gateway, _) = cluster.start_gateway("gateway-a").await;

    let mut alice = TestClient::login(gateway, "alice", "alice-phone").await;
    alice.send_im(100, 200, "first").await;
    alice.recv_cmd(ACK).await;
    alice.send_im(100, 200, "second").await;
    alice.recv_cmd(ACK).await;

    let mut bob = TestClient::login(gateway, "bob", "bob-phone").await;
    let first = bob.recv().await;
    assert_eq!(im_content(&first), "first");
    bob.ack(first.seq).await;
    let second = bob.recv().await;
    assert_eq!(im_content(&second), "second");
    bob.sync().await;
    drop(bob);

    let mut bob = TestClient::login(gateway, "bob", "bob-phone").await;
    let again = bob.recv().await;
    assert_eq!(im_content(&again), "second");

    cluster.stop();
}

/// 测试：在线消息实时送达，发送者的其它设备收到副本而发送设备不回显
#[tokio::test]
async fn test_live_delivery_and_self_echo() {
    let mut cluster = Cluster::start().await;
    let (gateway, _) = cluster.start_gateway("gateway-a").await;

    let mut bob = TestClient::login(gateway, "bob", "bob-phone").await;
    let mut tablet = TestClient::login(gateway, "alice", "alice-tablet").await;
    let mut phone = TestClient::login(gateway, "alice", "alice-phone").await;
    bob.sync().await;
    tablet.sync().await;

    let seq = phone.send_im(100, 200, "live").await;
    let (ack, skipped) = phone.recv_cmd(ACK).await;
    assert!(matches!(ack.body, Body::Ack(ref a) if a.seq == seq));
    assert!(skipped.is_empty());

    let delivered = bob.recv().await;
    assert_eq!(im_content(&delivered), "live");
    let copy = tablet.recv().await;
    assert_eq!(im_content(&copy), "live");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(phone.sync().await.is_empty(), "sending device must not receive its own message");

    cluster.stop();
}

/// 测试：不同网关上的用户之间，实时消息经路由服务转发，持久化消息经存储服务发布
#[tokio::test]
async fn test_cross_gateway_delivery() {
    let mut cluster = Cluster::start().await;
    let (gateway_a, _) = cluster.start_gateway("gateway-a").await;
    let (gateway_b, _) = cluster.start_gateway("gateway-b").await;

    let mut alice = TestClient::login(gateway_a, "alice", "alice-phone").await;
    let mut bob = TestClient::login(gateway_b, "bob", "bob-phone").await;
    bob.sync().await;
    // 等待订阅到达路由与存储服务
    tokio::time::sleep(Duration::from_millis(300)).await;

    alice
        .send(
            RT,
            Body::Rt(RtMessage {
                sender: 100,
                receiver: 200,
                content: "ring".to_string(),
            }),
        )
        .await;
    let rt = bob.recv().await;
    assert_eq!(rt.cmd, RT);
    assert!(matches!(rt.body, Body::Rt(ref m) if m.content == "ring" && m.sender == 100));

    alice.send_im(100, 200, "persisted").await;
    alice.recv_cmd(ACK).await;
    let im = bob.recv().await;
    assert_eq!(im_content(&im), "persisted");

    cluster.stop();
}

/// 测试：积压跨多个批次时，全部积压先于登录期间到达的在线消息下发
#[tokio::test]
async fn test_backlog_spanning_batches_precedes_live_messages() {
    const BACKLOG: usize = 6;
    const CONTENT_LEN: usize = 10_000;
    assert!(BACKLOG * CONTENT_LEN > MAX_BODY_SIZE);

    let mut cluster = Cluster::start().await;
    let (gateway, services) = cluster.start_gateway("gateway-a").await;

    let mut alice = TestClient::login(gateway, "alice", "alice-phone").await;
    let backlog: Vec<String> = (0..BACKLOG)
        .map(|i| format!("{i}:{}", "x".repeat(CONTENT_LEN)))
        .collect();
    for content in &backlog {
        alice.send_im(100, 200, content).await;
        alice.recv_cmd(ACK).await;
    }

    let bob_device = cluster
        .memory
        .devices
        .device_id("bob-phone", PLATFORM_ANDROID)
        .await
        .unwrap();
    let first = services
        .storage
        .load_offline(APPID, 200, bob_device, 0)
        .await
        .unwrap();
    assert!(first.more, "backlog must not fit a single batch");
    assert!(first.messages.len() < BACKLOG);

    let mut bob = TestClient::login(gateway, "bob", "bob-phone").await;
    alice.send_im(100, 200, "live").await;
    alice.recv_cmd(ACK).await;

    let mut received = Vec::new();
    loop {
        let msg = bob.recv().await;
        assert_eq!(msg.cmd, IM);
        bob.ack(msg.seq).await;
        let content = im_content(&msg).to_string();
        if content == "live" {
            break;
        }
        received.push(content);
    }
    assert_eq!(received, backlog);

    cluster.stop();
}

/// 测试：超级群消息落群日志，离线成员上线收到并确认后游标推进，重连不再下发
#[tokio::test]
async fn test_super_group_offline_ack_and_reload() {
    let mut cluster = Cluster::start().await;
    let (gateway, services) = cluster.start_gateway("gateway-a").await;

    let mut alice = TestClient::login(gateway, "alice", "alice-phone").await;
    alice
        .send(
            GROUP_CREATE,
            Body::GroupCreate(GroupCreate {
                is_private: false,
                is_allow_invite: true,
                is_super: true,
                title: "super".to_string(),
                description: String::new(),
                members: vec![200],
            }),
        )
        .await;
    let (created, _) = alice.recv_cmd(GROUP_CREATE_RESP).await;
    let gid = match created.body {
        Body::GroupCreateResp(resp) if resp.status == 0 => resp.gid,
        other => panic!("group creation failed: {other:?}"),
    };

    let seq = alice
        .send(
            GROUP_IM,
            Body::Im(ImMessage {
                sender: 100,
                receiver: gid,
                timestamp: 0,
                msgid: 0,
                content: "to everyone".to_string(),
            }),
        )
        .await;
    let (ack, _) = alice.recv_cmd(ACK).await;
    assert!(matches!(ack.body, Body::Ack(ref a) if a.seq == seq));

    let bob_device = cluster
        .memory
        .devices
        .device_id("bob-phone", PLATFORM_ANDROID)
        .await
        .unwrap();
    let pending = services
        .storage
        .load_group_offline(APPID, gid, 200, bob_device, 0)
        .await
        .unwrap();
    assert_eq!(pending.messages.len(), 1);

    // 建群通知在点对点队列，群消息在群积压里
    let mut bob = TestClient::login(gateway, "bob", "bob-phone").await;
    let group_msg = loop {
        let msg = bob.recv().await;
        bob.ack(msg.seq).await;
        if msg.cmd == GROUP_IM {
            break msg;
        }
        assert_eq!(msg.cmd, TRANSMIT_USER);
    };
    assert_eq!(im_content(&group_msg), "to everyone");
    assert!(bob.sync().await.is_empty());

    let after_ack = services
        .storage
        .load_group_offline(APPID, gid, 200, bob_device, 0)
        .await
        .unwrap();
    assert!(after_ack.messages.is_empty(), "group cursor must advance on ack");
    drop(bob);

    let mut bob = TestClient::login(gateway, "bob", "bob-phone").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(bob.sync().await.is_empty(), "acked group messages must not be redelivered");

    cluster.stop();
}

/// 测试：好友申请、接受与删除的成功路径，通知落到对方队列
#[tokio::test]
async fn test_contact_invite_accept_delete() {
    let mut cluster = Cluster::start().await;
    let (gateway, _) = cluster.start_gateway("gateway-a").await;

    let mut alice = TestClient::login(gateway, "alice", "alice-phone").await;
    let mut bob = TestClient::login(gateway, "bob", "bob-phone").await;
    bob.sync().await;

    let contact_status = |msg: &Message| match &msg.body {
        Body::ContactResp(resp) => resp.status,
        other => panic!("expected contact response, got {other:?}"),
    };

    alice
        .send(
            CONTACT_INVITE,
            Body::ContactInvite(ContactInvite {
                sender: 100,
                receiver: 200,
                reason: "hi bob".to_string(),
            }),
        )
        .await;
    let (reply, _) = alice.recv_cmd(CONTACT_INVITE_RESP).await;
    assert_eq!(contact_status(&reply), 0);
    let notice = bob.recv().await;
    assert_eq!(notice.cmd, TRANSMIT_USER);
    assert!(im_content(&notice).contains("hi bob"));
    bob.ack(notice.seq).await;

    let accept = Body::Contact(ContactRequest {
        sender: 200,
        receiver: 100,
    });
    bob.send(CONTACT_ACCEPT, accept.clone()).await;
    let (reply, _) = bob.recv_cmd(CONTACT_ACCEPT_RESP).await;
    assert_eq!(contact_status(&reply), 0);
    bob.send(CONTACT_ACCEPT, accept).await;
    let (reply, _) = bob.recv_cmd(CONTACT_ACCEPT_RESP).await;
    assert_eq!(contact_status(&reply), 2, "already friends");

    let delete = Body::Contact(ContactRequest {
        sender: 100,
        receiver: 200,
    });
    alice.send(CONTACT_DEL, delete.clone()).await;
    let (reply, _) = alice.recv_cmd(CONTACT_DEL_RESP).await;
    assert_eq!(contact_status(&reply), 0);
    alice.send(CONTACT_DEL, delete).await;
    let (reply, _) = alice.recv_cmd(CONTACT_DEL_RESP).await;
    assert_eq!(contact_status(&reply), 2, "no longer friends");

    cluster.stop();
}
