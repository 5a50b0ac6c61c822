use std::sync::Arc;

use spark_im_core::metrics::GatewayMetrics;
use spark_im_core::protocol::command::*;
use spark_im_core::protocol::{
    AuthenticationToken, Body, CommandRegistry, ContactInvite, ContactRequest, GroupCreate,
    GroupInvite, GroupRemove, GroupRequest, ImMessage, Message, RoomId, RtMessage,
};

use super::group::generate_gid;
use super::*;
use crate::application::dispatcher::PublishDispatcher;
use crate::domain::{GROUP_CAPACITY, Group, GroupKind};
use crate::infrastructure::MemoryCollaborators;

struct Harness {
    services: Arc<SessionServices>,
    collaborators: MemoryCollaborators,
}

/// 存储地址无人监听：订阅在通道队列中排队，不影响不落库的命令
fn harness() -> Harness {
    let collaborators = MemoryCollaborators::new();
    let registry = Arc::new(CommandRegistry::standard());
    let presence = Arc::new(Presence::new());
    let groups = Arc::new(GroupManager::new(collaborators.relations.clone()));
    let users = Arc::new(UserManager::new(collaborators.relations.clone()));
    let metrics = Arc::new(GatewayMetrics::new());
    let dispatcher = Arc::new(PublishDispatcher::new(presence.clone(), groups.clone()));
    let storage = StorageClient::start(
        &["127.0.0.1:9".to_string()],
        "gateway-test",
        registry.clone(),
        dispatcher.clone(),
        metrics.clone(),
    )
    .unwrap();
    let route = RouteClient::start(&[], "gateway-test", registry.clone(), dispatcher);

    let services = Arc::new(SessionServices {
        server_id: "gateway-test".to_string(),
        registry,
        presence,
        storage: Arc::new(storage),
        route: Arc::new(route),
        users,
        groups,
        tokens: collaborators.tokens.clone(),
        devices: collaborators.devices.clone(),
        login_points: collaborators.login_points.clone(),
        metrics,
        live_queue_depth: 16,
    });
    Harness {
        services,
        collaborators,
    }
}

fn auth_frame(token: &str) -> Message {
    Message::new(
        AUTH_TOKEN,
        Body::AuthToken(AuthenticationToken {
            platform_id: PLATFORM_WEB,
            token: token.to_string(),
            device_id: String::new(),
        }),
    )
}

fn next_frame(queues: &mut SessionQueues) -> Message {
    match queues.wt.try_recv() {
        Ok(Some(msg)) => msg,
        other => panic!("expected a control frame, got {other:?}"),
    }
}

async fn authenticated(harness: &Harness, token: &str, uid: i64) -> (Session, SessionQueues) {
    harness.collaborators.tokens.insert(token, 1, uid).await;
    let (mut session, mut queues) = Session::new(
        harness.services.clone(),
        Some("10.0.0.1:5000".parse().unwrap()),
    );
    session.handle(auth_frame(token)).await;
    let status = next_frame(&mut queues);
    assert_eq!(status.body, Body::AuthStatus(spark_im_core::protocol::AuthenticationStatus {
        status: 0,
        ip: 0x0a00_0001,
    }));
    (session, queues)
}

/// 测试：认证前只响应 PING，其它命令被丢弃
#[tokio::test]
async fn test_unauthenticated_session() {
    let harness = harness();
    let (mut session, mut queues) = Session::new(harness.services.clone(), None);

    session.handle(Message::new(PING, Body::Empty)).await;
    assert_eq!(next_frame(&mut queues).cmd, PONG);

    session
        .handle(Message::new(
            IM,
            Body::Im(ImMessage {
                sender: 1,
                receiver: 2,
                timestamp: 0,
                msgid: 0,
                content: "hi".to_string(),
            }),
        ))
        .await;
    assert!(queues.wt.try_recv().is_err());
    assert!(!session.is_authenticated());
}

/// 测试：无效令牌返回状态 1
#[tokio::test]
async fn test_auth_with_unknown_token() {
    let harness = harness();
    let (mut session, mut queues) = Session::new(harness.services.clone(), None);

    session.handle(auth_frame("missing").with_version(2)).await;
    let reply = next_frame(&mut queues);
    assert_eq!(reply.cmd, AUTH_STATUS);
    assert!(matches!(reply.body, Body::AuthStatus(ref s) if s.status == 1));
    assert_eq!(session.shared().version(), 2);
    assert!(!session.is_authenticated());
}

/// 测试：认证成功登记在线目录与登录点，断开后全部清理
#[tokio::test]
async fn test_auth_and_disconnect_lifecycle() {
    let harness = harness();
    let (mut session, mut queues) = authenticated(&harness, "token-100", 100).await;

    assert!(session.is_authenticated());
    assert!(harness.services.presence.is_online(1, 100).await);
    let points = harness.collaborators.login_points.points().await;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].server_id, "gateway-test");
    // Web 端没有设备号，积压队列直接关闭
    assert!(queues.owt.recv().await.is_none());

    // 重复认证被忽略
    session.handle(auth_frame("token-100")).await;
    assert!(queues.wt.try_recv().is_err());

    session.disconnect().await;
    assert!(!harness.services.presence.is_online(1, 100).await);
    assert!(harness.collaborators.login_points.points().await.is_empty());
    assert!(matches!(queues.wt.try_recv(), Ok(None)));
}

/// 测试：房间消息投递给同房间的其它本机会话
#[tokio::test]
async fn test_room_message_fanout() {
    let harness = harness();
    let (mut alice, mut alice_queues) = authenticated(&harness, "alice", 100).await;
    let (mut bob, mut bob_queues) = authenticated(&harness, "bob", 200).await;

    for session in [&mut alice, &mut bob] {
        session
            .handle(Message::new(ENTER_ROOM, Body::Room(RoomId(5))))
            .await;
    }

    let mut room_im = Message::new(
        ROOM_IM,
        Body::Rt(RtMessage {
            sender: 100,
            receiver: 5,
            content: "hello room".to_string(),
        }),
    );
    room_im.seq = 9;
    alice.handle(room_im).await;

    let delivered = next_frame(&mut bob_queues);
    assert_eq!(delivered.cmd, ROOM_IM);
    let ack = next_frame(&mut alice_queues);
    assert!(matches!(ack.body, Body::Ack(ref a) if a.seq == 9));
    assert!(alice_queues.wt.try_recv().is_err());

    // 离开后不再接收
    bob.handle(Message::new(LEAVE_ROOM, Body::Room(RoomId(5))))
        .await;
    assert!(harness.services.presence.room_clients(1, 5).await.len() == 1);
}

/// 测试：被接收方拉黑的消息回 ACK 后丢弃
#[tokio::test]
async fn test_blacklisted_message_is_acked_and_dropped() {
    let harness = harness();
    let (mut alice, mut alice_queues) = authenticated(&harness, "alice", 100).await;
    let (mut bob, mut bob_queues) = authenticated(&harness, "bob", 200).await;

    bob.handle(Message::new(
        CONTACT_BLACK,
        Body::Contact(ContactRequest {
            sender: 200,
            receiver: 100,
        }),
    ))
    .await;
    let reply = next_frame(&mut bob_queues);
    assert_eq!(reply.cmd, CONTACT_BLACK_RESP);
    assert!(matches!(reply.body, Body::ContactResp(ref r) if r.status == 0));

    let mut im = Message::new(
        IM,
        Body::Im(ImMessage {
            sender: 100,
            receiver: 200,
            timestamp: 0,
            msgid: 0,
            content: "blocked".to_string(),
        }),
    );
    im.seq = 3;
    alice.handle(im).await;
    let ack = next_frame(&mut alice_queues);
    assert!(matches!(ack.body, Body::Ack(ref a) if a.seq == 3));
}

/// 测试：拉黑自己返回状态 1
#[tokio::test]
async fn test_contact_black_self() {
    let harness = harness();
    let (mut alice, mut queues) = authenticated(&harness, "alice", 100).await;
    alice
        .handle(Message::new(
            CONTACT_BLACK,
            Body::Contact(ContactRequest {
                sender: 100,
                receiver: 100,
            }),
        ))
        .await;
    assert!(matches!(next_frame(&mut queues).body, Body::ContactResp(ref r) if r.status == 1));
}

/// 测试：建群超过容量返回状态 1，不产生任何群
#[tokio::test]
async fn test_group_create_over_capacity() {
    let harness = harness();
    let (mut alice, mut queues) = authenticated(&harness, "alice", 100).await;
    alice
        .handle(Message::new(
            GROUP_CREATE,
            Body::GroupCreate(GroupCreate {
                is_private: false,
                is_allow_invite: true,
                is_super: false,
                title: "big".to_string(),
                description: String::new(),
                members: (1000..1500).collect(),
            }),
        ))
        .await;
    let reply = next_frame(&mut queues);
    assert_eq!(reply.cmd, GROUP_CREATE_RESP);
    assert!(matches!(reply.body, Body::GroupCreateResp(ref r) if r.status == 1 && r.gid == 0));
    assert_eq!(harness.services.groups.group_count().await, 0);
}

/// 测试：主动入群的校验顺序
#[tokio::test]
async fn test_group_self_join_statuses() {
    let harness = harness();
    let (mut alice, mut queues) = authenticated(&harness, "alice", 100).await;
    harness
        .services
        .groups
        .create_group(Group {
            gid: 42,
            appid: 1,
            owner: 300,
            title: String::new(),
            description: String::new(),
            is_private: true,
            is_allow_invite: false,
            kind: GroupKind::Normal,
            members: Arc::new([300].into_iter().collect()),
        })
        .await
        .unwrap();

    for (gid, expected) in [(41, 1), (42, 3)] {
        alice
            .handle(Message::new(GROUP_SELF_JOIN, Body::Group(GroupRequest { gid })))
            .await;
        let reply = next_frame(&mut queues);
        assert_eq!(reply.cmd, GROUP_SELF_JOIN_RESP);
        assert!(matches!(reply.body, Body::Status(ref s) if s.status == expected));
    }
}

fn contact(cmd: u32, receiver: i64) -> Message {
    Message::new(
        cmd,
        Body::Contact(ContactRequest {
            sender: 100,
            receiver,
        }),
    )
}

fn contact_status(queues: &mut SessionQueues, cmd: u32) -> i32 {
    let reply = next_frame(queues);
    assert_eq!(reply.cmd, cmd);
    match reply.body {
        Body::ContactResp(resp) => resp.status,
        other => panic!("expected contact response, got {other:?}"),
    }
}

fn group_status(queues: &mut SessionQueues, cmd: u32) -> i32 {
    let reply = next_frame(queues);
    assert_eq!(reply.cmd, cmd);
    match reply.body {
        Body::Status(resp) => resp.status,
        other => panic!("expected status response, got {other:?}"),
    }
}

fn normal_group(gid: i64, appid: i64, owner: i64, members: impl IntoIterator<Item = i64>) -> Group {
    Group {
        gid,
        appid,
        owner,
        title: String::new(),
        description: String::new(),
        is_private: false,
        is_allow_invite: true,
        kind: GroupKind::Normal,
        members: Arc::new(members.into_iter().collect()),
    }
}

/// 测试：好友申请的失败状态按校验顺序返回
#[tokio::test]
async fn test_contact_invite_statuses() {
    let harness = harness();
    let (mut alice, mut queues) = authenticated(&harness, "alice", 100).await;
    let users = harness.services.users.clone();
    harness.collaborators.relations.add_user(200).await;
    harness.collaborators.relations.add_user(300).await;
    users.add_friend(100, 200).await.unwrap();
    users.add_black(300, 100).await.unwrap();

    for (receiver, expected) in [(100, 1), (200, 2), (300, 3), (999, 4)] {
        alice
            .handle(Message::new(
                CONTACT_INVITE,
                Body::ContactInvite(ContactInvite {
                    sender: 100,
                    receiver,
                    reason: "hello".to_string(),
                }),
            ))
            .await;
        assert_eq!(contact_status(&mut queues, CONTACT_INVITE_RESP), expected, "receiver {receiver}");
    }
    assert!(!users.is_friend(100, 300).await);
}

/// 测试：接受与删除好友的失败状态，失败时关系不变
#[tokio::test]
async fn test_contact_accept_and_del_statuses() {
    let harness = harness();
    let (mut alice, mut queues) = authenticated(&harness, "alice", 100).await;
    let users = harness.services.users.clone();
    harness.collaborators.relations.add_user(200).await;
    users.add_friend(100, 200).await.unwrap();

    for (receiver, expected) in [(100, 1), (200, 2), (999, 4)] {
        alice.handle(contact(CONTACT_ACCEPT, receiver)).await;
        assert_eq!(contact_status(&mut queues, CONTACT_ACCEPT_RESP), expected, "receiver {receiver}");
    }
    for (receiver, expected) in [(100, 1), (300, 2)] {
        alice.handle(contact(CONTACT_DEL, receiver)).await;
        assert_eq!(contact_status(&mut queues, CONTACT_DEL_RESP), expected, "receiver {receiver}");
    }
    assert!(users.is_friend(100, 200).await);
}

/// 测试：邀请入群超过容量返回状态 4，成员不变
#[tokio::test]
async fn test_group_invite_join_over_capacity() {
    let harness = harness();
    let (mut alice, mut queues) = authenticated(&harness, "alice", 100).await;
    let members = std::iter::once(100).chain(1..=GROUP_CAPACITY as i64 - 2);
    harness
        .services
        .groups
        .create_group(normal_group(77, 1, 100, members))
        .await
        .unwrap();

    alice
        .handle(Message::new(
            GROUP_INVITE_JOIN,
            Body::GroupInvite(GroupInvite {
                gid: 77,
                members: vec![5000, 5001],
            }),
        ))
        .await;
    assert_eq!(group_status(&mut queues, GROUP_INVITE_JOIN_RESP), 4);

    let group = harness.services.groups.find_group(77).await.unwrap();
    assert_eq!(group.member_count(), GROUP_CAPACITY - 1);
    assert!(!group.is_member(5000));
}

/// 测试：其他应用的群对本会话不可见，所有群命令返回群不存在
#[tokio::test]
async fn test_group_of_other_app_is_not_found() {
    let harness = harness();
    let (mut alice, mut queues) = authenticated(&harness, "alice", 100).await;
    harness
        .services
        .groups
        .create_group(normal_group(88, 2, 100, [100, 300]))
        .await
        .unwrap();

    let requests = [
        (GROUP_SELF_JOIN, Body::Group(GroupRequest { gid: 88 }), GROUP_SELF_JOIN_RESP),
        (
            GROUP_INVITE_JOIN,
            Body::GroupInvite(GroupInvite {
                gid: 88,
                members: vec![400],
            }),
            GROUP_INVITE_JOIN_RESP,
        ),
        (GROUP_REMOVE, Body::GroupRemove(GroupRemove { gid: 88, uid: 300 }), GROUP_REMOVE_RESP),
        (GROUP_QUIT, Body::Group(GroupRequest { gid: 88 }), GROUP_QUIT_RESP),
        (GROUP_DEL, Body::Group(GroupRequest { gid: 88 }), GROUP_DEL_RESP),
    ];
    for (cmd, body, resp) in requests {
        alice.handle(Message::new(cmd, body)).await;
        assert_eq!(group_status(&mut queues, resp), 1, "cmd {cmd}");
    }

    // 群消息不落库也不回 ACK
    let mut im = Message::new(
        GROUP_IM,
        Body::Im(ImMessage {
            sender: 100,
            receiver: 88,
            timestamp: 0,
            msgid: 0,
            content: "cross app".to_string(),
        }),
    );
    im.seq = 4;
    alice.handle(im).await;
    assert!(queues.wt.try_recv().is_err());

    let group = harness.services.groups.find_group(88).await.unwrap();
    assert!(group.is_member(300));
    assert_eq!(group.member_count(), 2);
}

/// 测试：群号为正数且低 6 位是 uid
#[test]
fn test_generate_gid() {
    let gid = generate_gid(1_234_567);
    assert!(gid > 0);
    assert_eq!(gid % 1_000_000, 234_567);
}
