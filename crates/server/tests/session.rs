//! Integration tests driving the server over real websockets.
//!
//! The database pool is lazy, so everything except the full game flow runs
//! against an unreachable DSN; the full flow skips itself when
//! `DATABASE_URL` is not set.

use futures_util::{SinkExt, StreamExt};
use protocol::packets::{Credentials, Msg, Packet};
use server::Hub;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const UNREACHABLE_DSN: &str = "postgres://127.0.0.1:1/sporefall_test";

async fn start_server(hub: Arc<Hub>) -> SocketAddr {
    tokio::spawn(hub.clone().run());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, server::router(hub)).await.expect("serve");
    });
    addr
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket connect");
    ws
}

async fn send(ws: &mut WsClient, packet: Packet) {
    let mut frame = packet.encode().to_vec();
    frame.push(b'\n');
    ws.send(Message::Binary(frame.into())).await.expect("send");
}

/// Read frames until one matches, with a 10s deadline.
async fn recv_until<F: Fn(&Packet) -> bool>(ws: &mut WsClient, pred: F) -> Option<Packet> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => {
                if let Ok(packet) = Packet::decode(data) {
                    if pred(&packet) {
                        return Some(packet);
                    }
                }
            }
            Ok(Some(Ok(_))) => {}
            _ => return None,
        }
    }
}

#[tokio::test]
async fn handshake_assigns_an_id() {
    let addr = start_server(Hub::new(UNREACHABLE_DSN).expect("hub")).await;
    let mut ws = connect(addr).await;

    let packet = recv_until(&mut ws, |p| matches!(p.msg, Msg::Id(_))).await.expect("id packet");
    let Msg::Id(id) = packet.msg else { unreachable!() };
    assert!(id >= 1);
    assert_eq!(packet.sender_id, id);
}

#[tokio::test]
async fn malformed_frames_do_not_kill_the_session() {
    let addr = start_server(Hub::new(UNREACHABLE_DSN).expect("hub")).await;
    let mut ws = connect(addr).await;
    recv_until(&mut ws, |p| matches!(p.msg, Msg::Id(_))).await.expect("id packet");

    // Garbage bytes are logged and skipped server-side.
    ws.send(Message::Binary(vec![0xFF, 0x00, 0x13].into()))
        .await
        .expect("send garbage");

    // The session still answers: a login against the unreachable database
    // comes back as a Deny rather than a dropped connection.
    send(
        &mut ws,
        Packet::new(
            0,
            Msg::LoginRequest(Credentials {
                username: "ghost".into(),
                password: "pw".into(),
            }),
        ),
    )
    .await;
    let reply = recv_until(&mut ws, |p| matches!(p.msg, Msg::Deny(_))).await;
    assert!(reply.is_some(), "expected a Deny after a database failure");
}

#[tokio::test]
async fn full_game_flow_with_database() {
    let Ok(dsn) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping full_game_flow_with_database: DATABASE_URL not set");
        return;
    };

    let hub = Hub::new(&dsn).expect("hub");
    hub.queries().ensure_schema().await.expect("schema");
    let addr = start_server(hub).await;

    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    // Player A registers and spawns.
    let mut ws_a = connect(addr).await;
    let id_packet = recv_until(&mut ws_a, |p| matches!(p.msg, Msg::Id(_))).await.expect("id");
    let Msg::Id(a_id) = id_packet.msg else { unreachable!() };

    send(
        &mut ws_a,
        Packet::new(
            0,
            Msg::RegisterRequest(Credentials {
                username: format!("it_a_{nonce}"),
                password: "secret".into(),
            }),
        ),
    )
    .await;

    let bounds = recv_until(&mut ws_a, |p| matches!(p.msg, Msg::GameBounds(_))).await.expect("bounds");
    let Msg::GameBounds(bounds) = bounds.msg else { unreachable!() };
    assert_eq!(bounds.min_x, -3000.0);
    assert_eq!(bounds.max_x, 3000.0);
    assert_eq!(bounds.min_y, -3000.0);
    assert_eq!(bounds.max_y, 3000.0);

    let spawn = recv_until(&mut ws_a, |p| matches!(&p.msg, Msg::Player(info) if info.id == a_id))
        .await
        .expect("spawn packet");
    let Msg::Player(spawn) = spawn.msg else { unreachable!() };
    assert_eq!(spawn.radius, 20.0);
    assert_eq!(spawn.speed, 150.0);
    assert!(spawn.x.abs() <= 3000.0 && spawn.y.abs() <= 3000.0);

    recv_until(&mut ws_a, |p| matches!(&p.msg, Msg::SporeBatch(batch) if !batch.is_empty()))
        .await
        .expect("initial spores");

    // A direction report starts the position tick. Head away from the
    // nearest vertical wall so the movement is unambiguous.
    let heading_east = spawn.x <= 0.0;
    let direction = if heading_east { 0.0 } else { std::f64::consts::PI };
    send(&mut ws_a, Packet::new(0, Msg::PlayerDirection(direction))).await;

    let moved = recv_until(&mut ws_a, |p| {
        matches!(&p.msg, Msg::Player(info) if info.id == a_id && info.x != spawn.x)
    })
    .await
    .expect("tick update");
    let Msg::Player(moved) = moved.msg else { unreachable!() };
    if heading_east {
        assert!(moved.x > spawn.x);
    } else {
        assert!(moved.x < spawn.x);
    }

    // Player B joins and hears A through the fan-out.
    let mut ws_b = connect(addr).await;
    recv_until(&mut ws_b, |p| matches!(p.msg, Msg::Id(_))).await.expect("b id");
    send(
        &mut ws_b,
        Packet::new(
            0,
            Msg::RegisterRequest(Credentials {
                username: format!("it_b_{nonce}"),
                password: "secret".into(),
            }),
        ),
    )
    .await;
    recv_until(&mut ws_b, |p| matches!(p.msg, Msg::GameBounds(_))).await.expect("b bounds");

    send(&mut ws_a, Packet::new(0, Msg::Chat("hello arena".into()))).await;
    let chat = recv_until(&mut ws_b, |p| matches!(&p.msg, Msg::Chat(text) if text == "hello arena"))
        .await
        .expect("chat fan-out");
    assert_eq!(chat.sender_id, a_id);

    // Closing A's transport broadcasts a Disconnect attributed to A.
    ws_a.close(None).await.expect("close a");
    let disconnect = recv_until(&mut ws_b, |p| matches!(p.msg, Msg::Disconnect(_)))
        .await
        .expect("disconnect fan-out");
    assert_eq!(disconnect.sender_id, a_id);
}
