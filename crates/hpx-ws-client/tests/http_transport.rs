use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use http::{
    HeaderMap, StatusCode,
    header::{
        AUTHORIZATION, CONNECTION, COOKIE, HOST, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION,
        SET_COOKIE, UPGRADE,
    },
};
use http_body_util::Empty;
use hpx_ws_client::{
    ConnectOptions, HandshakeError, HttpTransport, InboundMessage, Message, Principal, TransportError,
    UpgradeTransport,
    auth::BasicAuth,
    connect, connect_url,
    cookie::{CookieStore, Jar},
    formatter::{FrameFormatter, MessageFormatter},
    frame::{CloseCode, Decoder, OpCode, Role},
    handshake::{HandshakeKey, expected_accept, upgrade_request},
};
use hyper::{
    Request, Response,
    body::Incoming,
    server::conn::http1,
    service::service_fn,
    upgrade::Upgraded,
};
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::mpsc,
    time::timeout,
};
use tokio_util::codec::Decoder as _;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum Mode {
    Echo,
    Reject,
    WrongAccept,
}

struct ServerState {
    mode: Mode,
    seen: Mutex<Vec<(String, HeaderMap)>>,
}

async fn start_test_server(mode: Mode) -> std::io::Result<(SocketAddr, Arc<ServerState>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = Arc::new(ServerState {
        mode,
        seen: Mutex::new(Vec::new()),
    });

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };

            let state = Arc::clone(&server_state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let conn_fut = http1::Builder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req| server_upgrade(req, Arc::clone(&state))),
                    )
                    .with_upgrades();
                let _ = conn_fut.await;
            });
        }
    });

    Ok((addr, state))
}

async fn server_upgrade(
    mut req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Empty<Bytes>>, Infallible> {
    state
        .seen
        .lock()
        .unwrap()
        .push((req.uri().to_string(), req.headers().clone()));

    if let Mode::Reject = state.mode {
        let response = Response::builder()
            .status(StatusCode::FORBIDDEN)
            .body(Empty::new())
            .unwrap();
        return Ok(response);
    }

    let key = req.headers()[SEC_WEBSOCKET_KEY].to_str().unwrap().to_string();
    let accept = match state.mode {
        Mode::WrongAccept => "bm9wZQ==".to_string(),
        _ => expected_accept(&key),
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        if let Ok(upgraded) = on_upgrade.await {
            serve_websocket(upgraded).await;
        }
    });

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "Upgrade")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .header(SET_COOKIE, "session=abc; Path=/")
        .body(Empty::new())
        .unwrap();
    Ok(response)
}

fn server_frame(message: &Message) -> BytesMut {
    let mut buf = BytesMut::new();
    FrameFormatter::server().format(message, &mut buf).unwrap();
    buf
}

/// Greets the client, then echoes data messages until the client closes.
async fn serve_websocket(upgraded: Upgraded) {
    let mut io = TokioIo::new(upgraded);
    if io.write_all(&server_frame(&Message::text("welcome"))).await.is_err() {
        return;
    }

    let mut decoder = Decoder::new(Role::Server, usize::MAX);
    let mut buf = BytesMut::new();
    loop {
        match decoder.decode(&mut buf) {
            Ok(Some(frame)) => {
                let reply = match frame.opcode() {
                    OpCode::Text | OpCode::Binary => Message::binary(frame.into_payload()),
                    OpCode::Close => Message::close(CloseCode::Normal, "done"),
                    _ => continue,
                };
                let closing = reply.opcode() == OpCode::Close;
                if io.write_all(&server_frame(&reply)).await.is_err() || closing {
                    return;
                }
            }
            Ok(None) => match io.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            Err(_) => return,
        }
    }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<InboundMessage>) -> InboundMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("dispatcher dropped")
}

#[tokio::test]
async fn connect_url_round_trip() {
    let (addr, state) = start_test_server(Mode::Echo).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let connection = timeout(WAIT, connect_url(&format!("ws://{addr}/echo?room=1"), Arc::new(tx)))
        .await
        .unwrap()
        .unwrap();
    connection.start().unwrap();

    let welcome = recv(&mut rx).await;
    assert_eq!(welcome.as_text().unwrap(), "welcome");

    connection.send(&Message::text("hello")).await.unwrap();
    let echo = recv(&mut rx).await;
    assert_eq!(&echo.payload()[..], b"hello");

    connection
        .send(&Message::close(CloseCode::Normal, ""))
        .await
        .unwrap();
    let close = recv(&mut rx).await;
    assert!(close.is_closed());
    assert_eq!(close.close_reason(), Some("done"));

    connection.close().await;
    assert!(connection.is_closed());

    let seen = state.seen.lock().unwrap();
    let (uri, headers) = &seen[0];
    assert_eq!(uri, "/echo?room=1");
    assert_eq!(headers[HOST], format!("127.0.0.1:{}", addr.port()).as_str());
    assert_eq!(headers[UPGRADE], "websocket");
    assert_eq!(headers[SEC_WEBSOCKET_VERSION], "13");
}

#[tokio::test]
async fn rejected_upgrade_reports_the_status() {
    let (addr, _state) = start_test_server(Mode::Reject).await.unwrap();
    let (tx, _rx) = mpsc::unbounded_channel::<InboundMessage>();

    let err = connect_url(&format!("ws://{addr}/"), Arc::new(tx))
        .await
        .unwrap_err();
    match err {
        HandshakeError::UnexpectedStatus { code, message } => {
            assert_eq!(code, 403);
            assert_eq!(message, "Forbidden");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn wrong_accept_is_rejected() {
    let (addr, _state) = start_test_server(Mode::WrongAccept).await.unwrap();
    let (tx, _rx) = mpsc::unbounded_channel::<InboundMessage>();

    let err = connect_url(&format!("ws://{addr}/"), Arc::new(tx))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::AcceptMismatch { ref actual, .. } if actual == "bm9wZQ=="
    ));
}

#[tokio::test]
async fn unretained_exchange_keeps_no_socket() {
    let (addr, _state) = start_test_server(Mode::Echo).await.unwrap();
    let mut transport = HttpTransport::new();

    let key = HandshakeKey::generate();
    let options = ConnectOptions::new("127.0.0.1").port(addr.port());
    let request = upgrade_request(&options, addr.port(), &key).unwrap();

    let response = transport.execute(request, None, false, false).await.unwrap();
    assert_eq!(response.status, StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(
        response.headers[SEC_WEBSOCKET_ACCEPT],
        key.expected_accept().as_str()
    );
    assert!(transport.take_open_sockets().await.is_empty());
    transport.close().await.unwrap();
}

#[tokio::test]
async fn credentials_and_cookies_are_sent() {
    let (addr, state) = start_test_server(Mode::Echo).await.unwrap();
    let jar = Arc::new(Jar::new());

    for _ in 0..2 {
        let transport = HttpTransport::builder()
            .authenticator(BasicAuth)
            .cookie_store(jar.clone())
            .build()
            .unwrap();
        let options = ConnectOptions::new("127.0.0.1")
            .port(addr.port())
            .principal(Principal::new("alice").with_password("secret"));
        let (tx, _rx) = mpsc::unbounded_channel::<InboundMessage>();

        let connection = connect(transport, options, Arc::new(tx)).await.unwrap();
        connection.close().await;
    }

    let seen = state.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1[AUTHORIZATION], "Basic YWxpY2U6c2VjcmV0");
    assert!(!seen[0].1.contains_key(COOKIE));
    assert_eq!(seen[1].1[COOKIE], "session=abc");

    let origin = format!("http://127.0.0.1:{}/", addr.port()).parse().unwrap();
    assert!(jar.cookies(&origin).is_some());
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, _rx) = mpsc::unbounded_channel::<InboundMessage>();
    let err = connect_url(&format!("ws://{addr}/"), Arc::new(tx))
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Transport(TransportError::Io(_))));
}
