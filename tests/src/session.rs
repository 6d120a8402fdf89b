use crate::support::{collect_events, init_logging, wait_for};
use msnp_core::{Event, OutgoingMessage, SdkError, Session};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::test]
async fn replies_and_payloads_are_dispatched() {
    init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0; 1024];
        let received = socket.read(&mut buf).await.unwrap();
        assert!(buf[..received].starts_with(b"VER 1 MSNP11 CVR0\r\n"));

        socket.write_all(b"VER 1 MSNP11\r\n").await.unwrap();
        socket
            .write_all(b"MSG Hotmail Hotmail 10\r\nabcdefghij")
            .await
            .unwrap();

        while socket.read(&mut buf).await.is_ok_and(|received| received > 0) {}
    });

    let session = Session::connect("127.0.0.1", &port.to_string(), "alice@example.com")
        .await
        .unwrap();

    let rx = collect_events(&session);

    let tr_id = session
        .send(OutgoingMessage::with_params("VER", &["MSNP11", "CVR0"]))
        .await
        .unwrap();

    assert_eq!(tr_id, 1);

    wait_for(&rx, |event| {
        matches!(event, Event::MessageSent(message) if message.command == "VER")
    })
    .await;

    let reply = wait_for(&rx, |event| {
        matches!(event, Event::MessageReceived(message) if message.command == "VER")
    })
    .await;

    if let Event::MessageReceived(message) = reply {
        assert_eq!(message.tr_id, Some(1));
        assert_eq!(message.params, vec!["MSNP11"]);
    }

    let payload = wait_for(&rx, |event| {
        matches!(event, Event::MessageReceived(message) if message.command == "MSG")
    })
    .await;

    if let Event::MessageReceived(message) = payload {
        assert_eq!(message.params, vec!["Hotmail", "Hotmail"]);
        assert_eq!(message.chunk.as_deref(), Some(b"abcdefghij".as_slice()));
    }

    let ping = session
        .send(OutgoingMessage::without_tr_id("PNG", &[]))
        .await
        .unwrap();
    assert_eq!(ping, 0);

    let sent = wait_for(&rx, |event| {
        matches!(event, Event::MessageSent(message) if message.command == "PNG")
    })
    .await;

    if let Event::MessageSent(message) = sent {
        assert_eq!(message.tr_id, None);
    }

    session.close().await;
}

#[tokio::test]
async fn server_errors_carry_the_failed_request() {
    init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0; 1024];
        let received = socket.read(&mut buf).await.unwrap();

        let line = String::from_utf8_lossy(&buf[..received]).into_owned();
        let tr_id = line.split_whitespace().nth(1).unwrap().to_string();
        socket
            .write_all(format!("201 {tr_id}\r\n").as_bytes())
            .await
            .unwrap();
    });

    let session = Session::connect("127.0.0.1", &port.to_string(), "alice@example.com")
        .await
        .unwrap();

    let rx = collect_events(&session);

    session
        .send(OutgoingMessage::with_params("ADC", &["FL", "N=bob"]))
        .await
        .unwrap();

    let error = wait_for(&rx, |event| matches!(event, Event::ServerError { .. })).await;
    if let Event::ServerError { code, request } = error {
        assert_eq!(code, 201);
        assert_eq!(request.command, "ADC");
        assert_eq!(request.params, vec!["FL", "N=bob"]);
    }

    session.close().await;
}

#[tokio::test]
async fn blocking_sends_are_kept_in_the_chain() {
    init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0; 1024];
        let received = socket.read(&mut buf).await.unwrap();

        let line = String::from_utf8_lossy(&buf[..received]).into_owned();
        let tr_id = line.split_whitespace().nth(1).unwrap().to_string();
        socket
            .write_all(format!("CHG {tr_id} NLN\r\n").as_bytes())
            .await
            .unwrap();
    });

    let session = Session::connect("127.0.0.1", &port.to_string(), "alice@example.com")
        .await
        .unwrap();

    let rx = collect_events(&session);

    let tr_id = session
        .send_blocking(OutgoingMessage::with_params("CHG", &["NLN"]))
        .await
        .unwrap();

    let request = session.sent_request(tr_id).unwrap();
    assert_eq!(request.command, "CHG");
    assert_eq!(request.tr_id, Some(tr_id));

    wait_for(&rx, |event| {
        matches!(event, Event::MessageReceived(message) if message.command == "CHG")
    })
    .await;

    assert!(
        session
            .received_message(|message| message.command == "CHG")
            .is_some()
    );

    session.close().await;
}

#[tokio::test]
async fn closing_is_idempotent() {
    init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0; 1024];
        while socket.read(&mut buf).await.is_ok_and(|received| received > 0) {}
    });

    let session = Session::connect("127.0.0.1", &port.to_string(), "alice@example.com")
        .await
        .unwrap();

    let rx = collect_events(&session);

    session.close().await;
    session.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let closed = rx
        .try_iter()
        .filter(|event| *event == Event::Closed)
        .count();

    assert_eq!(closed, 1);

    let result = session.send(OutgoingMessage::new("PNG")).await;
    assert!(matches!(result, Err(SdkError::SessionClosed)));
}

#[tokio::test]
async fn losing_the_connection_closes_the_session() {
    init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);
    });

    let session = Session::connect("127.0.0.1", &port.to_string(), "alice@example.com")
        .await
        .unwrap();

    let rx = collect_events(&session);
    wait_for(&rx, |event| *event == Event::Established).await;
    wait_for(&rx, |event| matches!(event, Event::TransportError(_))).await;
    wait_for(&rx, |event| *event == Event::Closed).await;

    let result = session.send(OutgoingMessage::new("PNG")).await;
    assert!(matches!(result, Err(SdkError::SessionClosed)));
}

#[tokio::test]
async fn session_timeout_fires_once_armed() {
    init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0; 1024];
        while socket.read(&mut buf).await.is_ok_and(|received| received > 0) {}
    });

    let session = Session::connect("127.0.0.1", &port.to_string(), "alice@example.com")
        .await
        .unwrap();

    let rx = collect_events(&session);

    session.set_session_timeout(Duration::from_millis(50));
    wait_for(&rx, |event| *event == Event::SessionTimeout).await;

    session.set_session_timeout(Duration::from_secs(60));
    session.clear_session_timeout();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!rx.try_iter().any(|event| event == Event::SessionTimeout));

    session.close().await;
}
