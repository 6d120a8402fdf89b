use crate::support::{collect_events, init_logging, relay_pair, wait_for};
use msnp_core::{Event, TransferResult};

#[tokio::test]
async fn file_transfer_completes_between_two_sessions() {
    init_logging();

    let (alice, bob) = relay_pair("alice@example.com", "bob@example.com").await;
    let alice_events = collect_events(&alice);
    let bob_events = collect_events(&bob);

    let content: Vec<u8> = (0..3000u32).map(|i| (i % 253) as u8).collect();
    let source = std::env::temp_dir().join("msnp-core-transfer-source.bin");
    let destination = std::env::temp_dir().join("msnp-core-transfer-destination.bin");
    std::fs::write(&source, &content).unwrap();
    let _ = std::fs::remove_file(&destination);

    let session_id = alice
        .send_file("bob@example.com", &source)
        .await
        .unwrap();

    let request = wait_for(&bob_events, |event| {
        matches!(event, Event::FileTransferRequest { .. })
    })
    .await;

    if let Event::FileTransferRequest {
        session_id: incoming_id,
        email,
        file_name,
        file_size,
    } = request
    {
        assert_eq!(incoming_id, session_id);
        assert_eq!(email, "alice@example.com");
        assert_eq!(file_name, "msnp-core-transfer-source.bin");
        assert_eq!(file_size, 3000);
    }

    bob.accept_file_transfer(session_id, &destination)
        .await
        .unwrap();

    wait_for(&alice_events, |event| {
        matches!(event, Event::FileTransferStarted { .. })
    })
    .await;

    let sender_finish = wait_for(&alice_events, |event| {
        matches!(event, Event::FileTransferFinished { .. })
    })
    .await;

    assert_eq!(
        sender_finish,
        Event::FileTransferFinished {
            session_id,
            result: TransferResult::Good,
        }
    );

    let receiver_finish = wait_for(&bob_events, |event| {
        matches!(event, Event::FileTransferFinished { .. })
    })
    .await;

    assert_eq!(
        receiver_finish,
        Event::FileTransferFinished {
            session_id,
            result: TransferResult::Good,
        }
    );

    assert_eq!(std::fs::read(&destination).unwrap(), content);

    let _ = std::fs::remove_file(&source);
    let _ = std::fs::remove_file(&destination);
    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn refused_transfers_finish_on_both_sides() {
    init_logging();

    let (alice, bob) = relay_pair("carol@example.com", "dave@example.com").await;
    let alice_events = collect_events(&alice);
    let bob_events = collect_events(&bob);

    let source = std::env::temp_dir().join("msnp-core-refused-source.bin");
    std::fs::write(&source, vec![0; 100]).unwrap();

    let session_id = alice.send_file("dave@example.com", &source).await.unwrap();

    wait_for(&bob_events, |event| {
        matches!(event, Event::FileTransferRequest { .. })
    })
    .await;

    bob.refuse_file_transfer(session_id).await.unwrap();

    let receiver_finish = wait_for(&bob_events, |event| {
        matches!(event, Event::FileTransferFinished { .. })
    })
    .await;

    assert_eq!(
        receiver_finish,
        Event::FileTransferFinished {
            session_id,
            result: TransferResult::Refused,
        }
    );

    let sender_finish = wait_for(&alice_events, |event| {
        matches!(event, Event::FileTransferFinished { .. })
    })
    .await;

    assert_eq!(
        sender_finish,
        Event::FileTransferFinished {
            session_id,
            result: TransferResult::Refused,
        }
    );

    let _ = std::fs::remove_file(&source);
    alice.close().await;
    bob.close().await;
}
