use env_logger::Env;
use msnp_core::{Event, Session};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

/// Tests share one process, so only the first call installs the logger.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("trace")).try_init();
}

/// Forwards payload commands read from one peer to the other, acking
/// each one the way a switchboard would.
async fn relay(
    rd: OwnedReadHalf,
    own: Arc<Mutex<OwnedWriteHalf>>,
    other: Arc<Mutex<OwnedWriteHalf>>,
    sender_email: String,
) {
    let mut reader = BufReader::new(rd);
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            break;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"MSG") {
            continue;
        }

        let length: usize = tokens.last().unwrap().parse().unwrap();
        let mut chunk = vec![0; length];
        if reader.read_exact(&mut chunk).await.is_err() {
            break;
        }

        {
            let mut own = own.lock().await;
            let ack = format!("ACK {}\r\n", tokens[1]);
            if own.write_all(ack.as_bytes()).await.is_err() {
                break;
            }
        }

        let mut other = other.lock().await;
        let header = format!("MSG {sender_email} {sender_email} {length}\r\n");
        if other.write_all(header.as_bytes()).await.is_err() {
            break;
        }

        if other.write_all(&chunk).await.is_err() {
            break;
        }
    }
}

/// Connects two sessions through an in-process switchboard.
pub async fn relay_pair(alice_email: &str, bob_email: &str) -> (Session, Session) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let alice_sender = alice_email.to_string();
    let bob_sender = bob_email.to_string();
    tokio::spawn(async move {
        let (alice, _) = listener.accept().await.unwrap();
        let (bob, _) = listener.accept().await.unwrap();

        let (alice_rd, alice_wr) = alice.into_split();
        let (bob_rd, bob_wr) = bob.into_split();
        let alice_wr = Arc::new(Mutex::new(alice_wr));
        let bob_wr = Arc::new(Mutex::new(bob_wr));

        tokio::spawn(relay(
            alice_rd,
            alice_wr.clone(),
            bob_wr.clone(),
            alice_sender,
        ));

        tokio::spawn(relay(bob_rd, bob_wr, alice_wr, bob_sender));
    });

    let alice = Session::connect("127.0.0.1", &port.to_string(), alice_email)
        .await
        .unwrap();

    let bob = Session::connect("127.0.0.1", &port.to_string(), bob_email)
        .await
        .unwrap();

    (alice, bob)
}

pub fn collect_events(session: &Session) -> mpsc::Receiver<Event> {
    let (tx, rx) = mpsc::channel();
    session.add_event_handler_closure(move |event| {
        let _ = tx.send(event);
    });

    rx
}

pub async fn wait_for<F>(rx: &mpsc::Receiver<Event>, predicate: F) -> Event
where
    F: Fn(&Event) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match rx.try_recv() {
            Ok(event) if predicate(&event) => return event,
            Ok(_) => (),
            Err(_) => {
                assert!(Instant::now() < deadline, "Timed out waiting for an event");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}
