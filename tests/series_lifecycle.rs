use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use ulid::Ulid;

use coachcal::config::EngineConfig;
use coachcal::engine::{Created, Engine};
use coachcal::model::{EventFilter, EventForm, RecurrenceForm, RejectReason};
use coachcal::remote::HttpRecurrenceJobClient;
use coachcal::store::{EventStore, WalStore};
use coachcal::view::CalendarView;

// ── Test infrastructure ──────────────────────────────────────

fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("coachcal_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn weekly_booking(days: Vec<u8>, from: &str, to: &str) -> EventForm {
    EventForm {
        title: Some("Coaching".into()),
        start_time: Some("09:00".into()),
        end_time: Some("10:00".into()),
        client_ref: Some("client-7".into()),
        fee: Some(6500),
        recurrence: Some(RecurrenceForm {
            days_of_week: days,
            start_recur: from.into(),
            end_recur: to.into(),
            exceptions: vec![],
        }),
        ..EventForm::default()
    }
}

fn slot(date: &str, start: &str, end: &str) -> EventForm {
    EventForm {
        date: Some(date.into()),
        start_time: Some(start.into()),
        end_time: Some(end.into()),
        is_background_event: true,
        ..EventForm::default()
    }
}

/// Read one request (headers plus content-length body). Returns the body.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return String::new();
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let body_start = head_end + 4;
        if buf.len() >= body_start + body_len {
            return String::from_utf8_lossy(&buf[body_start..body_start + body_len]).to_string();
        }
    }
}

/// Fake recurrence job service. Every request body is forwarded on the channel.
async fn start_job_server(reply: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let body = read_request(&mut socket).await;
                let _ = tx.send(body);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
                    reply.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, rx)
}

// ── Durable lifecycle ────────────────────────────────────────

#[tokio::test]
async fn series_survives_restart_and_deletes_cleanly() {
    let dir = test_dir();
    let config = EngineConfig {
        data_dir: Some(dir.clone()),
        ..EngineConfig::default()
    };

    let (root, kept) = {
        let engine = Engine::from_config(config.clone()).unwrap();
        engine.create(&slot("2024-06-05", "09:30", "11:00")).await.unwrap();
        // Mon/Wed/Fri, first two weeks of June.
        let created = engine
            .create(&weekly_booking(vec![1, 3, 5], "2024-06-03", "2024-06-14"))
            .await
            .unwrap();
        let Created::Series(series) = created else {
            panic!("expected series");
        };
        assert_eq!(series.events.len(), 5);
        assert_eq!(series.rejected.len(), 1);
        assert!(matches!(
            series.rejected[0].reason,
            RejectReason::OverlapsBackground(_)
        ));
        (series.root_id, series.events.len())
    };

    let store = WalStore::open(&dir.join("events.wal"), 1000).unwrap();
    let members = store.list(&EventFilter::series(root)).await.unwrap();
    assert_eq!(members.len(), kept);
    let indices: Vec<u32> = members
        .iter()
        .map(|e| e.link.unwrap().instance_index)
        .collect();
    // Index 2 (Wed 5th) was rejected; the gap stays.
    assert_eq!(indices, vec![0, 1, 3, 4, 5]);
    drop(store);

    let engine = Engine::from_config(config).unwrap();
    let deleted = engine.delete(members[2].id).await.unwrap();
    assert_eq!(deleted.len(), kept);
    let remaining = engine.store().list(&EventFilter::default()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].is_background());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn concurrent_creates_land_in_one_log() {
    let dir = test_dir();
    let path = dir.join("events.wal");
    let store = Arc::new(WalStore::open(&path, 0).unwrap());
    let engine = Arc::new(Engine::new(store.clone(), EngineConfig::default()));

    let mut handles = Vec::new();
    for day in 0..5u8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create(&weekly_booking(vec![day], "2024-06-01", "2024-06-30"))
                .await
                .unwrap()
        }));
    }
    let mut total = 0;
    for h in handles {
        let Created::Series(series) = h.await.unwrap() else {
            panic!("expected series");
        };
        total += series.events.len();
    }
    assert_eq!(store.len(), total);
    drop(engine);
    drop(store);

    let reopened = WalStore::open(&path, 0).unwrap();
    assert_eq!(reopened.len(), total);
    let _ = std::fs::remove_dir_all(&dir);
}

// ── Remote offload ───────────────────────────────────────────

#[tokio::test]
async fn long_series_goes_to_job_service() {
    let (addr, mut bodies) = start_job_server(r#"{"createdCount":260,"firstId":null}"#).await;
    let client = HttpRecurrenceJobClient::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    let config = EngineConfig {
        remote_threshold: 50,
        ..EngineConfig::default()
    };
    let store = Arc::new(coachcal::store::InMemoryStore::new());
    let engine = Engine::new(store.clone(), config).with_remote(Arc::new(client));

    let form = weekly_booking(vec![1, 2, 3, 4, 5], "2024-01-01", "2024-12-31");
    let created = engine.create(&form).await.unwrap();
    let Created::Remote(receipt) = created else {
        panic!("expected offload");
    };
    assert_eq!(receipt.created_count, 260);
    assert!(store.is_empty());

    let body = bodies.recv().await.unwrap();
    let sent: EventForm = serde_json::from_str(&body).unwrap();
    assert_eq!(sent, form);
    assert!(body.contains("\"daysOfWeek\""));
}

// ── Display ──────────────────────────────────────────────────

#[tokio::test]
async fn view_renders_series_in_viewer_offset() {
    let store = Arc::new(coachcal::store::InMemoryStore::new());
    let engine = Engine::new(store, EngineConfig::default());
    let Created::Series(series) = engine
        .create(&weekly_booking(vec![1], "2024-06-03", "2024-06-10"))
        .await
        .unwrap()
    else {
        panic!("expected series");
    };

    let offset = FixedOffset::west_opt(4 * 3600).unwrap();
    let mut view = CalendarView::new(offset, engine.config().view_cache_capacity);
    for event in &series.events {
        let tip = view.mount(event);
        assert_eq!(tip.time_range, "05:00–06:00");
        assert_eq!(tip.detail.as_deref(), Some("client-7 · unpaid"));
    }
    assert_eq!(view.len(), 2);
}
