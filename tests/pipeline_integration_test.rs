//! End-to-end pipeline tests: mock HTTP RPC for the snapshot sync, mock
//! WebSocket node for live updates, real everything else.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use solana_account_decoder::{UiAccount, UiAccountEncoding};
use solana_sdk::account::Account;
use solana_sdk::pubkey::Pubkey;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use weathervane::{
    account_discriminator, AdapterRegistry, EventDispatcher, EventKind, EventPayload,
    IndexerConfigBuilder, IndexerState, MarketEvent, MarketIndexer, OracleFeedAdapter, RawAccount,
    ReconnectConfig, RetryConfig,
};

const WAIT: Duration = Duration::from_secs(10);

/// Serialized v1 weather feed with fixed aggregation stats.
fn feed_bytes(authority: &Pubkey, name: &str, result: f64) -> Vec<u8> {
    let mut fixed_name = [0u8; 32];
    fixed_name[..name.len()].copy_from_slice(name.as_bytes());

    let mut data = account_discriminator("WeatherFeedV1").to_vec();
    data.extend_from_slice(authority.as_ref());
    data.extend_from_slice(&fixed_name);
    data.extend_from_slice(&result.to_le_bytes());
    data.extend_from_slice(&0.1f64.to_le_bytes());
    data.extend_from_slice(&90u32.to_le_bytes());
    data.extend_from_slice(&10u32.to_le_bytes());
    data.extend_from_slice(&1_700_000_000i64.to_le_bytes());
    data.extend_from_slice(&0i64.to_le_bytes());
    data.push(0);
    data
}

fn encoded_account(address: &Pubkey, owner: &Pubkey, data: Vec<u8>) -> Value {
    let account = Account {
        lamports: 1_000_000,
        data,
        owner: *owner,
        executable: false,
        rent_epoch: 0,
    };
    serde_json::to_value(UiAccount::encode(
        address,
        &account,
        UiAccountEncoding::Base64,
        None,
        None,
    ))
    .unwrap()
}

fn keyed_account(address: &Pubkey, owner: &Pubkey, data: Vec<u8>) -> Value {
    json!({
        "pubkey": address.to_string(),
        "account": encoded_account(address, owner, data)
    })
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(&text).unwrap();
                }
                Some(Ok(_)) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a client request")
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 1,
        initial_backoff_ms: 1,
        backoff_multiplier: 1.0,
        max_backoff_ms: 5,
        jitter: false,
    }
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        max_attempts: 3,
        base_delay_ms: 10,
        factor: 1.0,
        max_delay_ms: 50,
    }
}

async fn mount_get_slot(server: &MockServer, slot: u64) {
    Mock::given(method("POST"))
        .and(body_string_contains("getSlot"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "jsonrpc": "2.0", "result": slot, "id": 1 })),
        )
        .mount(server)
        .await;
}

/// The nonblocking `RpcClient` issues `getVersion` before the first real
/// call on every fresh client; without this stub the probe 404s and sinks
/// the whole request.
async fn mount_get_version(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_string_contains("getVersion"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": { "solana-core": "1.18.26", "feature-set": 0 },
            "id": 1
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_snapshot_then_live_updates() {
    let oracle_program = Pubkey::new_unique();
    let authority = Pubkey::new_unique();
    let feed_a = Pubkey::new_unique();
    let feed_b = Pubkey::new_unique();
    let foreign = Pubkey::new_unique();
    let live_feed = Pubkey::new_unique();

    // Snapshot returns two decodable feeds plus one account with an
    // unknown layout, which must be dropped without sinking the sync.
    let rpc_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("getProgramAccounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": [
                keyed_account(&feed_a, &oracle_program, feed_bytes(&authority, "SEA rain 2026-09-01", 0.7)),
                keyed_account(&feed_b, &oracle_program, feed_bytes(&authority, "PDX high above 30C", 0.2)),
                keyed_account(&foreign, &oracle_program, vec![9u8; 64]),
            ],
            "id": 1
        })))
        .expect(1)
        .mount(&rpc_server)
        .await;
    mount_get_slot(&rpc_server, 900).await;
    mount_get_version(&rpc_server).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}", listener.local_addr().unwrap());
    let live_payload = encoded_account(
        &live_feed,
        &oracle_program,
        feed_bytes(&authority, "DEN snow by Friday", 0.55),
    );

    let ws_server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let request = next_json(&mut ws).await;
        assert_eq!(request["method"], "programSubscribe");
        assert_eq!(request["params"][0], oracle_program.to_string());

        ws.send(Message::Text(
            json!({ "jsonrpc": "2.0", "result": 7, "id": request["id"] }).to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(
            json!({
                "jsonrpc": "2.0",
                "method": "programNotification",
                "params": {
                    "subscription": 7,
                    "result": {
                        "context": { "slot": 12_345 },
                        "value": { "pubkey": live_feed.to_string(), "account": live_payload }
                    }
                }
            })
            .to_string(),
        ))
        .await
        .unwrap();

        while let Some(Ok(_)) = ws.next().await {}
    });

    let config = IndexerConfigBuilder::new()
        .with_rpc(rpc_server.uri())
        .with_ws(ws_url)
        .program_id(oracle_program.to_string())
        .with_poll_interval(1)
        .with_retry(fast_retry())
        .with_reconnect(fast_reconnect())
        .build()
        .unwrap();

    let registry = Arc::new(AdapterRegistry::new());
    registry.register(Arc::new(OracleFeedAdapter::new(oracle_program)));
    let dispatcher = Arc::new(EventDispatcher::new(config.replay));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    dispatcher.on_fn(EventKind::MarketUpdated, move |event| {
        let sink = Arc::clone(&sink);
        async move {
            let market = event.market().unwrap();
            sink.lock().unwrap().push((market.name.clone(), event.slot));
            Ok(())
        }
    });

    let indexer = MarketIndexer::new(config, registry, Arc::clone(&dispatcher));
    indexer.start().await.unwrap();
    assert_eq!(indexer.state(), IndexerState::Running);

    // Two snapshot markets, the sync summary, then the live push.
    let deadline = Instant::now() + WAIT;
    while dispatcher.replay_buffer(None, None).len() < 4 {
        assert!(Instant::now() < deadline, "pipeline never delivered all events");
        sleep(Duration::from_millis(25)).await;
    }
    dispatcher.wait_for_idle().await;

    let status = indexer.status();
    assert_eq!(status.state, IndexerState::Running);
    assert_eq!(status.active_subscriptions, 1);
    assert_eq!(status.accounts_indexed, 3);
    assert_eq!(status.accounts_dropped, 1);
    assert_eq!(status.decode_failures, 1);
    assert_eq!(status.normalize_failures, 0);

    let events = dispatcher.replay_buffer(None, None);
    let kinds: Vec<EventKind> = events.iter().map(MarketEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::MarketUpdated,
            EventKind::MarketUpdated,
            EventKind::SyncCompleted,
            EventKind::MarketUpdated,
        ]
    );

    let EventPayload::SyncCompleted(summary) = &events[2].payload else {
        panic!("expected the sync summary");
    };
    assert_eq!(summary.programs, 1);
    assert_eq!(summary.accounts_indexed, 2);
    assert_eq!(summary.accounts_dropped, 1);

    // Snapshot events carry the sentinel slot, the live one its own.
    assert_eq!(events[0].slot, RawAccount::SNAPSHOT_SLOT);
    assert_eq!(events[0].market().unwrap().name, "SEA rain 2026-09-01");
    assert_eq!(events[1].slot, RawAccount::SNAPSHOT_SLOT);
    assert_eq!(events[3].slot, 12_345);
    assert_eq!(events[3].market().unwrap().name, "DEN snow by Friday");

    let recorded = seen.lock().unwrap().clone();
    assert_eq!(recorded.len(), 3);
    assert!(recorded.contains(&("DEN snow by Friday".to_string(), 12_345)));

    // The health probe runs from startup and should have seen the mock
    // endpoint's slot by now.
    let deadline = Instant::now() + WAIT;
    while indexer.status().health.last_slot != Some(900) {
        assert!(Instant::now() < deadline, "health probe never succeeded");
        sleep(Duration::from_millis(10)).await;
    }

    indexer.stop().await;
    assert_eq!(indexer.state(), IndexerState::Stopped);
    ws_server.await.unwrap();
}

#[tokio::test]
async fn test_stop_and_restart_resyncs() {
    let oracle_program = Pubkey::new_unique();

    let rpc_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("getProgramAccounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": [],
            "id": 1
        })))
        .expect(2)
        .mount(&rpc_server)
        .await;
    mount_get_slot(&rpc_server, 41).await;
    mount_get_version(&rpc_server).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}", listener.local_addr().unwrap());

    // One connection per indexer start; each subscribes afresh.
    let ws_server = tokio::spawn(async move {
        for server_id in [5u64, 6] {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let request = next_json(&mut ws).await;
            assert_eq!(request["method"], "programSubscribe");
            ws.send(Message::Text(
                json!({ "jsonrpc": "2.0", "result": server_id, "id": request["id"] }).to_string(),
            ))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    let config = IndexerConfigBuilder::new()
        .with_rpc(rpc_server.uri())
        .with_ws(ws_url)
        .program_id(oracle_program.to_string())
        .with_retry(fast_retry())
        .with_reconnect(fast_reconnect())
        .build()
        .unwrap();

    let registry = Arc::new(AdapterRegistry::new());
    registry.register(Arc::new(OracleFeedAdapter::new(oracle_program)));
    let dispatcher = Arc::new(EventDispatcher::new(config.replay));
    let indexer = MarketIndexer::new(config, registry, Arc::clone(&dispatcher));

    indexer.start().await.unwrap();
    assert_eq!(indexer.state(), IndexerState::Running);
    assert_eq!(indexer.status().active_subscriptions, 1);
    assert_eq!(
        dispatcher.replay_buffer(Some(EventKind::SyncCompleted), None).len(),
        1
    );

    indexer.stop().await;
    assert_eq!(indexer.state(), IndexerState::Stopped);
    assert_eq!(indexer.status().active_subscriptions, 0);

    indexer.start().await.unwrap();
    assert_eq!(indexer.state(), IndexerState::Running);
    assert_eq!(
        dispatcher.replay_buffer(Some(EventKind::SyncCompleted), None).len(),
        2
    );

    // Nothing was indexed in either pass; the summaries are empty.
    let status = indexer.status();
    assert_eq!(status.accounts_indexed, 0);
    assert_eq!(status.accounts_dropped, 0);

    indexer.stop().await;
    ws_server.await.unwrap();
}
