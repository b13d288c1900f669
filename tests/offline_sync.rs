//! End-to-end: real order server on an ephemeral port, real HTTP client,
//! connectivity driven by hand.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use order_desk_lib::models::{CustomerInput, OrderFilter, OrderItemInput};
use order_desk_lib::{
    build_router, catalog, orders, AppState, ClientOptions, ConnectivitySignal, DbState,
    HttpOrderApi, LocalStore, OrderApi, OrderClient, OrderSubmission, SubmitOutcome,
};

async fn start_server() -> (SocketAddr, Arc<DbState>) {
    let db = Arc::new(order_desk_lib::db::init_in_memory().expect("db"));
    catalog::seed_sample_catalog(&db).expect("seed");
    let app = build_router(AppState::new(db.clone(), None), None);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, db)
}

fn product_id(db: &DbState, name: &str) -> i64 {
    let conn = db.conn.lock().unwrap();
    conn.query_row("SELECT id FROM products WHERE name = ?1", [name], |r| {
        r.get(0)
    })
    .unwrap()
}

fn order_for(name: &str, product_id: i64, quantity: i64) -> OrderSubmission {
    OrderSubmission {
        customer: CustomerInput {
            name: name.into(),
            phone: "(11) 91234-5678".into(),
            address: "Rua X, 10".into(),
            email: Some("ana@example.com".into()),
        },
        items: vec![OrderItemInput {
            product_id,
            quantity,
            unit_price: None,
        }],
        payment_method: "Pix".into(),
        notes: None,
    }
}

fn client_for(
    base_url: &str,
    signal: &ConnectivitySignal,
    dir: &std::path::Path,
) -> OrderClient<HttpOrderApi, ConnectivitySignal> {
    let api = HttpOrderApi::new(base_url, Duration::from_secs(5)).unwrap();
    let store = Arc::new(LocalStore::open(dir).unwrap());
    OrderClient::new(
        Arc::new(api),
        Arc::new(signal.clone()),
        store,
        ClientOptions {
            request_timeout: Duration::from_secs(5),
            startup_sync_delay: Duration::from_millis(50),
        },
    )
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

#[tokio::test]
async fn offline_orders_reach_the_server_after_reconnect() {
    let (addr, db) = start_server().await;
    let pizza = product_id(&db, "Mozzarella");
    let dir = tempfile::tempdir().unwrap();
    let signal = ConnectivitySignal::new(false);
    let client = client_for(&format!("http://{addr}"), &signal, dir.path());
    assert!(client.start());

    let first = client.submit_order(order_for("Ana", pizza, 2)).await.unwrap();
    let second = client.submit_order(order_for("Ana Maria", pizza, 1)).await.unwrap();
    assert!(matches!(first, SubmitOutcome::SavedOffline { .. }));
    assert!(matches!(second, SubmitOutcome::SavedOffline { .. }));
    assert_eq!(client.pending_count(), 2);
    assert!(orders::list_orders(&db, &OrderFilter::default())
        .unwrap()
        .is_empty());

    signal.set_online(true);
    assert!(wait_until(|| client.pending_count() == 0).await);

    let stored = orders::list_orders(&db, &OrderFilter::default()).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].total_amount, 80.0);
    assert_eq!(stored[1].total_amount, 40.0);
    // Same phone, one customer, last submission wins.
    assert_eq!(stored[0].customer_id, stored[1].customer_id);
    assert_eq!(stored[1].customer_name.as_deref(), Some("Ana Maria"));

    let status = client.last_sync_status().expect("sync status");
    assert_eq!((status.success_count, status.failure_count), (2, 0));
    client.stop();
}

#[tokio::test]
async fn online_submission_is_direct_and_replays_are_deduplicated() {
    let (addr, db) = start_server().await;
    let pizza = product_id(&db, "Mozzarella");
    let base = format!("http://{addr}");
    let dir = tempfile::tempdir().unwrap();
    let signal = ConnectivitySignal::new(true);
    let client = client_for(&base, &signal, dir.path());

    let outcome = client.submit_order(order_for("Ana", pizza, 2)).await.unwrap();
    let SubmitOutcome::Submitted(receipt) = outcome else {
        panic!("expected direct submission");
    };
    assert_eq!(receipt.total_amount, 80.0);
    assert_eq!(client.pending_count(), 0);

    let api = HttpOrderApi::new(&base, Duration::from_secs(5)).unwrap();
    let sub = order_for("Ana", pizza, 1);
    let a = api.submit_order(&sub, Some("offline_42_abcdefghi")).await.unwrap();
    let b = api.submit_order(&sub, Some("offline_42_abcdefghi")).await.unwrap();
    assert_eq!(a.order_id, b.order_id);
    assert!(!a.deduplicated);
    assert!(b.deduplicated);
    assert_eq!(
        orders::list_orders(&db, &OrderFilter::default()).unwrap().len(),
        2
    );
    assert!(api.check_health().await);
}

#[tokio::test]
async fn unreachable_server_saves_offline_even_when_marked_online() {
    // Grab a free port, then close it so nothing is listening there.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let signal = ConnectivitySignal::new(true);
    let client = client_for(&format!("http://{addr}"), &signal, dir.path());

    let outcome = client.submit_order(order_for("Ana", 1, 1)).await.unwrap();
    let SubmitOutcome::SavedOffline { local_id } = outcome else {
        panic!("expected offline save");
    };
    assert_eq!(client.pending_orders()[0].local_id, local_id);

    let report = client.sync_now().await.results.expect("results");
    assert_eq!((report.total, report.failed), (1, 1));
    assert_eq!(client.pending_count(), 1);
}

#[tokio::test]
async fn queue_survives_client_restart() {
    let dir = tempfile::tempdir().unwrap();
    let signal = ConnectivitySignal::new(false);
    {
        let client = client_for("http://127.0.0.1:9", &signal, dir.path());
        client.submit_order(order_for("Ana", 1, 1)).await.unwrap();
    }
    let (addr, db) = start_server().await;
    let client = client_for(&format!("http://{addr}"), &signal, dir.path());
    assert_eq!(client.pending_count(), 1);
    signal.set_online(true);
    let outcome = client.sync_now().await;
    assert!(outcome.success);
    assert_eq!(client.pending_count(), 0);
    assert_eq!(
        orders::list_orders(&db, &OrderFilter::default()).unwrap().len(),
        1
    );
}

#[tokio::test]
async fn throttled_submission_is_saved_offline() {
    let app = axum::Router::new().route(
        "/api/orders/public",
        axum::routing::post(|| async { axum::http::StatusCode::TOO_MANY_REQUESTS }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let dir = tempfile::tempdir().unwrap();
    let signal = ConnectivitySignal::new(true);
    let client = client_for(&format!("http://{addr}"), &signal, dir.path());

    let outcome = client.submit_order(order_for("Ana", 1, 1)).await.unwrap();
    let SubmitOutcome::SavedOffline { local_id } = outcome else {
        panic!("expected offline save");
    };
    assert_eq!(client.pending_orders()[0].local_id, local_id);
}
