use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use pretty_assertions::assert_eq;
use serde_json::json;
use tqapi::{Action, ConnectionState, Error, TradeClient};

mod common;

use common::{fast_options, wait_until, MockServer, Reply, WAIT};

#[test]
fn place_order_round_trip() {
    let server = MockServer::start(|method, params| match method {
        "tapi.place_order" if params["size"] == 100 => Reply::Result(json!({"entrust_no": "E1"})),
        "tapi.place_order" => Reply::Error("insufficient funds".into()),
        _ => Reply::Result(json!(null)),
    });
    let client = TradeClient::connect_with_options(server.address(), fast_options()).unwrap();

    let entrust_no = client.place_order("acct1", "000001.SZ", 10.5, 100, Action::Buy, 0).unwrap();
    assert_eq!(entrust_no, "E1");

    let result = client.place_order("acct1", "000001.SZ", 10.5, 100000, Action::Buy, 0);
    assert!(matches!(result, Err(Error::Server(ref message)) if message == "insufficient funds"), "got {result:?}");

    assert_eq!(
        server.requests_for("tapi.place_order")[0],
        json!({"account_id": "acct1", "code": "000001.SZ", "price": 10.5, "size": 100, "action": "Buy", "order_id": 0})
    );
}

#[test]
fn invalid_order_never_reaches_server() {
    let server = MockServer::null();
    let client = TradeClient::connect_with_options(server.address(), fast_options()).unwrap();

    let result = client.place_order("acct1", "000001.SZ", -10.5, 100, Action::Buy, 0);

    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    client.query_orders("acct1").unwrap();
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn call_times_out_without_response() {
    let server = MockServer::start(|method, _| match method {
        "tapi.query_orders" => Reply::Silence,
        _ => Reply::Result(json!([{"code": "600000.SH", "current_size": 100}])),
    });
    let timeout = Duration::from_millis(200);
    let client = TradeClient::connect_with_options(server.address(), fast_options().request_timeout(timeout)).unwrap();

    let started = Instant::now();
    let result = client.query_orders("acct1");

    assert!(matches!(result, Err(Error::Timeout)), "got {result:?}");
    assert!(started.elapsed() >= timeout);

    let positions = client.query_positions("acct1").unwrap();
    assert_eq!(positions[0].current_size, 100);
}

#[test]
fn concurrent_calls_resolve_independently() {
    let server = MockServer::start(|_, params| Reply::Result(json!({"account_id": params["account_id"], "enable_balance": 1.0})));
    let client = Arc::new(TradeClient::connect_with_options(server.address(), fast_options()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.query_balance(&format!("acct{n}")).unwrap())
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap().account_id, format!("acct{n}"));
    }
}

#[test]
fn pushed_order_status_reaches_callback() {
    let server = MockServer::null();
    let client = TradeClient::connect_with_options(server.address(), fast_options()).unwrap();
    assert!(wait_until(|| server.accepted() == 1));
    let (sender, receiver) = channel::unbounded();

    client
        .set_on_order_status(move |order| {
            let _ = sender.send(order.entrust_no);
        })
        .unwrap();
    client.set_on_account_status(|_| panic!("misbehaving callback")).unwrap();

    server.push_event("tapi.account_status_ind", json!({"account_id": "acct1", "status": "Connected"}));
    server.push_event("tapi.order_status_ind", json!({"entrust_no": "E7", "status": "Filled"}));

    assert_eq!(receiver.recv_timeout(WAIT).unwrap(), "E7");
}

#[test]
fn dropped_connection_fails_pending_call_then_reconnects() {
    let server = MockServer::start(|method, _| match method {
        "tapi.query_trades" => Reply::Silence,
        _ => Reply::Result(json!([])),
    });
    let client = Arc::new(TradeClient::connect_with_options(server.address(), fast_options().request_timeout(Duration::from_secs(30))).unwrap());

    let waiting = Arc::clone(&client);
    let pending = thread::spawn(move || waiting.query_trades("acct1"));
    assert!(wait_until(|| server.requests_for("tapi.query_trades").len() == 1));

    let started = Instant::now();
    server.drop_connections();

    let result = pending.join().unwrap();
    assert!(matches!(result, Err(Error::ConnectionLost)), "got {result:?}");
    assert!(started.elapsed() < WAIT);

    assert!(wait_until(|| client.state() == ConnectionState::Connected && server.accepted() == 2));
    assert!(client.query_orders("acct1").unwrap().is_empty());

    // The failed query is not replayed.
    assert_eq!(server.requests_for("tapi.query_trades").len(), 1);
}

#[test]
fn close_fails_pending_calls() {
    let server = MockServer::start(|_, _| Reply::Silence);
    let client = Arc::new(TradeClient::connect_with_options(server.address(), fast_options().request_timeout(Duration::from_secs(30))).unwrap());

    let waiting = Arc::clone(&client);
    let pending = thread::spawn(move || waiting.query_positions("acct1"));
    assert!(wait_until(|| server.requests().len() == 1));

    client.close();

    let result = pending.join().unwrap();
    assert!(matches!(result, Err(Error::ConnectionLost)), "got {result:?}");
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(client.account_status(), Err(Error::InvalidHandle)));
}

#[test]
fn connect_to_unreachable_address_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = TradeClient::connect_with_options(&address, fast_options());
    assert!(matches!(result, Err(Error::ConnectFailed(_))), "got {result:?}");
}
