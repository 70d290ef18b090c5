use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::stubs::MessageBusStub;

const WAIT: Duration = Duration::from_secs(2);

fn client(stub: MessageBusStub) -> (TradeClient, Arc<MessageBusStub>) {
    let stub = Arc::new(stub);
    (TradeClient::stubbed(stub.clone()), stub)
}

#[test]
fn test_parse_action_ignores_case() {
    assert_eq!("buy".parse::<Action>().unwrap(), Action::Buy);
    assert_eq!("SELL".parse::<Action>().unwrap(), Action::Sell);
    assert_eq!("SellToday".parse::<Action>().unwrap(), Action::SellToday);
    assert_eq!("coveryesterday".parse::<Action>().unwrap(), Action::CoverYesterday);
    assert!(matches!("hold".parse::<Action>(), Err(Error::InvalidArgument(_))));

    for action in [Action::Short, Action::Cover, Action::SellYesterday, Action::CoverToday] {
        assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
    }
}

#[test]
fn test_place_order_returns_entrust_no() {
    let (client, stub) = client(MessageBusStub::default().with_response(methods::PLACE_ORDER, json!({"entrust_no": "E1"})));

    let entrust_no = client.place_order("acct1", "600000.SH", 10.5, 100, Action::Buy, 0).unwrap();

    assert_eq!(entrust_no, "E1");
    assert_eq!(
        stub.request_messages(),
        vec![(
            methods::PLACE_ORDER.to_string(),
            json!({"account_id": "acct1", "code": "600000.SH", "price": 10.5, "size": 100, "action": "Buy", "order_id": 0})
        )]
    );
}

#[test]
fn test_place_order_server_rejection() {
    let (client, _stub) = client(MessageBusStub::default().with_error(methods::PLACE_ORDER, "insufficient funds"));

    let result = client.place_order("acct1", "600000.SH", 10.5, 100, Action::Buy, 0);

    match result {
        Err(e @ Error::Server(_)) => assert_eq!(e.message(), "insufficient funds"),
        other => panic!("expected server error, got {other:?}"),
    }
}

#[test]
fn test_place_order_validates_before_sending() {
    let (client, stub) = client(MessageBusStub::default());

    let cases = [(-1.0, 100), (f64::NAN, 100), (f64::INFINITY, 100), (10.0, -5)];
    for (price, size) in cases {
        let result = client.place_order("acct1", "600000.SH", price, size, Action::Sell, 0);
        assert!(matches!(result, Err(Error::InvalidArgument(_))), "price {price} size {size}: {result:?}");
    }
    let result = client.place_order("acct1", " ", 1.0, 1, Action::Sell, 0);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));

    assert!(stub.request_messages().is_empty());
}

#[test]
fn test_place_order_accepts_numeric_entrust_no() {
    let (client, _stub) = client(MessageBusStub::default().with_response(methods::PLACE_ORDER, json!([{"entrust_no": 1024}])));

    assert_eq!(client.place_order("acct1", "IF1809.CFE", 0.0, 0, Action::Short, 7).unwrap(), "1024");
}

#[test]
fn test_place_order_without_entrust_no() {
    let (client, _stub) = client(MessageBusStub::default().with_response(methods::PLACE_ORDER, json!({"entrust_no": ""})));

    let result = client.place_order("acct1", "600000.SH", 10.5, 100, Action::Buy, 0);
    assert!(matches!(result, Err(Error::UnexpectedResponse(_))), "got {result:?}");
}

#[test]
fn test_cancel_order_requires_identifier() {
    let (client, stub) = client(MessageBusStub::default());

    let result = client.cancel_order("acct1", "600000.SH", "", 0);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert!(stub.request_messages().is_empty());

    client.cancel_order("acct1", "600000.SH", "E1", 0).unwrap();
    client.cancel_order("acct1", "600000.SH", "", 9).unwrap();

    assert_eq!(
        stub.request_messages(),
        vec![
            (
                methods::CANCEL_ORDER.to_string(),
                json!({"account_id": "acct1", "code": "600000.SH", "entrust_no": "E1", "order_id": 0})
            ),
            (
                methods::CANCEL_ORDER.to_string(),
                json!({"account_id": "acct1", "code": "600000.SH", "entrust_no": "", "order_id": 9})
            ),
        ]
    );
}

#[test]
fn test_query_orders_decodes_rows() {
    let (client, _stub) = client(MessageBusStub::default().with_response(
        methods::QUERY_ORDERS,
        json!([
            {"account_id": "acct1", "code": "600000.SH", "entrust_no": "E1", "entrust_price": 10.5, "entrust_size": 100, "status": "Filled"},
            {"account_id": "acct1", "code": "000001.SZ", "entrust_no": "E2", "entrust_price": 9.1, "entrust_size": 200, "status": "New", "broker_ref": "x"},
        ]),
    ));

    let orders = client.query_orders("acct1").unwrap();

    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].entrust_no, "E1");
    assert_eq!(orders[0].entrust_size, 100);
    assert_eq!(orders[1].status, "New");
    assert_eq!(orders[1].extra["broker_ref"], json!("x"));
}

#[test]
fn test_query_positions_decodes_columnar_table() {
    let (client, _stub) = client(MessageBusStub::default().with_response(
        methods::QUERY_POSITIONS,
        json!({
            "account_id": ["acct1", "acct1"],
            "code": ["600000.SH", "IF1809.CFE"],
            "current_size": [300, 2],
            "side": ["Long", "Short"],
        }),
    ));

    let positions = client.query_positions("acct1").unwrap();

    assert_eq!(positions.len(), 2);
    assert_eq!(positions[0].code, "600000.SH");
    assert_eq!(positions[0].current_size, 300);
    assert_eq!(positions[1].side, "Short");
}

#[test]
fn test_query_without_data_is_empty() {
    let (client, _stub) = client(MessageBusStub::default());

    assert!(client.query_trades("acct1").unwrap().is_empty());
    assert!(client.account_status().unwrap().is_empty());
}

#[test]
fn test_query_error_carries_no_rows() {
    let (client, _stub) = client(MessageBusStub::default().with_error(methods::QUERY_TRADES, "account not logged in"));

    let result = client.query_trades("acct1");
    assert!(matches!(result, Err(Error::Server(ref message)) if message == "account not logged in"));
}

#[test]
fn test_query_balance() {
    let (client, stub) = client(MessageBusStub::default().with_response(
        methods::QUERY_BALANCE,
        json!({"account_id": "acct1", "init_balance": 1000000.0, "enable_balance": 800000.0}),
    ));

    let balance = client.query_balance("acct1").unwrap();

    assert_eq!(balance.account_id, "acct1");
    assert_eq!(balance.enable_balance, 800000.0);
    assert_eq!(stub.request_messages()[0].1, json!({"account_id": "acct1"}));
}

#[test]
fn test_common_query_returns_raw_result() {
    let (client, stub) = client(MessageBusStub::default().with_response(methods::COMMON_QUERY, json!({"ctp_codetable": [1, 2]})));

    let result = client.query("acct1", "ctp_codetable", "mkt=SHF").unwrap();

    assert_eq!(result, json!({"ctp_codetable": [1, 2]}));
    assert_eq!(
        stub.request_messages()[0].1,
        json!({"account_id": "acct1", "command": "ctp_codetable", "params": "mkt=SHF"})
    );
}

#[test]
fn test_order_status_callback() {
    let (client, _stub) = client(MessageBusStub::default());
    let (sender, receiver) = channel::unbounded();

    client
        .set_on_order_status(move |order| {
            let _ = sender.send(order);
        })
        .unwrap();
    client
        .session
        .dispatcher()
        .dispatch(methods::ORDER_STATUS_IND, json!({"entrust_no": "E1", "status": "Filled", "fill_size": 100}));

    let order = receiver.recv_timeout(WAIT).unwrap();
    assert_eq!(order.entrust_no, "E1");
    assert_eq!(order.fill_size, 100);
}

#[test]
fn test_calls_after_close_fail() {
    let (client, stub) = client(MessageBusStub::default());

    client.close();

    assert!(matches!(client.query_orders("acct1"), Err(Error::InvalidHandle)));
    assert!(matches!(client.set_on_order_trade(|_| {}), Err(Error::InvalidHandle)));
    assert!(!client.is_connected());
    assert_eq!(stub.shutdown_calls(), 1);
}
