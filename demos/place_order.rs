use clap::{arg, Command};
use log::{debug, info};

use tqapi::{Action, TradeClient};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = Command::new("place_order")
        .version("1.0")
        .about("Places an order, prints its status updates and cancels it")
        .arg(arg!(--address <VALUE>).default_value("127.0.0.1:10001"))
        .arg(arg!(--account <ACCOUNT>).required(true))
        .arg(arg!(--code <CODE>).required(true))
        .arg(arg!(--price <PRICE>).required(true).value_parser(clap::value_parser!(f64)))
        .arg(arg!(--size <SIZE>).required(true).value_parser(clap::value_parser!(i64)))
        .arg(arg!(--action <ACTION>).default_value("buy"))
        .get_matches();

    let address = matches.get_one::<String>("address").expect("address has a default");
    let account = matches.get_one::<String>("account").expect("account is required");
    let code = matches.get_one::<String>("code").expect("code is required");
    let price = *matches.get_one::<f64>("price").expect("price is required");
    let size = *matches.get_one::<i64>("size").expect("size is required");
    let action: Action = matches.get_one::<String>("action").expect("action has a default").parse()?;

    let client = TradeClient::connect(address)?;
    info!("connected to {address}");

    client.set_on_order_status(|order| {
        println!("order status: {} {} filled {}/{}", order.entrust_no, order.status, order.fill_size, order.entrust_size);
    })?;
    client.set_on_order_trade(|trade| {
        println!("trade: {} {} @ {}", trade.entrust_no, trade.fill_size, trade.fill_price);
    })?;

    let balance = client.query_balance(account)?;
    debug!("balance {balance:?}");
    println!("enable balance: {}", balance.enable_balance);

    let entrust_no = client.place_order(account, code, price, size, action, 0)?;
    println!("placed {action} {size} {code} @ {price}: entrust_no {entrust_no}");

    for order in client.query_orders(account)? {
        println!("{} {} {} {}", order.entrust_no, order.code, order.entrust_action, order.status);
    }

    match client.cancel_order(account, code, &entrust_no, 0) {
        Ok(()) => println!("cancel requested for {entrust_no}"),
        Err(e) => println!("cancel failed: {}", e.message()),
    }

    client.close();
    Ok(())
}
