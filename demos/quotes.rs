use std::thread;
use std::time::Duration;

use clap::{arg, Command};
use log::info;

use tqapi::DataClient;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = Command::new("quotes")
        .version("1.0")
        .about("Subscribes to quotes and bars and prints them as they arrive")
        .arg(arg!(--address <VALUE>).default_value("127.0.0.1:10002"))
        .arg(arg!(--codes <CODES>).required(true).help("comma separated codes, e.g. 000001.SH,600000.SH"))
        .arg(arg!(--cycle <CYCLE>).default_value(tqapi::DEFAULT_CYCLE))
        .arg(arg!(--seconds <SECONDS>).default_value("60").value_parser(clap::value_parser!(u64)))
        .get_matches();

    let address = matches.get_one::<String>("address").expect("address has a default");
    let codes = matches.get_one::<String>("codes").expect("codes are required");
    let cycle = matches.get_one::<String>("cycle").expect("cycle has a default");
    let seconds = *matches.get_one::<u64>("seconds").expect("seconds has a default");

    let client = DataClient::connect(address)?;
    info!("connected to {address}");

    let quote = client.quote(codes.split(',').next().unwrap_or_default())?;
    println!("snapshot: {} last={} volume={}", quote.code, quote.last, quote.volume);

    client.set_on_quote(|quote| {
        println!("quote: {} {:?} last={} bid1={} ask1={}", quote.code, quote.date_time(), quote.last, quote.bid1, quote.ask1);
    })?;
    client.set_on_bar(|cycle, bar| {
        println!("bar[{cycle}]: {} {:?} o={} h={} l={} c={}", bar.code, bar.date_time(), bar.open, bar.high, bar.low, bar.close);
    })?;

    let subscribed = client.subscribe_cycle(cycle, [codes])?;
    println!("subscribed on {cycle}: {subscribed:?}");

    thread::sleep(Duration::from_secs(seconds));

    client.unsubscribe_cycle(cycle, [codes])?;
    client.close();

    Ok(())
}
