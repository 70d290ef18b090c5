//! In-process server speaking the length-prefixed JSON framing.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tqapi::ClientOptions;

pub const WAIT: Duration = Duration::from_secs(5);

/// How the server answers a request.
pub enum Reply {
    Result(Value),
    Error(String),
    Silence,
}

type Handler = Box<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

struct ServerState {
    handler: Handler,
    requests: Mutex<Vec<(String, Value)>>,
    connections: Mutex<Vec<Arc<Mutex<TcpStream>>>>,
    accepted: AtomicUsize,
}

pub struct MockServer {
    address: String,
    state: Arc<ServerState>,
}

impl MockServer {
    pub fn start<F>(handler: F) -> MockServer
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let state = Arc::new(ServerState {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
            accepted: AtomicUsize::new(0),
        });

        let server_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let writer = Arc::new(Mutex::new(stream.try_clone().unwrap()));
                server_state.connections.lock().unwrap().push(Arc::clone(&writer));
                // Counted once registered, so a waiter on `accepted` can push events.
                server_state.accepted.fetch_add(1, Ordering::SeqCst);

                let connection_state = Arc::clone(&server_state);
                thread::spawn(move || serve(connection_state, stream, writer));
            }
        });

        MockServer { address, state }
    }

    /// Answers every request with `null`.
    pub fn null() -> MockServer {
        Self::start(|_, _| Reply::Result(Value::Null))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.requests().into_iter().filter(|(m, _)| m == method).map(|(_, params)| params).collect()
    }

    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Pushes an event to every open connection.
    pub fn push_event(&self, method: &str, params: Value) {
        let body = json!({"method": method, "params": params});
        for connection in self.state.connections.lock().unwrap().iter() {
            let _ = write_frame(&mut connection.lock().unwrap(), &body);
        }
    }

    /// Drops every open connection, as a network failure would.
    pub fn drop_connections(&self) {
        for connection in self.state.connections.lock().unwrap().drain(..) {
            let _ = connection.lock().unwrap().shutdown(Shutdown::Both);
        }
    }
}

fn serve(state: Arc<ServerState>, mut stream: TcpStream, writer: Arc<Mutex<TcpStream>>) {
    loop {
        let mut header = [0_u8; 4];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let mut body = vec![0_u8; u32::from_be_bytes(header) as usize];
        if stream.read_exact(&mut body).is_err() {
            return;
        }

        let request: Value = serde_json::from_slice(&body).unwrap();
        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or_default().to_string();
        let params = request["params"].clone();

        state.requests.lock().unwrap().push((method.clone(), params.clone()));

        let response = match (state.handler)(&method, &params) {
            Reply::Result(result) => json!({"id": id, "result": result}),
            Reply::Error(message) => json!({"id": id, "result": null, "error": message}),
            Reply::Silence => continue,
        };

        if write_frame(&mut writer.lock().unwrap(), &response).is_err() {
            return;
        }
    }
}

fn write_frame(stream: &mut TcpStream, body: &Value) -> std::io::Result<()> {
    let body = serde_json::to_vec(body)?;
    let mut packet = (body.len() as u32).to_be_bytes().to_vec();
    packet.extend(body);
    stream.write_all(&packet)
}

/// Options with short timeouts so failures surface quickly.
pub fn fast_options() -> ClientOptions {
    ClientOptions::default()
        .read_timeout(Duration::from_millis(20))
        .backoff(Duration::from_millis(10), Duration::from_millis(50))
        .request_timeout(Duration::from_secs(2))
}

/// Polls `condition` until it holds or [WAIT] elapses.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
