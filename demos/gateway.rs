//! Loopback gateway - a full client session without a network.
//!
//! This example demonstrates:
//! - Plugging a transport engine into the client builder
//! - Connecting and waiting until the gateway signs the client in
//! - Sending a request and reading the streamed response body
//! - Pinging the gateway
//!
//! The engine below plays both the native transport and the gateway: it pulls
//! frames on every `DataToSend`, answers each SYN_STREAM with a JSON reply
//! and echoes pings.
//!
//! ```text
//! cargo run --example gateway
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use seacat_client::protocol::{
    begin_data_frame, decode_ping, decode_syn_stream, encode_ping, encode_syn_reply, finish_frame,
    FrameBuf, FrameHeader, SynReply, CNTL_TYPE_PING, CNTL_TYPE_SYN_STREAM,
};
use seacat_client::reactor::{CoreCallbacks, TransportEngine, RC_OK};
use seacat_client::Client;

const SIGNED_IN: &str = "E**YN*";

#[derive(Default)]
struct Inbox {
    commands: VecDeque<char>,
    stopped: bool,
}

struct LoopbackGateway {
    callbacks: Mutex<Option<Arc<dyn CoreCallbacks>>>,
    inbox: Mutex<Inbox>,
    wake: Condvar,
    state: Mutex<String>,
    started: Instant,
}

impl LoopbackGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: Mutex::new(None),
            inbox: Mutex::new(Inbox::default()),
            wake: Condvar::new(),
            state: Mutex::new("i*****".to_string()),
            started: Instant::now(),
        })
    }

    fn next_command(&self) -> Option<char> {
        let mut inbox = self.inbox.lock().unwrap();
        loop {
            if inbox.stopped {
                return None;
            }
            if let Some(command) = inbox.commands.pop_front() {
                return Some(command);
            }
            inbox = self.wake.wait(inbox).unwrap();
        }
    }

    fn set_state(&self, callbacks: &dyn CoreCallbacks, state: &str) {
        *self.state.lock().unwrap() = state.to_string();
        callbacks.on_state_changed(state);
    }

    fn send_frames(&self, callbacks: &dyn CoreCallbacks) {
        while let Some(frame) = callbacks.on_write_ready() {
            let replies = answer(frame.chunk());
            callbacks.on_frame_return(frame);
            match replies {
                Ok(replies) => {
                    for reply in replies {
                        deliver(callbacks, &reply);
                    }
                }
                Err(e) => eprintln!("gateway: cannot answer frame: {}", e),
            }
        }
    }
}

/// The gateway side: replies to one outbound frame.
fn answer(bytes: &[u8]) -> seacat_client::Result<Vec<Vec<u8>>> {
    let mut frame = FrameBuf::from_slice(bytes);
    let FrameHeader::Control(header) = FrameHeader::read(&mut frame)? else {
        return Ok(Vec::new());
    };

    match header.kind {
        CNTL_TYPE_SYN_STREAM => {
            let request = decode_syn_stream(&mut frame)?;
            let body = format!(r#"{{"host":"{}","path":"{}"}}"#, request.host, request.path);

            let mut reply = FrameBuf::with_capacity(1024);
            let head = SynReply {
                stream_id: request.stream_id,
                status: 200,
                headers: [("Content-Type", "application/json")].into_iter().collect(),
            };
            encode_syn_reply(&mut reply, &head, false)?;

            let mut data = FrameBuf::with_capacity(body.len() + 8);
            begin_data_frame(&mut data, request.stream_id)?;
            data.put_slice(body.as_bytes())?;
            finish_frame(&mut data, true)?;

            Ok(vec![into_bytes(reply), into_bytes(data)])
        }
        CNTL_TYPE_PING => {
            let ping_id = decode_ping(&mut frame)?;
            let mut pong = FrameBuf::with_capacity(16);
            encode_ping(&mut pong, ping_id)?;
            Ok(vec![into_bytes(pong)])
        }
        _ => Ok(Vec::new()),
    }
}

fn into_bytes(mut frame: FrameBuf) -> Vec<u8> {
    frame.flip();
    frame.as_slice().to_vec()
}

fn deliver(callbacks: &dyn CoreCallbacks, bytes: &[u8]) {
    let Some(mut frame) = callbacks.on_read_ready() else {
        eprintln!("gateway: no buffer for an inbound frame");
        return;
    };
    frame.unfilled_mut()[..bytes.len()].copy_from_slice(bytes);
    callbacks.on_frame_received(frame, bytes.len());
}

impl TransportEngine for LoopbackGateway {
    fn init(&self, callbacks: Arc<dyn CoreCallbacks>, _: &str, _: &str, _: &str, _: &str) -> i32 {
        *self.callbacks.lock().unwrap() = Some(callbacks);
        RC_OK
    }

    fn run(&self) -> i32 {
        let Some(callbacks) = self.callbacks.lock().unwrap().clone() else {
            return -1;
        };
        callbacks.on_event_loop_started();

        while let Some(command) = self.next_command() {
            match command {
                'c' => {
                    self.set_state(&*callbacks, "C*****");
                    callbacks.on_gateway_connected();
                    self.set_state(&*callbacks, SIGNED_IN);
                }
                'd' => {
                    callbacks.on_gateway_reset();
                    self.set_state(&*callbacks, "D**YN*");
                }
                'W' => self.send_frames(&*callbacks),
                _ => {}
            }
        }
        RC_OK
    }

    fn yield_cmd(&self, command: char) -> i32 {
        self.inbox.lock().unwrap().commands.push_back(command);
        self.wake.notify_all();
        RC_OK
    }

    fn shutdown(&self) -> i32 {
        self.inbox.lock().unwrap().stopped = true;
        self.wake.notify_all();
        self.callbacks.lock().unwrap().take();
        RC_OK
    }

    fn state(&self) -> String {
        self.state.lock().unwrap().clone()
    }

    fn time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn set_proxy_server_worker(&self, _: &str, _: &str) -> i32 {
        RC_OK
    }

    fn ppkgen_worker(&self) -> i32 {
        RC_OK
    }

    fn csrgen_worker(&self, _: &[String]) -> i32 {
        RC_OK
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::builder()
        .app_name("gateway-demo")
        .storage_dir(std::env::temp_dir().display().to_string())
        .start(LoopbackGateway::new())
        .await?;

    client.connect()?;
    if !client.wait_ready(Duration::from_secs(5)).await {
        return Err("gateway never signed the client in".into());
    }
    println!("signed in as {}", client.client_id());

    let response = client.http().get("http://api.seacat/posts/1").await?;
    println!("{} {}", response.status(), response.headers()["content-type"].to_str()?);
    println!("{}", response.body().text().await?);

    println!("ping: {:?}", client.ping().await?);

    client.shutdown().await?;
    Ok(())
}
