//! End-to-end exercises of the control-channel state machine over real
//! sockets, using the in-memory backend in `support`.
mod support;

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use support::MemAuthenticator;
use wharf::Server;

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, writer) = stream.into_split();
        Self { reader: BufReader::new(read_half), writer }
    }

    async fn read_reply(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.expect("read reply");
        // multi-line replies: keep reading until a line with a space right
        // after the code (not a dash) at the same code.
        if line.len() > 3 && line.as_bytes()[3] == b'-' {
            let code = line[..3].to_string();
            loop {
                let mut next = String::new();
                self.reader.read_line(&mut next).await.expect("read continuation");
                line.push_str(&next);
                if next.starts_with(&format!("{code} ")) {
                    break;
                }
            }
        }
        line
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\r\n").as_bytes()).await.expect("send command");
    }

    async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.read_reply().await
    }
}

fn spawn_server() -> (MemAuthenticator, support::MemFs) {
    MemAuthenticator::new("alice", "secret")
}

async fn start(authenticator: MemAuthenticator) -> std::net::SocketAddr {
    let server = Server::builder(authenticator).build();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

async fn login(client: &mut Client) {
    let greeting = client.read_reply().await;
    assert!(greeting.starts_with("220"), "unexpected greeting: {greeting}");
    assert!(client.command("USER alice").await.starts_with("331"));
    assert!(client.command("PASS secret").await.starts_with("230"));
}

#[tokio::test]
async fn rejects_commands_before_login() {
    let (authenticator, _fs) = spawn_server();
    let addr = start(authenticator).await;
    let mut client = Client::connect(addr).await;
    let _ = client.read_reply().await;
    let reply = client.command("PWD").await;
    assert!(reply.starts_with("530"), "expected 530, got {reply}");
}

#[tokio::test]
async fn rejects_bad_password() {
    let (authenticator, _fs) = spawn_server();
    let addr = start(authenticator).await;
    let mut client = Client::connect(addr).await;
    let _ = client.read_reply().await;
    assert!(client.command("USER alice").await.starts_with("331"));
    let reply = client.command("PASS wrong").await;
    assert!(reply.starts_with("530"), "expected 530, got {reply}");
}

#[tokio::test]
async fn login_then_pwd_and_mkd() {
    let (authenticator, _fs) = spawn_server();
    let addr = start(authenticator).await;
    let mut client = Client::connect(addr).await;
    login(&mut client).await;

    let pwd = client.command("PWD").await;
    assert!(pwd.contains("\"/\""), "unexpected PWD reply: {pwd}");

    let mkd = client.command("MKD uploads").await;
    assert!(mkd.starts_with("257"), "unexpected MKD reply: {mkd}");

    let cwd = client.command("CWD uploads").await;
    assert!(cwd.starts_with("250"), "unexpected CWD reply: {cwd}");
}

fn parse_pasv_port(reply: &str) -> u16 {
    let start = reply.find('(').expect("no PASV tuple");
    let end = reply.find(')').expect("no PASV tuple end");
    let nums: Vec<u16> = reply[start + 1..end].split(',').map(|s| s.trim().parse().unwrap()).collect();
    nums[4] * 256 + nums[5]
}

#[tokio::test]
async fn stor_then_retr_round_trips_contents() {
    let (authenticator, _fs) = spawn_server();
    let addr = start(authenticator).await;
    let mut client = Client::connect(addr).await;
    login(&mut client).await;
    assert!(client.command("TYPE I").await.starts_with("200"));

    let pasv_reply = client.command("PASV").await;
    assert!(pasv_reply.starts_with("227"), "unexpected PASV reply: {pasv_reply}");
    let port = parse_pasv_port(&pasv_reply);

    client.send("STOR greeting.txt").await;
    let mut data_conn = TcpStream::connect(("127.0.0.1", port)).await.expect("connect data channel");
    let starting = client.read_reply().await;
    assert!(starting.starts_with("150"), "unexpected STOR starting reply: {starting}");
    data_conn.write_all(b"hello from the data channel").await.expect("write data");
    data_conn.shutdown().await.expect("shutdown data channel");
    let completed = client.read_reply().await;
    assert!(completed.starts_with("226"), "unexpected STOR completion reply: {completed}");

    let pasv_reply = client.command("PASV").await;
    let port = parse_pasv_port(&pasv_reply);
    client.send("RETR greeting.txt").await;
    let mut data_conn = TcpStream::connect(("127.0.0.1", port)).await.expect("connect data channel");
    let starting = client.read_reply().await;
    assert!(starting.starts_with("150"), "unexpected RETR starting reply: {starting}");
    let mut received = Vec::new();
    data_conn.read_to_end(&mut received).await.expect("read data");
    let completed = client.read_reply().await;
    assert!(completed.starts_with("226"), "unexpected RETR completion reply: {completed}");
    assert_eq!(received, b"hello from the data channel");
}

#[tokio::test]
async fn abor_with_no_transfer_in_progress_replies_226() {
    let (authenticator, _fs) = spawn_server();
    let addr = start(authenticator).await;
    let mut client = Client::connect(addr).await;
    login(&mut client).await;
    let reply = client.command("ABOR").await;
    assert!(reply.starts_with("226"), "unexpected ABOR reply: {reply}");
    assert!(reply.to_lowercase().contains("no transfer"));
}

#[tokio::test]
async fn port_bounce_attack_is_rejected() {
    let (authenticator, _fs) = spawn_server();
    let addr = start(authenticator).await;
    let mut client = Client::connect(addr).await;
    login(&mut client).await;

    // PORT advertises an address other than the control connection's own
    // peer IP, which must be refused regardless of its validity as a host.
    let reply = client.command("PORT 10,0,0,1,4,1").await;
    assert!(reply.starts_with("500"), "expected bounce-attack rejection, got {reply}");
}

#[tokio::test]
async fn oversized_command_line_closes_connection() {
    let (authenticator, _fs) = spawn_server();
    let addr = start(authenticator).await;
    let mut client = Client::connect(addr).await;
    let _ = client.read_reply().await;

    let oversized = "A".repeat(5000);
    client.writer.write_all(oversized.as_bytes()).await.expect("write oversized line");
    client.writer.write_all(b"\r\n").await.expect("write terminator");

    let reply = client.read_reply().await;
    assert!(reply.starts_with("500"), "expected line-too-long rejection, got {reply}");

    // the control loop breaks out after this; further reads should hit EOF.
    let mut buf = [0u8; 8];
    let result = tokio::time::timeout(Duration::from_secs(2), client.reader.read(&mut buf)).await;
    match result {
        Ok(Ok(0)) => {}
        Ok(Ok(n)) => panic!("expected EOF, read {n} more bytes"),
        Ok(Err(err)) => panic!("read error: {err}"),
        Err(_) => panic!("connection was not closed after oversized line"),
    }
}

#[tokio::test]
async fn feat_lists_supported_extensions() {
    let (authenticator, _fs) = spawn_server();
    let addr = start(authenticator).await;
    let mut client = Client::connect(addr).await;
    login(&mut client).await;
    let reply = client.command("FEAT").await;
    assert!(reply.starts_with("211-") || reply.starts_with("211"), "unexpected FEAT reply: {reply}");
    assert!(reply.contains("MDTM"));
    assert!(reply.contains("HASH"));
}

#[tokio::test]
async fn idle_read_timeout_closes_connection_with_421() {
    let (authenticator, _fs) = spawn_server();
    let server = Server::builder(authenticator).read_timeout(Duration::from_millis(150)).build();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let mut client = Client::connect(addr).await;
    let greeting = client.read_reply().await;
    assert!(greeting.starts_with("220"));

    let reply = client.read_reply().await;
    assert!(reply.starts_with("421"), "expected idle-timeout 421, got {reply}");
}

struct RecordingSink {
    records: std::sync::Mutex<Vec<wharf::XferLogRecord>>,
}

impl wharf::XferLogSink for RecordingSink {
    fn record(&self, record: &wharf::XferLogRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

#[tokio::test]
async fn xferlog_sink_records_completed_upload() {
    let (authenticator, _fs) = spawn_server();
    let sink = std::sync::Arc::new(RecordingSink { records: std::sync::Mutex::new(Vec::new()) });
    let server = Server::builder(authenticator).xferlog(sink.clone()).build();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let mut client = Client::connect(addr).await;
    login(&mut client).await;

    let pasv_reply = client.command("PASV").await;
    let port = parse_pasv_port(&pasv_reply);
    client.send("STOR upload.bin").await;
    let mut data_conn = TcpStream::connect(("127.0.0.1", port)).await.expect("connect data channel");
    assert!(client.read_reply().await.starts_with("150"));
    data_conn.write_all(b"twelve bytes").await.expect("write data");
    data_conn.shutdown().await.expect("shutdown data channel");
    assert!(client.read_reply().await.starts_with("226"));

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "upload.bin");
    assert_eq!(records[0].direction, wharf::XferDirection::Upload);
    assert_eq!(records[0].bytes, 12);
    assert!(records[0].completed);
}

#[tokio::test]
async fn rate_limiter_hook_is_applied_to_data_connections() {
    let (authenticator, _fs) = spawn_server();
    let invocations = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = invocations.clone();
    let server = Server::builder(authenticator)
        .rate_limiter(std::sync::Arc::new(move |stream, _username| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            stream
        }))
        .build();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let mut client = Client::connect(addr).await;
    login(&mut client).await;

    let pasv_reply = client.command("PASV").await;
    let port = parse_pasv_port(&pasv_reply);
    client.send("STOR limited.bin").await;
    let mut data_conn = TcpStream::connect(("127.0.0.1", port)).await.expect("connect data channel");
    assert!(client.read_reply().await.starts_with("150"));
    data_conn.write_all(b"data").await.expect("write data");
    data_conn.shutdown().await.expect("shutdown data channel");
    assert!(client.read_reply().await.starts_with("226"));

    assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 1);
}
