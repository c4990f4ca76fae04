use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("riego-{prefix}-{}-{nanos}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_secs() as i64
}

fn token_expiring_in(secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "exp": now_secs() + secs,
            "iss": "RiegoAPI",
            "aud": "RiegoUsers",
            "unique_name": "agri1",
            "role": "Agricultor",
        })
        .to_string(),
    );
    format!("{header}.{payload}.c2ln")
}

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct Reply {
    status: u16,
    content_type: &'static str,
    /// Written one piece at a time with a pause in between
    pieces: Vec<Vec<u8>>,
}

impl Reply {
    fn json(status: u16, body: Value) -> Self {
        Reply {
            status,
            content_type: "application/json",
            pieces: vec![body.to_string().into_bytes()],
        }
    }

    fn ndjson(pieces: &[&str]) -> Self {
        Reply {
            status: 200,
            content_type: "application/x-ndjson",
            pieces: pieces.iter().map(|p| p.as_bytes().to_vec()).collect(),
        }
    }
}

/// Loopback HTTP/1.1 stub answering each request through `route`.
struct StubServer {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubServer {
    fn start<F>(route: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
        let port = listener.local_addr().expect("addr").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                if let Some(request) = read_request(&stream) {
                    let reply = route(&request);
                    seen.lock().unwrap().push(request);
                    write_reply(stream, reply);
                }
            }
        });
        StubServer {
            base_url: format!("http://127.0.0.1:{port}/api"),
            requests,
        }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn read_request(stream: &TcpStream) -> Option<Recorded> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;

    Some(Recorded {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn write_reply(mut stream: TcpStream, reply: Reply) {
    let length: usize = reply.pieces.iter().map(Vec::len).sum();
    let head = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {length}\r\nConnection: close\r\n\r\n",
        reply.status, reply.content_type
    );
    let _ = stream.write_all(head.as_bytes());
    for piece in reply.pieces {
        let _ = stream.write_all(&piece);
        let _ = stream.flush();
        thread::sleep(Duration::from_millis(20));
    }
}

fn run_riego(args: &[&str], home: &Path) -> (bool, Vec<u8>, Vec<u8>) {
    let bin = std::env::var("CARGO_BIN_EXE_riego").unwrap_or_else(|_| {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        if cfg!(windows) {
            path.push("riego.exe");
        } else {
            path.push("riego");
        }
        path.to_string_lossy().into_owned()
    });
    let output = Command::new(bin)
        .args(args)
        .env("HOME", home)
        .env("RIEGO_HOME", home)
        .env_remove("RIEGO_PASSWORD")
        .env_remove("RUST_LOG")
        .env_remove("XDG_CONFIG_HOME")
        .output()
        .expect("run riego");
    (output.status.success(), output.stdout, output.stderr)
}

fn stored(home: &Path) -> Value {
    match fs::read_to_string(home.join("storage.json")) {
        Ok(text) => serde_json::from_str(&text).expect("storage json"),
        Err(_) => json!({}),
    }
}

fn seed_storage(home: &Path, entries: Value) {
    fs::write(home.join("storage.json"), entries.to_string()).expect("seed storage");
}

#[test]
fn login_then_get_sends_bearer_token() {
    let home = unique_temp_dir("login-get");
    let token = token_expiring_in(3600);
    let reply_token = token.clone();
    let server = StubServer::start(move |req| match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/api/auth/login") => Reply::json(
            200,
            json!({"token": reply_token, "username": "agri1", "role": "Agricultor"}),
        ),
        ("GET", "/api/Cultivos") => Reply::json(200, json!([{"id": 1, "nombre": "Palta"}])),
        _ => Reply::json(404, json!({"message": "not found"})),
    });

    let (ok, stdout, stderr) = run_riego(
        &["--base-url", &server.base_url, "login", "-u", "agri1", "-p", "secret"],
        &home,
    );
    assert!(ok, "stderr: {}", String::from_utf8_lossy(&stderr));
    assert_eq!(
        String::from_utf8_lossy(&stdout).trim(),
        "Logged in as agri1 (Agricultor)."
    );
    let storage = stored(&home);
    assert_eq!(storage["token"].as_str(), Some(token.as_str()));
    assert_eq!(storage["username"], "agri1");
    assert_eq!(storage["role"], "Agricultor");

    let (ok, stdout, stderr) = run_riego(&["--base-url", &server.base_url, "get", "/Cultivos"], &home);
    assert!(ok, "stderr: {}", String::from_utf8_lossy(&stderr));
    let body: Value = serde_json::from_slice(&stdout).expect("json");
    assert_eq!(body, json!([{"id": 1, "nombre": "Palta"}]));

    let requests = server.requests();
    let login: Value = serde_json::from_str(&requests[0].body).expect("login body");
    assert_eq!(login, json!({"username": "agri1", "password": "secret"}));
    assert_eq!(requests[0].header("Authorization"), None);
    assert_eq!(
        requests[1].header("Authorization"),
        Some(format!("Bearer {token}").as_str())
    );
}

#[test]
fn rejected_login_shows_server_message() {
    let home = unique_temp_dir("login-rejected");
    let server = StubServer::start(|_| Reply::json(401, json!({"message": "Credenciales inválidas"})));

    let (ok, _stdout, stderr) = run_riego(
        &["--base-url", &server.base_url, "login", "-u", "agri1", "-p", "wrong"],
        &home,
    );
    assert!(!ok);
    assert!(String::from_utf8_lossy(&stderr).contains("Credenciales inválidas"));
    assert!(stored(&home).get("token").is_none());
}

#[test]
fn login_without_password_fails_before_network() {
    let home = unique_temp_dir("login-nopass");
    let (ok, _stdout, stderr) = run_riego(
        &["--base-url", "http://127.0.0.1:9/api", "login", "-u", "agri1"],
        &home,
    );
    assert!(!ok);
    assert!(String::from_utf8_lossy(&stderr).contains("RIEGO_PASSWORD"));
}

#[test]
fn status_with_expired_token_reports_logged_out_and_clears_storage() {
    let home = unique_temp_dir("status-expired");
    seed_storage(
        &home,
        json!({"token": token_expiring_in(-60), "username": "agri1", "role": "Agricultor"}),
    );

    let (ok, stdout, stderr) = run_riego(&["-j", "status"], &home);
    assert!(ok, "stderr: {}", String::from_utf8_lossy(&stderr));
    let status: Value = serde_json::from_slice(&stdout).expect("json");
    assert_eq!(status, json!({"authenticated": false}));
    assert_eq!(stored(&home), json!({}));
}

#[test]
fn status_with_valid_token_shows_identity() {
    let home = unique_temp_dir("status-valid");
    seed_storage(&home, json!({"token": token_expiring_in(3600), "username": "agri1"}));

    let (ok, stdout, stderr) = run_riego(&["-j", "--timezone", "UTC", "status"], &home);
    assert!(ok, "stderr: {}", String::from_utf8_lossy(&stderr));
    let status: Value = serde_json::from_slice(&stdout).expect("json");
    assert_eq!(status["authenticated"], true);
    assert_eq!(status["username"], "agri1");
    assert_eq!(status["role"], "Agricultor");
    assert_eq!(status["issuer"], "RiegoAPI");
    assert!(status["expires_in_secs"].as_i64().unwrap() > 3500);
}

#[test]
fn unauthorized_response_logs_out() {
    let home = unique_temp_dir("get-401");
    seed_storage(&home, json!({"token": token_expiring_in(3600), "username": "agri1"}));
    let server = StubServer::start(|_| Reply::json(401, json!({"message": "token revoked"})));

    let (ok, _stdout, stderr) = run_riego(&["--base-url", &server.base_url, "get", "/Sensores"], &home);
    assert!(!ok);
    assert!(String::from_utf8_lossy(&stderr).contains("401"));
    assert_eq!(stored(&home), json!({}));
    assert!(server.requests()[0].header("Authorization").is_some());
}

#[test]
fn send_put_carries_body_and_token() {
    let home = unique_temp_dir("send-put");
    seed_storage(&home, json!({"token": token_expiring_in(3600)}));
    let server = StubServer::start(|req| match (req.method.as_str(), req.path.as_str()) {
        ("PUT", "/api/cultivos/3") => Reply::json(200, json!({"id": 3, "nombre": "Palta Hass"})),
        _ => Reply::json(404, json!({"message": "not found"})),
    });

    let (ok, stdout, stderr) = run_riego(
        &[
            "--base-url",
            &server.base_url,
            "send",
            "put",
            "/cultivos/3",
            "--data",
            r#"{"nombre":"Palta Hass"}"#,
        ],
        &home,
    );
    assert!(ok, "stderr: {}", String::from_utf8_lossy(&stderr));
    let body: Value = serde_json::from_slice(&stdout).expect("json");
    assert_eq!(body["nombre"], "Palta Hass");

    let request = &server.requests()[0];
    assert_eq!(request.method, "PUT");
    assert_eq!(request.header("Content-Type"), Some("application/json"));
    assert!(request.header("Authorization").is_some_and(|v| v.starts_with("Bearer ")));
    let sent: Value = serde_json::from_str(&request.body).expect("request json");
    assert_eq!(sent, json!({"nombre": "Palta Hass"}));
}

#[test]
fn send_delete_unauthorized_logs_out() {
    let home = unique_temp_dir("send-401");
    seed_storage(&home, json!({"token": token_expiring_in(3600), "role": "Admin"}));
    let server = StubServer::start(|_| Reply::json(401, json!({"message": "token revoked"})));

    let (ok, _stdout, stderr) = run_riego(
        &["--base-url", &server.base_url, "send", "delete", "/users/7"],
        &home,
    );
    assert!(!ok);
    assert!(String::from_utf8_lossy(&stderr).contains("401"));
    assert_eq!(stored(&home), json!({}));
    assert_eq!(server.requests()[0].method, "DELETE");
}

#[test]
fn send_rejects_invalid_json_body() {
    let home = unique_temp_dir("send-bad-json");
    let (ok, _stdout, stderr) = run_riego(
        &["--base-url", "http://127.0.0.1:9/api", "send", "post", "/cultivos", "-d", "{nope"],
        &home,
    );
    assert!(!ok);
    assert!(String::from_utf8_lossy(&stderr).contains("--data is not valid JSON"));
}

#[test]
fn logout_without_session_succeeds() {
    let home = unique_temp_dir("logout");
    let (ok, stdout, _stderr) = run_riego(&["logout"], &home);
    assert!(ok);
    assert_eq!(String::from_utf8_lossy(&stdout).trim(), "Logged out.");
}

#[test]
fn stream_reassembles_records_split_across_chunks() {
    let home = unique_temp_dir("stream-split");
    seed_storage(&home, json!({"token": token_expiring_in(3600)}));
    let server = StubServer::start(|_| {
        Reply::ndjson(&[
            "{\"cultivo\":\"Ma",
            "íz\"}\n{\"cultivo\":\"Pa",
            "lta\"}\nnot json\n\n{\"cultivo\":\"Palta\"}",
        ])
    });

    let (ok, stdout, stderr) = run_riego(&["--base-url", &server.base_url, "-j", "stream"], &home);
    assert!(ok, "stderr: {}", String::from_utf8_lossy(&stderr));
    let records: Value = serde_json::from_slice(&stdout).expect("json");
    // the last line never got its newline, so it is not a record
    assert_eq!(records, json!([{"cultivo": "Maíz"}, {"cultivo": "Palta"}]));

    let request = &server.requests()[0];
    assert_eq!(request.path, "/api/Lecturas/geo-lecturas-stream");
    assert_eq!(request.header("Accept"), Some("application/x-ndjson"));
    assert!(request.header("Authorization").is_some());
}

#[test]
fn stream_groups_by_field() {
    let home = unique_temp_dir("stream-group");
    let server = StubServer::start(|_| {
        Reply::ndjson(&[
            "{\"cultivo\":\"Palta\"}\n{\"cultivo\":\"Maíz\"}\n",
            "{\"cultivo\":\"Palta\"}\n",
        ])
    });

    let (ok, stdout, stderr) = run_riego(
        &["--base-url", &server.base_url, "-j", "stream", "/Lecturas", "--group-by", "cultivo"],
        &home,
    );
    assert!(ok, "stderr: {}", String::from_utf8_lossy(&stderr));
    let groups: Value = serde_json::from_slice(&stdout).expect("json");
    assert_eq!(
        groups,
        json!([{"cultivo": "Palta", "count": 2}, {"cultivo": "Maíz", "count": 1}])
    );
}

#[test]
fn stream_progress_goes_to_stderr() {
    let home = unique_temp_dir("stream-progress");
    let server = StubServer::start(|_| Reply::ndjson(&["{\"id\":1}\n{\"id\":2}\n"]));

    let (ok, stdout, stderr) = run_riego(
        &["--base-url", &server.base_url, "--no-color", "stream"],
        &home,
    );
    assert!(ok, "stderr: {}", String::from_utf8_lossy(&stderr));
    let stderr = String::from_utf8_lossy(&stderr);
    assert!(stderr.contains("Connecting to server..."));
    assert!(stderr.contains("Records loaded"));
    let stdout = String::from_utf8_lossy(&stdout);
    assert!(stdout.contains("Records loaded"));
    assert!(stdout.contains("100%"));
}

#[test]
fn stream_server_error_exits_nonzero() {
    let home = unique_temp_dir("stream-500");
    let server = StubServer::start(|_| Reply::json(500, json!({"message": "boom"})));

    let (ok, _stdout, stderr) = run_riego(
        &["--base-url", &server.base_url, "-q", "--no-color", "stream"],
        &home,
    );
    assert!(!ok);
    assert!(String::from_utf8_lossy(&stderr).contains("Stream failed: HTTP 500"));
}
