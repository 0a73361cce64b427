use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use rusqlite::Connection;
use tempfile::TempDir;

use crate::adapters::db::{open_connection, run_migrations};
use crate::domain::credentials::Credentials;

pub fn sample_credentials() -> Credentials {
    Credentials {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        username: "user@example.com".to_string(),
        password: "hunter2".to_string(),
        ..Credentials::default()
    }
}

/// A file path inside a scratch directory that is removed on drop.
pub struct TempPath {
    _dir: TempDir,
    path: PathBuf,
}

impl Deref for TempPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for TempPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

pub fn temp_path(name: &str) -> TempPath {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join(name);
    TempPath { _dir: dir, path }
}

/// Opens a migrated database. Keep the returned path alive while the
/// connection is used.
pub fn open_test_connection(name: &str) -> (TempPath, Connection) {
    let path = temp_path(name);
    let mut connection =
        open_connection(path.to_string_lossy().as_ref()).expect("test db should open");
    run_migrations(&mut connection).expect("test db migrations should succeed");
    (path, connection)
}

/// Base URL of a local port nothing is listening on.
pub fn unused_local_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("port listener should bind");
    let port = listener
        .local_addr()
        .expect("addr should be available")
        .port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

/// A bound listener that never accepts, so requests hang until the client
/// gives up. Keep the listener alive for the duration of the test.
pub fn silent_local_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("silent listener should bind");
    let port = listener
        .local_addr()
        .expect("addr should be available")
        .port();
    (listener, format!("http://127.0.0.1:{port}"))
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }
}

/// Answers one connection per scripted `(status, body)` pair, in order, then
/// stops accepting.
pub struct ScriptedHttpServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedHttpServer {
    pub fn start(script: Vec<(u16, &str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("responder should bind");
        let port = listener
            .local_addr()
            .expect("addr should be available")
            .port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let script: Vec<(u16, String)> = script
            .into_iter()
            .map(|(status, body)| (status, body.to_string()))
            .collect();

        thread::spawn(move || {
            for (status, body) in script {
                let Ok((stream, _)) = listener.accept() else {
                    break;
                };
                if serve_one(stream, status, &body, &recorded).is_err() {
                    break;
                }
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            requests,
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("request log lock should be available")
            .clone()
    }
}

fn serve_one(
    stream: TcpStream,
    status: u16,
    body: &str,
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut request_body = vec![0_u8; content_length];
    reader.read_exact(&mut request_body)?;

    recorded
        .lock()
        .expect("request log lock should be available")
        .push(RecordedRequest {
            method,
            path,
            headers,
            body: String::from_utf8_lossy(&request_body).into_owned(),
        });

    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()
}

mod tests {
    use super::temp_path;

    #[test]
    fn scratch_directory_is_removed_on_drop() {
        let path = temp_path("scratch.sqlite");
        let dir = path
            .parent()
            .expect("scratch path should have a directory")
            .to_path_buf();
        assert!(dir.exists());

        drop(path);

        assert!(!dir.exists());
    }
}
