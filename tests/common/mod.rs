//! In-process namenode used by the integration tests: a real TCP server
//! speaking the client wire protocol over an in-memory tree, with knobs to
//! inject the failure modes the client must survive.

use rdfs::config::{ConnectionConfig, ConnectionConfigBuilder};
use rdfs::proto;
use rdfs::proto::{OpCode, StatusCode};
use rdfs::utils::proto_utils::parse_message;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use prost::Message;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};

pub struct MockNameNode {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: oneshot::Sender<()>,
}

impl MockNameNode {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Should bind an ephemeral port");
        let addr = listener.local_addr().expect("Should have a local address");
        let state = Arc::new(ServerState::default());

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        return;
                    },
                    incoming = listener.accept() => {
                        let Ok((socket, _)) = incoming else { return };
                        let state = Arc::clone(&accept_state);
                        tokio::spawn(async move {
                            let _ = handle_connection(state, socket).await;
                        });
                    }
                };
            }
        });

        Self {
            addr,
            state,
            shutdown_tx,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Builder preconfigured for this namenode, with retry delays suited to
    /// tests.
    pub fn client_config(&self) -> ConnectionConfigBuilder {
        ConnectionConfig::builder(self.host(), self.port())
            .connect_timeout_ms(1_000)
            .io_timeout_ms(2_000)
            .retry_base_delay_ms(1)
    }

    /// Respond `Busy` to the next `n` read/write/flush requests.
    pub fn inject_busy(&self, n: u32) {
        self.state.faults.busy_ops.store(n, Ordering::SeqCst);
    }

    pub fn remaining_busy(&self) -> u32 {
        self.state.faults.busy_ops.load(Ordering::SeqCst)
    }

    /// Accept at most `bytes` per write request.
    pub fn cap_writes(&self, bytes: usize) {
        self.state.faults.write_cap.store(bytes, Ordering::SeqCst);
    }

    /// Close the connection mid-exchange for the next `n` read/write/flush
    /// requests.
    pub fn drop_connections(&self, n: u32) {
        self.state.faults.drop_connections.store(n, Ordering::SeqCst);
    }

    /// Advertise a different protocol version during handshakes.
    pub fn advertise_version(&self, version: u32) {
        self.state
            .faults
            .advertised_version
            .store(version, Ordering::SeqCst);
    }

    /// Reject handshakes that do not carry exactly this credential token.
    pub fn require_token(&self, token: impl Into<String>) {
        let mut required = self.state.required_token.lock().expect("Should lock");
        *required = Some(token.into());
    }

    /// Make delete/open-for-write on `path` fail with `PermissionDenied`.
    pub fn protect(&self, path: impl Into<String>) {
        let mut protected = self.state.protected.lock().expect("Should lock");
        protected.insert(path.into());
    }

    pub async fn insert_file(&self, path: impl Into<String>, data: &[u8]) {
        let mut tree = self.state.tree.lock().await;
        tree.files.insert(
            path.into(),
            Node {
                data: data.to_vec(),
                is_directory: false,
                mod_time: now_millis(),
            },
        );
    }

    pub async fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        let tree = self.state.tree.lock().await;
        tree.files.get(path).map(|node| node.data.clone())
    }

    pub async fn open_handle_count(&self) -> usize {
        let tree = self.state.tree.lock().await;
        tree.handles.len()
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Default)]
struct ServerState {
    tree: Mutex<Tree>,
    next_handle_id: AtomicU64,
    faults: Faults,
    required_token: std::sync::Mutex<Option<String>>,
    protected: std::sync::Mutex<HashSet<String>>,
}

#[derive(Default)]
struct Tree {
    files: HashMap<String, Node>,
    handles: HashMap<u64, OpenHandle>,
}

struct Node {
    data: Vec<u8>,
    is_directory: bool,
    mod_time: u64,
}

struct OpenHandle {
    path: String,
}

struct Faults {
    busy_ops: AtomicU32,
    write_cap: AtomicUsize,
    drop_connections: AtomicU32,
    advertised_version: AtomicU32,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            busy_ops: AtomicU32::new(0),
            write_cap: AtomicUsize::new(0),
            drop_connections: AtomicU32::new(0),
            advertised_version: AtomicU32::new(proto::PROTOCOL_VERSION),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Should be after the epoch")
        .as_millis() as u64
}

async fn handle_connection(
    state: Arc<ServerState>,
    socket: TcpStream,
) -> rdfs::error::Result<()> {
    let mut stream = BufStream::new(socket);

    loop {
        let operation: proto::Operation = match parse_message(&mut stream).await {
            Ok(operation) => operation,
            // client hung up
            Err(_) => return Ok(()),
        };
        let Ok(op) = OpCode::try_from(operation.op) else {
            return Ok(());
        };

        let keep_going = dispatch(&state, &mut stream, op).await?;
        if !keep_going {
            return Ok(());
        }
    }
}

/// Handles one request; returns `false` when the connection should be
/// dropped without a response (fault injection).
async fn dispatch(
    state: &Arc<ServerState>,
    stream: &mut BufStream<TcpStream>,
    op: OpCode,
) -> rdfs::error::Result<bool> {
    match op {
        OpCode::Handshake => {
            let request: proto::HandshakeRequest = parse_message(stream).await?;
            let required = state.required_token.lock().expect("Should lock").clone();
            if let Some(required) = required {
                if request.credentials.as_deref() != Some(required.as_str()) {
                    respond_err(stream, StatusCode::PermissionDenied, "bad credentials").await?;
                    return Ok(true);
                }
            }
            let response = proto::HandshakeResponse {
                protocol_version: state.faults.advertised_version.load(Ordering::SeqCst),
            };
            respond(stream, &response).await?;
        }
        OpCode::Exists => {
            let request: proto::PathRequest = parse_message(stream).await?;
            let tree = state.tree.lock().await;
            let exists = request.path == "/" || tree.files.contains_key(&request.path);
            respond(stream, &proto::ExistsResponse { exists }).await?;
        }
        OpCode::Stat => {
            let request: proto::PathRequest = parse_message(stream).await?;
            let tree = state.tree.lock().await;
            if request.path == "/" {
                let response = proto::StatResponse {
                    path: request.path,
                    size: 0,
                    is_directory: true,
                    mod_time: 0,
                };
                respond(stream, &response).await?;
            } else {
                match tree.files.get(&request.path) {
                    Some(node) => {
                        let response = proto::StatResponse {
                            path: request.path,
                            size: node.data.len() as u64,
                            is_directory: node.is_directory,
                            mod_time: node.mod_time,
                        };
                        respond(stream, &response).await?;
                    }
                    None => {
                        respond_err(stream, StatusCode::NotFound, &request.path).await?;
                    }
                }
            }
        }
        OpCode::Delete => {
            let request: proto::PathRequest = parse_message(stream).await?;
            if is_protected(state, &request.path) {
                respond_err(stream, StatusCode::PermissionDenied, &request.path).await?;
                return Ok(true);
            }
            let mut tree = state.tree.lock().await;
            if tree.files.remove(&request.path).is_none() {
                respond_err(stream, StatusCode::NotFound, &request.path).await?;
                return Ok(true);
            }
            // remove anything nested below a deleted directory
            let prefix = format!("{}/", request.path);
            tree.files.retain(|path, _| !path.starts_with(&prefix));
            respond(stream, &proto::EmptyMessage {}).await?;
        }
        OpCode::Mkdir => {
            let request: proto::PathRequest = parse_message(stream).await?;
            let mut tree = state.tree.lock().await;
            if tree.files.contains_key(&request.path) {
                respond_err(stream, StatusCode::AlreadyExists, &request.path).await?;
                return Ok(true);
            }
            for ancestor in ancestors(&request.path) {
                tree.files.entry(ancestor).or_insert_with(|| Node {
                    data: Vec::new(),
                    is_directory: true,
                    mod_time: now_millis(),
                });
            }
            respond(stream, &proto::EmptyMessage {}).await?;
        }
        OpCode::Ls => {
            let request: proto::PathRequest = parse_message(stream).await?;
            let tree = state.tree.lock().await;
            let is_directory = request.path == "/"
                || tree
                    .files
                    .get(&request.path)
                    .map(|node| node.is_directory)
                    .unwrap_or(false);
            if !is_directory && !tree.files.contains_key(&request.path) {
                respond_err(stream, StatusCode::NotFound, &request.path).await?;
                return Ok(true);
            }
            if !is_directory {
                respond_err(stream, StatusCode::InvalidRequest, "not a directory").await?;
                return Ok(true);
            }
            let prefix = if request.path == "/" {
                String::from("/")
            } else {
                format!("{}/", request.path)
            };
            let files = tree
                .files
                .keys()
                .filter_map(|path| path.strip_prefix(&prefix))
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(String::from)
                .collect();
            respond(stream, &proto::LsResponse { files }).await?;
        }
        OpCode::Rename => {
            let request: proto::RenameRequest = parse_message(stream).await?;
            let mut tree = state.tree.lock().await;
            match tree.files.remove(&request.src) {
                Some(node) => {
                    tree.files.insert(request.dst, node);
                    respond(stream, &proto::EmptyMessage {}).await?;
                }
                None => {
                    respond_err(stream, StatusCode::NotFound, &request.src).await?;
                }
            }
        }
        OpCode::FsStats => {
            let _request: proto::EmptyMessage = parse_message(stream).await?;
            let tree = state.tree.lock().await;
            let used = tree
                .files
                .values()
                .map(|node| node.data.len() as u64)
                .sum();
            let response = proto::FsStatsResponse {
                capacity: 1 << 40,
                used,
            };
            respond(stream, &response).await?;
        }
        OpCode::Open => {
            let request: proto::OpenRequest = parse_message(stream).await?;
            let writable = request.mode != proto::FileMode::ReadOnly as i32;
            if writable && is_protected(state, &request.path) {
                respond_err(stream, StatusCode::PermissionDenied, &request.path).await?;
                return Ok(true);
            }
            let mut tree = state.tree.lock().await;
            if tree.files.contains_key(&request.path) {
                let node = tree
                    .files
                    .get_mut(&request.path)
                    .expect("Should be present");
                if node.is_directory {
                    respond_err(stream, StatusCode::InvalidRequest, "is a directory").await?;
                    return Ok(true);
                }
                if request.create && !request.truncate && !request.append {
                    respond_err(stream, StatusCode::AlreadyExists, &request.path).await?;
                    return Ok(true);
                }
                if request.truncate {
                    node.data.clear();
                    node.mod_time = now_millis();
                }
            } else {
                if !request.create {
                    respond_err(stream, StatusCode::NotFound, &request.path).await?;
                    return Ok(true);
                }
                tree.files.insert(
                    request.path.clone(),
                    Node {
                        data: Vec::new(),
                        is_directory: false,
                        mod_time: now_millis(),
                    },
                );
            }
            let size = tree.files[&request.path].data.len() as u64;
            let handle_id = state.next_handle_id.fetch_add(1, Ordering::SeqCst) + 1;
            tree.handles.insert(
                handle_id,
                OpenHandle {
                    path: request.path,
                },
            );
            respond(stream, &proto::OpenResponse { handle_id, size }).await?;
        }
        OpCode::Read => {
            let request: proto::ReadRequest = parse_message(stream).await?;
            if consume(&state.faults.drop_connections) {
                return Ok(false);
            }
            if consume(&state.faults.busy_ops) {
                respond_err(stream, StatusCode::Busy, "namenode busy").await?;
                return Ok(true);
            }
            let tree = state.tree.lock().await;
            let Some(handle) = tree.handles.get(&request.handle_id) else {
                respond_err(stream, StatusCode::StaleHandle, "unknown handle").await?;
                return Ok(true);
            };
            let Some(node) = tree.files.get(&handle.path) else {
                respond_err(stream, StatusCode::NotFound, &handle.path).await?;
                return Ok(true);
            };
            let start = (request.offset as usize).min(node.data.len());
            let end = (start + request.max_bytes as usize).min(node.data.len());
            let response = proto::ReadResponse {
                data: Bytes::copy_from_slice(&node.data[start..end]),
            };
            respond(stream, &response).await?;
        }
        OpCode::Write => {
            let request: proto::WriteRequest = parse_message(stream).await?;
            if consume(&state.faults.drop_connections) {
                return Ok(false);
            }
            if consume(&state.faults.busy_ops) {
                respond_err(stream, StatusCode::Busy, "namenode busy").await?;
                return Ok(true);
            }
            let mut tree = state.tree.lock().await;
            let Some(handle) = tree.handles.get(&request.handle_id) else {
                respond_err(stream, StatusCode::StaleHandle, "unknown handle").await?;
                return Ok(true);
            };
            let path = handle.path.clone();
            let Some(node) = tree.files.get_mut(&path) else {
                respond_err(stream, StatusCode::NotFound, &path).await?;
                return Ok(true);
            };

            let cap = state.faults.write_cap.load(Ordering::SeqCst);
            let accepted = if cap == 0 {
                request.data.len()
            } else {
                request.data.len().min(cap)
            };
            let offset = request.offset as usize;
            if node.data.len() < offset {
                node.data.resize(offset, 0);
            }
            let overlap = (node.data.len() - offset).min(accepted);
            node.data[offset..offset + overlap].copy_from_slice(&request.data[..overlap]);
            node.data.extend_from_slice(&request.data[overlap..accepted]);
            node.mod_time = now_millis();

            let response = proto::WriteResponse {
                bytes_written: accepted as u64,
            };
            respond(stream, &response).await?;
        }
        OpCode::Flush => {
            let request: proto::HandleRequest = parse_message(stream).await?;
            if consume(&state.faults.drop_connections) {
                return Ok(false);
            }
            if consume(&state.faults.busy_ops) {
                respond_err(stream, StatusCode::Busy, "namenode busy").await?;
                return Ok(true);
            }
            let tree = state.tree.lock().await;
            let durable_size = tree
                .handles
                .get(&request.handle_id)
                .and_then(|handle| tree.files.get(&handle.path))
                .map(|node| node.data.len() as u64)
                .unwrap_or(0);
            respond(stream, &proto::FlushResponse { durable_size }).await?;
        }
        OpCode::CloseHandle => {
            let request: proto::HandleRequest = parse_message(stream).await?;
            let mut tree = state.tree.lock().await;
            tree.handles.remove(&request.handle_id);
            respond(stream, &proto::EmptyMessage {}).await?;
        }
    }

    Ok(true)
}

fn is_protected(state: &ServerState, path: &str) -> bool {
    state
        .protected
        .lock()
        .expect("Should lock")
        .contains(path)
}

fn consume(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// "/a/b/c" -> ["/a", "/a/b", "/a/b/c"]
fn ancestors(path: &str) -> Vec<String> {
    let mut result = vec![];
    let mut current = String::new();
    for part in path.split('/').filter(|part| !part.is_empty()) {
        current.push('/');
        current.push_str(part);
        result.push(current.clone());
    }
    result
}

async fn respond<M: Message>(
    stream: &mut (impl AsyncWrite + Unpin),
    body: &M,
) -> rdfs::error::Result<()> {
    let mut buffer = vec![];
    proto::RpcStatus {
        code: StatusCode::Ok as i32,
        message: String::new(),
    }
    .encode_length_delimited(&mut buffer)?;
    body.encode_length_delimited(&mut buffer)?;
    stream.write_all(&buffer).await?;
    stream.flush().await?;
    Ok(())
}

async fn respond_err(
    stream: &mut (impl AsyncWrite + Unpin),
    code: StatusCode,
    message: &str,
) -> rdfs::error::Result<()> {
    let mut buffer = vec![];
    proto::RpcStatus {
        code: code as i32,
        message: message.to_owned(),
    }
    .encode_length_delimited(&mut buffer)?;
    stream.write_all(&buffer).await?;
    stream.flush().await?;
    Ok(())
}
