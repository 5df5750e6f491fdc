use crate::config::ConnectionConfig;
use crate::error::{RdfsError, Result};
use crate::io::{FileHandle, OpenFlags, OpenMode};
use crate::proto;
use crate::proto::OpCode;
use crate::retry::RetryPolicy;
use crate::transport::Transport;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use prost::Message;

use tokio::sync::Mutex;

use tracing::{info, warn};

/// Metadata for one remote path, as reported by the namenode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub is_directory: bool,
    /// Milliseconds since the Unix epoch.
    pub mod_time: u64,
}

/// Filesystem-wide usage, as reported by the namenode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub capacity: u64,
    pub used: u64,
}

/// One logical connection to a namenode.
///
/// A `Session` is cheap to clone and safe to share between tasks; all
/// operations on the single underlying transport are serialized internally,
/// so callers need no external locking. File handles created by
/// [`Session::open`] stay bound to this session and become invalid once it
/// is disconnected.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Establishes the transport to the namenode named by `config` and
    /// performs the protocol handshake. Connection failures are retried
    /// under the config's retry policy before being surfaced.
    pub async fn connect(config: ConnectionConfig) -> Result<Session> {
        let retry = RetryPolicy::new(config.retry_max_attempts(), config.retry_base_delay());

        let mut attempt = 0;
        let transport = loop {
            match Transport::handshake(&config).await {
                Ok(transport) => break transport,
                Err(err) if err.is_retryable() && attempt < retry.max_attempts() => {
                    warn!(
                        "Connecting to namenode failed ({}), retry {} of {}",
                        err,
                        attempt + 1,
                        retry.max_attempts()
                    );
                    retry.backoff(attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        info!(
            "Connected to namenode at {}:{}",
            config.host(),
            config.port()
        );

        Ok(Session {
            inner: Arc::new(SessionInner {
                retry,
                transport: Mutex::new(Some(transport)),
                closed: AtomicBool::new(false),
                open_handles: AtomicU64::new(0),
                config,
            }),
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether `path` exists. Absence is a `false`, never an error.
    pub async fn exists(&self, path: impl Into<String>) -> Result<bool> {
        let request = proto::PathRequest { path: path.into() };
        let response: proto::ExistsResponse = self.inner.rpc(OpCode::Exists, &request).await?;
        Ok(response.exists)
    }

    pub async fn stat(&self, path: impl Into<String>) -> Result<FileInfo> {
        let request = proto::PathRequest { path: path.into() };
        let response: proto::StatResponse = self.inner.rpc(OpCode::Stat, &request).await?;
        Ok(FileInfo {
            path: response.path,
            size: response.size,
            is_directory: response.is_directory,
            mod_time: response.mod_time,
        })
    }

    pub async fn delete(&self, path: impl Into<String>) -> Result<()> {
        let request = proto::PathRequest { path: path.into() };
        let proto::EmptyMessage {} = self.inner.rpc(OpCode::Delete, &request).await?;
        Ok(())
    }

    pub async fn mkdir(&self, path: impl Into<String>) -> Result<()> {
        let request = proto::PathRequest { path: path.into() };
        let proto::EmptyMessage {} = self.inner.rpc(OpCode::Mkdir, &request).await?;
        Ok(())
    }

    /// Lists the entries of a directory.
    pub async fn ls(&self, path: impl Into<String>) -> Result<Vec<String>> {
        let request = proto::PathRequest { path: path.into() };
        let response: proto::LsResponse = self.inner.rpc(OpCode::Ls, &request).await?;
        Ok(response.files)
    }

    pub async fn rename(&self, src: impl Into<String>, dst: impl Into<String>) -> Result<()> {
        let request = proto::RenameRequest {
            src: src.into(),
            dst: dst.into(),
        };
        let proto::EmptyMessage {} = self.inner.rpc(OpCode::Rename, &request).await?;
        Ok(())
    }

    pub async fn fs_stats(&self) -> Result<FsStats> {
        let response: proto::FsStatsResponse =
            self.inner.rpc(OpCode::FsStats, &proto::EmptyMessage {}).await?;
        Ok(FsStats {
            capacity: response.capacity,
            used: response.used,
        })
    }

    /// Opens a stream to a remote file.
    ///
    /// Flag semantics: `create` makes the file if it is absent but refuses an
    /// existing file unless `truncate` (reset to length 0) or `append`
    /// (cursor at end-of-file) states what should happen to its content.
    pub async fn open(
        &self,
        path: impl Into<String>,
        mode: OpenMode,
        flags: OpenFlags,
    ) -> Result<FileHandle> {
        let path = path.into();

        if !mode.writable() && (flags.create || flags.truncate || flags.append) {
            return Err(RdfsError::InvalidArgument(format!(
                "create/truncate/append on {} require a writable mode",
                path
            )));
        }

        let request = proto::OpenRequest {
            path: path.clone(),
            mode: proto::FileMode::from(mode) as i32,
            create: flags.create,
            truncate: flags.truncate,
            append: flags.append,
        };
        let response: proto::OpenResponse = self.inner.rpc(OpCode::Open, &request).await?;

        self.inner.open_handles.fetch_add(1, Ordering::SeqCst);
        let position = if flags.append { response.size } else { 0 };

        Ok(FileHandle::new(
            Arc::clone(&self.inner),
            path,
            mode,
            response.handle_id,
            position,
            self.inner.config.io_buffer_size(),
        ))
    }

    /// Releases the transport. Idempotent; any further operation on this
    /// session or its handles fails with `SessionClosed`. Handles that are
    /// still open are invalidated, not closed; closing them remains the
    /// caller's responsibility.
    pub async fn disconnect(&self) -> Result<()> {
        let mut state = self.inner.transport.lock().await;
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let dangling = self.inner.open_handles.load(Ordering::SeqCst);
        if dangling > 0 {
            warn!(
                "Disconnecting from namenode with {} file handle(s) still open",
                dangling
            );
        }

        // dropping the stream releases the transport; `closed` makes this a
        // one-time transition
        *state = None;

        info!(
            "Disconnected from namenode at {}:{}",
            self.inner.config.host(),
            self.inner.config.port()
        );
        Ok(())
    }
}

pub(crate) struct SessionInner {
    config: ConnectionConfig,
    retry: RetryPolicy,
    transport: Mutex<Option<Transport>>,
    closed: AtomicBool,
    open_handles: AtomicU64,
}

impl SessionInner {
    /// Fails with `SessionClosed` once the session has been disconnected;
    /// handles check this before touching their local state.
    pub(crate) fn ensure_session_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RdfsError::SessionClosed);
        }
        Ok(())
    }

    /// Single entry point for every post-connect RPC. Serializes access to
    /// the transport, retries transient failures with backoff and
    /// re-establishes the connection first, since a failed exchange can
    /// leave the stream mid-message. Fatal failures surface immediately.
    pub(crate) async fn rpc<Req, Resp>(&self, op: OpCode, request: &Req) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut state = self.transport.lock().await;
        // re-checked under the lock: a disconnect may have won the race
        self.ensure_session_open()?;

        let mut attempt = 0;
        loop {
            let result = match state.as_mut() {
                Some(transport) => transport.call(op, request).await,
                None => match Transport::handshake(&self.config).await {
                    Ok(transport) => state.insert(transport).call(op, request).await,
                    Err(err) => Err(err),
                },
            };

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts() => {
                    *state = None;
                    warn!(
                        "{:?} failed ({}), retry {} of {}",
                        op,
                        err,
                        attempt + 1,
                        self.retry.max_attempts()
                    );
                    self.retry.backoff(attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub(crate) fn handle_released(&self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
