use crate::error::{IoErrorKind, RdfsError, Result};
use crate::fs::session::SessionInner;
use crate::proto;
use crate::proto::OpCode;

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::{Buf, Bytes};

use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn readable(self) -> bool {
        matches!(self, OpenMode::ReadOnly | OpenMode::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, OpenMode::WriteOnly | OpenMode::ReadWrite)
    }
}

impl From<OpenMode> for proto::FileMode {
    fn from(mode: OpenMode) -> Self {
        match mode {
            OpenMode::ReadOnly => proto::FileMode::ReadOnly,
            OpenMode::WriteOnly => proto::FileMode::WriteOnly,
            OpenMode::ReadWrite => proto::FileMode::ReadWrite,
        }
    }
}

/// Open-time behavior, one explicit flag per concern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Create the file if it is absent.
    pub create: bool,
    /// Reset an existing file to length 0.
    pub truncate: bool,
    /// Start the cursor at end-of-file.
    pub append: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HandleState {
    Open,
    Closed,
}

/// One open stream to a remote file.
///
/// Writes are staged in an internal buffer and shipped as offset-tagged
/// requests when the buffer fills, on `flush`, or on `close`; reads are
/// served from an internal chunk fetched one buffer at a time. All I/O
/// requires `&mut self`, so a handle serves one caller at a time; open
/// separate handles for concurrent access.
pub struct FileHandle {
    session: Arc<SessionInner>,
    handle_id: u64,
    path: String,
    mode: OpenMode,
    state: HandleState,
    position: u64,
    // bytes accepted by `write` but not yet shipped; they occupy the file
    // range [position - pending.len(), position)
    pending: Vec<u8>,
    chunk: Bytes,
    buffer_size: usize,
}

impl FileHandle {
    pub(crate) fn new(
        session: Arc<SessionInner>,
        path: String,
        mode: OpenMode,
        handle_id: u64,
        position: u64,
        buffer_size: usize,
    ) -> Self {
        Self {
            session,
            handle_id,
            path,
            mode,
            state: HandleState::Open,
            position,
            pending: Vec::new(),
            chunk: Bytes::new(),
            buffer_size,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Current cursor offset in the file.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_open(&self) -> bool {
        self.state == HandleState::Open
    }

    /// Accepts up to the free space of the internal buffer and returns how
    /// many bytes were taken, which may be less than `buf.len()`. Callers
    /// loop until the whole payload is consumed.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let free = self.buffer_size - self.pending.len();
        let accepted = buf.len().min(free);
        self.pending.extend_from_slice(&buf[..accepted]);
        self.position += accepted as u64;
        // the cached read chunk no longer lines up with the cursor
        self.chunk = Bytes::new();

        if self.pending.len() == self.buffer_size {
            self.transmit_pending().await?;
        }

        Ok(accepted)
    }

    /// Ships buffered bytes and asks the namenode to make them durable.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.sync().await
    }

    /// Fills `buf` from the current position and returns the number of bytes
    /// read; 0 means end-of-file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_readable()?;
        if buf.is_empty() {
            return Ok(0);
        }

        // reads observe writes staged on this handle
        if self.mode.writable() && !self.pending.is_empty() {
            self.transmit_pending().await?;
        }

        if !self.chunk.has_remaining() {
            let request = proto::ReadRequest {
                handle_id: self.handle_id,
                offset: self.position,
                max_bytes: self.buffer_size as u64,
            };
            let response: proto::ReadResponse = self.session.rpc(OpCode::Read, &request).await?;
            if response.data.is_empty() {
                return Ok(0);
            }
            self.chunk = response.data;
        }

        let read = buf.len().min(self.chunk.remaining());
        self.chunk.copy_to_slice(&mut buf[..read]);
        self.position += read as u64;

        Ok(read)
    }

    /// Moves the cursor. `SeekFrom::End` consults the namenode for the
    /// current file length; a negative resolved offset is rejected.
    pub async fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        self.ensure_open()?;

        if self.mode.writable() && !self.pending.is_empty() {
            self.transmit_pending().await?;
        }

        let offset = match target {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => {
                let request = proto::PathRequest {
                    path: self.path.clone(),
                };
                let response: proto::StatResponse =
                    self.session.rpc(OpCode::Stat, &request).await?;
                response.size as i128 + delta as i128
            }
        };
        if offset < 0 {
            return Err(RdfsError::InvalidArgument(format!(
                "cannot seek to negative offset {} in {}",
                offset, self.path
            )));
        }

        self.chunk = Bytes::new();
        self.position = offset as u64;
        Ok(self.position)
    }

    /// Closes the handle. Idempotent. The handle is released on every path;
    /// if the final flush of buffered data fails, the failure is returned
    /// but the handle still transitions to closed.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == HandleState::Closed {
            return Ok(());
        }
        self.state = HandleState::Closed;
        self.session.handle_released();

        let flushed = if self.mode.writable() {
            self.sync().await
        } else {
            Ok(())
        };

        let request = proto::HandleRequest {
            handle_id: self.handle_id,
        };
        let released: Result<proto::EmptyMessage> =
            self.session.rpc(OpCode::CloseHandle, &request).await;
        if let Err(err) = released {
            debug!("Could not release {} on the namenode: {}", self.path, err);
        }

        if let Err(ref err) = flushed {
            warn!(
                "Closed {} but buffered data could not be flushed: {}",
                self.path, err
            );
        }
        flushed
    }

    async fn sync(&mut self) -> Result<()> {
        self.transmit_pending().await?;

        let request = proto::HandleRequest {
            handle_id: self.handle_id,
        };
        let response: proto::FlushResponse = self.session.rpc(OpCode::Flush, &request).await?;
        debug!("{} durable up to byte {}", self.path, response.durable_size);

        Ok(())
    }

    /// Ships the pending buffer as offset-tagged write requests, looping
    /// while the namenode accepts less than it was offered.
    async fn transmit_pending(&mut self) -> Result<()> {
        while !self.pending.is_empty() {
            let offset = self.position - self.pending.len() as u64;
            let request = proto::WriteRequest {
                handle_id: self.handle_id,
                offset,
                data: Bytes::copy_from_slice(&self.pending),
            };
            let response: proto::WriteResponse = self.session.rpc(OpCode::Write, &request).await?;

            let written = (response.bytes_written as usize).min(self.pending.len());
            if written == 0 {
                return Err(RdfsError::IOError(
                    IoErrorKind::Fatal,
                    format!("namenode accepted no bytes for {}", self.path),
                ));
            }
            self.pending.drain(..written);
        }

        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == HandleState::Closed {
            return Err(RdfsError::InvalidHandle(format!(
                "{} is closed",
                self.path
            )));
        }
        // a disconnect invalidates every handle of the session
        self.session.ensure_session_open()
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.mode.writable() {
            Ok(())
        } else {
            Err(RdfsError::InvalidHandle(format!(
                "{} is not open for writing",
                self.path
            )))
        }
    }

    fn ensure_readable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.mode.readable() {
            Ok(())
        } else {
            Err(RdfsError::InvalidHandle(format!(
                "{} is not open for reading",
                self.path
            )))
        }
    }
}
