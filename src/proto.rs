//! Wire messages exchanged with the namenode.
//!
//! Every request is an [`Operation`] header followed by an op-specific body,
//! every response an [`RpcStatus`] followed by a body iff the status is
//! [`StatusCode::Ok`]. All messages are length-delimited.

use bytes::Bytes;

/// Bumped whenever the message set changes incompatibly. Checked during the
/// connection handshake.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum OpCode {
    Handshake = 0,
    Exists = 1,
    Stat = 2,
    Delete = 3,
    Mkdir = 4,
    Ls = 5,
    Rename = 6,
    FsStats = 7,
    Open = 8,
    Read = 9,
    Write = 10,
    Flush = 11,
    CloseHandle = 12,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    NotFound = 1,
    AlreadyExists = 2,
    PermissionDenied = 3,
    /// The namenode cannot serve the request right now; clients retry.
    Busy = 4,
    /// The handle id is unknown on the namenode side.
    StaleHandle = 5,
    InvalidRequest = 6,
    Internal = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum FileMode {
    ReadOnly = 0,
    WriteOnly = 1,
    ReadWrite = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Operation {
    #[prost(enumeration = "OpCode", tag = "1")]
    pub op: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcStatus {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HandshakeRequest {
    #[prost(uint32, tag = "1")]
    pub protocol_version: u32,
    #[prost(string, optional, tag = "2")]
    pub credentials: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HandshakeResponse {
    #[prost(uint32, tag = "1")]
    pub protocol_version: u32,
}

/// Shared by exists/stat/delete/mkdir/ls.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PathRequest {
    #[prost(string, tag = "1")]
    pub path: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExistsResponse {
    #[prost(bool, tag = "1")]
    pub exists: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StatResponse {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(uint64, tag = "2")]
    pub size: u64,
    #[prost(bool, tag = "3")]
    pub is_directory: bool,
    /// Milliseconds since the Unix epoch.
    #[prost(uint64, tag = "4")]
    pub mod_time: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LsResponse {
    #[prost(string, repeated, tag = "1")]
    pub files: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RenameRequest {
    #[prost(string, tag = "1")]
    pub src: String,
    #[prost(string, tag = "2")]
    pub dst: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FsStatsResponse {
    #[prost(uint64, tag = "1")]
    pub capacity: u64,
    #[prost(uint64, tag = "2")]
    pub used: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct OpenRequest {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(enumeration = "FileMode", tag = "2")]
    pub mode: i32,
    #[prost(bool, tag = "3")]
    pub create: bool,
    #[prost(bool, tag = "4")]
    pub truncate: bool,
    #[prost(bool, tag = "5")]
    pub append: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct OpenResponse {
    #[prost(uint64, tag = "1")]
    pub handle_id: u64,
    /// File length at open time; the cursor starts here when appending.
    #[prost(uint64, tag = "2")]
    pub size: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReadRequest {
    #[prost(uint64, tag = "1")]
    pub handle_id: u64,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
    #[prost(uint64, tag = "3")]
    pub max_bytes: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReadResponse {
    /// Empty at end-of-file.
    #[prost(bytes = "bytes", tag = "1")]
    pub data: Bytes,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteRequest {
    #[prost(uint64, tag = "1")]
    pub handle_id: u64,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
    #[prost(bytes = "bytes", tag = "3")]
    pub data: Bytes,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteResponse {
    /// May be less than the request payload; callers continue from
    /// `offset + bytes_written`.
    #[prost(uint64, tag = "1")]
    pub bytes_written: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HandleRequest {
    #[prost(uint64, tag = "1")]
    pub handle_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FlushResponse {
    /// Offset up to which written data is acknowledged as durable.
    #[prost(uint64, tag = "1")]
    pub durable_size: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EmptyMessage {}
