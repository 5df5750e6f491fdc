use crate::config::ConnectionConfig;
use crate::error::{IoErrorKind, RdfsError, Result};
use crate::proto;
use crate::proto::{OpCode, StatusCode};
use crate::utils::proto_utils::parse_message;

use std::time::Duration;

use prost::Message;

use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time;

use tracing::debug;

/// One framed request/response channel to the namenode.
///
/// A request is an [`proto::Operation`] header followed by the op body; the
/// response is an [`proto::RpcStatus`] followed by a body iff the status is
/// `Ok`. The stream must not be reused after a failed exchange, it may be
/// left mid-message.
pub struct Transport {
    stream: BufStream<TcpStream>,
    io_timeout: Duration,
}

impl Transport {
    /// Dials the namenode and negotiates the protocol handshake.
    pub async fn handshake(config: &ConnectionConfig) -> Result<Self> {
        let address = format!("{}:{}", config.host(), config.port());
        let stream = match time::timeout(config.connect_timeout(), TcpStream::connect(&address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(RdfsError::ConnectionError(format!(
                    "Could not connect to namenode at {}: {}",
                    address, err
                )))
            }
            Err(_) => {
                return Err(RdfsError::ConnectionError(format!(
                    "Timed out connecting to namenode at {}",
                    address
                )))
            }
        };

        let mut transport = Self {
            stream: BufStream::new(stream),
            io_timeout: config.io_timeout(),
        };

        let request = proto::HandshakeRequest {
            protocol_version: proto::PROTOCOL_VERSION,
            credentials: config.credentials().map(String::from),
        };
        let response: proto::HandshakeResponse = transport
            .call(OpCode::Handshake, &request)
            .await
            .map_err(|err| match err {
                // rejected credentials are a remote rejection, not a connectivity problem
                err @ RdfsError::PermissionDenied(_) => err,
                err => RdfsError::ConnectionError(format!(
                    "Handshake with namenode at {} failed: {}",
                    address, err
                )),
            })?;

        if response.protocol_version != proto::PROTOCOL_VERSION {
            return Err(RdfsError::ConnectionError(format!(
                "Namenode at {} speaks protocol version {}, expected {}",
                address,
                response.protocol_version,
                proto::PROTOCOL_VERSION
            )));
        }

        debug!("Established transport to namenode at {}", address);
        Ok(transport)
    }

    /// Performs one request/response exchange, bounded by the per-call
    /// I/O timeout.
    pub async fn call<Req, Resp>(&mut self, op: OpCode, request: &Req) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        match time::timeout(self.io_timeout, self.exchange(op, request)).await {
            Ok(result) => result,
            Err(_) => Err(RdfsError::IOError(
                IoErrorKind::Timeout,
                format!("{:?} request timed out", op),
            )),
        }
    }

    async fn exchange<Req, Resp>(&mut self, op: OpCode, request: &Req) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut buffer = vec![];
        proto::Operation { op: op as i32 }.encode_length_delimited(&mut buffer)?;
        self.stream.write_all(&buffer).await?;
        buffer.clear();

        request.encode_length_delimited(&mut buffer)?;
        self.stream.write_all(&buffer).await?;
        self.stream.flush().await?;

        let status: proto::RpcStatus = parse_message(&mut self.stream).await?;
        let code = StatusCode::try_from(status.code).map_err(|_| {
            RdfsError::ProtoDecodeError(prost::DecodeError::new("unknown status code"))
        })?;
        if code != StatusCode::Ok {
            return Err(status_to_error(code, status.message));
        }

        let response = parse_message(&mut self.stream).await?;
        Ok(response)
    }
}

fn status_to_error(code: StatusCode, message: String) -> RdfsError {
    match code {
        StatusCode::Ok => unreachable!(),
        StatusCode::NotFound => RdfsError::NotFound(message),
        StatusCode::AlreadyExists => RdfsError::AlreadyExists(message),
        StatusCode::PermissionDenied => RdfsError::PermissionDenied(message),
        StatusCode::Busy => RdfsError::IOError(IoErrorKind::Transient, message),
        StatusCode::StaleHandle => RdfsError::InvalidHandle(message),
        StatusCode::InvalidRequest => RdfsError::InvalidArgument(message),
        StatusCode::Internal => RdfsError::IOError(IoErrorKind::Fatal, message),
    }
}
