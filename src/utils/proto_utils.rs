use crate::error::{RdfsError, Result};

use prost::DecodeError;
use prost::Message;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads one length-delimited message from `reader`.
pub async fn parse_message<T: Message + Default>(
    reader: &mut (impl AsyncRead + Unpin),
) -> Result<T> {
    let (size, _) = get_message_size(reader).await?;

    let mut buffer = vec![0u8; size as usize];
    reader.read_exact(buffer.as_mut()).await?;

    let message = T::decode(buffer.as_ref())?;
    Ok(message)
}

async fn get_message_size(reader: &mut (impl AsyncRead + Unpin)) -> Result<(u64, u8)> {
    let mut result = 0;
    let mut shift = 0;
    for bytes_read in 1..=10 {
        let tmp = reader.read_u8().await?;
        result |= ((tmp & 0x7f) as u64) << shift;
        if tmp < 0x80 {
            return Ok((result, bytes_read));
        }
        shift += 7;
    }

    Err(RdfsError::ProtoDecodeError(DecodeError::new(
        "invalid varint",
    )))
}
