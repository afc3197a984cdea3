//! Stream-side framing.
//!
//! Reads and writes request and response frames on any tokio byte stream.
//! A frame is either fully read or reported as a protocol error; there is
//! no partial-frame state carried between calls, since a connection only
//! ever has one request in flight.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{encode_request, RequestHeader, LENGTH_PREFIX_SIZE};
use crate::error::{Result, RpcError};

/// Read a length prefix.
///
/// Returns `None` on a clean EOF before the first byte; EOF after that is a
/// truncated frame.
async fn read_prefix<R>(reader: &mut R) -> Result<Option<u32>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;

    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(RpcError::Protocol(format!(
                "stream closed after {} of {} length bytes",
                filled, LENGTH_PREFIX_SIZE
            )));
        }
        filled += n;
    }

    Ok(Some(u32::from_be_bytes(prefix)))
}

/// Read exactly `len` bytes, mapping EOF to a protocol error.
async fn read_exact_bytes<R>(reader: &mut R, len: u32, what: &str) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(len as usize);
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf.freeze()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(RpcError::Protocol(
            format!("stream closed before {} declared {} bytes arrived", len, what),
        )),
        Err(e) => Err(RpcError::Io(e)),
    }
}

/// Read and decode one request header.
///
/// Returns `Ok(None)` when the peer closed the connection between frames.
///
/// # Errors
///
/// `Protocol` if the stream ends mid-frame, the header is larger than
/// `max_header_size`, or the header bytes do not decode.
pub async fn read_request_header<R>(
    reader: &mut R,
    max_header_size: u32,
) -> Result<Option<RequestHeader>>
where
    R: AsyncRead + Unpin,
{
    let header_len = match read_prefix(reader).await? {
        Some(len) => len,
        None => return Ok(None),
    };

    if header_len > max_header_size {
        return Err(RpcError::Protocol(format!(
            "header size {} exceeds maximum {}",
            header_len, max_header_size
        )));
    }

    let body = read_exact_bytes(reader, header_len, "header").await?;
    RequestHeader::decode(&body).map(Some)
}

/// Read exactly `payload_size` payload bytes.
///
/// # Errors
///
/// `Protocol` on a short read or when `payload_size` exceeds
/// `max_payload_size`.
pub async fn read_payload<R>(
    reader: &mut R,
    payload_size: u32,
    max_payload_size: u32,
) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    if payload_size > max_payload_size {
        return Err(RpcError::Protocol(format!(
            "payload size {} exceeds maximum {}",
            payload_size, max_payload_size
        )));
    }
    read_exact_bytes(reader, payload_size, "payload").await
}

/// Write a complete request frame and flush.
pub async fn write_request<W>(
    writer: &mut W,
    service_name: &str,
    method_name: &str,
    payload: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_request(service_name, method_name, payload)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one length-prefixed frame (responses, coordination messages).
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len())
        .map_err(|_| RpcError::Protocol(format!("frame size {} does not fit u32", body.len())))?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(body);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean EOF before the frame started.
pub async fn read_frame<R>(reader: &mut R, max_size: u32) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let len = match read_prefix(reader).await? {
        Some(len) => len,
        None => return Ok(None),
    };

    if len > max_size {
        return Err(RpcError::Protocol(format!(
            "frame size {} exceeds maximum {}",
            len, max_size
        )));
    }

    read_exact_bytes(reader, len, "frame").await.map(Some)
}
