use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{ClientError, ProtocolError, Result},
    ids::{Identity, join_ids, parse_ids, parse_u64},
};

pub const IDENTITY: &str = "identity";
pub const LIST: &str = "list";
pub const RELAY: &str = "relay";

// Payload buffers start at most this large and grow with what actually arrives.
const PAYLOAD_PREALLOC_LIMIT: u64 = 64 * 1024;

/// Reads one `\n`-terminated control line and returns it without its line ending.
pub async fn read_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let bytes = reader.read_until(b'\n', &mut line).await?;
    if bytes == 0 {
        return Err(ClientError::ConnectionClosed);
    }
    if line.pop() != Some(b'\n') {
        return Err(ClientError::UnexpectedEof);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }

    String::from_utf8(line).map_err(|_| ProtocolError::NotUtf8.into())
}

/// Reads exactly `len` payload bytes.
pub async fn read_payload<R>(reader: &mut R, len: u64) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut payload = Vec::with_capacity(len.min(PAYLOAD_PREALLOC_LIMIT) as usize);
    let received = (&mut *reader).take(len).read_to_end(&mut payload).await? as u64;
    if received < len {
        return Err(ClientError::ShortRead {
            expected: len,
            received,
        });
    }
    Ok(payload)
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

pub fn request_line(keyword: &str) -> Vec<u8> {
    format!("{keyword}\n").into_bytes()
}

/// Header and payload in one buffer, so nothing can be interleaved between them.
pub fn encode_relay(recipients: &[Identity], payload: &[u8]) -> Vec<u8> {
    let header = format!("{RELAY} {} {}\n", join_ids(recipients), payload.len());
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Splits on the first space only; a line without one has an empty remainder.
pub fn split_keyword(line: &str) -> (&str, &str) {
    line.split_once(' ').unwrap_or((line, ""))
}

pub fn parse_identity_reply(line: &str) -> Result<Identity, ProtocolError> {
    let rest = expect_keyword(IDENTITY, line)?;
    let mut fields = rest.split_whitespace();
    let identity = fields.next().ok_or(ProtocolError::MissingField("identity"))?;
    reject_trailing(fields)?;
    parse_u64("identity", identity)
}

/// `list` with nothing after it, with or without the separator, is the empty list.
pub fn parse_list_reply(line: &str) -> Result<Vec<Identity>, ProtocolError> {
    let rest = expect_keyword(LIST, line)?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    parse_ids(rest)
}

/// Parses the `<sender> <length>` remainder of an incoming relay header.
pub fn parse_relay_header(rest: &str) -> Result<(Identity, u64), ProtocolError> {
    let mut fields = rest.split_whitespace();
    let sender = fields.next().ok_or(ProtocolError::MissingField("sender"))?;
    let len = fields.next().ok_or(ProtocolError::MissingField("length"))?;
    reject_trailing(fields)?;
    Ok((parse_u64("sender", sender)?, parse_u64("length", len)?))
}

fn expect_keyword<'a>(expected: &'static str, line: &'a str) -> Result<&'a str, ProtocolError> {
    let (keyword, rest) = split_keyword(line);
    if keyword != expected {
        return Err(ProtocolError::UnexpectedKeyword {
            expected,
            found: keyword.to_string(),
        });
    }
    Ok(rest)
}

fn reject_trailing<'a>(mut fields: impl Iterator<Item = &'a str>) -> Result<(), ProtocolError> {
    match fields.next() {
        Some(extra) => Err(ProtocolError::TrailingData(extra.to_string())),
        None => Ok(()),
    }
}
