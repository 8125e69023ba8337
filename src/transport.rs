//! Byte-level framing over a stream socket: a 4-byte little-endian length
//! prefix followed by that many bytes of UTF-8 message body, mirroring
//! `struct.pack("I", len)` + raw bytes on the original side.
//!
//! Kept behind a trait so [`crate::session::Session`] never talks to a raw
//! socket directly; the only shipped implementation is
//! [`UnixSocketTransport`], matching the synchronous, single-connection
//! model in §5 — no async runtime, the same spirit as the sibling example
//! repo's `tcp` feature built purely on `std::net`.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use log::trace;

use crate::error::{Error, Result};

/// A blocking request/reply channel to the simulator. Exactly two
/// suspension points per round trip: reading the length prefix, then
/// reading the body.
pub trait Transport {
    /// Blocks until a full message body is available, or returns `Ok(None)`
    /// if the peer closed the connection cleanly.
    fn read_message(&mut self) -> Result<Option<String>>;

    fn write_message(&mut self, body: &str) -> Result<()>;
}

pub struct UnixSocketTransport {
    stream: UnixStream,
}

impl UnixSocketTransport {
    pub fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let stream = UnixStream::connect(path)?;
        Ok(Self { stream })
    }
}

impl Transport for UnixSocketTransport {
    fn read_message(&mut self) -> Result<Option<String>> {
        let mut len_buf = [0u8; 4];
        if let Err(e) = self.stream.read_exact(&mut len_buf) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(e.into());
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut body_buf = vec![0u8; len];
        self.stream.read_exact(&mut body_buf)?;
        let body = String::from_utf8(body_buf)
            .map_err(|e| Error::Protocol(format!("non-UTF-8 message body: {e}")))?;
        trace!("recv ({len} bytes): {body:?}");
        Ok(Some(body))
    }

    fn write_message(&mut self, body: &str) -> Result<()> {
        trace!("send ({} bytes): {body:?}", body.len());
        let len = u32::try_from(body.len())
            .map_err(|_| Error::Protocol("outbound message too large for u32 length prefix".into()))?;
        self.stream.write_all(&len.to_le_bytes())?;
        self.stream.write_all(body.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn round_trips_a_framed_message_over_a_real_socket_pair() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut server = UnixSocketTransport { stream: a };
        let mut client = UnixSocketTransport { stream: b };

        let handle = thread::spawn(move || {
            client.write_message("0:10.000000|10.000000:N").unwrap();
        });

        let msg = server.read_message().unwrap().unwrap();
        assert_eq!(msg, "0:10.000000|10.000000:N");
        handle.join().unwrap();
    }

    #[test]
    fn read_message_returns_none_on_clean_close() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let mut server = UnixSocketTransport { stream: a };
        assert_eq!(server.read_message().unwrap(), None);
    }
}
