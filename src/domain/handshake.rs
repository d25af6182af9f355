use super::traits::Handshake;
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::TcpStream;

/// Protocol header a client sends to open an AMQP 0-9-1 connection.
pub const AMQP_PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

/// Sends the AMQP protocol header and waits for the broker to answer.
///
/// A broker replies with a binary `Connection.Start` frame, which rarely
/// carries a newline, so a read timeout after some bytes arrived also counts
/// as an answer. End-of-stream counts too: the listener spoke the protocol
/// far enough to close on us.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpHandshake;

impl Handshake for AmqpHandshake {
    fn name(&self) -> &'static str {
        "amqp"
    }

    fn exchange(&self, stream: &mut TcpStream) -> io::Result<()> {
        stream.write_all(&AMQP_PROTOCOL_HEADER)?;
        stream.flush()?;

        let mut reply = Vec::new();
        let mut reader = BufReader::new(stream);
        match reader.read_until(b'\n', &mut reply) {
            Ok(_) => Ok(()),
            Err(e)
                if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
                    && !reply.is_empty() =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Treats an accepted connection as ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct BareConnect;

impl Handshake for BareConnect {
    fn name(&self) -> &'static str {
        "connect"
    }

    fn exchange(&self, _stream: &mut TcpStream) -> io::Result<()> {
        Ok(())
    }
}
