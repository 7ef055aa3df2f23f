//! One message per connection: connect, write a frame, optionally read one reply frame, close.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use mesh_core::wire::{self, LEN_SIZE};
use mesh_core::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{NodeError, Result};

/// Read one frame. Returns None if the peer closed before sending anything.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LEN_SIZE];
    let mut filled = 0;
    while filled < LEN_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(NodeError::Closed)
            };
        }
        filled += n;
    }
    let len = wire::payload_len(header)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(wire::decode_payload(&payload)?))
}

pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = wire::encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Connect and write one message, with `deadline` covering both.
pub async fn connect_and_send(addr: SocketAddr, msg: &Message, deadline: Duration) -> Result<TcpStream> {
    with_deadline(deadline, async {
        let mut stream = TcpStream::connect(addr).await?;
        write_message(&mut stream, msg).await?;
        Ok(stream)
    })
    .await
}

/// Fire-and-forget delivery: send one message and close.
pub async fn send(addr: SocketAddr, msg: &Message, deadline: Duration) -> Result<()> {
    let mut stream = connect_and_send(addr, msg, deadline).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Send one message and wait for exactly one reply.
pub async fn request(addr: SocketAddr, msg: &Message, deadline: Duration) -> Result<Message> {
    with_deadline(deadline, async {
        let mut stream = TcpStream::connect(addr).await?;
        write_message(&mut stream, msg).await?;
        read_message(&mut stream).await?.ok_or(NodeError::Closed)
    })
    .await
}

pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| NodeError::Timeout(deadline))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = Message::Download {
            filename: "a.txt".into(),
        };
        write_message(&mut a, &msg).await.unwrap();
        drop(a);
        assert_eq!(read_message(&mut b).await.unwrap(), Some(msg));
        assert_eq!(read_message(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_header_is_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[1, 0]).await.unwrap();
        drop(a);
        assert!(matches!(read_message(&mut b).await, Err(NodeError::Closed)));
    }

    #[tokio::test]
    async fn garbage_payload_is_decode_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&3u32.to_le_bytes()).await.unwrap();
        a.write_all(b"???").await.unwrap();
        drop(a);
        assert!(matches!(read_message(&mut b).await, Err(NodeError::Decode(_))));
    }

    #[tokio::test]
    async fn request_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let r = request(addr, &Message::List, Duration::from_secs(2)).await;
        assert!(r.is_err());
    }
}
