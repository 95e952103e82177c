//! Length-prefixed stream framing (OSC 1.0 over TCP).
//!
//! Each frame is a big-endian `u32` byte count followed by one OSC packet.

use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

use crate::error::RemoteError;

/// Write one frame and flush.
///
/// # Errors
///
/// Returns [`RemoteError::Io`] on write failure and
/// [`RemoteError::FrameTooLarge`] when the payload does not fit a `u32`
/// prefix.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), RemoteError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| RemoteError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly
/// between frames.
///
/// # Errors
///
/// Returns [`RemoteError::FrameTooLarge`] when the prefix exceeds `max_len`
/// and [`RemoteError::Io`] when the stream ends mid-frame.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, RemoteError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if len > max_len {
        return Err(RemoteError::FrameTooLarge { len, max: max_len });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_read_back_written_frames_in_order() {
        let (mut client, mut server) = tokio::io::duplex(256);

        write_frame(&mut client, b"first").await.unwrap();
        write_frame(&mut client, b"").await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server, 64).await.unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut server, 64).await.unwrap().unwrap(), b"");
        assert!(read_frame(&mut server, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_prefix_with_big_endian_length() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, &[0xAA; 3]).await.unwrap();

        let mut raw = [0u8; 7];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, [0, 0, 0, 3, 0xAA, 0xAA, 0xAA]);
    }

    #[tokio::test]
    async fn should_reject_oversized_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(1_000).await.unwrap();

        let err = read_frame(&mut server, 512).await.unwrap_err();
        assert!(matches!(err, RemoteError::FrameTooLarge { len: 1_000, max: 512 }));
    }

    #[tokio::test]
    async fn should_fail_on_truncated_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(10).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server, 64).await,
            Err(RemoteError::Io(_))
        ));
    }
}
