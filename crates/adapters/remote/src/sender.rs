//! Client side of the remote relay.

use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use vibelink_adapter_osc::codec::{self, StateUpdate};
use vibelink_domain::command::{Command, CommandEnvelope};

use crate::error::RemoteError;
use crate::frame;
use crate::pairing::PairingCode;

const MAX_FRAME_LEN: usize = 65_536;

/// A paired connection to a remote relay that sends command envelopes and
/// receives mirrored state.
#[derive(Debug)]
pub struct RemoteSender {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl RemoteSender {
    /// Decode a remote control code, connect and pair.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidCode`] for a bad code and
    /// [`RemoteError::Io`] when the relay cannot be reached.
    pub async fn connect(code: &str) -> Result<Self, RemoteError> {
        Self::connect_to(&PairingCode::decode(code)?).await
    }

    /// Connect to the relay named by `pairing` and present its token.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Io`] when the connection or the token write
    /// fails.
    pub async fn connect_to(pairing: &PairingCode) -> Result<Self, RemoteError> {
        let (host, port) = pairing.endpoint()?;
        let stream = TcpStream::connect((host.as_str(), port)).await?;
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(pairing.token.as_bytes()).await?;
        writer.flush().await?;
        tracing::debug!(url = %pairing.url, "paired with remote relay");
        Ok(Self { reader, writer })
    }

    /// Send one command envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Io`] when the relay connection is gone.
    pub async fn send(&mut self, envelope: &CommandEnvelope) -> Result<(), RemoteError> {
        let bytes = codec::encode_message(codec::envelope_message(envelope))?;
        frame::write_frame(&mut self.writer, &bytes).await
    }

    /// Send a command as its wire envelope.
    ///
    /// # Errors
    ///
    /// See [`RemoteSender::send`].
    pub async fn send_command(&mut self, command: &Command) -> Result<(), RemoteError> {
        self.send(&CommandEnvelope::from(command)).await
    }

    /// Wait for the next mirrored state update. `Ok(None)` means the relay
    /// closed the connection.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Io`] or [`RemoteError::Osc`] on a broken
    /// stream or payload.
    pub async fn next_state(&mut self) -> Result<Option<StateUpdate>, RemoteError> {
        loop {
            let Some(bytes) = frame::read_frame(&mut self.reader, MAX_FRAME_LEN).await? else {
                return Ok(None);
            };
            for msg in codec::decode_packet(&bytes)? {
                if msg.addr == codec::STATE_ADDR {
                    return Ok(Some(codec::decode_state(&msg)?));
                }
            }
        }
    }

    /// Close the write side so the relay sees a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Io`] when the shutdown fails.
    pub async fn close(mut self) -> Result<(), RemoteError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
