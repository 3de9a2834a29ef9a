//! The secure channel: framing plus optional encryption and compression.
//!
//! A channel owns one stream. When encryption is on, every logical
//! frame is packaged as `[type, compression, payload...]`, sealed into
//! a [`SecureEnvelope`] and carried by an outer type-9 frame with the
//! outer compression byte zeroed; the receiver honors the inner
//! compression flag after decryption. The key exchange prolog runs
//! before any frame and must finish within [`REQUEST_TIMEOUT`].

use crate::compress::{decompress, maybe_compress, FLAG_BROTLI, FLAG_NONE};
use crate::crypto::{CipherState, EphemeralKey, HandshakeRole};
use crate::error::{NetError, ProtocolError};
use crate::frame::{read_frame, write_frame, Frame};
use crate::REQUEST_TIMEOUT;
use docmesh_types::{Message, MessageType, SecureEnvelope};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Upper bound on the DER public key in the handshake prolog.
const MAX_HANDSHAKE_KEY: usize = 256;

/// Whether a channel encrypts its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelSecurity {
    /// Frames travel in the clear.
    Plaintext,
    /// Frames travel inside authenticated-encrypted envelopes.
    #[default]
    Encrypted,
}

/// A framed, optionally encrypted and compressed message stream.
#[derive(Debug)]
pub struct SecureChannel<S> {
    stream: S,
    cipher: Option<CipherState>,
    brotli: bool,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream without encryption.
    pub fn plaintext(stream: S) -> Self {
        Self {
            stream,
            cipher: None,
            brotli: false,
        }
    }

    /// Establish a channel, running the key exchange prolog when
    /// `security` asks for encryption.
    pub async fn establish(
        mut stream: S,
        security: ChannelSecurity,
        role: HandshakeRole,
    ) -> Result<Self, NetError> {
        let cipher = match security {
            ChannelSecurity::Plaintext => None,
            ChannelSecurity::Encrypted => Some(key_exchange(&mut stream, role).await?),
        };
        Ok(Self {
            stream,
            cipher,
            brotli: false,
        })
    }

    /// Turn on brotli compression after negotiation.
    pub fn enable_compression(&mut self) {
        self.brotli = true;
    }

    /// Whether frames are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Send one logical frame.
    pub async fn send(&mut self, frame_type: u8, payload: &[u8]) -> Result<(), NetError> {
        let (body, flag) = maybe_compress(payload, self.brotli)?;

        let frame = match &self.cipher {
            Some(cipher) => {
                let mut inner = Vec::with_capacity(2 + body.len());
                inner.push(frame_type);
                inner.push(flag);
                inner.extend_from_slice(&body);
                let envelope = cipher.seal(&inner)?;
                let payload = envelope.to_bytes().map_err(ProtocolError::Wire)?;
                Frame::new(MessageType::SecureEnvelope as u8, FLAG_NONE, payload)
            }
            None => Frame::new(frame_type, flag, body.into_owned()),
        };

        write_frame(&mut self.stream, &frame).await
    }

    /// Receive one logical frame, unwrapping envelopes and inflating
    /// compressed payloads.
    pub async fn recv(&mut self) -> Result<(u8, Vec<u8>), NetError> {
        let frame = read_frame(&mut self.stream).await?;

        let (frame_type, flag, body) = if frame.frame_type == MessageType::SecureEnvelope as u8 {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or(ProtocolError::UnexpectedEnvelope)?;
            let envelope =
                SecureEnvelope::from_bytes(&frame.payload).map_err(ProtocolError::Wire)?;
            let inner = cipher.open(&envelope)?;
            if inner.len() < 2 {
                return Err(ProtocolError::InnerTooShort(inner.len()).into());
            }
            (inner[0], inner[1], inner[2..].to_vec())
        } else {
            (frame.frame_type, frame.compression, frame.payload)
        };

        let body = if flag == FLAG_BROTLI {
            decompress(&body)?
        } else {
            body
        };
        Ok((frame_type, body))
    }

    /// Encode and send an application message.
    pub async fn send_message(&mut self, message: &Message) -> Result<(), NetError> {
        let payload = message.to_bytes().map_err(ProtocolError::Wire)?;
        self.send(message.message_type() as u8, &payload).await
    }

    /// Receive and decode an application message.
    pub async fn recv_message(&mut self) -> Result<Message, NetError> {
        let (frame_type, payload) = self.recv().await?;
        Message::decode(frame_type, &payload)
            .map_err(ProtocolError::Wire)
            .map_err(NetError::from)
    }
}

/// The key exchange prolog: both sides send a length-prefixed SPKI DER
/// public key, then derive mirrored session keys.
async fn key_exchange<S>(stream: &mut S, role: HandshakeRole) -> Result<CipherState, NetError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let exchange = async {
        let key = EphemeralKey::generate()?;

        let der = key.public_der();
        stream
            .write_all(&(der.len() as u32).to_be_bytes())
            .await?;
        stream.write_all(der).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_HANDSHAKE_KEY {
            return Err(ProtocolError::OversizedHandshakeKey(len).into());
        }
        let mut peer_der = vec![0u8; len];
        stream.read_exact(&mut peer_der).await?;

        let keys = key.agree(&peer_der, role)?;
        Ok(CipherState::new(keys))
    };

    timeout(REQUEST_TIMEOUT, exchange)
        .await
        .map_err(|_| NetError::Timeout(REQUEST_TIMEOUT))?
}
