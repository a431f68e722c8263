//! Wire-Format des Event-Kanals
//!
//! Beide Transporte tragen dieselbe JSON-kodierte `SignalMessage`
//! (`{"request_id": .., "payload": {"type": .., ..}}`), sie unterscheiden
//! sich nur in der Rahmung:
//!
//! - **TCP**: Laenge als u32 big-endian, danach genau so viele JSON-Bytes.
//!   `FrameCodec` setzt das fuer `tokio_util::codec::Framed` um.
//! - **WebSocket**: eine Text-Nachricht ist eine `SignalMessage`. Die
//!   Rahmung uebernimmt WebSocket, hier wird nur kodiert und das Limit
//!   geprueft (`nachricht_kodieren` / `nachricht_dekodieren`).
//!
//! ```text
//! TCP:  | Laenge (u32 BE) | {"request_id":7,"payload":{"type":"typing",..}} |
//! WS:   Text("{"request_id":7,"payload":{"type":"typing",..}}")
//! ```
//!
//! Fuer beide gilt dasselbe Groessenlimit. SDP-Blobs und ICE-Kandidaten
//! werden unveraendert durchgereicht, ein Offer mit vielen Medienzeilen
//! muss also hineinpassen.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::signal::SignalMessage;

/// Maximale Groesse einer kodierten Nachricht (1 MB)
pub const MAX_NACHRICHT_BYTES: usize = 1024 * 1024;

/// Laengen-Praefix eines TCP-Frames
pub const LAENGEN_PRAEFIX: usize = 4;

fn zu_gross(laenge: usize, maximum: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Nachricht zu gross: {} Bytes (Maximum: {} Bytes)", laenge, maximum),
    )
}

/// Kodiert eine Nachricht als JSON und prueft das Limit
pub fn nachricht_kodieren(nachricht: &SignalMessage, max_bytes: usize) -> io::Result<Vec<u8>> {
    let json = serde_json::to_vec(nachricht).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("JSON-Serialisierung fehlgeschlagen: {}", e),
        )
    })?;
    if json.len() > max_bytes {
        return Err(zu_gross(json.len(), max_bytes));
    }
    Ok(json)
}

/// Dekodiert eine JSON-Nachricht
///
/// Unbekannte Payload-Typen und fehlende Felder ergeben `InvalidData`.
pub fn nachricht_dekodieren(daten: &[u8], max_bytes: usize) -> io::Result<SignalMessage> {
    if daten.len() > max_bytes {
        return Err(zu_gross(daten.len(), max_bytes));
    }
    serde_json::from_slice(daten).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Ungueltige Nachricht: {}", e),
        )
    })
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

/// Laengen-praefixierte Rahmung fuer den TCP-Listener
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_bytes: usize,
}

impl FrameCodec {
    pub fn neu() -> Self {
        Self::mit_limit(MAX_NACHRICHT_BYTES)
    }

    pub fn mit_limit(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::neu()
    }
}

impl Decoder for FrameCodec {
    type Item = SignalMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LAENGEN_PRAEFIX {
            return Ok(None);
        }

        let laenge = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        // Vor dem Puffern pruefen, sonst reserviert ein falsches Praefix beliebig viel
        if laenge > self.max_bytes {
            return Err(zu_gross(laenge, self.max_bytes));
        }

        let gesamt = LAENGEN_PRAEFIX + laenge;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(LAENGEN_PRAEFIX);
        let json = src.split_to(laenge);
        nachricht_dekodieren(&json, self.max_bytes).map(Some)
    }
}

impl Encoder<SignalMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: SignalMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = nachricht_kodieren(&item, self.max_bytes)?;
        dst.reserve(LAENGEN_PRAEFIX + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);
        Ok(())
    }
}

/// Liest einen TCP-Frame direkt aus einem Stream (Test-Clients)
pub async fn frame_lesen<R>(reader: &mut R, max_bytes: usize) -> io::Result<SignalMessage>
where
    R: AsyncRead + Unpin,
{
    let mut praefix = [0u8; LAENGEN_PRAEFIX];
    reader.read_exact(&mut praefix).await?;
    let laenge = u32::from_be_bytes(praefix) as usize;
    if laenge > max_bytes {
        return Err(zu_gross(laenge, max_bytes));
    }

    let mut json = vec![0u8; laenge];
    reader.read_exact(&mut json).await?;
    nachricht_dekodieren(&json, max_bytes)
}

/// Schreibt einen TCP-Frame direkt in einen Stream (Test-Clients)
pub async fn frame_schreiben<W>(
    writer: &mut W,
    nachricht: &SignalMessage,
    max_bytes: usize,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = nachricht_kodieren(nachricht, max_bytes)?;
    writer.write_all(&(json.len() as u32).to_be_bytes()).await?;
    writer.write_all(&json).await
}
