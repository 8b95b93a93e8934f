//! Tokio codec for length-prefixed, magic-tagged record framing.
//!
//! Each frame is `length(4 bytes, LE) | magic(4 bytes, LE) | payload`. When a
//! [`Cipher`] is configured the payload is the record's AEAD ciphertext;
//! otherwise it is the plaintext record. This mirrors
//! [`tokio_util::codec::Framed`]-style length-delimited codecs, but folds
//! decryption into the same pass so callers never see undecrypted bytes.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::MAGIC;
use crate::{cipher::Cipher, error::RpcError};

const HEADER_LEN: usize = 8;

/// Tokio codec that frames and (optionally) encrypts/decrypts records.
#[derive(Clone, Default)]
pub struct FrameCodec {
    cipher: Option<std::sync::Arc<Cipher>>,
}

impl FrameCodec {
    /// Build a codec with no cipher state (plaintext framing only).
    #[must_use]
    pub const fn new() -> Self { Self { cipher: None } }

    /// Build a codec that encrypts/decrypts every record with `cipher`.
    #[must_use]
    pub const fn with_cipher(cipher: std::sync::Arc<Cipher>) -> Self {
        Self {
            cipher: Some(cipher),
        }
    }

    fn peek_len(src: &BytesMut) -> Option<(u32, u32)> {
        let header: &[u8; HEADER_LEN] = src.get(..HEADER_LEN)?.try_into().ok()?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let magic = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        Some((len, magic))
    }
}

impl Decoder for FrameCodec {
    type Error = RpcError;
    type Item = Vec<u8>;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((len, magic)) = Self::peek_len(src) else {
            return Ok(None);
        };
        if magic != MAGIC {
            return Err(RpcError::framing(format!(
                "bad magic: expected {MAGIC:#x}, got {magic:#x}"
            )));
        }

        let len = len as usize;
        let frame_len = HEADER_LEN + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).to_vec();

        let record = match &self.cipher {
            Some(cipher) => cipher.decrypt(&payload)?,
            None => payload,
        };
        Ok(Some(record))
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = RpcError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = match &self.cipher {
            Some(cipher) => cipher.encrypt(&item)?,
            None => item,
        };

        let len = u32::try_from(payload.len())
            .map_err(|_| RpcError::framing("record exceeds u32 length"))?;

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32_le(len);
        dst.put_u32_le(MAGIC);
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn round_trips_plaintext_records() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(b"hello".to_vec(), &mut buf).expect("encode");
        codec.encode(b"world".to_vec(), &mut buf).expect("encode");

        let first = codec.decode(&mut buf).expect("decode").expect("some");
        assert_eq!(first, b"hello");
        let second = codec.decode(&mut buf).expect("decode").expect("some");
        assert_eq!(second, b"world");
        assert!(codec.decode(&mut buf).expect("decode").is_none());
    }

    #[rstest]
    fn handles_arbitrary_refragmentation() {
        let mut encoder = FrameCodec::new();
        let mut whole = BytesMut::new();
        encoder
            .encode(b"a longer payload to split".to_vec(), &mut whole)
            .expect("encode");

        let mut decoder = FrameCodec::new();
        let mut carry = BytesMut::new();
        let mut out = None;
        for byte in whole.to_vec() {
            carry.extend_from_slice(&[byte]);
            if let Some(record) = decoder.decode(&mut carry).expect("decode") {
                out = Some(record);
                break;
            }
        }
        assert_eq!(out.expect("record decoded"), b"a longer payload to split");
    }

    #[rstest]
    fn rejects_bad_magic() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(4);
        buf.put_u32_le(0xDEAD_BEEF);
        buf.put_slice(b"data");

        let mut codec = FrameCodec::new();
        let err = codec.decode(&mut buf).expect_err("bad magic rejected");
        assert!(matches!(err, RpcError::Framing(_)));
    }

    #[rstest]
    fn round_trips_encrypted_records() {
        let cipher = Arc::new(Cipher::derive("secret").expect("derives"));
        let mut codec = FrameCodec::with_cipher(Arc::clone(&cipher));
        let mut buf = BytesMut::new();
        codec.encode(b"plaintext".to_vec(), &mut buf).expect("encode");

        let mut decoder = FrameCodec::with_cipher(cipher);
        let record = decoder.decode(&mut buf).expect("decode").expect("some");
        assert_eq!(record, b"plaintext");
    }
}
