//! Stream reassembly for envelopes read off a socket.
//!
//! The wire format is the same one [`Envelope::encode`] produces; this
//! module only deals with envelopes arriving split across reads or packed
//! several to a read.

use anyhow::{bail, Context, Result};

use super::{Envelope, HEADER_LEN};

/// Maximum payload size accepted from a stream (16 MB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Incremental envelope decoder that handles partial reads.
///
/// Feed bytes via [`EnvelopeDecoder::feed`] and collect complete envelopes.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    buf: Vec<u8>,
}

impl EnvelopeDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and extract every complete envelope.
    ///
    /// Incomplete data is buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns an error if an envelope is malformed or its declared payload
    /// exceeds [`MAX_PAYLOAD_SIZE`]. The stream should be dropped after an
    /// error since framing can no longer be trusted.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Envelope>> {
        self.buf.extend_from_slice(bytes);
        let mut envelopes = Vec::new();

        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }

            let length = u32::from_le_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]]);
            if length > MAX_PAYLOAD_SIZE {
                bail!("Envelope too large: {length} bytes (max {MAX_PAYLOAD_SIZE})");
            }

            let total = HEADER_LEN + length as usize;
            if self.buf.len() < total {
                break;
            }

            let envelope = Envelope::decode(&self.buf[..total])
                .context("Malformed envelope in stream")?;
            envelopes.push(envelope);
            self.buf.drain(..total);
        }

        Ok(envelopes)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{ResUsageReport, UserCommand};

    #[test]
    fn test_multiple_envelopes_in_single_feed() {
        let e1 = Envelope::Ping;
        let e2 = Envelope::Output(b"data".to_vec());
        let e3 = Envelope::ResUsageReport(ResUsageReport {
            cpu_seconds: 0.5,
            max_rss_kib: 10,
        });

        let mut buf = Vec::new();
        buf.extend_from_slice(&e1.encode());
        buf.extend_from_slice(&e2.encode());
        buf.extend_from_slice(&e3.encode());

        let mut decoder = EnvelopeDecoder::new();
        let envelopes = decoder.feed(&buf).unwrap();
        assert_eq!(envelopes, vec![e1, e2, e3]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_partial_envelope_reassembly() {
        let envelope = Envelope::UserCommand(UserCommand {
            sequence: 1,
            app_id: 2,
            inner: Box::new(Envelope::Shutdown),
        });
        let encoded = envelope.encode();
        let mid = encoded.len() / 2;

        let mut decoder = EnvelopeDecoder::new();
        assert!(decoder.feed(&encoded[..mid]).unwrap().is_empty());
        assert!(decoder.has_partial());

        let envelopes = decoder.feed(&encoded[mid..]).unwrap();
        assert_eq!(envelopes, vec![envelope]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_byte_at_a_time() {
        let envelope = Envelope::Character('q' as u32);
        let encoded = envelope.encode();

        let mut decoder = EnvelopeDecoder::new();
        let mut out = Vec::new();
        for byte in &encoded {
            out.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(out, vec![envelope]);
    }

    #[test]
    fn test_oversized_envelope_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x0017u16.to_le_bytes());
        buf.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_le_bytes());

        let mut decoder = EnvelopeDecoder::new();
        assert!(decoder.feed(&buf).is_err());
    }

    #[test]
    fn test_unknown_type_in_stream_is_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x0fffu16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        let mut decoder = EnvelopeDecoder::new();
        assert!(decoder.feed(&buf).is_err());
    }
}
