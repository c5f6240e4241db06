//! Incremental cluster frame decoder for stream transports.

use super::frame::{parse_header, ClusterHeader, FramingError, CLUSTER_DATA_HEADER_SIZE};
use bytes::{Buf, Bytes, BytesMut};

/// Cluster frame decoder state machine.
#[derive(Debug, Default)]
pub struct ClusterDecoder {
    state: DecodeState,
}

#[derive(Debug, Default)]
enum DecodeState {
    #[default]
    ReadingHeader,
    ReadingPayload {
        header: ClusterHeader,
    },
}

impl ClusterDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a frame from the buffer.
    ///
    /// Returns `Ok(Some(..))` once a complete frame is buffered and `Ok(None)`
    /// while more data is needed. Consumed bytes are removed from `buf`.
    pub fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<(ClusterHeader, Bytes)>, FramingError> {
        loop {
            match &self.state {
                DecodeState::ReadingHeader => {
                    if buf.len() < CLUSTER_DATA_HEADER_SIZE {
                        return Ok(None);
                    }
                    let header = parse_header(&buf[..])?;
                    buf.advance(CLUSTER_DATA_HEADER_SIZE);
                    self.state = DecodeState::ReadingPayload { header };
                }
                DecodeState::ReadingPayload { header } => {
                    let length = header.payload_len as usize;
                    if buf.len() < length {
                        return Ok(None);
                    }
                    let payload = buf.split_to(length).freeze();
                    let header = header.clone();
                    self.state = DecodeState::ReadingHeader;
                    return Ok(Some((header, payload)));
                }
            }
        }
    }

    /// Bytes still expected for the frame in progress, if any.
    pub fn pending_payload(&self) -> Option<usize> {
        match &self.state {
            DecodeState::ReadingHeader => None,
            DecodeState::ReadingPayload { header } => Some(header.payload_len as usize),
        }
    }
}
