//! Cluster wire format: fixed-header framing, streaming decoder and the
//! payload cipher capability.

pub mod cipher;
pub mod codec;
pub mod frame;

pub use cipher::{Aes256GcmCipher, CipherError, PayloadCipher};
pub use codec::ClusterDecoder;
pub use frame::{
    build, parse, parse_header, payload_after_header, ClusterHeader, ClusterMessage, EncodedFrame,
    FramingError, CLUSTER_CMD_HEADER_SIZE, CLUSTER_DATA_HEADER_SIZE,
};
