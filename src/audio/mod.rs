//! Audio frame types and the pluggable transcode pipeline between the
//! telephony leg and the realtime speech leg.

pub mod frame;
pub mod transcode;

pub use frame::{FrameEncoding, FrameSequence, MediaFrame};
pub use transcode::{
    PassthroughTranscoder, Transcoder, REALTIME_SAMPLE_RATE_HZ, TELEPHONY_SAMPLE_RATE_HZ,
};
