//! Frame-level codec and sample-rate conversion between the two legs.
//!
//! The bridge treats this layer as a black box: three streaming transforms,
//! each frame-in/frame-out with O(frame) memory. The default implementation is
//! a pass-through; a real G.711/resampler drops in behind the same trait
//! without touching the bridging logic.

/// Native sample rate of the telephony leg (Hz).
pub const TELEPHONY_SAMPLE_RATE_HZ: u32 = 8000;

/// Native sample rate of the realtime speech leg (Hz).
pub const REALTIME_SAMPLE_RATE_HZ: u32 = 16000;

/// Pluggable codec/sample-rate converter.
///
/// All transforms must accept zero-length input (returning zero-length output)
/// and must preserve frame ordering; they are applied per frame, never across
/// the whole call.
pub trait Transcoder: Send + Sync {
    /// Legacy telephony encoding -> intermediate PCM.
    fn decode(&self, payload: &[u8]) -> Vec<u8>;

    /// Intermediate PCM -> legacy telephony encoding.
    fn encode(&self, pcm: &[u8]) -> Vec<u8>;

    /// Sample-rate conversion between the two legs' native rates.
    fn resample(&self, pcm: &[u8], from_hz: u32, to_hz: u32) -> Vec<u8>;
}

/// Identity transcoder.
///
/// Serves as both the production default and the conformance test double:
/// `decode(encode(x)) == x` and every transform preserves input length.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranscoder;

impl Transcoder for PassthroughTranscoder {
    fn decode(&self, payload: &[u8]) -> Vec<u8> {
        payload.to_vec()
    }

    fn encode(&self, pcm: &[u8]) -> Vec<u8> {
        pcm.to_vec()
    }

    fn resample(&self, pcm: &[u8], _from_hz: u32, _to_hz: u32) -> Vec<u8> {
        pcm.to_vec()
    }
}
