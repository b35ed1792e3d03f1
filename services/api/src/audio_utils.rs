use base64::Engine;
use bytes::Bytes;

/// Sample rate of the PCM16 audio clients send and the ASR vendor expects.
pub const CLIENT_PCM16_SAMPLE_RATE: u32 = 16_000;
/// Samples in one keepalive silence frame (10 ms at 16 kHz).
pub const SILENCE_FRAME_SAMPLES: usize = 160;

/// Decodes a base64 payload (audio chunk or video frame) into raw bytes.
pub fn decode_bytes(base64_fragment: &str) -> Result<Bytes, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(base64_fragment.trim())
        .map(Bytes::from)
}

/// Encodes raw bytes (e.g. an mp3 chunk) as standard base64.
pub fn encode_bytes(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// A frame of PCM16 silence.
pub fn silence_frame(samples: usize) -> Bytes {
    Bytes::from(vec![0u8; samples * 2])
}
