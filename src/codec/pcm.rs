//! 16-bit PCM encoding
//!
//! Audio crosses the channel as little-endian signed 16-bit samples, base64
//! encoded and tagged with a `audio/pcm;rate=<hz>` media type.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::constants::PCM_SCALE;
use crate::error::CodecError;

const PCM_ESSENCE: &str = "audio/pcm";

/// Media-type tag attached to every chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaType {
    /// Sample rate declared by the `rate` parameter, if any
    pub sample_rate: Option<u32>,
}

impl MediaType {
    pub fn pcm(sample_rate: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sample_rate {
            Some(rate) => write!(f, "{};rate={}", PCM_ESSENCE, rate),
            None => f.write_str(PCM_ESSENCE),
        }
    }
}

impl FromStr for MediaType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';').map(str::trim);
        let essence = parts.next().unwrap_or_default();
        if !essence.eq_ignore_ascii_case(PCM_ESSENCE) {
            return Err(CodecError::UnsupportedMediaType(s.to_string()));
        }

        let mut sample_rate = None;
        for param in parts {
            if let Some((key, value)) = param.split_once('=') {
                if key.trim().eq_ignore_ascii_case("rate") {
                    let rate = value
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| CodecError::UnsupportedMediaType(s.to_string()))?;
                    sample_rate = Some(rate);
                }
            }
        }

        Ok(Self { sample_rate })
    }
}

impl TryFrom<String> for MediaType {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MediaType> for String {
    fn from(value: MediaType) -> Self {
        value.to_string()
    }
}

/// One transport-sized unit of encoded audio, in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedChunk {
    pub mime_type: MediaType,
    /// Base64 of little-endian 16-bit samples
    pub data: String,
}

impl EncodedChunk {
    pub fn new(mime_type: MediaType, data: String) -> Self {
        Self { mime_type, data }
    }
}

/// Scale a normalised float sample to 16 bits.
///
/// Truncates toward zero; values outside [-1.0, 1.0) wrap around as fixed
/// width integers do, so `1.0` becomes `-32768`.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * PCM_SCALE) as i32 as i16
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(f32_to_i16).collect()
}

pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().copied().map(i16_to_f32).collect()
}

pub fn samples_to_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        buf.put_i16_le(sample);
    }
    buf.freeze()
}

pub fn bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    let mut buf = bytes;
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while buf.has_remaining() {
        samples.push(buf.get_i16_le());
    }
    Ok(samples)
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_bytes(data: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(data)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))
}

/// Encode samples into a chunk tagged with `sample_rate`
pub fn encode(samples: &[i16], sample_rate: u32) -> EncodedChunk {
    let bytes = samples_to_bytes(samples);
    EncodedChunk::new(MediaType::pcm(sample_rate), encode_bytes(&bytes))
}

/// Decode a chunk back into samples
pub fn decode(chunk: &EncodedChunk) -> Result<Vec<i16>, CodecError> {
    let bytes = decode_bytes(&chunk.data)?;
    bytes_to_samples(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_half_scale_block() {
        let block = vec![0.5f32; 4096];
        let chunk = encode(&float_to_pcm16(&block), 16000);

        assert_eq!(chunk.mime_type.to_string(), "audio/pcm;rate=16000");

        let samples = decode(&chunk).unwrap();
        assert_eq!(samples.len(), 4096);
        assert!(samples.iter().all(|&s| s == 16384));
    }

    #[test]
    fn test_conversion_truncates_and_wraps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(-1.0), -32768);
        assert_eq!(f32_to_i16(0.3), 9830);
        assert_eq!(f32_to_i16(-0.3), -9830);
        // out-of-range input wraps instead of clamping
        assert_eq!(f32_to_i16(1.0), -32768);
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = samples_to_bytes(&[1, -2]);
        assert_eq!(&bytes[..], &[0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn test_odd_length_rejected() {
        assert_eq!(bytes_to_samples(&[0, 1, 2]), Err(CodecError::OddLength(3)));

        let chunk = EncodedChunk::new(MediaType::pcm(24000), encode_bytes(&[7]));
        assert_eq!(decode(&chunk), Err(CodecError::OddLength(1)));
    }

    #[test]
    fn test_invalid_base64() {
        let chunk = EncodedChunk::new(MediaType::pcm(24000), "not base64!".to_string());
        assert!(matches!(decode(&chunk), Err(CodecError::InvalidBase64(_))));
    }

    #[test]
    fn test_media_type_parsing() {
        let mt: MediaType = "audio/pcm;rate=24000".parse().unwrap();
        assert_eq!(mt.sample_rate, Some(24000));

        let mt: MediaType = "Audio/PCM; rate=16000".parse().unwrap();
        assert_eq!(mt, MediaType::pcm(16000));

        let mt: MediaType = "audio/pcm".parse().unwrap();
        assert_eq!(mt.sample_rate, None);

        assert!("audio/opus".parse::<MediaType>().is_err());
        assert!("audio/pcm;rate=fast".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_chunk_wire_shape() {
        let chunk = encode(&[0, 0], 16000);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["data"], "AAAAAA==");

        let parsed: EncodedChunk = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, chunk);
    }

    proptest! {
        #[test]
        fn prop_even_length_bytes_survive_transport(
            bytes in proptest::collection::vec(any::<u8>(), 0..512)
                .prop_map(|mut b| { b.truncate(b.len() & !1); b })
        ) {
            let decoded = decode_bytes(&encode_bytes(&bytes)).unwrap();
            prop_assert_eq!(&decoded, &bytes);

            let samples = bytes_to_samples(&bytes).unwrap();
            prop_assert_eq!(&samples_to_bytes(&samples)[..], &bytes[..]);
        }
    }
}
