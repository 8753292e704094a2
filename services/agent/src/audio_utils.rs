use base64::Engine;

/// Sample rate of the PCM16 audio exchanged with the browser and the OpenAI Realtime API.
pub const OPENAI_REALTIME_API_PCM16_SAMPLE_RATE: f64 = 24000.0;

/// Interprets a little-endian byte buffer as PCM16 samples. A trailing odd byte is dropped.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn encode_i16(pcm16: &[i16]) -> String {
    let pcm16_bytes: Vec<u8> = pcm16
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16_bytes)
}

pub fn decode_i16(base64_fragment: &str) -> Vec<i16> {
    match base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        Ok(pcm16_bytes) => pcm16_from_le_bytes(&pcm16_bytes),
        Err(_) => {
            tracing::error!("Failed to decode base64 fragment to i16");
            Vec::new()
        }
    }
}
