//! Frame batch codec: flat little-endian byte buffers plus shape and dtype
//! metadata on the wire, tagged 4-D arrays in memory.

use crate::error::DecodeError;
use ndarray::Array4;
use stream_proto::wire::DType;

/// A decoded frame batch in `[batch, width, height, channel]` order. One
/// variant per supported element type so unknown tags fail closed instead of
/// being reinterpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameArray {
    Uint8(Array4<u8>),
    Uint16(Array4<u16>),
    Float32(Array4<f32>),
    Float64(Array4<f64>),
}

impl FrameArray {
    pub fn dtype(&self) -> DType {
        match self {
            Self::Uint8(_) => DType::Uint8,
            Self::Uint16(_) => DType::Uint16,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
        }
    }

    pub fn dims(&self) -> (usize, usize, usize, usize) {
        match self {
            Self::Uint8(a) => a.dim(),
            Self::Uint16(a) => a.dim(),
            Self::Float32(a) => a.dim(),
            Self::Float64(a) => a.dim(),
        }
    }

    pub fn batch(&self) -> usize {
        self.dims().0
    }
}

pub fn decode(
    bytes: &[u8],
    batch: usize,
    width: usize,
    height: usize,
    channel: usize,
    dtype_tag: &str,
) -> Result<FrameArray, DecodeError> {
    let dtype = DType::from_tag(dtype_tag)
        .ok_or_else(|| DecodeError::UnknownDType(dtype_tag.to_string()))?;
    if batch == 0 {
        return Err(DecodeError::EmptyBatch);
    }

    let expected = batch
        .checked_mul(width)
        .and_then(|n| n.checked_mul(height))
        .and_then(|n| n.checked_mul(channel))
        .and_then(|n| n.checked_mul(dtype.size_bytes()))
        .unwrap_or(usize::MAX);
    if bytes.len() != expected {
        return Err(DecodeError::LengthMismatch {
            expected,
            actual: bytes.len(),
            shape: [batch, width, height, channel],
            dtype: dtype.as_tag(),
        });
    }

    let shape = (batch, width, height, channel);
    let frames = match dtype {
        DType::Uint8 => {
            let data = bytes.to_vec();
            FrameArray::Uint8(Array4::from_shape_vec(shape, data)?)
        }
        DType::Uint16 => {
            let data = bytes
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect();
            FrameArray::Uint16(Array4::from_shape_vec(shape, data)?)
        }
        DType::Float32 => {
            let data = bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            FrameArray::Float32(Array4::from_shape_vec(shape, data)?)
        }
        DType::Float64 => {
            let data = bytes
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect();
            FrameArray::Float64(Array4::from_shape_vec(shape, data)?)
        }
    };
    Ok(frames)
}

/// Flattens a frame batch back into row-major little-endian bytes. Inverse of
/// [`decode`], bit-exact for every dtype.
pub fn encode(frames: &FrameArray) -> Vec<u8> {
    match frames {
        FrameArray::Uint8(a) => a.iter().copied().collect(),
        FrameArray::Uint16(a) => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
        FrameArray::Float32(a) => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
        FrameArray::Float64(a) => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}
