//! Byte-level pieces of the wire contract shared by server and client:
//! element datatype tags and the fixed-width label-code encoding.

/// Element datatype of a flattened frame buffer. Unknown tags are rejected
/// rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Uint8,
    Uint16,
    Float32,
    Float64,
}

impl DType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "uint8" => Some(Self::Uint8),
            "uint16" => Some(Self::Uint16),
            "float32" => Some(Self::Float32),
            "float64" => Some(Self::Float64),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Uint8 => 1,
            Self::Uint16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

/// Encodes one label per batch row as fixed-width UTF-32-LE character codes,
/// NUL-padded to the longest label in the set.
pub fn encode_labels(labels: &[String]) -> Vec<u8> {
    let width = labels
        .iter()
        .map(|label| label.chars().count())
        .max()
        .unwrap_or(0);

    let mut buf = Vec::with_capacity(labels.len() * width * 4);
    for label in labels {
        let mut written = 0;
        for ch in label.chars() {
            buf.extend_from_slice(&(ch as u32).to_le_bytes());
            written += 1;
        }
        for _ in written..width {
            buf.extend_from_slice(&0u32.to_le_bytes());
        }
    }
    buf
}

/// Decodes a fixed-width label-code buffer back into one string per row,
/// stripping the NUL padding.
pub fn decode_labels(bytes: &[u8], rows: usize) -> Result<Vec<String>, String> {
    if rows == 0 {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        return Err("label buffer is non-empty for zero rows".to_string());
    }
    if bytes.len() % 4 != 0 {
        return Err(format!(
            "label buffer length {} is not a multiple of 4",
            bytes.len()
        ));
    }
    let total_codes = bytes.len() / 4;
    if total_codes % rows != 0 {
        return Err(format!(
            "{} character codes do not divide into {} rows",
            total_codes, rows
        ));
    }
    let width = total_codes / rows;
    if width == 0 {
        return Err(format!("label buffer is empty for {rows} rows"));
    }

    let mut labels = Vec::with_capacity(rows);
    for row in bytes.chunks_exact(width * 4) {
        let mut label = String::with_capacity(width);
        for code in row.chunks_exact(4) {
            let value = u32::from_le_bytes([code[0], code[1], code[2], code[3]]);
            if value == 0 {
                continue;
            }
            let ch = char::from_u32(value)
                .ok_or_else(|| format!("invalid character code {value}"))?;
            label.push(ch);
        }
        labels.push(label);
    }
    Ok(labels)
}
