/// The type of a single dispatch argument or return value.
///
/// `RawBlob` carries no fixed size in the descriptor; its frame may be any
/// length and is passed through uninterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    U32,
    U64,
    I32,
    I64,
    F64,
    RawBlob,
    /// Terminates an argument-kind list; never itself a valid argument.
    End,
}

/// Wire size, in bytes, of a fixed-width `ArgKind`. Returns `None` for
/// `RawBlob` (caller-determined) and `End` (not a real argument).
pub fn disp_get_asize(kind: ArgKind) -> Option<usize> {
    match kind {
        ArgKind::U32 | ArgKind::I32 => Some(4),
        ArgKind::U64 | ArgKind::I64 | ArgKind::F64 => Some(8),
        ArgKind::RawBlob | ArgKind::End => None,
    }
}

/// A decoded argument or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    F64(f64),
    RawBlob(Vec<u8>),
}

impl ArgValue {
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgValue::U32(_) => ArgKind::U32,
            ArgValue::U64(_) => ArgKind::U64,
            ArgValue::I32(_) => ArgKind::I32,
            ArgValue::I64(_) => ArgKind::I64,
            ArgValue::F64(_) => ArgKind::F64,
            ArgValue::RawBlob(_) => ArgKind::RawBlob,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ArgValue::U32(v) => v.to_le_bytes().to_vec(),
            ArgValue::U64(v) => v.to_le_bytes().to_vec(),
            ArgValue::I32(v) => v.to_le_bytes().to_vec(),
            ArgValue::I64(v) => v.to_le_bytes().to_vec(),
            ArgValue::F64(v) => v.to_le_bytes().to_vec(),
            ArgValue::RawBlob(b) => b.clone(),
        }
    }

    pub fn decode(kind: ArgKind, frame: &[u8]) -> Option<ArgValue> {
        match kind {
            ArgKind::U32 => Some(ArgValue::U32(u32::from_le_bytes(frame.try_into().ok()?))),
            ArgKind::U64 => Some(ArgValue::U64(u64::from_le_bytes(frame.try_into().ok()?))),
            ArgKind::I32 => Some(ArgValue::I32(i32::from_le_bytes(frame.try_into().ok()?))),
            ArgKind::I64 => Some(ArgValue::I64(i64::from_le_bytes(frame.try_into().ok()?))),
            ArgKind::F64 => Some(ArgValue::F64(f64::from_le_bytes(frame.try_into().ok()?))),
            ArgKind::RawBlob => Some(ArgValue::RawBlob(frame.to_vec())),
            ArgKind::End => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ArgValue::U32(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_sizes() {
        assert_eq!(disp_get_asize(ArgKind::U32), Some(4));
        assert_eq!(disp_get_asize(ArgKind::U64), Some(8));
        assert_eq!(disp_get_asize(ArgKind::RawBlob), None);
        assert_eq!(disp_get_asize(ArgKind::End), None);
    }

    #[test]
    fn round_trip_u32() {
        let v = ArgValue::U32(0xDEADBEEF);
        let bytes = v.encode();
        assert_eq!(ArgValue::decode(ArgKind::U32, &bytes), Some(v));
    }
}
