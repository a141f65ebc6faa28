use crate::error::{MsgError, MsgResult};

/// High bit of frame 0 distinguishes the raw register-access namespace from
/// the typed-RPC opcode namespace (which otherwise lives in `[0,
/// MSG_OPCODE_MAX]`).
const THSAFE_TAG: u32 = 0x8000_0000;

/// A raw register operation, carried by the `THSAFE_ZMQ` framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThsafeOp {
    Open,
    Release,
    Read16,
    Write16,
    Read32,
    Write32,
    Read64,
    Write64,
    ReadBlock,
    WriteBlock,
}

impl ThsafeOp {
    fn from_code(code: u32) -> Option<ThsafeOp> {
        Some(match code {
            0 => ThsafeOp::Open,
            1 => ThsafeOp::Release,
            2 => ThsafeOp::Read16,
            3 => ThsafeOp::Write16,
            4 => ThsafeOp::Read32,
            5 => ThsafeOp::Write32,
            6 => ThsafeOp::Read64,
            7 => ThsafeOp::Write64,
            8 => ThsafeOp::ReadBlock,
            9 => ThsafeOp::WriteBlock,
            _ => return None,
        })
    }

    fn tagged(self) -> u32 {
        let code = match self {
            ThsafeOp::Open => 0,
            ThsafeOp::Release => 1,
            ThsafeOp::Read16 => 2,
            ThsafeOp::Write16 => 3,
            ThsafeOp::Read32 => 4,
            ThsafeOp::Write32 => 5,
            ThsafeOp::Read64 => 6,
            ThsafeOp::Write64 => 7,
            ThsafeOp::ReadBlock => 8,
            ThsafeOp::WriteBlock => 9,
        };
        THSAFE_TAG | code
    }
}

/// A raw register request: `(op, offs, size, payload?)`. `payload` is
/// present for the write variants.
#[derive(Debug, Clone, PartialEq)]
pub struct ThsafeRequest {
    pub op: ThsafeOp,
    pub offs: u64,
    pub size: u32,
    pub payload: Option<Vec<u8>>,
}

/// Result of classifying an inbound multi-frame message's frame 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// Typed RPC: `opcode` indexes the dispatch table.
    ExpZmq(u32),
    /// Raw register access.
    ThsafeZmq(ThsafeOp),
}

pub fn classify(frame0: u32) -> MsgResult<Protocol> {
    if frame0 & THSAFE_TAG != 0 {
        ThsafeOp::from_code(frame0 & !THSAFE_TAG)
            .map(Protocol::ThsafeZmq)
            .ok_or(MsgError::NotSupported)
    } else {
        Ok(Protocol::ExpZmq(frame0))
    }
}

pub fn encode_thsafe_request(req: &ThsafeRequest) -> Vec<Vec<u8>> {
    let mut frames = vec![
        req.op.tagged().to_le_bytes().to_vec(),
        req.offs.to_le_bytes().to_vec(),
        req.size.to_le_bytes().to_vec(),
    ];
    if let Some(payload) = &req.payload {
        frames.push(payload.clone());
    }
    frames
}

pub fn decode_thsafe_request(frames: &[Vec<u8>]) -> MsgResult<ThsafeRequest> {
    if frames.len() < 3 {
        return Err(MsgError::NotSupported);
    }
    let tag = u32::from_le_bytes(
        frames[0]
            .as_slice()
            .try_into()
            .map_err(|_| MsgError::NotSupported)?,
    );
    let op = match classify(tag)? {
        Protocol::ThsafeZmq(op) => op,
        Protocol::ExpZmq(_) => return Err(MsgError::NotSupported),
    };
    let offs = u64::from_le_bytes(
        frames[1]
            .as_slice()
            .try_into()
            .map_err(|_| MsgError::NotSupported)?,
    );
    let size = u32::from_le_bytes(
        frames[2]
            .as_slice()
            .try_into()
            .map_err(|_| MsgError::NotSupported)?,
    );
    let payload = frames.get(3).cloned();
    Ok(ThsafeRequest {
        op,
        offs,
        size,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_exp_opcode() {
        assert_eq!(classify(7).unwrap(), Protocol::ExpZmq(7));
    }

    #[test]
    fn classify_thsafe_round_trip() {
        let req = ThsafeRequest {
            op: ThsafeOp::Write32,
            offs: 0x4000_0010,
            size: 4,
            payload: Some(vec![0xEF, 0xBE, 0xAD, 0xDE]),
        };
        let frames = encode_thsafe_request(&req);
        let decoded = decode_thsafe_request(&frames).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn unrecognized_framing_not_supported() {
        assert!(decode_thsafe_request(&[vec![1, 2]]).is_err());
    }
}
