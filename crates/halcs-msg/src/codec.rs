use crate::error::{MsgError, MsgResult};

/// Build the frames of an `EXP_ZMQ` request for `opcode` with already-encoded
/// argument payloads.
pub fn encode_exp_request(opcode: u32, arg_frames: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut frames = Vec::with_capacity(1 + arg_frames.len());
    frames.push(opcode.to_le_bytes().to_vec());
    frames.extend(arg_frames.iter().cloned());
    frames
}

/// Split an inbound message's frames into `(frame0 as u32, remaining
/// frames)`, the shared first step for both `EXP_ZMQ` and `THSAFE_ZMQ`
/// framing.
pub fn split_frame0(frames: &[Vec<u8>]) -> MsgResult<(u32, &[Vec<u8>])> {
    let first = frames
        .first()
        .ok_or_else(|| MsgError::ProtocolMalformed("empty message".into()))?;
    let tag = u32::from_le_bytes(
        first
            .as_slice()
            .try_into()
            .map_err(|_| MsgError::ProtocolMalformed("frame 0 is not 4 bytes".into()))?,
    );
    Ok((tag, &frames[1..]))
}

/// Build the frames of a reply: `(err_code)` on failure, or `(0, payload_len,
/// payload)` when the handler produced a payload, or just `(0)` when it
/// didn't.
pub fn encode_reply(err_code: u32, payload: Option<&[u8]>) -> Vec<Vec<u8>> {
    let mut frames = vec![err_code.to_le_bytes().to_vec()];
    if err_code == 0 {
        if let Some(p) = payload {
            frames.push((p.len() as u32).to_le_bytes().to_vec());
            frames.push(p.to_vec());
        }
    }
    frames
}

/// Decode a reply's frames, validating that a declared payload length
/// matches the payload frame's actual length.
pub fn decode_reply(frames: &[Vec<u8>]) -> MsgResult<(u32, Option<Vec<u8>>)> {
    let first = frames
        .first()
        .ok_or_else(|| MsgError::ProtocolMalformed("empty reply".into()))?;
    let err_code = u32::from_le_bytes(
        first
            .as_slice()
            .try_into()
            .map_err(|_| MsgError::ProtocolMalformed("reply frame 0 is not 4 bytes".into()))?,
    );

    match frames.len() {
        1 => Ok((err_code, None)),
        3 => {
            let declared_len = u32::from_le_bytes(
                frames[1]
                    .as_slice()
                    .try_into()
                    .map_err(|_| MsgError::ProtocolMalformed("reply frame 1 is not 4 bytes".into()))?,
            ) as usize;
            if declared_len != frames[2].len() {
                return Err(MsgError::ProtocolMalformed(format!(
                    "declared payload length {} does not match frame length {}",
                    declared_len,
                    frames[2].len()
                )));
            }
            Ok((err_code, Some(frames[2].clone())))
        }
        n => Err(MsgError::ProtocolMalformed(format!(
            "unexpected reply frame count {}",
            n
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_round_trip_with_payload() {
        let frames = encode_reply(0, Some(&[1, 2, 3, 4]));
        let (err, payload) = decode_reply(&frames).unwrap();
        assert_eq!(err, 0);
        assert_eq!(payload.unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn reply_round_trip_without_payload() {
        let frames = encode_reply(0, None);
        let (err, payload) = decode_reply(&frames).unwrap();
        assert_eq!(err, 0);
        assert!(payload.is_none());
    }

    #[test]
    fn reply_error_carries_no_payload() {
        let frames = encode_reply(MsgError::WrongArgs.code(), None);
        let (err, payload) = decode_reply(&frames).unwrap();
        assert_eq!(err, MsgError::WrongArgs.code());
        assert!(payload.is_none());
    }

    #[test]
    fn reply_with_mismatched_length_is_protocol_error() {
        let mut frames = encode_reply(0, Some(&[1, 2, 3, 4]));
        frames[1] = 99u32.to_le_bytes().to_vec();
        assert!(decode_reply(&frames).is_err());
    }

    #[test]
    fn exp_request_round_trip() {
        let frames = encode_exp_request(7, &[1u32.to_le_bytes().to_vec(), 2u32.to_le_bytes().to_vec()]);
        let (opcode, rest) = split_frame0(&frames).unwrap();
        assert_eq!(opcode, 7);
        assert_eq!(rest.len(), 2);
    }
}
