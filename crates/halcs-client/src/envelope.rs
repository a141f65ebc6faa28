use crate::error::{ClientError, ClientResult};

/// Majordomo client protocol header, v0.1 (the worker side uses `MDPW01`).
pub const MDPC_HEADER: &[u8] = b"MDPC01";

/// Frame `(empty, MDPC01, service, ...body)`, the client-to-broker
/// envelope. `body` is whatever the message layer produced (opcode frame +
/// argument frames, or the THSAFE framing).
pub fn wrap_request(service: &str, body: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut frames = vec![Vec::new(), MDPC_HEADER.to_vec(), service.as_bytes().to_vec()];
    frames.extend(body.iter().cloned());
    frames
}

/// Strip the `(empty, MDPC01)` prefix off a broker reply, returning the
/// remaining body frames (the reply produced by `halcs_msg::codec`).
///
/// Unlike the request, the reply carries no service frame: the broker
/// builds it as `[client_identity, empty, MDPC01, ...body]`
/// (`halcs-broker`'s `handle_worker_reply`), and ROUTER strips the leading
/// identity frame before the client ever sees it, leaving exactly two
/// prefix frames here.
pub fn unwrap_reply(frames: &[Vec<u8>]) -> ClientResult<&[Vec<u8>]> {
    if frames.len() < 2 {
        return Err(ClientError::Protocol("reply shorter than the MDP envelope".into()));
    }
    if !frames[0].is_empty() {
        return Err(ClientError::Protocol("reply frame 0 is not empty".into()));
    }
    if frames[1] != MDPC_HEADER {
        return Err(ClientError::Protocol(format!(
            "unexpected MDP header {:?}",
            frames[1]
        )));
    }
    Ok(&frames[2..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_request_shape() {
        let body = vec![vec![1, 2, 3, 4]];
        let wrapped = wrap_request("smio.bpm0", &body);
        assert_eq!(wrapped[0], Vec::<u8>::new());
        assert_eq!(wrapped[1], MDPC_HEADER);
        assert_eq!(wrapped[2], b"smio.bpm0");
        assert_eq!(&wrapped[3..], &body[..]);
    }

    #[test]
    fn unwrap_reply_matches_broker_framing() {
        // What the client actually receives: the broker's
        // `[client_identity, empty, MDPC01, ...body]` with the ROUTER-added
        // identity frame already stripped off by the transport.
        let body = vec![vec![1, 2, 3, 4]];
        let mut on_wire = vec![Vec::new(), MDPC_HEADER.to_vec()];
        on_wire.extend(body.iter().cloned());

        let unwrapped = unwrap_reply(&on_wire).unwrap();
        assert_eq!(unwrapped, &body[..]);
    }

    #[test]
    fn rejects_missing_header() {
        let bad = vec![Vec::new(), b"WRONG1".to_vec(), b"svc".to_vec()];
        assert!(unwrap_reply(&bad).is_err());
    }
}
