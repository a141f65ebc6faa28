//! Wire constants and frame helpers for the worker side of the Majordomo
//! envelope (`MDPW01`), shared by `halcs-broker` and every `smio-worker`
//! process so the two sides can't drift apart on framing.

/// Client-to-broker / broker-to-client protocol header.
pub const MDPC_HEADER: &[u8] = b"MDPC01";
/// Broker-to-worker / worker-to-broker protocol header.
pub const MDPW_HEADER: &[u8] = b"MDPW01";

pub const WORKER_READY: u8 = 0x01;
pub const WORKER_REQUEST: u8 = 0x02;
pub const WORKER_REPLY: u8 = 0x03;

/// Frames a worker sends to announce itself for `service`, from the
/// worker's own side of its DEALER socket (no leading identity frame; the
/// broker's ROUTER socket adds one on receive).
pub fn worker_ready_frames(service: &str) -> Vec<Vec<u8>> {
    vec![
        Vec::new(),
        MDPW_HEADER.to_vec(),
        vec![WORKER_READY],
        service.as_bytes().to_vec(),
    ]
}

/// Frames a worker sends back carrying one reply `body` for
/// `client_identity`, again from the worker's own side.
pub fn worker_reply_frames(client_identity: &[u8], body: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut frames = vec![
        Vec::new(),
        MDPW_HEADER.to_vec(),
        vec![WORKER_REPLY],
        client_identity.to_vec(),
        Vec::new(),
    ];
    frames.extend(body.iter().cloned());
    frames
}

/// Parse one inbound REQUEST as seen from the worker's own side. Returns
/// `(client_identity, body)`.
pub fn parse_worker_request(frames: &[Vec<u8>]) -> Option<(Vec<u8>, &[Vec<u8>])> {
    if frames.len() < 5
        || !frames[0].is_empty()
        || frames[1] != MDPW_HEADER
        || frames[2].first() != Some(&WORKER_REQUEST)
        || !frames[4].is_empty()
    {
        return None;
    }
    Some((frames[3].clone(), &frames[5..]))
}
