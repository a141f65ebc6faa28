use std::time::Duration;

use halcs_msg::codec::{decode_reply, encode_exp_request};
use halcs_msg::{ArgValue, MsgError};

use crate::envelope::{unwrap_reply, wrap_request};
use crate::error::{ClientError, ClientResult};

/// A thin Majordomo client: a `zmq::DEALER` socket talking to one broker,
/// used to reach any number of services by name. Mirrors the role of
/// `libclient/bpm_client.c`'s `bpm_client_new`/`bpm_func_exec`.
pub struct MajordomoClient {
    socket: zmq::Socket,
    #[allow(dead_code)]
    ctx: zmq::Context,
}

impl MajordomoClient {
    pub fn connect(broker_endpoint: &str) -> ClientResult<Self> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::DEALER)?;
        socket
            .connect(broker_endpoint)
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        Ok(MajordomoClient { socket, ctx })
    }

    /// Issue one typed RPC call and wait up to `timeout_ms` for a reply.
    /// Returns the decoded return value, or `None` if the descriptor has no
    /// return value (`retval_owner = Callee`).
    pub fn call(
        &mut self,
        service: &str,
        opcode: u32,
        args: &[ArgValue],
        timeout_ms: u64,
    ) -> ClientResult<Option<ArgValue>> {
        let arg_frames: Vec<Vec<u8>> = args.iter().map(ArgValue::encode).collect();
        let request = wrap_request(service, &encode_exp_request(opcode, &arg_frames));

        self.socket.send_multipart(&request, 0)?;

        if !self.poll_readable(timeout_ms)? {
            return Err(ClientError::Timeout);
        }

        let reply = self.socket.recv_multipart(0)?;
        let body = unwrap_reply(&reply)?;
        let (err, payload) =
            decode_reply(body).map_err(|e| ClientError::Protocol(e.to_string()))?;

        if err != 0 {
            return Err(ClientError::Server(err));
        }

        Ok(payload.map(ArgValue::RawBlob))
    }

    fn poll_readable(&self, timeout_ms: u64) -> ClientResult<bool> {
        let mut items = [self.socket.as_poll_item(zmq::POLLIN)];
        let n = zmq::poll(&mut items, timeout_ms as i64)?;
        Ok(n > 0)
    }
}

/// Analogue of `bpm_func_exec`: call an opcode that returns a fixed-width
/// value and report a protocol error if the server's payload doesn't have
/// the expected width.
pub fn func_exec_u32(
    client: &mut MajordomoClient,
    service: &str,
    opcode: u32,
    args: &[ArgValue],
    timeout_ms: u64,
) -> ClientResult<u32> {
    match client.call(service, opcode, args, timeout_ms)? {
        Some(ArgValue::RawBlob(bytes)) if bytes.len() == 4 => {
            Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
        }
        Some(_) => Err(ClientError::Protocol("unexpected return payload width".into())),
        None => Err(ClientError::Protocol(
            MsgError::ProtocolMalformed("handler returned no payload".into()).to_string(),
        )),
    }
}

/// The interval between successive sends while waiting for a reply; kept
/// small and fixed since broker round-trips are local-network-fast.
pub const CALL_RETRY_INTERVAL: Duration = Duration::from_millis(50);
