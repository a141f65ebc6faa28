use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{ClientError, ClientResult};

/// Matches the worker-side block size (`halcs_smio::BLOCK_SIZE`). The two
/// crates never share a dependency edge: client and worker are separate
/// processes agreeing only on the wire constant, so it is restated here.
pub const BLOCK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqStatus {
    Ok,
    Busy,
    Again,
}

/// The three acquisition RPCs, abstracted so [`get_curve`] can be exercised
/// against a fake in tests and against a real [`crate::MajordomoClient`] in
/// production.
pub trait AcquisitionClient {
    fn data_acquire(&mut self, channel_id: u32, num_samples: u32) -> ClientResult<AcqStatus>;
    fn check_data_acquire(&mut self) -> ClientResult<AcqStatus>;
    fn get_data_block(&mut self, block_idx: u32) -> ClientResult<(u32, Vec<u8>)>;
}

const POLL_BACKOFF_INITIAL: Duration = Duration::from_millis(1);
const POLL_BACKOFF_MAX: Duration = Duration::from_millis(100);

/// Analogue of `libclient/bpm_client.c:bpm_get_curve`: arm an acquisition,
/// poll with bounded backoff until it completes or `deadline` elapses, then
/// assemble the curve block by block into `buf`. Returns the number of
/// bytes actually written (truncated to `buf.len()` if the curve is
/// larger than the caller's buffer).
pub fn get_curve(
    client: &mut impl AcquisitionClient,
    channel_id: u32,
    num_samples: u32,
    sample_size: u32,
    buf: &mut [u8],
    deadline: Duration,
    cancel: &AtomicBool,
) -> ClientResult<usize> {
    let start = Instant::now();

    loop {
        match client.data_acquire(channel_id, num_samples)? {
            AcqStatus::Ok => break,
            AcqStatus::Busy => {
                if cancel.load(Ordering::SeqCst) {
                    return Err(ClientError::Interrupted);
                }
                if start.elapsed() >= deadline {
                    return Err(ClientError::Timeout);
                }
            }
            AcqStatus::Again => unreachable!("data_acquire never replies AGAIN"),
        }
    }

    let mut backoff = POLL_BACKOFF_INITIAL;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(ClientError::Interrupted);
        }
        if start.elapsed() >= deadline {
            return Err(ClientError::Timeout);
        }
        match client.check_data_acquire()? {
            AcqStatus::Ok => break,
            AcqStatus::Again => {
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(POLL_BACKOFF_MAX);
            }
            AcqStatus::Busy => unreachable!("check_data_acquire never replies BUSY"),
        }
    }

    let total_bytes = num_samples as u64 * sample_size as u64;
    let block_n_valid = (total_bytes / BLOCK_SIZE as u64) as u32;

    let mut written = 0usize;
    for block_idx in 0..=block_n_valid {
        if cancel.load(Ordering::SeqCst) {
            return Err(ClientError::Interrupted);
        }
        if written >= buf.len() {
            break;
        }

        let (valid, block) = client.get_data_block(block_idx)?;
        let valid = valid as usize;
        let room = buf.len() - written;
        let take = valid.min(room);
        buf[written..written + take].copy_from_slice(&block[..take]);
        written += take;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClient {
        ready_after: u32,
        polls: u32,
        curve: Vec<u8>,
        block_n_valid: u32,
    }

    impl AcquisitionClient for FakeClient {
        fn data_acquire(&mut self, _channel_id: u32, _num_samples: u32) -> ClientResult<AcqStatus> {
            Ok(AcqStatus::Ok)
        }

        fn check_data_acquire(&mut self) -> ClientResult<AcqStatus> {
            self.polls += 1;
            if self.polls >= self.ready_after {
                Ok(AcqStatus::Ok)
            } else {
                Ok(AcqStatus::Again)
            }
        }

        fn get_data_block(&mut self, block_idx: u32) -> ClientResult<(u32, Vec<u8>)> {
            if block_idx > self.block_n_valid {
                return Err(ClientError::Server(1));
            }
            let start = block_idx as usize * BLOCK_SIZE;
            let valid = self.curve.len().saturating_sub(start).min(BLOCK_SIZE);
            let mut block = vec![0u8; BLOCK_SIZE];
            block[..valid].copy_from_slice(&self.curve[start..start + valid]);
            Ok((valid as u32, block))
        }
    }

    #[test]
    fn assembles_curve_s5() {
        // S5: num_samples=1024, sample_size=16, BLOCK_SIZE=4096 -> block_n_valid=4.
        let curve: Vec<u8> = (0..16384u32).map(|i| i as u8).collect();
        let mut client = FakeClient {
            ready_after: 2,
            polls: 0,
            curve: curve.clone(),
            block_n_valid: 4,
        };

        let mut buf = vec![0u8; 16384];
        let cancel = AtomicBool::new(false);
        let n = get_curve(&mut client, 0, 1024, 16, &mut buf, Duration::from_secs(1), &cancel).unwrap();
        assert_eq!(n, 16384);
        assert_eq!(buf, curve);
    }

    #[test]
    fn truncates_to_caller_buffer() {
        let curve: Vec<u8> = (0..16384u32).map(|i| i as u8).collect();
        let mut client = FakeClient {
            ready_after: 1,
            polls: 0,
            curve: curve.clone(),
            block_n_valid: 4,
        };

        let mut buf = vec![0u8; 100];
        let cancel = AtomicBool::new(false);
        let n = get_curve(&mut client, 0, 1024, 16, &mut buf, Duration::from_secs(1), &cancel).unwrap();
        assert_eq!(n, 100);
        assert_eq!(buf, curve[..100]);
    }

    #[test]
    fn cancellation_flag_aborts_early() {
        let mut client = FakeClient {
            ready_after: 1000,
            polls: 0,
            curve: vec![0u8; 16384],
            block_n_valid: 4,
        };
        let mut buf = vec![0u8; 16384];
        let cancel = AtomicBool::new(true);
        let err = get_curve(&mut client, 0, 1024, 16, &mut buf, Duration::from_secs(5), &cancel).unwrap_err();
        assert!(matches!(err, ClientError::Interrupted));
    }
}
