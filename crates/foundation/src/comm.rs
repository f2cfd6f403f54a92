//! Communicator seam for cross-rank collectives.
//!
//! The core never talks to a transport directly. Reductions and file
//! extracts go through [`Communicator`], a narrow trait covering exactly
//! the collectives the system uses: elementwise SUM/MIN/MAX, the
//! loc-reductions (winning value plus winning rank), length-prefixed
//! broadcast, and a barrier.
//!
//! [`SelfComm`] is the single-rank implementation used when no transport
//! is configured; an MPI-backed implementation lives with the host.
//!
//! # Process-wide state
//!
//! One optional default communicator, installed once by the host. This
//! is the only process-global in the workspace.

use std::sync::{Arc, OnceLock};

use tracing::warn;

/// Cross-rank collective operations.
///
/// Every method is a collective: all ranks in the communicator must call
/// it in the same order. The scheduler's deterministic filter ordering
/// is what makes that safe.
pub trait Communicator: Send + Sync {
    /// This process's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Opaque host-assigned handle (e.g. a Fortran MPI handle). Zero for
    /// the single-rank communicator.
    fn handle(&self) -> i64 {
        0
    }

    /// All-reduce a scalar with SUM.
    fn sum_f64(&self, value: f64) -> f64;

    /// All-reduce an integer with SUM.
    fn sum_i64(&self, value: i64) -> i64;

    /// All-reduce a scalar with MIN.
    fn min_f64(&self, value: f64) -> f64;

    /// All-reduce a scalar with MAX.
    fn max_f64(&self, value: f64) -> f64;

    /// All-reduce an integer with MAX.
    fn max_i64(&self, value: i64) -> i64;

    /// Elementwise all-reduce with SUM, in place.
    fn sum_f64_array(&self, values: &mut [f64]);

    /// Elementwise all-reduce with MIN, in place.
    fn min_f64_array(&self, values: &mut [f64]);

    /// Elementwise all-reduce with MAX, in place.
    fn max_f64_array(&self, values: &mut [f64]);

    /// Elementwise all-reduce with MAX over integers, in place.
    fn max_i64_array(&self, values: &mut [i64]);

    /// MINLOC: the smallest value across ranks and the rank holding it.
    fn minloc(&self, value: f64) -> (f64, usize);

    /// MAXLOC: the largest value across ranks and the rank holding it.
    fn maxloc(&self, value: f64) -> (f64, usize);

    /// Broadcast a byte buffer from `root`. Length-agnostic: receivers
    /// resize to whatever `root` sent.
    fn broadcast_bytes(&self, root: usize, bytes: &mut Vec<u8>);

    /// Wait for every rank to arrive.
    fn barrier(&self) {}
}

/// Broadcast a string from `root` via [`Communicator::broadcast_bytes`].
///
/// Replaces fixed-size character buffers: the receiving ranks take the
/// sender's length as-is, so names of any length survive the exchange.
pub fn broadcast_string(comm: &dyn Communicator, root: usize, value: &str) -> String {
    let mut bytes = if comm.rank() == root {
        value.as_bytes().to_vec()
    } else {
        Vec::new()
    };
    comm.broadcast_bytes(root, &mut bytes);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Single-rank communicator. Every reduction is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum_f64(&self, value: f64) -> f64 {
        value
    }

    fn sum_i64(&self, value: i64) -> i64 {
        value
    }

    fn min_f64(&self, value: f64) -> f64 {
        value
    }

    fn max_f64(&self, value: f64) -> f64 {
        value
    }

    fn max_i64(&self, value: i64) -> i64 {
        value
    }

    fn sum_f64_array(&self, _values: &mut [f64]) {}

    fn min_f64_array(&self, _values: &mut [f64]) {}

    fn max_f64_array(&self, _values: &mut [f64]) {}

    fn max_i64_array(&self, _values: &mut [i64]) {}

    fn minloc(&self, value: f64) -> (f64, usize) {
        (value, 0)
    }

    fn maxloc(&self, value: f64) -> (f64, usize) {
        (value, 0)
    }

    fn broadcast_bytes(&self, _root: usize, _bytes: &mut Vec<u8>) {}
}

static DEFAULT_COMM: OnceLock<Arc<dyn Communicator>> = OnceLock::new();

/// Install the process-wide default communicator.
///
/// May be called once, before any workspace executes. A second call is
/// ignored with a warning; tearing down and swapping transports
/// mid-process is not supported.
pub fn set_default(comm: Arc<dyn Communicator>) {
    if DEFAULT_COMM.set(comm).is_err() {
        warn!("default communicator is already set; ignoring");
    }
}

/// The process-wide default communicator, or [`SelfComm`] if the host
/// never installed one.
pub fn default() -> Arc<dyn Communicator> {
    DEFAULT_COMM
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(SelfComm))
}

/// Opaque handle of the default communicator, if one was installed.
pub fn default_handle() -> Option<i64> {
    DEFAULT_COMM.get().map(|c| c.handle())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_comm_identity() {
        let comm = SelfComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.sum_f64(3.5), 3.5);
        assert_eq!(comm.maxloc(7.0), (7.0, 0));

        let mut bins = vec![1.0, 2.0];
        comm.sum_f64_array(&mut bins);
        assert_eq!(bins, vec![1.0, 2.0]);
    }

    #[test]
    fn test_broadcast_string_roundtrip() {
        let comm = SelfComm;
        let name = broadcast_string(&comm, 0, "a_topology_name_longer_than_any_fixed_buffer");
        assert_eq!(name, "a_topology_name_longer_than_any_fixed_buffer");
    }
}
