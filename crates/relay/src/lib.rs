//! Conflux relay extracts
//!
//! File sinks for published datasets: one payload file per domain in a
//! cycle-stamped directory, plus a root index file a reader can open to
//! find everything. Rank 0 creates directories and writes the root;
//! every rank agrees the directory exists before writing into it.

pub mod extract;

pub use extract::{
    load_blueprint, save_binning_mesh, save_blueprint, verify_io_params, RelayError, RelayLoad,
    RelaySave,
};
