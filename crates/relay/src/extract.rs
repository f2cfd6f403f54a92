//! Blueprint save path.
//!
//! Layout on disk, for base path `out` at cycle 100:
//!
//! ```text
//! out.cycle_000100/domain_000000.json
//! out.cycle_000100/domain_000001.json
//! out.cycle_000100.root
//! ```
//!
//! The root file carries the protocol, file counts, printf-style file
//! pattern and a small blueprint index so a reader never has to guess.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use conflux_flow::{Filter, FilterContext, FilterInterface, FlowError};
use conflux_foundation::{comm, params, Communicator, Params, VerifyInfo};
use conflux_mesh::{Binning, Dataset};

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay I/O error: {0}")]
    Io(String),

    #[error("ranks disagree: {0}")]
    RankDisagreement(String),
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io(err.to_string())
    }
}

const PROTOCOL: &str = "json";

fn cycle_dir(path: &str, cycle: u64) -> PathBuf {
    PathBuf::from(format!("{path}.cycle_{cycle:06}"))
}

fn domain_file(dir: &Path, domain_id: u32) -> PathBuf {
    dir.join(format!("domain_{domain_id:06}.{PROTOCOL}"))
}

/// Write a dataset as blueprint files.
///
/// Rank 0 creates the output directory; every rank then checks it and
/// the MAX-reduced 0/1 agreement flag gates the writes. Rank 0 writes
/// the root index after the domain files.
pub fn save_blueprint(dataset: &Dataset, path: &str, comm: &dyn Communicator) -> Result<PathBuf> {
    // ranks must agree on the cycle before building names from it
    let cycle = dataset
        .domains
        .iter()
        .find_map(|d| d.state.cycle)
        .unwrap_or(0);
    let agreed = comm::broadcast_string(comm, 0, &cycle.to_string());
    if agreed != cycle.to_string() {
        return Err(RelayError::RankDisagreement(format!(
            "cycle {cycle} vs {agreed}"
        )));
    }

    let dir = cycle_dir(path, cycle);

    if comm.rank() == 0 && !dir.is_dir() {
        fs::create_dir_all(&dir)?;
    }
    comm.barrier();

    // agreement step: someone must see the directory
    let local_ok = dir.is_dir() as i64;
    if comm.max_i64(local_ok) != 1 {
        return Err(RelayError::Io(format!(
            "failed to create directory {}",
            dir.display()
        )));
    }

    for (idx, dom) in dataset.domains.iter().enumerate() {
        let domain_id = dom.state.domain_id.unwrap_or(idx as u32);
        let file = domain_file(&dir, domain_id);
        let payload = serde_json::to_string_pretty(dom)
            .map_err(|e| RelayError::Io(e.to_string()))?;
        fs::write(&file, payload)?;
        debug!(file = %file.display(), "wrote domain");
    }

    let num_domains = comm.sum_i64(dataset.domains.len() as i64);

    let root_file = PathBuf::from(format!("{path}.cycle_{cycle:06}.root"));
    if comm.rank() == 0 {
        let root = root_index(dataset, &dir, num_domains);
        fs::write(
            &root_file,
            serde_json::to_string_pretty(&root).map_err(|e| RelayError::Io(e.to_string()))?,
        )?;
        info!(root = %root_file.display(), domains = num_domains, "wrote blueprint root");
    }
    Ok(root_file)
}

fn root_index(dataset: &Dataset, dir: &Path, num_domains: i64) -> serde_json::Value {
    let mut index = serde_json::Map::new();
    if let Some(dom) = dataset.domains.first() {
        let mut fields = serde_json::Map::new();
        for (name, field) in &dom.fields {
            fields.insert(
                name.clone(),
                json!({
                    "association": field.association.as_str(),
                    "topology": field.topology,
                    "number_of_components": 1,
                }),
            );
        }
        index.insert(
            "mesh".to_string(),
            json!({
                "coordsets": dom.coordsets.keys().collect::<Vec<_>>(),
                "topologies": dom.topologies.keys().collect::<Vec<_>>(),
                "fields": fields,
            }),
        );
    }

    json!({
        "protocol": {
            "name": format!("conflux_{PROTOCOL}"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "number_of_files": num_domains,
        "number_of_trees": num_domains,
        "file_pattern": dir.join(format!("domain_%06d.{PROTOCOL}")).display().to_string(),
        "tree_pattern": "/",
        "blueprint_index": index,
    })
}

/// Save the bin-lattice mesh of a binning result. The lattice is
/// globally replicated, so only rank 0 writes.
pub fn save_binning_mesh(
    binning: &Binning,
    path: &str,
    comm: &dyn Communicator,
) -> Result<Option<PathBuf>> {
    let mesh = conflux_mesh::binning::bin_mesh(binning)
        .map_err(|e| RelayError::Io(e.to_string()))?;
    if comm.rank() != 0 {
        comm.barrier();
        return Ok(None);
    }
    let root = save_blueprint(&mesh, path, &comm::SelfComm)?;
    comm.barrier();
    Ok(Some(root))
}

/// Read a dataset back from a root index file.
///
/// Each rank loads every domain file the root points at; callers in a
/// multi-rank job are expected to partition domains themselves.
pub fn load_blueprint(root_file: &Path) -> Result<Dataset> {
    let root: serde_json::Value = serde_json::from_str(&fs::read_to_string(root_file)?)
        .map_err(|e| RelayError::Io(format!("bad root file: {e}")))?;

    let pattern = root["file_pattern"]
        .as_str()
        .ok_or_else(|| RelayError::Io("root file has no file_pattern".to_string()))?;
    let dir = Path::new(pattern)
        .parent()
        .ok_or_else(|| RelayError::Io(format!("unusable file_pattern '{pattern}'")))?;

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("domain_") && n.ends_with(&format!(".{PROTOCOL}")))
        })
        .collect();
    files.sort();

    let mut dataset = Dataset::new();
    for file in files {
        let dom = serde_json::from_str(&fs::read_to_string(&file)?)
            .map_err(|e| RelayError::Io(format!("bad domain file {}: {e}", file.display())))?;
        dataset.domains.push(dom);
    }
    if dataset.domains.is_empty() {
        return Err(RelayError::Io(format!(
            "no domain files behind {}",
            root_file.display()
        )));
    }
    debug!(root = %root_file.display(), domains = dataset.domains.len(), "loaded blueprint");
    Ok(dataset)
}

/// Shared parameter contract for relay filters: a required non-empty
/// `path`, an optional non-empty `protocol`.
pub fn verify_io_params(params: &Params, info: &mut VerifyInfo) -> bool {
    let mut ok = true;

    match params.get("path") {
        None => {
            info.error("missing required entry 'path'");
            ok = false;
        }
        Some(v) => match v.as_str() {
            None => {
                info.error("'path' must be a string");
                ok = false;
            }
            Some("") => {
                info.error("'path' is an empty string");
                ok = false;
            }
            Some(_) => {}
        },
    }

    if let Some(v) = params.get("protocol") {
        match v.as_str() {
            None => {
                info.error("optional entry 'protocol' must be a string");
                ok = false;
            }
            Some("") => {
                info.error("'protocol' is an empty string");
                ok = false;
            }
            Some(_) => info.note("includes 'protocol'"),
        }
    }

    ok
}

/// `relay_save` — sink filter writing its input dataset as blueprint
/// files.
pub struct RelaySave;

impl Filter for RelaySave {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("relay_save").ports(["in"]).sink()
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        verify_io_params(params, info)
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> conflux_flow::Result<()> {
        let path = params::require_str(ctx.params(), "path")?.to_string();
        let comm = comm::default();

        let input = ctx.input("in")?;
        // accept the shared publish handle or an owned dataset
        if input.is::<RwLock<Dataset>>() {
            let handle = input.downcast_ref::<RwLock<Dataset>>()?;
            let dataset = handle
                .read()
                .map_err(|_| FlowError::execution("dataset lock poisoned"))?;
            save_blueprint(&dataset, &path, comm.as_ref()).map_err(FlowError::execution)?;
        } else {
            let dataset = input.downcast_ref::<Dataset>()?;
            save_blueprint(dataset, &path, comm.as_ref()).map_err(FlowError::execution)?;
        }
        Ok(())
    }
}

/// `relay_load` — source filter reading a blueprint root file back into
/// an owned dataset.
pub struct RelayLoad;

impl Filter for RelayLoad {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("relay_load")
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        verify_io_params(params, info)
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> conflux_flow::Result<()> {
        let path = params::require_str(ctx.params(), "path")?;
        let dataset = load_blueprint(Path::new(path)).map_err(FlowError::execution)?;
        ctx.set_output_value(dataset);
        Ok(())
    }
}
