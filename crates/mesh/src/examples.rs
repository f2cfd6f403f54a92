//! Small generated datasets for tests and demos.

use crate::dataset::{
    Association, Coordset, Dataset, Domain, Field, FieldValues, Topology, TopologyKind,
};
use crate::location::{element_location, vertex_location};

/// A braided 3D uniform mesh: `side^3` vertices spanning [-10, 10] on
/// each axis, with a sinusoidal vertex field `braid` and an
/// element-centered `radial` field.
pub fn braid(side: usize) -> Dataset {
    assert!(side >= 2, "braid needs at least 2 vertices per side");

    let spacing = 20.0 / (side as f64 - 1.0);
    let mut dom = Domain::default();
    dom.coordsets.insert(
        "coords".to_string(),
        Coordset::Uniform {
            dims: vec![side, side, side],
            origin: vec![-10.0, -10.0, -10.0],
            spacing: vec![spacing, spacing, spacing],
        },
    );
    dom.topologies.insert(
        "mesh".to_string(),
        Topology {
            coordset: "coords".to_string(),
            kind: TopologyKind::Uniform,
        },
    );

    let num_verts = side * side * side;
    let mut braid_vals = Vec::with_capacity(num_verts);
    for i in 0..num_verts {
        let [x, y, z] = vertex_location(&dom, "mesh", i).expect("vertex in range");
        braid_vals.push((x * 0.5).sin() * (y * 0.5).cos() + 0.1 * z);
    }
    dom.fields.insert(
        "braid".to_string(),
        Field {
            association: Association::Vertex,
            topology: "mesh".to_string(),
            values: FieldValues::Float64(braid_vals),
        },
    );

    let num_elems = (side - 1).pow(3);
    let mut radial_vals = Vec::with_capacity(num_elems);
    for i in 0..num_elems {
        let [x, y, z] = element_location(&dom, "mesh", i).expect("element in range");
        radial_vals.push((x * x + y * y + z * z).sqrt());
    }
    dom.fields.insert(
        "radial".to_string(),
        Field {
            association: Association::Element,
            topology: "mesh".to_string(),
            values: FieldValues::Float64(radial_vals),
        },
    );

    dom.state.cycle = Some(100);
    dom.state.time = Some(1.0);
    dom.state.domain_id = Some(0);

    Dataset { domains: vec![dom] }
}
