// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives

//! Nearest-neighbor index over the foot-accessible nodes of the street
//! network, used to snap stops onto the walk mesh.

use crate::pt_graph::PtGraph;
use crate::utils::haversine_distance;
use rstar::primitives::GeomWithData;
use rstar::RTree;

/// Stops farther than this from any walkable node get a standalone node
/// with a self-loop instead of a snap.
pub const MAX_SNAP_DISTANCE_M: f64 = 200.0;

/// Assumed pedestrian speed.
pub const WALKING_SPEED_MPS: f64 = 1.4;

#[derive(Clone, Copy, Debug)]
pub struct Snap {
    closest_node: Option<u32>,
    distance_m: f64,
}

impl Snap {
    pub fn invalid() -> Self {
        Self {
            closest_node: None,
            distance_m: f64::INFINITY,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.closest_node.is_some()
    }

    pub fn closest_node(&self) -> Option<u32> {
        self.closest_node
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }
}

pub struct WalkNetworkIndex {
    tree: RTree<GeomWithData<[f64; 2], u32>>,
}

impl WalkNetworkIndex {
    /// Indexes every node of the graph that has a foot-accessible incident
    /// edge and known coordinates. Build this before inserting transit
    /// nodes; the index is a snapshot, not a live view.
    pub fn build(graph: &PtGraph) -> Self {
        let points: Vec<GeomWithData<[f64; 2], u32>> = (0..graph.node_count())
            .filter(|&node| graph.has_foot_access(node))
            .filter_map(|node| {
                let [lat, lon] = graph.node_coords(node)?;
                if lat.is_nan() || lon.is_nan() {
                    return None;
                }
                Some(GeomWithData::new([lon, lat], node))
            })
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    pub fn find_closest(&self, lat: f64, lon: f64) -> Snap {
        let Some(nearest) = self.tree.nearest_neighbor(&[lon, lat]) else {
            return Snap::invalid();
        };
        let [node_lon, node_lat] = *nearest.geom();
        let distance_m = haversine_distance(lat, lon, node_lat, node_lon);
        if distance_m > MAX_SNAP_DISTANCE_M {
            return Snap::invalid();
        }
        Snap {
            closest_node: Some(nearest.data),
            distance_m,
        }
    }
}
