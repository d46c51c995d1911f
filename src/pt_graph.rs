// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives

//! The routable graph the compiler writes into.
//!
//! Nodes are dense `u32` ids with WGS84 coordinates; edges are directed and
//! carry the typed attribute set the query side reads back. The pedestrian
//! street network lives in the same store: its edges are `Highway` typed
//! with foot access, everything the compiler adds is a forward-only transit
//! edge.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    #[default]
    Highway,
    EnterTimeExpandedNetwork,
    LeaveTimeExpandedNetwork,
    EnterPt,
    ExitPt,
    Hop,
    Dwell,
    Board,
    Alight,
    Overnight,
    Transfer,
    Wait,
    WaitArrival,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PtEdge {
    pub from: u32,
    pub to: u32,
    pub edge_type: EdgeType,
    /// Seconds; the meaning varies by edge type (hop duration, wait span,
    /// second-of-day for time-expanded edges).
    pub time: u32,
    /// Interned validity or feed-timezone id, or a plain route type for
    /// ENTER_PT / EXIT_PT / TRANSFER edges.
    pub validity_id: u32,
    /// 1 on BOARD edges, 0 elsewhere.
    pub transfers: u8,
    /// Meters. Zero on every transit edge except HOP.
    pub distance: f64,
    /// Walkable by foot; set on street edges and stop self-loops only.
    pub foot_access: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PtGraph {
    /// `[lat, lon]` per node. NaN until coordinates are assigned.
    coords: Vec<[f64; 2]>,
    edges: Vec<PtEdge>,
    out_edges: Vec<Vec<u32>>,
    in_edges: Vec<Vec<u32>>,
}

impl PtGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> u32 {
        self.coords.len() as u32
    }

    pub fn edge_count(&self) -> u32 {
        self.edges.len() as u32
    }

    fn ensure_node(&mut self, node: u32) {
        let needed = node as usize + 1;
        if self.coords.len() < needed {
            self.coords.resize(needed, [f64::NAN, f64::NAN]);
            self.out_edges.resize(needed, Vec::new());
            self.in_edges.resize(needed, Vec::new());
        }
    }

    pub fn set_node_coords(&mut self, node: u32, lat: f64, lon: f64) {
        self.ensure_node(node);
        self.coords[node as usize] = [lat, lon];
    }

    pub fn node_coords(&self, node: u32) -> Option<[f64; 2]> {
        self.coords.get(node as usize).copied()
    }

    /// Creates a directed edge with default attributes and returns its id.
    pub fn add_edge(&mut self, from: u32, to: u32) -> u32 {
        self.ensure_node(from.max(to));
        let id = self.edges.len() as u32;
        self.edges.push(PtEdge {
            from,
            to,
            edge_type: EdgeType::Highway,
            time: 0,
            validity_id: 0,
            transfers: 0,
            distance: 0.0,
            foot_access: false,
        });
        self.out_edges[from as usize].push(id);
        self.in_edges[to as usize].push(id);
        id
    }

    /// Convenience for assembling street networks: a foot-accessible edge
    /// with the walking time implied by the distance.
    pub fn add_walk_edge(&mut self, from: u32, to: u32, distance_m: f64) -> u32 {
        let id = self.add_edge(from, to);
        let edge = &mut self.edges[id as usize];
        edge.foot_access = true;
        edge.distance = distance_m;
        edge.time = (distance_m / crate::walk_index::WALKING_SPEED_MPS) as u32;
        id
    }

    pub fn edge(&self, id: u32) -> &PtEdge {
        &self.edges[id as usize]
    }

    pub fn try_edge(&self, id: u32) -> Option<&PtEdge> {
        self.edges.get(id as usize)
    }

    pub fn edge_mut(&mut self, id: u32) -> &mut PtEdge {
        &mut self.edges[id as usize]
    }

    /// Edge ids leaving `node`, in creation order.
    pub fn out_edges(&self, node: u32) -> &[u32] {
        self.out_edges
            .get(node as usize)
            .map_or(&[], Vec::as_slice)
    }

    /// Edge ids entering `node`, in creation order.
    pub fn in_edges(&self, node: u32) -> &[u32] {
        self.in_edges.get(node as usize).map_or(&[], Vec::as_slice)
    }

    pub fn edges(&self) -> impl Iterator<Item = (u32, &PtEdge)> {
        self.edges.iter().enumerate().map(|(i, e)| (i as u32, e))
    }

    /// True when any incident edge is walkable.
    pub fn has_foot_access(&self, node: u32) -> bool {
        self.out_edges(node)
            .iter()
            .chain(self.in_edges(node))
            .any(|&e| self.edges[e as usize].foot_access)
    }
}
