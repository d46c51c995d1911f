// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives

//! Search labels and the walk back from a settled label to a typed list of
//! edge transitions.
//!
//! Labels live in a slab owned by the search; parents are indices into that
//! slab, never raw pointers. Reconstruction is purely mechanical: it
//! resolves each traversed edge's type and attributes and verifies that the
//! stored chain matches the graph's actual edge endpoints.

use crate::pt_graph::{EdgeType, PtGraph};
use crate::storage::TransitStorage;
use compact_str::CompactString;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconstructionError {
    #[error("label chain references edge {edge} which is not in the graph")]
    MissingEdge { edge: u32 },
    #[error("label carries no edge although it has a parent")]
    MissingEdgeId,
    #[error(
        "edge {edge} runs {actual_from} -> {actual_to}, label chain expects {expected_from} -> {expected_to}"
    )]
    EndpointMismatch {
        edge: u32,
        actual_from: u32,
        actual_to: u32,
        expected_from: u32,
        expected_to: u32,
    },
}

/// One settled search state. `parent` indexes into the slab the label came
/// from.
#[derive(Clone, Debug)]
pub struct Label {
    /// Epoch milliseconds at this state.
    pub current_time: i64,
    /// Edge traversed to get here; `None` on the root.
    pub edge: Option<u32>,
    pub adj_node: u32,
    pub n_transfers: u32,
    /// Journey departure time, once known.
    pub departure_time: Option<i64>,
    pub parent: Option<usize>,
}

/// Attributes of a traversed edge, resolved for display and post-processing.
#[derive(Clone, Debug)]
pub struct EdgeLabel {
    pub edge_id: u32,
    pub edge_type: EdgeType,
    /// Only defined for ENTER_PT and TRANSFER edges, which carry a platform
    /// descriptor.
    pub feed_id: Option<CompactString>,
    pub n_transfers: u8,
    pub distance: f64,
}

impl EdgeLabel {
    pub fn resolve(edge_id: u32, graph: &PtGraph, storage: &TransitStorage) -> Option<EdgeLabel> {
        let edge = graph.try_edge(edge_id)?;
        let feed_id = match edge.edge_type {
            EdgeType::EnterPt | EdgeType::Transfer => storage
                .platform_descriptor_by_edge
                .get(&edge_id)
                .map(|platform| platform.feed_id().clone()),
            _ => None,
        };
        Some(EdgeLabel {
            edge_id,
            edge_type: edge.edge_type,
            feed_id,
            n_transfers: edge.transfers,
            distance: edge.distance,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Transition {
    pub label: Label,
    /// `None` on the sentinel transition that anchors the journey endpoint.
    pub edge: Option<EdgeLabel>,
}

/// Walks a label chain back to the root and returns the journey as typed
/// transitions in travel order.
///
/// With `arrive_by` the chain was produced by a backward search, so it is
/// already in travel order and each traversed edge runs from the label
/// toward its parent; otherwise the chain is reversed at the end and edges
/// run from parent to label. A chain whose stored endpoints disagree with
/// the graph is corrupt and reconstruction fails.
pub fn get_transitions(
    labels: &[Label],
    leaf: usize,
    arrive_by: bool,
    graph: &PtGraph,
    storage: &TransitStorage,
) -> Result<Vec<Transition>, ReconstructionError> {
    let mut result = Vec::new();
    let mut index = leaf;
    if arrive_by {
        result.push(Transition {
            label: labels[index].clone(),
            edge: None,
        });
    }
    while let Some(parent_index) = labels[index].parent {
        let label = &labels[index];
        let parent = &labels[parent_index];
        let edge_id = label.edge.ok_or(ReconstructionError::MissingEdgeId)?;
        let edge = graph
            .try_edge(edge_id)
            .ok_or(ReconstructionError::MissingEdge { edge: edge_id })?;
        let (expected_from, expected_to) = if arrive_by {
            (label.adj_node, parent.adj_node)
        } else {
            (parent.adj_node, label.adj_node)
        };
        if edge.from != expected_from || edge.to != expected_to {
            return Err(ReconstructionError::EndpointMismatch {
                edge: edge_id,
                actual_from: edge.from,
                actual_to: edge.to,
                expected_from,
                expected_to,
            });
        }
        let edge_label = EdgeLabel::resolve(edge_id, graph, storage)
            .ok_or(ReconstructionError::MissingEdge { edge: edge_id })?;
        let keyed_at = if arrive_by { parent } else { label };
        result.push(Transition {
            label: keyed_at.clone(),
            edge: Some(edge_label),
        });
        index = parent_index;
    }
    if !arrive_by {
        result.push(Transition {
            label: labels[index].clone(),
            edge: None,
        });
        result.reverse();
    }
    Ok(result)
}
