/// Copyright: Kyler Chin <kyler@catenarymaps.org>
/// Catenary Transit Initiatives
/// Removal of the attribution is not allowed, as covered under the AGPL license
//
// Compiles a GTFS schedule and a pedestrian street network into a single
// time-expanded multimodal routing graph. Every boarding and alighting event
// becomes a node stitched onto the walk network with typed edges, so a plain
// label-setting search over the result answers earliest-arrival and
// latest-departure queries with no timetable-aware logic of its own.
//
// The expected call order per feed is:
//   1. TimetableGraphBuilder::connect_stops_to_street_network
//   2. TimetableGraphBuilder::build_pt_network
//
// Realtime patching (add_delayed_board_edge,
// wire_up_additional_departures_and_arrivals) and journey reconstruction
// (label::get_transitions) run after the static build has finished.

pub mod builder;
pub mod day_bitset;
pub mod feed;
pub mod label;
pub mod pt_graph;
pub mod storage;
pub mod transfers;
pub mod utils;
pub mod walk_index;

pub mod test_transfer_wiring;

pub use builder::{GraphBuildError, TimetableGraphBuilder};
pub use day_bitset::DayBitset;
pub use feed::TimetableFeed;
pub use pt_graph::{EdgeType, PtGraph};
pub use storage::{PlatformDescriptor, TransitStorage};
