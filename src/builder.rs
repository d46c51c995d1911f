// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives

//! Builds the time-expanded transit network on top of the walk graph.
//!
//! One builder compiles one feed. The static pipeline is
//! [`connect_stops_to_street_network`](TimetableGraphBuilder::connect_stops_to_street_network)
//! followed by [`build_pt_network`](TimetableGraphBuilder::build_pt_network);
//! the realtime entry points patch extra departures and arrivals into the
//! finished graph afterwards. The graph is inconsistent until a phase
//! returns, and nothing here is safe to call from two threads.

use crate::day_bitset::DayBitset;
use crate::feed::{Stop, StopTime, TimetableFeed, Trip};
use crate::pt_graph::{EdgeType, PtGraph};
use crate::storage::{
    encode_trip_descriptor, FeedIdWithStopId, FeedIdWithTimezone, PlatformDescriptor,
    TransitStorage, TripInstanceDescriptor, TripKey, Validity,
};
use crate::transfers::Transfers;
use crate::utils::{convert_to_gtfs_time, haversine_distance, SECONDS_PER_DAY};
use crate::walk_index::WalkNetworkIndex;
use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use compact_str::{format_compact, CompactString};
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphBuildError {
    #[error("Duplicate stop id: {0}")]
    DuplicateStopId(CompactString),
    #[error("Found a block with frequency-based trips. Not supported.")]
    FrequencyBasedBlock,
    #[error("unknown stop id {0}")]
    UnknownStop(CompactString),
    #[error("unknown route id {0}")]
    UnknownRoute(CompactString),
    #[error("unknown service id {0}")]
    UnknownService(CompactString),
    #[error("unknown trip id {0}")]
    UnknownTrip(CompactString),
    #[error("no stop time for trip {trip_id} at stop sequence {stop_sequence}")]
    UnknownStopTime {
        trip_id: CompactString,
        stop_sequence: u16,
    },
    #[error("trip descriptor carries no trip id")]
    MissingTripId,
    #[error("failed to encode trip descriptor: {0}")]
    EncodeDescriptor(#[from] bincode::error::EncodeError),
}

/// Second-of-day -> node id, one per platform and direction.
pub type Timeline = BTreeMap<u32, u32>;
type TimelinesByPlatform = BTreeMap<PlatformDescriptor, Timeline>;
type TimelinesByStop = BTreeMap<CompactString, TimelinesByPlatform>;

struct TripWithStopTimes<'f> {
    trip: &'f Trip,
    stop_times: &'f [StopTime],
    valid_on_day: DayBitset,
}

/// Where a previously emitted trip of the current block ended, for wiring
/// in-vehicle continuations.
struct TripArrival {
    arrival_node: u32,
    arrival_time: u32,
    valid_on_day: DayBitset,
}

pub struct TimetableGraphBuilder<'a> {
    feed_id: CompactString,
    feed: &'a TimetableFeed,
    transfers: &'a Transfers,
    graph: &'a mut PtGraph,
    storage: &'a mut TransitStorage,
    walk_index: WalkNetworkIndex,
    next_node: u32,
    departure_timelines: TimelinesByStop,
    arrival_timelines: TimelinesByStop,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl<'a> TimetableGraphBuilder<'a> {
    pub fn new(
        feed_id: &str,
        feed: &'a TimetableFeed,
        transfers: &'a Transfers,
        graph: &'a mut PtGraph,
        storage: &'a mut TransitStorage,
        walk_index: WalkNetworkIndex,
    ) -> Self {
        let next_node = graph.node_count();
        Self {
            feed_id: feed_id.into(),
            feed,
            transfers,
            graph,
            storage,
            walk_index,
            next_node,
            departure_timelines: BTreeMap::new(),
            arrival_timelines: BTreeMap::new(),
            start_date: feed.start_date,
            end_date: feed.end_date,
        }
    }

    /// Snaps every location-type-0 stop onto its nearest walkable street
    /// node. A stop out of snapping range gets a standalone node with a
    /// foot-accessible self-loop, so journeys can still start and end there.
    pub fn connect_stops_to_street_network(&mut self) -> Result<(), GraphBuildError> {
        let feed = self.feed;
        for stop in feed.stops.values() {
            if stop.location_type != 0 {
                continue;
            }
            let snap = self.walk_index.find_closest(stop.lat, stop.lon);
            let street_node = match snap.closest_node() {
                Some(node) => node,
                None => {
                    let node = self.new_node_at(stop.lat, stop.lon);
                    let loop_edge = self.graph.add_edge(node, node);
                    self.graph.edge_mut(loop_edge).foot_access = true;
                    node
                }
            };
            let key = FeedIdWithStopId::new(&self.feed_id, &stop.id);
            if self.storage.station_nodes.insert(key, street_node).is_some() {
                return Err(GraphBuildError::DuplicateStopId(stop.id.clone()));
            }
        }
        Ok(())
    }

    /// Inserts the whole timetable: trip chains, per-platform timelines and
    /// transfer edges.
    pub fn build_pt_network(&mut self) -> Result<(), GraphBuildError> {
        self.create_trips()?;
        self.wire_up_stops()?;
        self.insert_gtfs_transfers()?;
        info!(
            "feed {}: {} nodes and {} edges after timetable insertion",
            self.feed_id,
            self.graph.node_count(),
            self.graph.edge_count()
        );
        Ok(())
    }

    fn create_trips(&mut self) -> Result<(), GraphBuildError> {
        let feed = self.feed;
        let mut block_trips: BTreeMap<CompactString, Vec<&'a Trip>> = BTreeMap::new();
        for trip in feed.trips.values() {
            let key = match &trip.block_id {
                Some(block_id) => block_id.clone(),
                None => format_compact!("non-block-trip-{}", trip.id),
            };
            block_trips.entry(key).or_default().push(trip);
        }

        for members in block_trips.values() {
            let mut trips: Vec<TripWithStopTimes> = Vec::with_capacity(members.len());
            for &trip in members {
                let stop_times = feed.interpolated_stop_times_for_trip(&trip.id);
                if stop_times.is_empty() {
                    warn!("trip {} has no stop times, skipping it", trip.id);
                    continue;
                }
                let service = feed
                    .services
                    .get(trip.service_id.as_str())
                    .ok_or_else(|| GraphBuildError::UnknownService(trip.service_id.clone()))?;
                let mut valid_on_day = DayBitset::with_days(feed.day_count());
                let mut date = self.start_date;
                let mut day = 0usize;
                while date <= self.end_date {
                    if service.active_on(date) {
                        valid_on_day.set(day);
                    }
                    date = date + Duration::days(1);
                    day += 1;
                }
                trips.push(TripWithStopTimes {
                    trip,
                    stop_times,
                    valid_on_day,
                });
            }
            if trips.is_empty() {
                continue;
            }
            trips.sort_by_key(|t| t.stop_times[0].departure_time);

            let any_frequency = trips
                .iter()
                .any(|t| !feed.frequencies_for_trip(&t.trip.id).is_empty());
            if any_frequency
                && !trips
                    .iter()
                    .map(|t| feed.frequencies_for_trip(&t.trip.id))
                    .all_equal()
            {
                return Err(GraphBuildError::FrequencyBasedBlock);
            }

            let first_route = feed
                .routes
                .get(trips[0].trip.route_id.as_str())
                .ok_or_else(|| GraphBuildError::UnknownRoute(trips[0].trip.route_id.clone()))?;
            let zone = feed.timezone_for_agency(first_route.agency_id.as_deref());

            let frequencies = feed.frequencies_for_trip(&trips[0].trip.id);
            if frequencies.is_empty() {
                self.add_trips(zone, &trips, 0, false)?;
            } else {
                for frequency in frequencies {
                    if frequency.headway_secs == 0 {
                        warn!(
                            "trip {} has a zero-headway frequency, skipping it",
                            trips[0].trip.id
                        );
                        continue;
                    }
                    let mut start = frequency.start_time;
                    while start < frequency.end_time {
                        self.add_trips(zone, &trips, start, true)?;
                        start += frequency.headway_secs;
                    }
                }
            }
        }
        Ok(())
    }

    fn add_trips(
        &mut self,
        zone: Tz,
        trips: &[TripWithStopTimes],
        time_offset: u32,
        frequency_based: bool,
    ) -> Result<(), GraphBuildError> {
        let mut arrival_nodes: Vec<TripArrival> = Vec::new();
        for trip in trips {
            let descriptor = TripInstanceDescriptor {
                trip_id: trip.trip.id.clone(),
                route_id: trip.trip.route_id.clone(),
                start_time: frequency_based.then(|| convert_to_gtfs_time(time_offset).into()),
            };
            self.add_trip(
                zone,
                time_offset,
                &mut arrival_nodes,
                trip,
                &descriptor,
                frequency_based,
            )?;
        }
        Ok(())
    }

    /// Emits the node/edge chain of one trip instance and registers its
    /// events in the per-platform timelines.
    fn add_trip(
        &mut self,
        zone: Tz,
        time_offset: u32,
        arrival_nodes: &mut Vec<TripArrival>,
        trip: &TripWithStopTimes,
        descriptor: &TripInstanceDescriptor,
        frequency_based: bool,
    ) -> Result<(), GraphBuildError> {
        let feed = self.feed;
        let descriptor_bytes = encode_trip_descriptor(descriptor)?;
        let mut board_edges: Vec<i32> = Vec::new();
        let mut alight_edges: Vec<i32> = Vec::new();
        let mut prev: Option<&StopTime> = None;
        let mut departure_node = 0u32;
        let mut last_arrival_node = 0u32;
        let mut last_arrival_time = 0u32;

        for stop_time in trip.stop_times {
            let stop = feed
                .stops
                .get(stop_time.stop_id.as_str())
                .ok_or_else(|| GraphBuildError::UnknownStop(stop_time.stop_id.clone()))?;
            let arrival_node = self.new_node_at(stop.lat, stop.lon);
            let arrival_time = stop_time.arrival_time + time_offset;

            if let Some(prev_stop_time) = prev {
                let from_stop = feed
                    .stops
                    .get(prev_stop_time.stop_id.as_str())
                    .ok_or_else(|| GraphBuildError::UnknownStop(prev_stop_time.stop_id.clone()))?;
                let hop = self.graph.add_edge(departure_node, arrival_node);
                let edge = self.graph.edge_mut(hop);
                edge.edge_type = EdgeType::Hop;
                edge.time = stop_time
                    .arrival_time
                    .saturating_sub(prev_stop_time.departure_time);
                edge.distance =
                    haversine_distance(from_stop.lat, from_stop.lon, stop.lat, stop.lon);
                self.storage
                    .stop_sequences
                    .insert(hop, stop_time.stop_sequence);
            }

            let route = feed
                .routes
                .get(trip.trip.route_id.as_str())
                .ok_or_else(|| GraphBuildError::UnknownRoute(trip.trip.route_id.clone()))?;
            let platform = if self
                .transfers
                .has_no_route_specific_departure_transfer_rules(&stop_time.stop_id)
            {
                PlatformDescriptor::route_type(&self.feed_id, &stop_time.stop_id, route.route_type)
            } else {
                PlatformDescriptor::route(&self.feed_id, &stop_time.stop_id, &route.id)
            };

            let departure_key = (stop_time.departure_time + time_offset) % SECONDS_PER_DAY;
            let departure_timeline_node = {
                let timeline = self
                    .departure_timelines
                    .entry(stop_time.stop_id.clone())
                    .or_default()
                    .entry(platform.clone())
                    .or_default();
                match timeline.get(&departure_key) {
                    Some(&node) => node,
                    None => {
                        let node = self.next_node;
                        self.next_node += 1;
                        self.graph.set_node_coords(node, stop.lat, stop.lon);
                        timeline.insert(departure_key, node);
                        node
                    }
                }
            };

            let arrival_key = (stop_time.arrival_time + time_offset) % SECONDS_PER_DAY;
            let arrival_timeline_node = {
                let timeline = self
                    .arrival_timelines
                    .entry(stop_time.stop_id.clone())
                    .or_default()
                    .entry(platform.clone())
                    .or_default();
                match timeline.get(&arrival_key) {
                    Some(&node) => node,
                    None => {
                        let node = self.next_node;
                        self.next_node += 1;
                        self.graph.set_node_coords(node, stop.lat, stop.lon);
                        timeline.insert(arrival_key, node);
                        node
                    }
                }
            };

            departure_node = self.new_node_at(stop.lat, stop.lon);

            let day_shift = (stop_time.departure_time / SECONDS_PER_DAY) as usize;
            let valid_on = Validity {
                bitset: trip.valid_on_day.shift_left_by(day_shift),
                zone,
                start_date: self.start_date,
            };
            let validity_id = self.storage.validity_id(valid_on.clone());

            let board = self.graph.add_edge(departure_timeline_node, departure_node);
            {
                let edge = self.graph.edge_mut(board);
                edge.edge_type = EdgeType::Board;
                edge.validity_id = validity_id;
                edge.transfers = 1;
            }
            while board_edges.len() < stop_time.stop_sequence as usize {
                board_edges.push(-1); // padding, so that index == stop_sequence
            }
            board_edges.push(board as i32);
            self.storage
                .stop_sequences
                .insert(board, stop_time.stop_sequence);
            self.storage
                .trip_descriptors
                .insert(board, descriptor_bytes.clone());

            let alight = self.graph.add_edge(arrival_node, arrival_timeline_node);
            {
                let edge = self.graph.edge_mut(alight);
                edge.edge_type = EdgeType::Alight;
                edge.validity_id = validity_id;
            }
            while alight_edges.len() < stop_time.stop_sequence as usize {
                alight_edges.push(-1);
            }
            alight_edges.push(alight as i32);
            self.storage
                .stop_sequences
                .insert(alight, stop_time.stop_sequence);
            self.storage
                .trip_descriptors
                .insert(alight, descriptor_bytes.clone());

            let dwell = self.graph.add_edge(arrival_node, departure_node);
            {
                let edge = self.graph.edge_mut(dwell);
                edge.edge_type = EdgeType::Dwell;
                edge.time = stop_time
                    .departure_time
                    .saturating_sub(stop_time.arrival_time);
            }

            if prev.is_none() {
                self.insert_inbound_block_transfers(
                    arrival_nodes,
                    descriptor,
                    departure_node,
                    stop_time.departure_time + time_offset,
                    stop_time.stop_sequence,
                    stop,
                    &valid_on,
                    zone,
                    &platform,
                )?;
            }
            prev = Some(stop_time);
            last_arrival_node = arrival_node;
            last_arrival_time = arrival_time;
        }

        let key = TripKey {
            trip_id: trip.trip.id.clone(),
            frequency_start: frequency_based.then_some(time_offset),
        };
        self.storage
            .board_edges_for_trip
            .insert(key.clone(), board_edges);
        self.storage.alight_edges_for_trip.insert(key, alight_edges);
        arrival_nodes.push(TripArrival {
            arrival_node: last_arrival_node,
            arrival_time: last_arrival_time,
            valid_on_day: trip.valid_on_day.clone(),
        });
        Ok(())
    }

    /// In-vehicle continuation onto the trip that starts here: walk earlier
    /// trips of the block newest-first, wiring a TRANSFER + BOARD pair for
    /// every day pattern not yet covered by a later-arriving predecessor.
    #[allow(clippy::too_many_arguments)]
    fn insert_inbound_block_transfers(
        &mut self,
        arrival_nodes: &[TripArrival],
        descriptor: &TripInstanceDescriptor,
        departure_node: u32,
        departure_time: u32,
        stop_sequence: u16,
        stop: &Stop,
        valid_on: &Validity,
        zone: Tz,
        platform: &PlatformDescriptor,
    ) -> Result<(), GraphBuildError> {
        let descriptor_bytes = encode_trip_descriptor(descriptor)?;
        let route_type = self.route_type_of(platform)? as u32;
        let mut accumulator = valid_on.bitset.clone();
        for earlier in arrival_nodes.iter().rev() {
            if accumulator.is_empty() {
                break;
            }
            let dwell_time = departure_time as i64 - earlier.arrival_time as i64;
            if dwell_time < 0 || !accumulator.intersects(&earlier.valid_on_day) {
                continue;
            }
            let mut block_validity = valid_on.bitset.clone();
            block_validity.and_with(&accumulator);
            let block_validity_id = self.storage.validity_id(Validity {
                bitset: block_validity,
                zone,
                start_date: self.start_date,
            });

            let intermediate = self.new_node_at(stop.lat, stop.lon);
            let transfer = self.graph.add_edge(earlier.arrival_node, intermediate);
            {
                let edge = self.graph.edge_mut(transfer);
                edge.edge_type = EdgeType::Transfer;
                edge.time = dwell_time as u32;
                edge.validity_id = route_type;
            }
            self.storage
                .platform_descriptor_by_edge
                .insert(transfer, platform.clone());

            let board = self.graph.add_edge(intermediate, departure_node);
            {
                let edge = self.graph.edge_mut(board);
                edge.edge_type = EdgeType::Board;
                edge.validity_id = block_validity_id;
                edge.transfers = 1;
            }
            self.storage.stop_sequences.insert(board, stop_sequence);
            self.storage
                .trip_descriptors
                .insert(board, descriptor_bytes.clone());

            accumulator.and_not(&earlier.valid_on_day);
        }
        Ok(())
    }

    fn wire_up_stops(&mut self) -> Result<(), GraphBuildError> {
        let feed = self.feed;
        let arrival_timelines = std::mem::take(&mut self.arrival_timelines);
        for (stop_id, by_platform) in &arrival_timelines {
            let street_node = self.station_node(stop_id)?;
            let stop = feed
                .stops
                .get(stop_id.as_str())
                .ok_or_else(|| GraphBuildError::UnknownStop(stop_id.clone()))?;
            for (platform, timeline) in by_platform {
                let route_type = self.route_type_of(platform)?;
                self.wire_up_arrival_timeline(
                    street_node,
                    stop,
                    timeline,
                    route_type,
                    Some(platform),
                );
            }
        }
        self.arrival_timelines = arrival_timelines;

        let departure_timelines = std::mem::take(&mut self.departure_timelines);
        for (stop_id, by_platform) in &departure_timelines {
            let street_node = self.station_node(stop_id)?;
            let stop = feed
                .stops
                .get(stop_id.as_str())
                .ok_or_else(|| GraphBuildError::UnknownStop(stop_id.clone()))?;
            for (platform, timeline) in by_platform {
                let route_type = self.route_type_of(platform)?;
                self.wire_up_departure_timeline(street_node, stop, timeline, route_type, platform);
            }
        }
        self.departure_timelines = departure_timelines;
        Ok(())
    }

    fn wire_up_departure_timeline(
        &mut self,
        street_node: u32,
        stop: &Stop,
        timeline: &Timeline,
        route_type: i16,
        platform: &PlatformDescriptor,
    ) {
        debug!(
            "creating departure timeline at stop {} for platform {:?}",
            stop.id, platform
        );
        let platform_enter_node = self.new_node_at(stop.lat, stop.lon);
        let entry_edge = self.graph.add_edge(street_node, platform_enter_node);
        {
            let edge = self.graph.edge_mut(entry_edge);
            edge.edge_type = EdgeType::EnterPt;
            edge.validity_id = route_type as u32;
        }
        self.storage
            .platform_descriptor_by_edge
            .insert(entry_edge, platform.clone());
        self.wire_up_and_connect_timeline(
            platform_enter_node,
            timeline,
            EdgeType::EnterTimeExpandedNetwork,
            EdgeType::Wait,
        );
    }

    fn wire_up_arrival_timeline(
        &mut self,
        street_node: u32,
        stop: &Stop,
        timeline: &Timeline,
        route_type: i16,
        platform_if_static: Option<&PlatformDescriptor>,
    ) {
        debug!(
            "creating arrival timeline at stop {} for platform {:?}",
            stop.id, platform_if_static
        );
        let platform_exit_node = self.new_node_at(stop.lat, stop.lon);
        let exit_edge = self.graph.add_edge(platform_exit_node, street_node);
        {
            let edge = self.graph.edge_mut(exit_edge);
            edge.edge_type = EdgeType::ExitPt;
            edge.validity_id = route_type as u32;
        }
        if let Some(platform) = platform_if_static {
            self.storage
                .platform_descriptor_by_edge
                .insert(exit_edge, platform.clone());
        }
        self.wire_up_and_connect_timeline(
            platform_exit_node,
            timeline,
            EdgeType::LeaveTimeExpandedNetwork,
            EdgeType::WaitArrival,
        );
    }

    /// Connects every timeline node to the platform node, chains siblings
    /// with wait edges walking the day backwards, and closes the daily loop
    /// with one overnight edge from the last to the first node.
    fn wire_up_and_connect_timeline(
        &mut self,
        platform_node: u32,
        timeline: &Timeline,
        time_expanded_type: EdgeType,
        wait_type: EdgeType,
    ) {
        let zone = self.feed.default_timezone();
        let timezone_id = self.storage.timezone_id(FeedIdWithTimezone {
            feed_id: self.feed_id.clone(),
            zone,
        });
        let mut prev_time = 0u32;
        let mut prev_node: Option<u32> = None;
        for (&time, &node) in timeline.iter().rev() {
            let te_edge = if time_expanded_type == EdgeType::LeaveTimeExpandedNetwork {
                self.graph.add_edge(node, platform_node)
            } else {
                self.graph.add_edge(platform_node, node)
            };
            {
                let edge = self.graph.edge_mut(te_edge);
                edge.edge_type = time_expanded_type;
                edge.time = time;
                edge.validity_id = timezone_id;
            }
            if let Some(prev) = prev_node {
                let wait_edge = self.graph.add_edge(node, prev);
                let edge = self.graph.edge_mut(wait_edge);
                edge.edge_type = wait_type;
                edge.time = prev_time - time;
            }
            prev_time = time;
            prev_node = Some(node);
        }
        if let (Some((&first_key, &first_node)), Some((&last_key, &last_node))) =
            (timeline.first_key_value(), timeline.last_key_value())
        {
            let overnight = self.graph.add_edge(last_node, first_node);
            let edge = self.graph.edge_mut(overnight);
            edge.edge_type = EdgeType::Overnight;
            edge.time = SECONDS_PER_DAY - last_key + first_key;
        }
    }

    fn insert_gtfs_transfers(&mut self) -> Result<(), GraphBuildError> {
        let departure_timelines = std::mem::take(&mut self.departure_timelines);
        for by_platform in departure_timelines.values() {
            for (platform, timeline) in by_platform {
                self.insert_inbound_transfers(platform, timeline)?;
            }
        }
        self.departure_timelines = departure_timelines;
        Ok(())
    }

    fn insert_inbound_transfers(
        &mut self,
        to_platform: &PlatformDescriptor,
        departure_timeline: &Timeline,
    ) -> Result<(), GraphBuildError> {
        debug!(
            "creating transfers to stop {}, platform {:?}",
            to_platform.stop_id(),
            to_platform
        );
        let transfers = self.transfers;
        let to_route_id = to_platform.route_id_or_none().map(|r| r.clone());
        let records =
            transfers.get_transfers_to_stop(to_platform.stop_id(), to_route_id.as_deref());
        for transfer in records {
            let station_key = FeedIdWithStopId::new(&self.feed_id, &transfer.from_stop_id);
            let Some(&station_node) = self.storage.station_nodes.get(&station_key) else {
                warn!(
                    "transfer references unknown stop {}, skipping it",
                    transfer.from_stop_id
                );
                continue;
            };
            let exit_edges: Vec<u32> = self.graph.in_edges(station_node).to_vec();
            for edge_id in exit_edges {
                if self.graph.edge(edge_id).edge_type != EdgeType::ExitPt {
                    continue;
                }
                let Some(from_platform) = self.storage.platform_descriptor_by_edge.get(&edge_id)
                else {
                    continue;
                };
                let platform_matches = from_platform.stop_id() == &transfer.from_stop_id
                    && match &transfer.from_route_id {
                        None => matches!(from_platform, PlatformDescriptor::RouteType { .. }),
                        Some(route_id) => {
                            *from_platform
                                == PlatformDescriptor::route(
                                    &self.feed_id,
                                    &transfer.from_stop_id,
                                    route_id,
                                )
                        }
                    };
                if !platform_matches {
                    continue;
                }
                debug!(
                    "  creating transfers from stop {}, platform {:?}",
                    transfer.from_stop_id, from_platform
                );
                let arrival_platform_node = self.graph.edge(edge_id).from;
                self.insert_transfer_edges_from_platform(
                    arrival_platform_node,
                    transfer.min_transfer_time.unwrap_or(0),
                    departure_timeline,
                    to_platform,
                )?;
            }
        }
        Ok(())
    }

    /// Wires each arrival of the platform to the first departure of the
    /// target timeline no earlier than arrival plus the minimum transfer
    /// time.
    fn insert_transfer_edges_from_platform(
        &mut self,
        arrival_platform_node: u32,
        min_transfer_time: u32,
        departure_timeline: &Timeline,
        departure_platform: &PlatformDescriptor,
    ) -> Result<(), GraphBuildError> {
        let route_type = self.route_type_of(departure_platform)? as u32;
        let leave_edges: Vec<u32> = self.graph.in_edges(arrival_platform_node).to_vec();
        for edge_id in leave_edges {
            let edge = self.graph.edge(edge_id);
            if edge.edge_type != EdgeType::LeaveTimeExpandedNetwork {
                continue;
            }
            let arrival_time = edge.time;
            let timeline_node = edge.from;
            if let Some((&departure_time, &departure_node)) = departure_timeline
                .range(arrival_time + min_transfer_time..)
                .next()
            {
                let transfer = self.graph.add_edge(timeline_node, departure_node);
                let edge = self.graph.edge_mut(transfer);
                edge.edge_type = EdgeType::Transfer;
                edge.time = departure_time - arrival_time;
                edge.validity_id = route_type;
                self.storage
                    .platform_descriptor_by_edge
                    .insert(transfer, departure_platform.clone());
            }
        }
        Ok(())
    }

    /// Realtime entry point: stitches transfer edges from an arrival
    /// platform toward the departure timeline of the given platform.
    pub fn insert_transfer_edges(
        &mut self,
        arrival_platform_node: u32,
        min_transfer_time: u32,
        departure_platform: &PlatformDescriptor,
    ) -> Result<(), GraphBuildError> {
        let timeline = self
            .departure_timelines
            .get(departure_platform.stop_id())
            .and_then(|by_platform| by_platform.get(departure_platform))
            .cloned()
            .unwrap_or_default();
        self.insert_transfer_edges_from_platform(
            arrival_platform_node,
            min_transfer_time,
            &timeline,
            departure_platform,
        )
    }

    /// Realtime entry point: wires timelines that were filled after the
    /// static build. Timelines whose platform already exists in the graph
    /// are patched into the existing wait chains; the rest get a fresh
    /// platform.
    pub fn wire_up_additional_departures_and_arrivals(
        &mut self,
        zone: Tz,
    ) -> Result<(), GraphBuildError> {
        let feed = self.feed;
        let departure_timelines = std::mem::take(&mut self.departure_timelines);
        for (stop_id, by_platform) in &departure_timelines {
            let station_node = self.station_node(stop_id)?;
            let stop = feed
                .stops
                .get(stop_id.as_str())
                .ok_or_else(|| GraphBuildError::UnknownStop(stop_id.clone()))?;
            for (platform, timeline) in by_platform {
                self.wire_up_or_patch_departure_timeline(
                    zone,
                    station_node,
                    stop,
                    timeline,
                    platform,
                );
            }
        }
        self.departure_timelines = departure_timelines;

        let arrival_timelines = std::mem::take(&mut self.arrival_timelines);
        for (stop_id, by_platform) in &arrival_timelines {
            let station_node = self.station_node(stop_id)?;
            let stop = feed
                .stops
                .get(stop_id.as_str())
                .ok_or_else(|| GraphBuildError::UnknownStop(stop_id.clone()))?;
            for (platform, timeline) in by_platform {
                let route_id = platform.route_id_or_none().cloned();
                self.wire_up_or_patch_arrival_timeline(
                    zone,
                    station_node,
                    stop,
                    route_id.as_deref(),
                    timeline,
                    platform,
                )?;
            }
        }
        self.arrival_timelines = arrival_timelines;
        Ok(())
    }

    fn wire_up_or_patch_departure_timeline(
        &mut self,
        zone: Tz,
        station_node: u32,
        stop: &Stop,
        timeline: &Timeline,
        platform: &PlatformDescriptor,
    ) {
        match self.find_platform_node(station_node, platform, EdgeType::EnterPt) {
            Some(platform_enter_node) => {
                self.patch_departure_timeline(zone, timeline, platform_enter_node)
            }
            None => self.wire_up_departure_timeline(station_node, stop, timeline, 0, platform),
        }
    }

    fn wire_up_or_patch_arrival_timeline(
        &mut self,
        zone: Tz,
        station_node: u32,
        stop: &Stop,
        route_id: Option<&str>,
        timeline: &Timeline,
        platform: &PlatformDescriptor,
    ) -> Result<(), GraphBuildError> {
        match self.find_platform_node(station_node, platform, EdgeType::ExitPt) {
            Some(platform_exit_node) => {
                self.patch_arrival_timeline(zone, timeline, platform_exit_node)
            }
            // no descriptor here: nothing downstream resolves platforms of
            // patched-in exits
            None => self.wire_up_arrival_timeline(station_node, stop, timeline, 0, None),
        }
        let transfers = self.transfers;
        let from_here = transfers.get_transfers_from_stop(&stop.id, route_id);
        let within_station = from_here.iter().any(|t| t.from_stop_id == stop.id);
        if !within_station {
            self.insert_outbound_transfers(&stop.id, None, 0, timeline)?;
        }
        for transfer in transfers.get_transfers_from_stop(&stop.id, route_id) {
            self.insert_outbound_transfers(
                &transfer.from_stop_id,
                transfer.from_route_id.as_deref(),
                transfer.min_transfer_time.unwrap_or(0),
                timeline,
            )?;
        }
        Ok(())
    }

    fn patch_departure_timeline(
        &mut self,
        zone: Tz,
        timeline: &Timeline,
        platform_enter_node: u32,
    ) {
        let static_timeline = self.find_departure_timeline_for_platform(platform_enter_node);
        let timezone_id = self.storage.timezone_id(FeedIdWithTimezone {
            feed_id: self.feed_id.clone(),
            zone,
        });
        for (&time, &node) in timeline {
            if let Some((&before_time, &before_node)) = static_timeline.range(..time).next_back() {
                let wait_edge = self.graph.add_edge(before_node, node);
                let edge = self.graph.edge_mut(wait_edge);
                edge.edge_type = EdgeType::Wait;
                edge.time = time - before_time;
            }
            if let Some((&after_time, &after_node)) = static_timeline.range(time..).next() {
                let wait_edge = self.graph.add_edge(node, after_node);
                let edge = self.graph.edge_mut(wait_edge);
                edge.edge_type = EdgeType::Wait;
                edge.time = after_time - time;
            }
            let te_edge = self.graph.add_edge(platform_enter_node, node);
            let edge = self.graph.edge_mut(te_edge);
            edge.edge_type = EdgeType::EnterTimeExpandedNetwork;
            edge.time = time;
            edge.validity_id = timezone_id;
        }
    }

    fn patch_arrival_timeline(&mut self, zone: Tz, timeline: &Timeline, platform_exit_node: u32) {
        let timezone_id = self.storage.timezone_id(FeedIdWithTimezone {
            feed_id: self.feed_id.clone(),
            zone,
        });
        for (&time, &node) in timeline {
            let te_edge = self.graph.add_edge(node, platform_exit_node);
            let edge = self.graph.edge_mut(te_edge);
            edge.edge_type = EdgeType::LeaveTimeExpandedNetwork;
            edge.time = time;
            edge.validity_id = timezone_id;
        }
    }

    fn find_departure_timeline_for_platform(&self, platform_enter_node: u32) -> Timeline {
        let mut result = Timeline::new();
        for &edge_id in self.graph.out_edges(platform_enter_node) {
            let edge = self.graph.edge(edge_id);
            if edge.edge_type == EdgeType::EnterTimeExpandedNetwork {
                result.insert(edge.time, edge.to);
            }
        }
        result
    }

    fn find_platform_node(
        &self,
        station_node: u32,
        platform: &PlatformDescriptor,
        edge_type: EdgeType,
    ) -> Option<u32> {
        let candidates: &[u32] = match edge_type {
            EdgeType::EnterPt => self.graph.out_edges(station_node),
            EdgeType::ExitPt => self.graph.in_edges(station_node),
            _ => return None,
        };
        for &edge_id in candidates {
            let edge = self.graph.edge(edge_id);
            if edge.edge_type != edge_type {
                continue;
            }
            if self.storage.platform_descriptor_by_edge.get(&edge_id) == Some(platform) {
                return Some(if edge_type == EdgeType::EnterPt {
                    edge.to
                } else {
                    edge.from
                });
            }
        }
        None
    }

    /// Wires each node of an arrival timeline to departure platforms at the
    /// target station. For every arrival, the scan over a platform's
    /// time-expanded entries stops at the first edge satisfying the minimum
    /// transfer time, in edge creation order (latest second of day first).
    fn insert_outbound_transfers(
        &mut self,
        to_stop_id: &str,
        to_route_id: Option<&str>,
        min_transfer_time: u32,
        from_timeline: &Timeline,
    ) -> Result<(), GraphBuildError> {
        let station_key = FeedIdWithStopId::new(&self.feed_id, to_stop_id);
        let Some(&station_node) = self.storage.station_nodes.get(&station_key) else {
            warn!(
                "outbound transfer references unknown stop {}, skipping it",
                to_stop_id
            );
            return Ok(());
        };
        let enter_edges: Vec<u32> = self.graph.out_edges(station_node).to_vec();
        for edge_id in enter_edges {
            if self.graph.edge(edge_id).edge_type != EdgeType::EnterPt {
                continue;
            }
            let Some(to_platform) = self.storage.platform_descriptor_by_edge.get(&edge_id) else {
                continue;
            };
            let platform_matches = to_route_id.is_none()
                || matches!(to_platform, PlatformDescriptor::RouteType { .. })
                || to_route_id.is_some_and(|route_id| {
                    *to_platform == PlatformDescriptor::route(&self.feed_id, to_stop_id, route_id)
                });
            if !platform_matches {
                continue;
            }
            let to_platform = to_platform.clone();
            let route_type = self.route_type_of(&to_platform)? as u32;
            let platform_enter_node = self.graph.edge(edge_id).to;
            let te_edges: Vec<u32> = self.graph.out_edges(platform_enter_node).to_vec();
            for (&time, &from_node) in from_timeline {
                for &te_id in &te_edges {
                    let te = self.graph.edge(te_id);
                    if te.edge_type != EdgeType::EnterTimeExpandedNetwork {
                        continue;
                    }
                    let departure_time = te.time;
                    if departure_time < time + min_transfer_time {
                        continue;
                    }
                    let target = te.to;
                    let transfer = self.graph.add_edge(from_node, target);
                    let edge = self.graph.edge_mut(transfer);
                    edge.edge_type = EdgeType::Transfer;
                    edge.time = departure_time - time;
                    edge.validity_id = route_type;
                    self.storage
                        .platform_descriptor_by_edge
                        .insert(transfer, to_platform.clone());
                    break;
                }
            }
        }
        Ok(())
    }

    /// Realtime entry point: stitches one ad-hoc boarding into the departure
    /// timeline of the trip's platform, creating the timeline node if the
    /// static build never saw this second of day.
    pub fn add_delayed_board_edge(
        &mut self,
        zone: Tz,
        trip_descriptor: &gtfs_realtime::TripDescriptor,
        stop_sequence: u16,
        departure_time: u32,
        departure_node: u32,
        valid_on_day: &DayBitset,
    ) -> Result<u32, GraphBuildError> {
        let feed = self.feed;
        let descriptor = TripInstanceDescriptor::from(trip_descriptor);
        if descriptor.trip_id.is_empty() {
            return Err(GraphBuildError::MissingTripId);
        }
        let trip = feed
            .trips
            .get(descriptor.trip_id.as_str())
            .ok_or_else(|| GraphBuildError::UnknownTrip(descriptor.trip_id.clone()))?;
        let stop_time = feed
            .stop_time(&descriptor.trip_id, stop_sequence)
            .ok_or_else(|| GraphBuildError::UnknownStopTime {
                trip_id: descriptor.trip_id.clone(),
                stop_sequence,
            })?;
        let stop = feed
            .stops
            .get(stop_time.stop_id.as_str())
            .ok_or_else(|| GraphBuildError::UnknownStop(stop_time.stop_id.clone()))?;
        let platform = PlatformDescriptor::route(&self.feed_id, &stop_time.stop_id, &trip.route_id);

        let key = departure_time % SECONDS_PER_DAY;
        let timeline_node = {
            let timeline = self
                .departure_timelines
                .entry(stop_time.stop_id.clone())
                .or_default()
                .entry(platform)
                .or_default();
            match timeline.get(&key) {
                Some(&node) => node,
                None => {
                    let node = self.next_node;
                    self.next_node += 1;
                    self.graph.set_node_coords(node, stop.lat, stop.lon);
                    timeline.insert(key, node);
                    node
                }
            }
        };

        let day_shift = (departure_time / SECONDS_PER_DAY) as usize;
        let validity_id = self.storage.validity_id(Validity {
            bitset: valid_on_day.shift_left_by(day_shift),
            zone,
            start_date: self.start_date,
        });

        let board = self.graph.add_edge(timeline_node, departure_node);
        {
            let edge = self.graph.edge_mut(board);
            edge.edge_type = EdgeType::Board;
            edge.validity_id = validity_id;
            edge.transfers = 1;
        }
        self.storage.stop_sequences.insert(board, stop_sequence);
        self.storage
            .trip_descriptors
            .insert(board, encode_trip_descriptor(&descriptor)?);
        Ok(board)
    }

    fn station_node(&self, stop_id: &str) -> Result<u32, GraphBuildError> {
        self.storage
            .station_nodes
            .get(&FeedIdWithStopId::new(&self.feed_id, stop_id))
            .copied()
            .ok_or_else(|| GraphBuildError::UnknownStop(stop_id.into()))
    }

    fn route_type_of(&self, platform: &PlatformDescriptor) -> Result<i16, GraphBuildError> {
        match platform {
            PlatformDescriptor::RouteType { route_type, .. } => Ok(*route_type),
            PlatformDescriptor::Route { route_id, .. } => self
                .feed
                .routes
                .get(route_id.as_str())
                .map(|route| route.route_type)
                .ok_or_else(|| GraphBuildError::UnknownRoute(route_id.clone())),
        }
    }

    fn new_node_at(&mut self, lat: f64, lon: f64) -> u32 {
        let node = self.next_node;
        self.next_node += 1;
        self.graph.set_node_coords(node, lat, lon);
        node
    }
}
