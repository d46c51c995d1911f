// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives

//! Side tables and interning dictionaries produced alongside the graph.
//!
//! The query side resolves edge attribute ids through this storage: interned
//! day-validity patterns, feed timezones, the street node per stop, and the
//! per-edge descriptors reconstruction reads back. Interned ids are handed
//! out in insertion order; rebuilding the same feed reproduces them.

use crate::day_bitset::DayBitset;
use ahash::AHashMap;
use chrono::NaiveDate;
use chrono_tz::Tz;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Unit of transfer granularity at a stop. A stop hosts one platform per
/// route type, unless a route-specific transfer rule names it, in which
/// case it hosts one platform per route.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlatformDescriptor {
    RouteType {
        feed_id: CompactString,
        stop_id: CompactString,
        route_type: i16,
    },
    Route {
        feed_id: CompactString,
        stop_id: CompactString,
        route_id: CompactString,
    },
}

impl PlatformDescriptor {
    pub fn route_type(feed_id: &str, stop_id: &str, route_type: i16) -> Self {
        Self::RouteType {
            feed_id: feed_id.into(),
            stop_id: stop_id.into(),
            route_type,
        }
    }

    pub fn route(feed_id: &str, stop_id: &str, route_id: &str) -> Self {
        Self::Route {
            feed_id: feed_id.into(),
            stop_id: stop_id.into(),
            route_id: route_id.into(),
        }
    }

    pub fn feed_id(&self) -> &CompactString {
        match self {
            Self::RouteType { feed_id, .. } | Self::Route { feed_id, .. } => feed_id,
        }
    }

    pub fn stop_id(&self) -> &CompactString {
        match self {
            Self::RouteType { stop_id, .. } | Self::Route { stop_id, .. } => stop_id,
        }
    }

    pub fn route_id_or_none(&self) -> Option<&CompactString> {
        match self {
            Self::RouteType { .. } => None,
            Self::Route { route_id, .. } => Some(route_id),
        }
    }
}

/// Interning key for the day pattern an edge is available on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Validity {
    pub bitset: DayBitset,
    pub zone: Tz,
    pub start_date: NaiveDate,
}

/// Interning key for the timezone attached to time-expanded edges.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeedIdWithTimezone {
    pub feed_id: CompactString,
    pub zone: Tz,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeedIdWithStopId {
    pub feed_id: CompactString,
    pub stop_id: CompactString,
}

impl FeedIdWithStopId {
    pub fn new(feed_id: &str, stop_id: &str) -> Self {
        Self {
            feed_id: feed_id.into(),
            stop_id: stop_id.into(),
        }
    }
}

/// Key of the per-trip board/alight edge arrays. Frequency expansion emits
/// one instance per start offset, so the offset is part of the key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TripKey {
    pub trip_id: CompactString,
    /// Start offset of the frequency instance; `None` for schedule-based
    /// trips.
    pub frequency_start: Option<u32>,
}

/// The trip identity serialized onto BOARD and ALIGHT edges, compact enough
/// to round-trip through the realtime subsystem.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripInstanceDescriptor {
    pub trip_id: CompactString,
    pub route_id: CompactString,
    /// GTFS `HH:MM:SS` start time, only set for frequency-expanded
    /// instances.
    pub start_time: Option<CompactString>,
}

impl From<&gtfs_realtime::TripDescriptor> for TripInstanceDescriptor {
    fn from(descriptor: &gtfs_realtime::TripDescriptor) -> Self {
        Self {
            trip_id: descriptor.trip_id.as_deref().unwrap_or_default().into(),
            route_id: descriptor.route_id.as_deref().unwrap_or_default().into(),
            start_time: descriptor.start_time.as_deref().map(Into::into),
        }
    }
}

pub fn encode_trip_descriptor(
    descriptor: &TripInstanceDescriptor,
) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::serde::encode_to_vec(descriptor, bincode::config::standard())
}

pub fn decode_trip_descriptor(
    bytes: &[u8],
) -> Result<TripInstanceDescriptor, bincode::error::DecodeError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard()).map(|(value, _)| value)
}

#[derive(Debug, Default)]
pub struct TransitStorage {
    /// Validity pattern -> dense id, insertion order.
    pub operating_day_patterns: AHashMap<Validity, u32>,
    /// (feed, timezone) -> dense id, insertion order.
    pub writable_time_zones: AHashMap<FeedIdWithTimezone, u32>,
    /// (feed, stop) -> street node. One entry per stop, duplicate insertion
    /// is a build error.
    pub station_nodes: AHashMap<FeedIdWithStopId, u32>,
    /// Populated for ENTER_PT, EXIT_PT and TRANSFER edges.
    pub platform_descriptor_by_edge: AHashMap<u32, PlatformDescriptor>,
    /// Populated for BOARD, ALIGHT and HOP edges.
    pub stop_sequences: AHashMap<u32, u16>,
    /// Serialized [`TripInstanceDescriptor`] per BOARD/ALIGHT edge.
    pub trip_descriptors: AHashMap<u32, Vec<u8>>,
    /// Per trip instance, BOARD edge ids indexed by stop sequence with -1
    /// padding at sequences the trip does not serve.
    pub board_edges_for_trip: AHashMap<TripKey, Vec<i32>>,
    pub alight_edges_for_trip: AHashMap<TripKey, Vec<i32>>,
}

impl TransitStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dense id for a validity pattern, interning on first sight.
    pub fn validity_id(&mut self, validity: Validity) -> u32 {
        if let Some(&id) = self.operating_day_patterns.get(&validity) {
            return id;
        }
        let id = self.operating_day_patterns.len() as u32;
        self.operating_day_patterns.insert(validity, id);
        id
    }

    /// Dense id for a feed timezone, interning on first sight.
    pub fn timezone_id(&mut self, key: FeedIdWithTimezone) -> u32 {
        if let Some(&id) = self.writable_time_zones.get(&key) {
            return id;
        }
        let id = self.writable_time_zones.len() as u32;
        self.writable_time_zones.insert(key, id);
        id
    }
}
