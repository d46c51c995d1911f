// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives

//! GTFS `transfers.txt` records and the lookups the graph builder needs.
//!
//! Records may carry the `from_route_id` / `to_route_id` extension columns.
//! A stop mentioned by a route-specific rule on its arrival side gets one
//! platform per route instead of one per route type.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub from_stop_id: CompactString,
    pub to_stop_id: CompactString,
    #[serde(default)]
    pub from_route_id: Option<CompactString>,
    #[serde(default)]
    pub to_route_id: Option<CompactString>,
    #[serde(default)]
    pub transfer_type: i16,
    #[serde(default)]
    pub min_transfer_time: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct Transfers {
    records: Vec<TransferRecord>,
    /// Stops that appear as the destination of a route-specific rule.
    route_specific_to_stops: BTreeSet<CompactString>,
}

impl Transfers {
    pub fn new(records: Vec<TransferRecord>) -> Self {
        let route_specific_to_stops = records
            .iter()
            .filter(|r| r.to_route_id.is_some())
            .map(|r| r.to_stop_id.clone())
            .collect();
        Self {
            records,
            route_specific_to_stops,
        }
    }

    /// Parses a `transfers.txt` and builds the index.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let mut records = Vec::new();
        for row in csv_reader.deserialize::<TransferRecord>() {
            records.push(row?);
        }
        Ok(Self::new(records))
    }

    /// True when no rule names a specific route arriving at this stop, in
    /// which case the stop hosts one platform per route type.
    pub fn has_no_route_specific_departure_transfer_rules(&self, stop_id: &str) -> bool {
        !self.route_specific_to_stops.contains(stop_id)
    }

    /// Transfers whose destination matches the given stop and route. When no
    /// explicit rule originates at the stop itself, a synthetic zero-minimum
    /// within-stop transfer is appended so that every platform of a stop is
    /// reachable from its own arrivals.
    pub fn get_transfers_to_stop(
        &self,
        to_stop_id: &str,
        to_route_id: Option<&str>,
    ) -> Vec<TransferRecord> {
        let mut result: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|t| t.to_stop_id == to_stop_id)
            .filter(|t| t.to_route_id.is_none() || t.to_route_id.as_deref() == to_route_id)
            .cloned()
            .collect();
        if !result.iter().any(|t| t.from_stop_id == to_stop_id) {
            result.push(TransferRecord {
                from_stop_id: to_stop_id.into(),
                to_stop_id: to_stop_id.into(),
                from_route_id: None,
                to_route_id: None,
                transfer_type: 2,
                min_transfer_time: Some(0),
            });
        }
        result
    }

    /// Explicit transfers originating at the given stop and route. No
    /// synthetic records here; callers handle the within-stop default.
    pub fn get_transfers_from_stop(
        &self,
        from_stop_id: &str,
        from_route_id: Option<&str>,
    ) -> Vec<&TransferRecord> {
        self.records
            .iter()
            .filter(|t| t.from_stop_id == from_stop_id)
            .filter(|t| t.from_route_id.is_none() || t.from_route_id.as_deref() == from_route_id)
            .collect()
    }
}
