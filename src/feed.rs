// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives

//! In-memory timetable model consumed by the graph builder.
//!
//! The builder never touches `gtfs_structures` types directly; feeds are
//! converted into this compact model first. Collections are keyed with
//! ordered maps so a rebuild of the same feed allocates identical node and
//! edge ids.

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use compact_str::CompactString;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedConversionError {
    #[error("feed has no calendar or calendar_dates entries to derive a date range from")]
    NoServiceDates,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stop {
    pub id: CompactString,
    pub lat: f64,
    pub lon: f64,
    /// GTFS `location_type`; only 0 (platform/stop) enters the graph.
    pub location_type: i16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Route {
    pub id: CompactString,
    pub agency_id: Option<CompactString>,
    pub route_type: i16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trip {
    pub id: CompactString,
    pub route_id: CompactString,
    pub service_id: CompactString,
    pub block_id: Option<CompactString>,
}

/// A stop visit with both times resolved. Times count seconds from the
/// service day reference (noon minus 12 h); values past 86400 are
/// next-calendar-day events of the same service day.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StopTime {
    pub stop_id: CompactString,
    pub arrival_time: u32,
    pub departure_time: u32,
    pub stop_sequence: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    pub start_time: u32,
    pub end_time: u32,
    pub headway_secs: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agency {
    pub id: Option<CompactString>,
    pub timezone: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Service {
    pub id: CompactString,
    /// Monday first, matching `Datelike::num_days_from_monday`.
    pub weekdays: [bool; 7],
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub added: BTreeSet<NaiveDate>,
    pub removed: BTreeSet<NaiveDate>,
}

impl Service {
    pub fn active_on(&self, date: NaiveDate) -> bool {
        if self.removed.contains(&date) {
            return false;
        }
        if self.added.contains(&date) {
            return true;
        }
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => {
                start <= date
                    && date <= end
                    && self.weekdays[date.weekday().num_days_from_monday() as usize]
            }
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimetableFeed {
    pub stops: BTreeMap<CompactString, Stop>,
    pub routes: BTreeMap<CompactString, Route>,
    pub trips: BTreeMap<CompactString, Trip>,
    pub services: BTreeMap<CompactString, Service>,
    /// Per trip, sorted by `stop_sequence`, with all times interpolated.
    pub stop_times: BTreeMap<CompactString, Vec<StopTime>>,
    pub frequencies: BTreeMap<CompactString, Vec<Frequency>>,
    pub agencies: Vec<Agency>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl TimetableFeed {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            stops: BTreeMap::new(),
            routes: BTreeMap::new(),
            trips: BTreeMap::new(),
            services: BTreeMap::new(),
            stop_times: BTreeMap::new(),
            frequencies: BTreeMap::new(),
            agencies: Vec::new(),
            start_date,
            end_date,
        }
    }

    /// Number of days in the feed window, both endpoints included.
    pub fn day_count(&self) -> usize {
        (self.end_date - self.start_date).num_days().max(0) as usize + 1
    }

    /// Stop times of a trip, sorted by stop sequence, missing times filled
    /// in at conversion. Empty slice for unknown trips.
    pub fn interpolated_stop_times_for_trip(&self, trip_id: &str) -> &[StopTime] {
        self.stop_times.get(trip_id).map_or(&[], Vec::as_slice)
    }

    pub fn stop_time(&self, trip_id: &str, stop_sequence: u16) -> Option<&StopTime> {
        let times = self.stop_times.get(trip_id)?;
        times
            .binary_search_by_key(&stop_sequence, |st| st.stop_sequence)
            .ok()
            .map(|idx| &times[idx])
    }

    pub fn frequencies_for_trip(&self, trip_id: &str) -> &[Frequency] {
        self.frequencies.get(trip_id).map_or(&[], Vec::as_slice)
    }

    /// Timezone of the given agency, falling back to UTC when the agency or
    /// its timezone cannot be resolved.
    pub fn timezone_for_agency(&self, agency_id: Option<&str>) -> Tz {
        let agency = match agency_id {
            Some(id) => self
                .agencies
                .iter()
                .find(|a| a.id.as_deref() == Some(id))
                .or(self.agencies.first()),
            None => self.agencies.first(),
        };
        agency
            .and_then(|a| Tz::from_str_insensitive(&a.timezone).ok())
            .unwrap_or(chrono_tz::UTC)
    }

    /// Timezone of the first agency in the feed.
    pub fn default_timezone(&self) -> Tz {
        self.timezone_for_agency(None)
    }

    /// Converts a parsed GTFS feed. Trips without resolvable endpoint times
    /// are dropped with a warning; the feed window is derived from the
    /// calendar and calendar_dates tables.
    pub fn from_gtfs(gtfs: &gtfs_structures::Gtfs) -> Result<Self, FeedConversionError> {
        let mut services: BTreeMap<CompactString, Service> = BTreeMap::new();
        for (service_id, calendar) in &gtfs.calendar {
            let service = services.entry(service_id.as_str().into()).or_default();
            service.id = service_id.as_str().into();
            service.weekdays = [
                calendar.monday,
                calendar.tuesday,
                calendar.wednesday,
                calendar.thursday,
                calendar.friday,
                calendar.saturday,
                calendar.sunday,
            ];
            service.start_date = Some(calendar.start_date);
            service.end_date = Some(calendar.end_date);
        }
        for (service_id, dates) in &gtfs.calendar_dates {
            let service = services.entry(service_id.as_str().into()).or_default();
            service.id = service_id.as_str().into();
            for date in dates {
                match date.exception_type {
                    gtfs_structures::Exception::Added => {
                        service.added.insert(date.date);
                    }
                    gtfs_structures::Exception::Deleted => {
                        service.removed.insert(date.date);
                    }
                }
            }
        }

        let all_dates = services.values().flat_map(|s| {
            s.start_date
                .iter()
                .chain(s.end_date.iter())
                .chain(s.added.iter())
                .chain(s.removed.iter())
                .copied()
                .collect::<Vec<_>>()
        });
        let (start_date, end_date) = all_dates.fold(None, |acc: Option<(NaiveDate, NaiveDate)>, d| {
            Some(match acc {
                Some((lo, hi)) => (lo.min(d), hi.max(d)),
                None => (d, d),
            })
        })
        .ok_or(FeedConversionError::NoServiceDates)?;

        let mut feed = TimetableFeed::new(start_date, end_date);
        feed.services = services;

        for (stop_id, stop) in &gtfs.stops {
            let (Some(lat), Some(lon)) = (stop.latitude, stop.longitude) else {
                warn!("stop {} has no coordinates, dropping it", stop_id);
                continue;
            };
            feed.stops.insert(
                stop_id.as_str().into(),
                Stop {
                    id: stop_id.as_str().into(),
                    lat,
                    lon,
                    location_type: location_type_to_int(&stop.location_type),
                },
            );
        }

        for (route_id, route) in &gtfs.routes {
            feed.routes.insert(
                route_id.as_str().into(),
                Route {
                    id: route_id.as_str().into(),
                    agency_id: route.agency_id.as_deref().map(Into::into),
                    route_type: route_type_to_int(&route.route_type),
                },
            );
        }

        for agency in &gtfs.agencies {
            feed.agencies.push(Agency {
                id: agency.id.as_deref().map(Into::into),
                timezone: agency.timezone.clone(),
            });
        }

        for (trip_id, trip) in &gtfs.trips {
            let mut raw: Vec<RawTimes> = trip
                .stop_times
                .iter()
                .map(|st| RawTimes {
                    stop_id: st.stop.id.as_str().into(),
                    arrival: st.arrival_time,
                    departure: st.departure_time,
                    stop_sequence: st.stop_sequence as u16,
                })
                .collect();
            raw.sort_by_key(|st| st.stop_sequence);
            let Some(times) = interpolate_stop_times(raw) else {
                warn!("trip {} has no usable endpoint times, dropping it", trip_id);
                continue;
            };
            feed.stop_times.insert(trip_id.as_str().into(), times);
            if !trip.frequencies.is_empty() {
                feed.frequencies.insert(
                    trip_id.as_str().into(),
                    trip.frequencies
                        .iter()
                        .map(|f| Frequency {
                            start_time: f.start_time,
                            end_time: f.end_time,
                            headway_secs: f.headway_secs,
                        })
                        .collect(),
                );
            }
            feed.trips.insert(
                trip_id.as_str().into(),
                Trip {
                    id: trip_id.as_str().into(),
                    route_id: trip.route_id.as_str().into(),
                    service_id: trip.service_id.as_str().into(),
                    block_id: trip.block_id.as_deref().map(Into::into),
                },
            );
        }

        Ok(feed)
    }
}

struct RawTimes {
    stop_id: CompactString,
    arrival: Option<u32>,
    departure: Option<u32>,
    stop_sequence: u16,
}

/// Resolves missing times: a lone missing arrival or departure copies its
/// sibling, and interior runs with neither are spread evenly between the
/// surrounding timepoints. Returns `None` when the endpoints themselves have
/// no time.
fn interpolate_stop_times(entries: Vec<RawTimes>) -> Option<Vec<StopTime>> {
    if entries.is_empty() {
        return None;
    }
    let mut resolved: Vec<Option<(u32, u32)>> = entries
        .iter()
        .map(|e| match (e.arrival, e.departure) {
            (Some(a), Some(d)) => Some((a, d)),
            (Some(a), None) => Some((a, a)),
            (None, Some(d)) => Some((d, d)),
            (None, None) => None,
        })
        .collect();
    resolved.first()?.as_ref()?;
    resolved.last()?.as_ref()?;

    let mut idx = 0;
    while idx < resolved.len() {
        if resolved[idx].is_some() {
            idx += 1;
            continue;
        }
        // idx starts a run of unresolved entries; both neighbours exist
        // because the endpoints are known.
        let run_start = idx;
        let mut run_end = idx;
        while resolved[run_end].is_none() {
            run_end += 1;
        }
        let prev_departure = resolved[run_start - 1].map(|(_, d)| d)?;
        let next_arrival = resolved[run_end].map(|(a, _)| a)?;
        let gap = next_arrival.saturating_sub(prev_departure);
        let hops = (run_end - run_start + 1) as u32;
        for (offset, slot) in resolved[run_start..run_end].iter_mut().enumerate() {
            let t = prev_departure + gap * (offset as u32 + 1) / hops;
            *slot = Some((t, t));
        }
        idx = run_end;
    }

    Some(
        entries
            .iter()
            .zip(resolved)
            .map(|(e, times)| {
                let (arrival_time, departure_time) =
                    times.unwrap_or((0, 0));
                StopTime {
                    stop_id: e.stop_id.clone(),
                    arrival_time,
                    departure_time,
                    stop_sequence: e.stop_sequence,
                }
            })
            .collect(),
    )
}

fn location_type_to_int(input: &gtfs_structures::LocationType) -> i16 {
    match input {
        gtfs_structures::LocationType::StopPoint => 0,
        gtfs_structures::LocationType::StopArea => 1,
        gtfs_structures::LocationType::StationEntrance => 2,
        gtfs_structures::LocationType::GenericNode => 3,
        gtfs_structures::LocationType::BoardingArea => 4,
        gtfs_structures::LocationType::Unknown(i) => *i as i16,
    }
}

fn route_type_to_int(input: &gtfs_structures::RouteType) -> i16 {
    match input {
        gtfs_structures::RouteType::Tramway => 0,
        gtfs_structures::RouteType::Subway => 1,
        gtfs_structures::RouteType::Rail => 2,
        gtfs_structures::RouteType::Bus => 3,
        gtfs_structures::RouteType::Ferry => 4,
        gtfs_structures::RouteType::CableCar => 5,
        gtfs_structures::RouteType::Gondola => 6,
        gtfs_structures::RouteType::Funicular => 7,
        gtfs_structures::RouteType::Coach => 200,
        gtfs_structures::RouteType::Air => 1100,
        gtfs_structures::RouteType::Taxi => 1500,
        gtfs_structures::RouteType::Other(i) => *i as i16,
    }
}
