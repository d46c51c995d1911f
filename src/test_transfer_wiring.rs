#[cfg(test)]
mod tests {
    use crate::builder::TimetableGraphBuilder;
    use crate::day_bitset::DayBitset;
    use crate::feed::{Agency, Route, Service, Stop, StopTime, TimetableFeed, Trip};
    use crate::pt_graph::{EdgeType, PtGraph};
    use crate::storage::{
        decode_trip_descriptor, PlatformDescriptor, TransitStorage, TripKey,
    };
    use crate::transfers::{TransferRecord, Transfers};
    use crate::walk_index::WalkNetworkIndex;
    use chrono::NaiveDate;

    fn day_one() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn base_feed() -> TimetableFeed {
        let mut feed = TimetableFeed::new(day_one(), day_one());
        feed.agencies.push(Agency {
            id: None,
            timezone: "America/Los_Angeles".into(),
        });
        feed.services.insert(
            "s1".into(),
            Service {
                id: "s1".into(),
                weekdays: [true; 7],
                start_date: Some(day_one()),
                end_date: Some(day_one()),
                added: Default::default(),
                removed: Default::default(),
            },
        );
        feed
    }

    fn add_stop(feed: &mut TimetableFeed, id: &str, lon: f64) {
        feed.stops.insert(
            id.into(),
            Stop {
                id: id.into(),
                lat: 0.0,
                lon,
                location_type: 0,
            },
        );
    }

    fn add_route(feed: &mut TimetableFeed, id: &str, route_type: i16) {
        feed.routes.insert(
            id.into(),
            Route {
                id: id.into(),
                agency_id: None,
                route_type,
            },
        );
    }

    fn add_trip(
        feed: &mut TimetableFeed,
        trip_id: &str,
        route_id: &str,
        block_id: Option<&str>,
        stops: &[(&str, u16, u32, u32)],
    ) {
        feed.trips.insert(
            trip_id.into(),
            Trip {
                id: trip_id.into(),
                route_id: route_id.into(),
                service_id: "s1".into(),
                block_id: block_id.map(Into::into),
            },
        );
        feed.stop_times.insert(
            trip_id.into(),
            stops
                .iter()
                .map(|&(stop_id, stop_sequence, arrival_time, departure_time)| StopTime {
                    stop_id: stop_id.into(),
                    arrival_time,
                    departure_time,
                    stop_sequence,
                })
                .collect(),
        );
    }

    fn build(feed: &TimetableFeed, transfers: &Transfers) -> (PtGraph, TransitStorage) {
        let mut graph = PtGraph::new();
        let mut storage = TransitStorage::new();
        let walk_index = WalkNetworkIndex::build(&graph);
        let mut builder =
            TimetableGraphBuilder::new("f1", feed, transfers, &mut graph, &mut storage, walk_index);
        builder.connect_stops_to_street_network().unwrap();
        builder.build_pt_network().unwrap();
        drop(builder);
        (graph, storage)
    }

    fn schedule_key(trip_id: &str) -> TripKey {
        TripKey {
            trip_id: trip_id.into(),
            frequency_start: None,
        }
    }

    fn board_edge(storage: &TransitStorage, trip_id: &str, stop_sequence: usize) -> u32 {
        storage.board_edges_for_trip[&schedule_key(trip_id)][stop_sequence] as u32
    }

    fn alight_edge(storage: &TransitStorage, trip_id: &str, stop_sequence: usize) -> u32 {
        storage.alight_edges_for_trip[&schedule_key(trip_id)][stop_sequence] as u32
    }

    #[test]
    fn block_continuation_wires_transfer_and_board_pair() {
        let mut feed = base_feed();
        add_stop(&mut feed, "A", 0.0);
        add_stop(&mut feed, "B", 0.001);
        add_stop(&mut feed, "C", 0.002);
        add_route(&mut feed, "r1", 3);
        add_trip(
            &mut feed,
            "t1",
            "r1",
            Some("blk"),
            &[("A", 1, 28800, 28800), ("B", 2, 29100, 29100)],
        );
        add_trip(
            &mut feed,
            "t2",
            "r1",
            Some("blk"),
            &[("B", 1, 29100, 29100), ("C", 2, 29400, 29400)],
        );
        let (graph, storage) = build(&feed, &Transfers::default());

        // 2 boards per trip from the timelines plus 1 in-vehicle continuation
        let all_boards: Vec<u32> = graph
            .edges()
            .filter(|(_, e)| e.edge_type == EdgeType::Board)
            .map(|(id, _)| id)
            .collect();
        assert_eq!(all_boards.len(), 5);

        let t2_departure_node = graph.edge(board_edge(&storage, "t2", 1)).to;
        let block_board = all_boards
            .iter()
            .copied()
            .find(|&id| {
                graph.edge(id).to == t2_departure_node && id != board_edge(&storage, "t2", 1)
            })
            .expect("block continuation board edge");
        let intermediate = graph.edge(block_board).from;

        let transfer_ids: Vec<u32> = graph
            .in_edges(intermediate)
            .iter()
            .copied()
            .filter(|&id| graph.edge(id).edge_type == EdgeType::Transfer)
            .collect();
        assert_eq!(transfer_ids.len(), 1);
        let transfer = graph.edge(transfer_ids[0]);
        assert_eq!(transfer.time, 0, "arrival and departure coincide at B");
        assert_eq!(transfer.validity_id, 3, "route type of the boarded platform");
        assert_eq!(
            transfer.from,
            graph.edge(alight_edge(&storage, "t1", 2)).from,
            "continuation starts at the first trip's transit-side arrival"
        );
        assert!(storage
            .platform_descriptor_by_edge
            .contains_key(&transfer_ids[0]));

        // the continuation board is valid on the intersection of both trips
        let board = graph.edge(block_board);
        let validity = storage
            .operating_day_patterns
            .iter()
            .find(|(_, &id)| id == board.validity_id)
            .map(|(v, _)| v)
            .unwrap();
        assert!(validity.bitset.get(0));
        assert_eq!(validity.bitset.cardinality(), 1);
        assert_eq!(board.transfers, 1);
        let descriptor =
            decode_trip_descriptor(&storage.trip_descriptors[&block_board]).unwrap();
        assert_eq!(descriptor.trip_id, "t2");
    }

    #[test]
    fn implicit_within_stop_transfers_cross_platforms() {
        let mut feed = base_feed();
        add_stop(&mut feed, "A", 0.0);
        add_stop(&mut feed, "B", 0.001);
        add_route(&mut feed, "r1", 1);
        add_route(&mut feed, "r2", 2);
        add_trip(
            &mut feed,
            "t1",
            "r1",
            None,
            &[("A", 1, 1000, 1000), ("B", 2, 1300, 1300)],
        );
        add_trip(
            &mut feed,
            "t2",
            "r2",
            None,
            &[("A", 1, 2000, 2000), ("B", 2, 2300, 2300)],
        );
        let (graph, storage) = build(&feed, &Transfers::default());

        let arrival_timeline_t1_a = graph.edge(alight_edge(&storage, "t1", 1)).to;
        let departure_timeline_t2_a = graph.edge(board_edge(&storage, "t2", 1)).from;
        let departure_timeline_t1_a = graph.edge(board_edge(&storage, "t1", 1)).from;

        let transfers_out: Vec<(u32, u32)> = graph
            .out_edges(arrival_timeline_t1_a)
            .iter()
            .map(|&id| graph.edge(id))
            .filter(|e| e.edge_type == EdgeType::Transfer)
            .map(|e| (e.to, e.time))
            .collect();
        assert!(
            transfers_out.contains(&(departure_timeline_t2_a, 1000)),
            "type-1 arrivals reach the next type-2 departure, got {transfers_out:?}"
        );

        // the reverse direction has no departure late enough
        let arrival_timeline_t2_a = graph.edge(alight_edge(&storage, "t2", 1)).to;
        assert!(graph
            .out_edges(arrival_timeline_t2_a)
            .iter()
            .map(|&id| graph.edge(id))
            .filter(|e| e.edge_type == EdgeType::Transfer)
            .all(|e| e.to != departure_timeline_t1_a));
    }

    #[test]
    fn explicit_transfer_respects_minimum_transfer_time() {
        let mut feed = base_feed();
        add_stop(&mut feed, "W", 0.0);
        add_stop(&mut feed, "X", 0.001);
        add_stop(&mut feed, "Y", 0.002);
        add_stop(&mut feed, "Z", 0.003);
        add_route(&mut feed, "rx", 3);
        add_route(&mut feed, "ry", 3);
        add_trip(
            &mut feed,
            "tx",
            "rx",
            None,
            &[("W", 1, 9700, 9700), ("X", 2, 10000, 10000)],
        );
        add_trip(
            &mut feed,
            "ty1",
            "ry",
            None,
            &[("Y", 1, 10100, 10100), ("Z", 2, 10400, 10400)],
        );
        add_trip(
            &mut feed,
            "ty2",
            "ry",
            None,
            &[("Y", 1, 10200, 10200), ("Z", 2, 10500, 10500)],
        );
        let transfers = Transfers::new(vec![TransferRecord {
            from_stop_id: "X".into(),
            to_stop_id: "Y".into(),
            from_route_id: None,
            to_route_id: None,
            transfer_type: 2,
            min_transfer_time: Some(180),
        }]);
        let (graph, storage) = build(&feed, &transfers);

        let arrival_timeline_x = graph.edge(alight_edge(&storage, "tx", 2)).to;
        let departure_y_10100 = graph.edge(board_edge(&storage, "ty1", 1)).from;
        let departure_y_10200 = graph.edge(board_edge(&storage, "ty2", 1)).from;

        let transfers_out: Vec<(u32, u32)> = graph
            .out_edges(arrival_timeline_x)
            .iter()
            .map(|&id| graph.edge(id))
            .filter(|e| e.edge_type == EdgeType::Transfer)
            .map(|e| (e.to, e.time))
            .collect();
        assert!(
            transfers_out.contains(&(departure_y_10200, 200)),
            "10100 is inside the minimum transfer window, 10200 is the first \
             reachable departure; got {transfers_out:?}"
        );
        assert!(transfers_out.iter().all(|&(to, _)| to != departure_y_10100));
    }

    #[test]
    fn delayed_board_edge_joins_a_fresh_route_platform() {
        let mut feed = base_feed();
        add_stop(&mut feed, "A", 0.0);
        add_stop(&mut feed, "B", 0.001);
        add_route(&mut feed, "r1", 3);
        add_trip(
            &mut feed,
            "t1",
            "r1",
            None,
            &[("A", 1, 28800, 28800), ("B", 2, 29100, 29100)],
        );
        let transfers = Transfers::default();
        let mut graph = PtGraph::new();
        let mut storage = TransitStorage::new();
        let walk_index = WalkNetworkIndex::build(&graph);
        let mut builder = TimetableGraphBuilder::new(
            "f1",
            &feed,
            &transfers,
            &mut graph,
            &mut storage,
            walk_index,
        );
        builder.connect_stops_to_street_network().unwrap();
        builder.build_pt_network().unwrap();
        drop(builder);

        let static_board = board_edge(&storage, "t1", 1);
        let static_timeline_node = graph.edge(static_board).from;
        let departure_node = graph.edge(static_board).to;

        let walk_index = WalkNetworkIndex::build(&graph);
        let mut realtime_builder = TimetableGraphBuilder::new(
            "f1",
            &feed,
            &transfers,
            &mut graph,
            &mut storage,
            walk_index,
        );
        let mut valid_today = DayBitset::new();
        valid_today.set(0);
        let descriptor = gtfs_realtime::TripDescriptor {
            trip_id: Some("t1".to_string()),
            route_id: Some("r1".to_string()),
            ..Default::default()
        };
        let delayed_board = realtime_builder
            .add_delayed_board_edge(
                chrono_tz::America::Los_Angeles,
                &descriptor,
                1,
                29000,
                departure_node,
                &valid_today,
            )
            .unwrap();
        realtime_builder
            .wire_up_additional_departures_and_arrivals(chrono_tz::America::Los_Angeles)
            .unwrap();
        drop(realtime_builder);

        let board = graph.edge(delayed_board);
        assert_eq!(board.edge_type, EdgeType::Board);
        assert_eq!(board.transfers, 1);
        assert_eq!(board.to, departure_node);
        assert_ne!(
            board.from, static_timeline_node,
            "the delayed boarding lives on the route platform, not the static one"
        );
        assert_eq!(storage.stop_sequences.get(&delayed_board), Some(&1));
        let decoded = decode_trip_descriptor(&storage.trip_descriptors[&delayed_board]).unwrap();
        assert_eq!(decoded.trip_id, "t1");

        // the route platform got its own ENTER_PT wiring at the station
        let route_platform = PlatformDescriptor::route("f1", "A", "r1");
        let enter_edges: Vec<u32> = graph
            .edges()
            .filter(|(id, e)| {
                e.edge_type == EdgeType::EnterPt
                    && storage.platform_descriptor_by_edge.get(id) == Some(&route_platform)
            })
            .map(|(id, _)| id)
            .collect();
        assert_eq!(enter_edges.len(), 1);
        let platform_enter_node = graph.edge(enter_edges[0]).to;
        let te_times: Vec<u32> = graph
            .out_edges(platform_enter_node)
            .iter()
            .map(|&id| graph.edge(id))
            .filter(|e| e.edge_type == EdgeType::EnterTimeExpandedNetwork)
            .map(|e| e.time)
            .collect();
        assert_eq!(te_times, vec![29000]);
    }

    #[test]
    fn delayed_board_edge_patches_into_an_existing_platform() {
        let mut feed = base_feed();
        add_stop(&mut feed, "A", 0.0);
        add_stop(&mut feed, "B", 0.001);
        add_route(&mut feed, "r1", 3);
        add_trip(
            &mut feed,
            "t1",
            "r1",
            None,
            &[("A", 1, 28800, 28800), ("B", 2, 29100, 29100)],
        );
        // a route-specific rule at A makes the static build use route
        // platforms there, so the realtime boarding finds its platform
        let transfers = Transfers::new(vec![TransferRecord {
            from_stop_id: "A".into(),
            to_stop_id: "A".into(),
            from_route_id: None,
            to_route_id: Some("r1".into()),
            transfer_type: 2,
            min_transfer_time: Some(0),
        }]);
        let mut graph = PtGraph::new();
        let mut storage = TransitStorage::new();
        let walk_index = WalkNetworkIndex::build(&graph);
        let mut builder = TimetableGraphBuilder::new(
            "f1",
            &feed,
            &transfers,
            &mut graph,
            &mut storage,
            walk_index,
        );
        builder.connect_stops_to_street_network().unwrap();
        builder.build_pt_network().unwrap();
        drop(builder);

        let static_board = board_edge(&storage, "t1", 1);
        let static_timeline_node = graph.edge(static_board).from;
        let departure_node = graph.edge(static_board).to;
        let enter_pt_before = graph
            .edges()
            .filter(|(_, e)| e.edge_type == EdgeType::EnterPt)
            .count();

        let walk_index = WalkNetworkIndex::build(&graph);
        let mut realtime_builder = TimetableGraphBuilder::new(
            "f1",
            &feed,
            &transfers,
            &mut graph,
            &mut storage,
            walk_index,
        );
        let mut valid_today = DayBitset::new();
        valid_today.set(0);
        let descriptor = gtfs_realtime::TripDescriptor {
            trip_id: Some("t1".to_string()),
            route_id: Some("r1".to_string()),
            ..Default::default()
        };
        let delayed_board = realtime_builder
            .add_delayed_board_edge(
                chrono_tz::America::Los_Angeles,
                &descriptor,
                1,
                29000,
                departure_node,
                &valid_today,
            )
            .unwrap();
        realtime_builder
            .wire_up_additional_departures_and_arrivals(chrono_tz::America::Los_Angeles)
            .unwrap();
        drop(realtime_builder);

        let delayed_timeline_node = graph.edge(delayed_board).from;
        assert_ne!(delayed_timeline_node, static_timeline_node);

        // no new platform appeared, the timeline was patched into the old one
        let enter_pt_after = graph
            .edges()
            .filter(|(_, e)| e.edge_type == EdgeType::EnterPt)
            .count();
        assert_eq!(enter_pt_before, enter_pt_after);

        // a wait edge bridges from the earlier static departure to the
        // patched-in node
        let wait_in: Vec<(u32, u32)> = graph
            .in_edges(delayed_timeline_node)
            .iter()
            .map(|&id| graph.edge(id))
            .filter(|e| e.edge_type == EdgeType::Wait)
            .map(|e| (e.from, e.time))
            .collect();
        assert!(
            wait_in.contains(&(static_timeline_node, 200)),
            "expected a 200s wait from the 28800 node, got {wait_in:?}"
        );
        // and the node is reachable from the platform enter node
        let te_in: Vec<u32> = graph
            .in_edges(delayed_timeline_node)
            .iter()
            .map(|&id| graph.edge(id))
            .filter(|e| e.edge_type == EdgeType::EnterTimeExpandedNetwork)
            .map(|e| e.time)
            .collect();
        assert_eq!(te_in, vec![29000]);
    }

    #[test]
    fn realtime_transfer_stitching_reaches_delayed_timeline_nodes() {
        let mut feed = base_feed();
        add_stop(&mut feed, "A", 0.0);
        add_stop(&mut feed, "B", 0.001);
        add_route(&mut feed, "r1", 3);
        add_trip(
            &mut feed,
            "t1",
            "r1",
            None,
            &[("A", 1, 28800, 28800), ("B", 2, 29100, 29100)],
        );
        let transfers = Transfers::default();
        let mut graph = PtGraph::new();
        let mut storage = TransitStorage::new();
        let walk_index = WalkNetworkIndex::build(&graph);
        let mut builder = TimetableGraphBuilder::new(
            "f1",
            &feed,
            &transfers,
            &mut graph,
            &mut storage,
            walk_index,
        );
        builder.connect_stops_to_street_network().unwrap();
        builder.build_pt_network().unwrap();
        drop(builder);

        let arrival_timeline_b = graph.edge(alight_edge(&storage, "t1", 2)).to;
        let exit_platform_b = graph
            .out_edges(arrival_timeline_b)
            .iter()
            .map(|&id| graph.edge(id))
            .find(|e| e.edge_type == EdgeType::LeaveTimeExpandedNetwork)
            .map(|e| e.to)
            .unwrap();
        let departure_node = graph.edge(board_edge(&storage, "t1", 1)).to;

        let walk_index = WalkNetworkIndex::build(&graph);
        let mut realtime_builder = TimetableGraphBuilder::new(
            "f1",
            &feed,
            &transfers,
            &mut graph,
            &mut storage,
            walk_index,
        );
        let mut valid_today = DayBitset::new();
        valid_today.set(0);
        let descriptor = gtfs_realtime::TripDescriptor {
            trip_id: Some("t1".to_string()),
            route_id: Some("r1".to_string()),
            ..Default::default()
        };
        let delayed_board = realtime_builder
            .add_delayed_board_edge(
                chrono_tz::America::Los_Angeles,
                &descriptor,
                1,
                29200,
                departure_node,
                &valid_today,
            )
            .unwrap();
        realtime_builder
            .insert_transfer_edges(
                exit_platform_b,
                0,
                &PlatformDescriptor::route("f1", "A", "r1"),
            )
            .unwrap();
        drop(realtime_builder);

        let delayed_timeline_node = graph.edge(delayed_board).from;
        let transfer: Vec<(u32, u32)> = graph
            .out_edges(arrival_timeline_b)
            .iter()
            .map(|&id| graph.edge(id))
            .filter(|e| e.edge_type == EdgeType::Transfer)
            .map(|e| (e.to, e.time))
            .collect();
        assert!(
            transfer.contains(&(delayed_timeline_node, 100)),
            "arrival at 29100 reaches the 29200 delayed departure, got {transfer:?}"
        );
    }
}
