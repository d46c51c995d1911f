// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives

/// Seconds in one service day. Timeline keys live in `[0, SECONDS_PER_DAY)`;
/// schedule times at or past this value denote next-calendar-day events of
/// the same service day.
pub const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Great-circle distance between two WGS84 points in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let r = 6371000.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    r * c
}

/// Formats seconds since the service day reference as a GTFS `HH:MM:SS`
/// string. Hours keep counting past 24 for next-day times.
pub fn convert_to_gtfs_time(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
