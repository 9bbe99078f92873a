//! Records exchanged with the remote data store.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geofence::Coordinates;

/// Value written to `image_url` for face-verified check-ins.
pub const FACE_VERIFIED_MARKER: &str = "verified_by_face_recognition";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Duty station.
    pub seating: Option<String>,
    /// Public URL of the enrollment photo.
    pub image_url: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    pub group_id: Option<String>,
}

fn default_role() -> String {
    "employee".to_string()
}

/// A department: a geofence plus the daily window in which check-in is allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// `HH:MM` or `HH:MM:SS`.
    pub start_time: String,
    pub end_time: String,
    #[serde(default = "default_radius")]
    pub radius: f64,
    /// When false the geofence check is skipped.
    #[serde(default = "default_restricted")]
    pub location_restricted: bool,
}

fn default_radius() -> f64 {
    100.0
}

fn default_restricted() -> bool {
    true
}

impl Group {
    pub fn target(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn active_window(&self) -> Result<ActiveWindow, WindowError> {
        ActiveWindow::parse(&self.start_time, &self.end_time)
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("invalid time of day: {0:?}")]
pub struct WindowError(pub String);

/// Inclusive daily time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ActiveWindow {
    pub fn parse(start: &str, end: &str) -> Result<Self, WindowError> {
        Ok(Self {
            start: parse_time_of_day(start)?,
            end: parse_time_of_day(end)?,
        })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Accepts `HH:MM:SS[.fff]` or `HH:MM`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, WindowError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| WindowError(s.to_string()))
}

/// One check-in row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub user_id: String,
    pub status: String,
    pub image_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub seating: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AttendanceRecord {
    /// A "present" row for a face-verified check-in.
    pub fn present(profile: &Profile, at: Coordinates, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: profile.id.clone(),
            status: "present".to_string(),
            image_url: FACE_VERIFIED_MARKER.to_string(),
            latitude: at.latitude,
            longitude: at.longitude,
            name: profile.name.clone(),
            seating: profile.seating.clone(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_both_time_formats() {
        assert_eq!(
            parse_time_of_day("09:00").unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap()
        );
        assert_eq!(
            parse_time_of_day("17:30:15").unwrap(),
            NaiveTime::from_hms_opt(17, 30, 15).unwrap()
        );
        assert!(parse_time_of_day("9am").is_err());
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let w = ActiveWindow::parse("09:00", "17:00:00").unwrap();
        assert!(w.contains(NaiveTime::from_hms_opt(9, 0, 0).unwrap()));
        assert!(w.contains(NaiveTime::from_hms_opt(17, 0, 0).unwrap()));
        assert!(!w.contains(NaiveTime::from_hms_opt(8, 59, 59).unwrap()));
        assert!(!w.contains(NaiveTime::from_hms_opt(17, 0, 1).unwrap()));
    }

    #[test]
    fn test_group_defaults() {
        let g: Group = serde_json::from_str(
            r#"{"id":"g1","name":"HQ","latitude":1.0,"longitude":2.0,
                "start_time":"08:00","end_time":"16:00"}"#,
        )
        .unwrap();
        assert_eq!(g.radius, 100.0);
        assert!(g.location_restricted);
    }

    #[test]
    fn test_present_record_copies_profile() {
        let profile = Profile {
            id: "u1".into(),
            name: Some("Ayesha".into()),
            email: None,
            phone: None,
            seating: Some("Tehsil A".into()),
            image_url: None,
            role: "employee".into(),
            group_id: Some("g1".into()),
        };
        let rec = AttendanceRecord::present(&profile, Coordinates::new(1.5, 2.5), Utc::now());
        assert_eq!(rec.user_id, "u1");
        assert_eq!(rec.status, "present");
        assert_eq!(rec.image_url, FACE_VERIFIED_MARKER);
        assert_eq!(rec.seating.as_deref(), Some("Tehsil A"));
        assert_eq!(rec.latitude, 1.5);
    }
}
