//! Attendance submission: the last step of a check-in session.

use std::future::Future;

use checkin_core::records::WindowError;
use checkin_core::{
    AttendanceRecord, CollabError, Group, LocationProvider, Profile, RemoteStore,
};
use chrono::{DateTime, Local, NaiveTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("verification incomplete (face: {face_verified}, location: {location_verified})")]
    NotVerified {
        face_verified: bool,
        location_verified: bool,
    },
    #[error("attendance already submitted for this session")]
    AlreadySubmitted,
    #[error("a submission is already in progress")]
    InProgress,
    #[error("no group assigned to this user")]
    NoGroup,
    #[error("group active hours are invalid: {0}")]
    InvalidWindow(#[from] WindowError),
    #[error("outside active hours ({start} - {end})")]
    OutsideWindow { start: NaiveTime, end: NaiveTime },
    #[error("could not fetch location")]
    NoLocation,
    #[error(transparent)]
    Collab(#[from] CollabError),
    #[error("verification engine stopped")]
    EngineClosed,
}

impl AttendanceError {
    /// Text for the host UI.
    pub fn status_message(&self) -> String {
        match self {
            AttendanceError::OutsideWindow { start, end } => format!(
                "Check-in is only allowed between {} and {}",
                start.format("%H:%M"),
                end.format("%H:%M")
            ),
            AttendanceError::InvalidWindow(_) => "Error checking time restrictions".to_string(),
            AttendanceError::NoLocation => "Could not fetch location".to_string(),
            AttendanceError::AlreadySubmitted => "Attendance already submitted".to_string(),
            other => format!("Error: {other}"),
        }
    }
}

/// Single-use permission to write attendance for one session.
pub trait SubmitGate: Sync {
    /// Reserve the submission. Fails unless face and location are both verified
    /// and nothing was submitted yet.
    fn claim(&self) -> impl Future<Output = Result<(), AttendanceError>> + Send;

    /// Give the reservation back. `written` finishes the session.
    fn release(&self, written: bool) -> impl Future<Output = ()> + Send;
}

/// A written attendance row.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: String,
    pub record: AttendanceRecord,
}

/// Write a "present" row for a verified session.
///
/// Enforces the group's active hours at `now` (inclusive), takes a fresh
/// location fix for the row, and succeeds at most once per gate.
pub async fn submit<G, S, L>(
    gate: &G,
    profile: &Profile,
    group: Option<&Group>,
    store: &S,
    location: &L,
    now: DateTime<Local>,
) -> Result<Submission, AttendanceError>
where
    G: SubmitGate,
    S: RemoteStore,
    L: LocationProvider,
{
    gate.claim().await?;

    let result = write_record(profile, group, store, location, now).await;
    gate.release(result.is_ok()).await;

    match &result {
        Ok(s) => tracing::info!(id = %s.id, user = %profile.id, "attendance submitted"),
        Err(e) => tracing::warn!(error = %e, user = %profile.id, "attendance submission failed"),
    }
    result
}

async fn write_record<S: RemoteStore, L: LocationProvider>(
    profile: &Profile,
    group: Option<&Group>,
    store: &S,
    location: &L,
    now: DateTime<Local>,
) -> Result<Submission, AttendanceError> {
    let group = group.ok_or(AttendanceError::NoGroup)?;
    let window = group.active_window()?;
    if !window.contains(now.time()) {
        return Err(AttendanceError::OutsideWindow {
            start: window.start,
            end: window.end,
        });
    }

    let fix = location
        .current_location()
        .await?
        .ok_or(AttendanceError::NoLocation)?;

    let record = AttendanceRecord::present(profile, fix, now.with_timezone(&Utc));
    let id = store.insert_attendance(&record).await?;
    Ok(Submission { id, record })
}
