//! Ports to the external services the check-in flow relies on: the remote
//! data store, the blob store holding enrollment photos, and the device
//! location provider.

use std::future::Future;

use thiserror::Error;

use crate::geofence::Coordinates;
use crate::records::{AttendanceRecord, Group, Profile};

#[derive(Error, Debug)]
pub enum CollabError {
    #[error("remote store error: {0}")]
    Store(String),
    #[error("blob fetch failed for {url}: {reason}")]
    Blob { url: String, reason: String },
    #[error("location unavailable: {0}")]
    Location(String),
}

pub trait RemoteStore: Send + Sync {
    fn profile(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<Profile>, CollabError>> + Send;

    fn group(&self, group_id: &str)
        -> impl Future<Output = Result<Option<Group>, CollabError>> + Send;

    /// Insert a check-in row; returns the new row's id.
    fn insert_attendance(
        &self,
        record: &AttendanceRecord,
    ) -> impl Future<Output = Result<String, CollabError>> + Send;
}

pub trait BlobStore: Send + Sync {
    /// Fetch the encoded bytes behind a public URL.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, CollabError>> + Send;
}

pub trait LocationProvider: Send + Sync {
    /// One-shot fix. `Ok(None)` when no fix is available (e.g. permission denied).
    fn current_location(
        &self,
    ) -> impl Future<Output = Result<Option<Coordinates>, CollabError>> + Send;
}
