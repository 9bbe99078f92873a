//! Scripted fakes for the pipeline's ports.
//!
//! Compiled for this crate's tests and, behind the `test-util` feature, for
//! downstream crates' tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array4;

use crate::collab::{BlobStore, CollabError, LocationProvider, RemoteStore};
use crate::detector::{DetectorError, DetectorInput, FaceLocator};
use crate::embedder::{EmbedderError, EmbeddingModel};
use crate::geofence::Coordinates;
use crate::records::{AttendanceRecord, Group, Profile};
use crate::types::FaceObservation;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Detector that replays queued results, one per call.
///
/// An empty queue answers "no faces".
#[derive(Default)]
pub struct ScriptedLocator {
    script: Mutex<VecDeque<Result<Vec<FaceObservation>, String>>>,
    calls: AtomicUsize,
}

impl ScriptedLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_faces(&self, faces: Vec<FaceObservation>) {
        lock(&self.script).push_back(Ok(faces));
    }

    pub fn push_error(&self, message: &str) {
        lock(&self.script).push_back(Err(message.to_string()));
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceLocator for ScriptedLocator {
    fn detect(
        &self,
        _input: DetectorInput<'_>,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, DetectorError>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.script).pop_front();
        async move {
            match next {
                Some(Ok(faces)) => Ok(faces),
                Some(Err(message)) => Err(DetectorError::Failed(message)),
                None => Ok(Vec::new()),
            }
        }
    }
}

/// Embedding model returning canned raw vectors. The last one repeats forever.
pub struct FixedModel {
    queue: VecDeque<Vec<f32>>,
    last: Vec<f32>,
}

impl FixedModel {
    pub fn repeating(raw: Vec<f32>) -> Self {
        Self {
            queue: VecDeque::new(),
            last: raw,
        }
    }

    pub fn sequence(raw: Vec<Vec<f32>>) -> Self {
        Self {
            queue: raw.into(),
            last: Vec::new(),
        }
    }
}

impl EmbeddingModel for FixedModel {
    fn infer(&mut self, _input: Array4<f32>) -> Result<Vec<f32>, EmbedderError> {
        if let Some(next) = self.queue.pop_front() {
            self.last = next;
        }
        if self.last.is_empty() {
            return Err(EmbedderError::InferenceFailed("script exhausted".into()));
        }
        Ok(self.last.clone())
    }
}

/// In-memory [`RemoteStore`].
#[derive(Default)]
pub struct MemoryStore {
    profiles: Mutex<HashMap<String, Profile>>,
    groups: Mutex<HashMap<String, Group>>,
    attendance: Mutex<Vec<(String, AttendanceRecord)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, profile: Profile) -> Self {
        lock(&self.profiles).insert(profile.id.clone(), profile);
        self
    }

    pub fn with_group(self, group: Group) -> Self {
        lock(&self.groups).insert(group.id.clone(), group);
        self
    }

    /// Inserted rows with their ids, in insertion order.
    pub fn attendance(&self) -> Vec<(String, AttendanceRecord)> {
        lock(&self.attendance).clone()
    }
}

impl RemoteStore for MemoryStore {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, CollabError> {
        Ok(lock(&self.profiles).get(user_id).cloned())
    }

    async fn group(&self, group_id: &str) -> Result<Option<Group>, CollabError> {
        Ok(lock(&self.groups).get(group_id).cloned())
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<String, CollabError> {
        let mut rows = lock(&self.attendance);
        let id = format!("att-{}", rows.len() + 1);
        rows.push((id.clone(), record.clone()));
        Ok(id)
    }
}

/// In-memory [`BlobStore`] keyed by URL.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.blobs.insert(url.to_string(), bytes);
        self
    }
}

impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, CollabError> {
        self.blobs.get(url).cloned().ok_or_else(|| CollabError::Blob {
            url: url.to_string(),
            reason: "not found".to_string(),
        })
    }
}

/// Location provider with a settable fix.
#[derive(Default)]
pub struct FixedLocation {
    fix: Mutex<Option<Coordinates>>,
}

impl FixedLocation {
    pub fn at(position: Coordinates) -> Self {
        Self {
            fix: Mutex::new(Some(position)),
        }
    }

    /// No fix available, as when permission is denied.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn set(&self, fix: Option<Coordinates>) {
        *lock(&self.fix) = fix;
    }
}

impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Result<Option<Coordinates>, CollabError> {
        Ok(*lock(&self.fix))
    }
}

/// PNG bytes of a flat grey image, usable as an enrollment photo.
pub fn encoded_photo(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([128, 128, 128]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("PNG encoding of an in-memory image");
    bytes
}
