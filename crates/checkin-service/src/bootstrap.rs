//! Opening a check-in session: everything that happens before the first
//! camera frame is evaluated.

use std::time::Instant;

use checkin_core::{
    BlobStore, FaceEmbedder, FaceLocator, Group, LocationProvider, PipelineConfig, Profile,
    RemoteStore, SessionError, VerificationOrchestrator,
};

/// A session whose reference embedding is ready.
pub struct OpenedSession<D> {
    pub profile: Profile,
    pub group: Option<Group>,
    pub orchestrator: VerificationOrchestrator<D>,
}

/// Load the signed-in user's profile and group, run the geofence check,
/// then compute the reference embedding from the enrollment photo.
///
/// A failed geofence check does not abort the session; it can be retried
/// later. Any other failure does. The first liveness step starts at `now`.
#[allow(clippy::too_many_arguments)]
pub async fn open_session<S, B, L, D>(
    user_id: Option<&str>,
    store: &S,
    blobs: &B,
    location: &L,
    detector: D,
    embedder: FaceEmbedder,
    config: PipelineConfig,
    now: Instant,
) -> Result<OpenedSession<D>, SessionError>
where
    S: RemoteStore,
    B: BlobStore,
    L: LocationProvider,
    D: FaceLocator,
{
    let user_id = user_id
        .filter(|id| !id.is_empty())
        .ok_or(SessionError::NotSignedIn)?;

    let profile = store
        .profile(user_id)
        .await?
        .ok_or_else(|| SessionError::ProfileNotFound(user_id.to_string()))?;

    let group = match profile.group_id.as_deref() {
        Some(group_id) => {
            let group = store.group(group_id).await?;
            if group.is_none() {
                tracing::warn!(user = %user_id, group = %group_id, "assigned group not found");
            }
            group
        }
        None => None,
    };

    let mut orchestrator = VerificationOrchestrator::new(detector, embedder, config, now);

    match &group {
        Some(group) => {
            orchestrator.retry_location(group, location).await;
        }
        None => tracing::warn!(user = %user_id, "no group assigned, location stays unverified"),
    }

    let image_url = profile
        .image_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or(SessionError::NoProfileImage)?;

    let photo = blobs.fetch(image_url).await?;
    orchestrator.load_reference(&photo, now).await?;

    tracing::info!(
        user = %user_id,
        location_verified = orchestrator.session().is_location_verified(),
        "check-in session ready"
    );

    Ok(OpenedSession {
        profile,
        group,
        orchestrator,
    })
}
