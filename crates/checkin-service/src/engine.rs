use std::sync::{Arc, Mutex, MutexGuard};

use checkin_core::session::check_location;
use checkin_core::{
    FaceLocator, Frame, Group, LocationProvider, LocationStatus, SessionSnapshot, SessionState,
    VerificationOrchestrator,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Notify};

use crate::attendance::{AttendanceError, SubmitGate};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to build engine runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the host to the engine thread.
enum EngineRequest {
    SetLocation(LocationStatus),
    Claim {
        reply: oneshot::Sender<Result<(), AttendanceError>>,
    },
    Release {
        written: bool,
        reply: oneshot::Sender<()>,
    },
}

/// Holds at most one pending frame. A newer frame replaces, and thereby
/// releases, an older one the engine has not picked up yet.
#[derive(Default)]
struct FrameSlot {
    latest: Mutex<Option<Frame>>,
    ready: Notify,
}

impl FrameSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns whether an unprocessed frame was displaced.
    fn put(&self, frame: Frame) -> bool {
        let displaced = self.lock().replace(frame);
        self.ready.notify_one();
        displaced.is_some()
    }

    fn take(&self) -> Option<Frame> {
        self.lock().take()
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    slot: Arc<FrameSlot>,
    status: watch::Receiver<SessionSnapshot>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl EngineHandle {
    /// Hand a camera frame to the engine. Never blocks on processing.
    pub fn submit_frame(&self, frame: Frame) -> Result<(), EngineError> {
        if self.tx.is_closed() || *self.shutdown.borrow() {
            // Dropping the frame releases it.
            return Err(EngineError::ChannelClosed);
        }
        if self.slot.put(frame) {
            tracing::trace!("unprocessed frame replaced");
        }
        Ok(())
    }

    /// Latest published session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver that is notified after every processed frame or state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.clone()
    }

    /// Re-run the geofence check and hand the result to the engine.
    pub async fn retry_location<L: LocationProvider>(
        &self,
        group: &Group,
        provider: &L,
    ) -> Result<LocationStatus, EngineError> {
        let status = check_location(group, provider).await;
        self.tx
            .send(EngineRequest::SetLocation(status.clone()))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(status)
    }

    /// Stop the engine. A frame being processed is abandoned; detector,
    /// embedder and any pending frame are dropped when the thread exits.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait until the engine thread has exited.
    pub async fn closed(&self) {
        let mut status = self.status.clone();
        while status.changed().await.is_ok() {}
    }
}

impl SubmitGate for EngineHandle {
    async fn claim(&self) -> Result<(), AttendanceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Claim { reply })
            .await
            .map_err(|_| AttendanceError::EngineClosed)?;
        rx.await.map_err(|_| AttendanceError::EngineClosed)?
    }

    async fn release(&self, written: bool) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(EngineRequest::Release { written, reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Spawn the engine on a dedicated OS thread with its own single-threaded
/// runtime. Frames are processed one at a time, newest first; the session
/// state is published after each one.
pub fn spawn_engine<D>(orchestrator: VerificationOrchestrator<D>) -> Result<EngineHandle, EngineError>
where
    D: FaceLocator + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(EngineError::Runtime)?;

    let (tx, rx) = mpsc::channel::<EngineRequest>(4);
    let (status_tx, status_rx) = watch::channel(orchestrator.snapshot());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let slot = Arc::new(FrameSlot::default());

    let engine_slot = Arc::clone(&slot);
    std::thread::Builder::new()
        .name("checkin-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            runtime.block_on(run(orchestrator, rx, engine_slot, status_tx, shutdown_rx));
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        slot,
        status: status_rx,
        shutdown: Arc::new(shutdown_tx),
    })
}

async fn run<D: FaceLocator>(
    mut orchestrator: VerificationOrchestrator<D>,
    mut rx: mpsc::Receiver<EngineRequest>,
    slot: Arc<FrameSlot>,
    status: watch::Sender<SessionSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut submitting = false;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            req = rx.recv() => {
                let Some(req) = req else { break };
                handle_request(&mut orchestrator, req, &mut submitting);
                status.send_replace(orchestrator.snapshot());
            }

            _ = slot.ready.notified() => {
                let Some(frame) = slot.take() else { continue };
                tokio::select! {
                    outcome = orchestrator.process_frame(frame) => {
                        tracing::trace!(?outcome, "engine frame done");
                    }
                    _ = shutdown.changed() => {
                        tracing::debug!("shutdown during frame processing");
                        break;
                    }
                }
                status.send_replace(orchestrator.snapshot());
            }
        }
    }

    // Release a frame that arrived after the last pickup.
    drop(slot.take());
    // Detector and embedder are gone before `status` closes and wakes `closed()`.
    drop(orchestrator);
}

fn handle_request<D: FaceLocator>(
    orchestrator: &mut VerificationOrchestrator<D>,
    req: EngineRequest,
    submitting: &mut bool,
) {
    match req {
        EngineRequest::SetLocation(location) => {
            tracing::debug!(%location, "location updated");
            orchestrator.session_mut().set_location(location);
        }
        EngineRequest::Claim { reply } => {
            let session = orchestrator.session();
            let result = if session.state() == SessionState::Submitted {
                Err(AttendanceError::AlreadySubmitted)
            } else if *submitting {
                Err(AttendanceError::InProgress)
            } else if !session.can_submit() {
                Err(AttendanceError::NotVerified {
                    face_verified: session.is_face_verified(),
                    location_verified: session.is_location_verified(),
                })
            } else {
                *submitting = true;
                Ok(())
            };
            let _ = reply.send(result);
        }
        EngineRequest::Release { written, reply } => {
            *submitting = false;
            if written {
                orchestrator.session_mut().mark_submitted();
            }
            let _ = reply.send(());
        }
    }
}
