//! The render actor: a single task that owns the scheduler, the document
//! handle and the draw surface, and is the only place render state changes.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::error::RenderError;
use crate::geometry::{layout_page, PixelSize};
use crate::scheduler::{Effect, RenderScheduler, SchedulerState, SettleKind};
use crate::{DocumentBackend, Frame, RenderRequest, SharedSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayedFrame {
    pub page: usize,
    pub backing: PixelSize,
    pub displayed: PixelSize,
}

/// Snapshot published after every message the actor handles.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceStatus {
    pub state: SchedulerState,
    pub displayed: Option<DisplayedFrame>,
    pub failures: u64,
    /// Number of render requests the actor has taken in so far.
    pub accepted: u64,
}

impl SurfaceStatus {
    fn initial() -> Self {
        Self {
            state: SchedulerState::Idle,
            displayed: None,
            failures: 0,
            accepted: 0,
        }
    }

    pub fn is_rendered(&self) -> bool {
        self.displayed.is_some()
    }
}

enum Message {
    Render(RenderRequest),
    /// The surface lost its contents; the displayed frame no longer counts.
    Repaint(RenderRequest),
    Settled {
        attempt: u64,
        outcome: Result<Frame, RenderError>,
    },
    Shutdown,
}

struct InFlight {
    attempt: u64,
    token: CancelToken,
}

pub struct RenderActorHandle {
    tx: mpsc::UnboundedSender<Message>,
    status: watch::Receiver<SurfaceStatus>,
    surface: SharedSurface,
    lifetime: CancelToken,
    sent: u64,
    task: Option<JoinHandle<()>>,
}

impl RenderActorHandle {
    /// Spawns the actor on the current tokio runtime.
    pub fn spawn(
        backend: Arc<dyn DocumentBackend>,
        surface: SharedSurface,
        max_scale: f32,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SurfaceStatus::initial());
        let lifetime = CancelToken::new();
        let actor = RenderActor {
            backend,
            surface: Arc::clone(&surface),
            lifetime: lifetime.clone(),
            scheduler: RenderScheduler::new(),
            max_scale,
            tx: tx.clone(),
            status: status_tx,
            in_flight: None,
            next_attempt: 0,
            displayed: None,
            failures: 0,
            accepted: 0,
        };
        let task = tokio::spawn(actor.run(rx));
        Self {
            tx,
            status,
            surface,
            lifetime,
            sent: 0,
            task: Some(task),
        }
    }

    /// Fire-and-forget. The outcome shows up on the surface and in [`status`](Self::status).
    pub fn request_render(&mut self, request: RenderRequest) {
        if self.tx.send(Message::Render(request)).is_ok() {
            self.sent += 1;
        }
    }

    /// Like [`request_render`](Self::request_render), but renders even when
    /// `request` matches the frame last presented. Use after the host has
    /// wiped or moved the surface.
    pub fn repaint(&mut self, request: RenderRequest) {
        if self.tx.send(Message::Repaint(request)).is_ok() {
            self.sent += 1;
        }
    }

    pub fn status(&self) -> SurfaceStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SurfaceStatus> {
        self.status.clone()
    }

    /// Waits until every request sent so far has been taken in and nothing
    /// is rendering. Returns `None` if the actor is gone.
    pub async fn settled(&self) -> Option<SurfaceStatus> {
        let sent = self.sent;
        let mut status = self.status.clone();
        let result = status
            .wait_for(|s| s.accepted >= sent && s.state == SchedulerState::Idle)
            .await
            .ok()
            .map(|s| s.clone());
        result
    }

    /// Stops the actor. No frame is presented after this returns.
    pub fn detach(&mut self) {
        {
            let _surface = self.surface.lock();
            self.lifetime.cancel();
        }
        let _ = self.tx.send(Message::Shutdown);
    }

    pub async fn shutdown(mut self) {
        self.detach();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(?err, "render actor ended abnormally");
            }
        }
    }
}

impl Drop for RenderActorHandle {
    fn drop(&mut self) {
        if !self.lifetime.is_cancelled() {
            self.detach();
        }
    }
}

struct RenderActor {
    backend: Arc<dyn DocumentBackend>,
    surface: SharedSurface,
    lifetime: CancelToken,
    scheduler: RenderScheduler,
    max_scale: f32,
    tx: mpsc::UnboundedSender<Message>,
    status: watch::Sender<SurfaceStatus>,
    in_flight: Option<InFlight>,
    next_attempt: u64,
    displayed: Option<DisplayedFrame>,
    failures: u64,
    accepted: u64,
}

impl RenderActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Render(request) => {
                    self.accepted += 1;
                    let effects = self.scheduler.request(request);
                    self.apply(effects);
                }
                Message::Repaint(request) => {
                    self.accepted += 1;
                    self.scheduler.forget_displayed();
                    self.displayed = None;
                    let effects = self.scheduler.request(request);
                    self.apply(effects);
                }
                Message::Settled { attempt, outcome } => {
                    let Some(in_flight) = self.take_in_flight(attempt) else {
                        debug!(attempt, "ignoring settle for stale render attempt");
                        continue;
                    };
                    let kind = self.finish(outcome, &in_flight.token);
                    let effects = self.scheduler.settled(kind);
                    self.apply(effects);
                }
                Message::Shutdown => {
                    if let Some(in_flight) = self.in_flight.take() {
                        in_flight.token.cancel();
                    }
                    debug!(source = %self.backend.info().source, "render actor stopped");
                    break;
                }
            }
            self.publish();
        }
    }

    fn take_in_flight(&mut self, attempt: u64) -> Option<InFlight> {
        if self.in_flight.as_ref().map(|f| f.attempt) == Some(attempt) {
            self.in_flight.take()
        } else {
            None
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartRender(request) => self.start(request),
                Effect::CancelInFlight => {
                    if let Some(in_flight) = &self.in_flight {
                        in_flight.token.cancel();
                    }
                }
            }
        }
    }

    fn start(&mut self, request: RenderRequest) {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let token = CancelToken::new();
        self.in_flight = Some(InFlight {
            attempt,
            token: token.clone(),
        });

        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let max_scale = self.max_scale;
        tokio::spawn(async move {
            let outcome = render_attempt(backend.as_ref(), request, max_scale, &token).await;
            let _ = tx.send(Message::Settled { attempt, outcome });
        });
    }

    fn finish(&mut self, outcome: Result<Frame, RenderError>, token: &CancelToken) -> SettleKind {
        match outcome {
            Ok(frame) if token.is_cancelled() => {
                debug!(page = frame.request.page, "dropping superseded frame");
                SettleKind::Cancelled
            }
            Ok(frame) => {
                let mut surface = self.surface.lock();
                if self.lifetime.is_cancelled() {
                    return SettleKind::Cancelled;
                }
                match surface.present(&frame) {
                    Ok(()) => {
                        self.displayed = Some(DisplayedFrame {
                            page: frame.request.page,
                            backing: frame.geometry.backing,
                            displayed: frame.geometry.displayed,
                        });
                        SettleKind::Completed
                    }
                    Err(err) => {
                        warn!(page = frame.request.page, ?err, "failed to present frame");
                        self.failures += 1;
                        SettleKind::Failed
                    }
                }
            }
            Err(RenderError::Cancelled) => SettleKind::Cancelled,
            Err(err) => {
                warn!(%err, "render attempt failed");
                self.failures += 1;
                SettleKind::Failed
            }
        }
    }

    fn publish(&self) {
        let status = SurfaceStatus {
            state: self.scheduler.state().clone(),
            displayed: self.displayed,
            failures: self.failures,
            accepted: self.accepted,
        };
        self.status.send_replace(status);
    }
}

#[instrument(skip(backend, token), fields(page = request.page))]
async fn render_attempt(
    backend: &dyn DocumentBackend,
    request: RenderRequest,
    max_scale: f32,
    token: &CancelToken,
) -> Result<Frame, RenderError> {
    if token.is_cancelled() {
        return Err(RenderError::Cancelled);
    }
    let page_count = backend.info().page_count;
    if request.page == 0 || request.page > page_count {
        return Err(RenderError::PageOutOfRange {
            page: request.page,
            page_count,
        });
    }

    let natural = backend.page_size(request.page).await?;
    let geometry = layout_page(&request, natural, max_scale);
    if token.is_cancelled() {
        return Err(RenderError::Cancelled);
    }

    let image = backend
        .render_page(request.page, geometry.backing, token)
        .await?;
    Ok(Frame {
        request,
        geometry,
        image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::shared_surface;
    use crate::testing::{FakeBackend, RecordingSurface};

    fn req(page: usize) -> RenderRequest {
        RenderRequest {
            page,
            container_width_px: 632.0,
            device_pixel_ratio: 2.0,
            padding_px: 32.0,
        }
    }

    async fn wait_until_rendering(handle: &RenderActorHandle) {
        let mut status = handle.subscribe();
        tokio::time::timeout(
            Duration::from_secs(1),
            status.wait_for(|s| !matches!(s.state, SchedulerState::Idle)),
        )
        .await
        .expect("render started")
        .unwrap();
    }

    async fn settle(handle: &RenderActorHandle) -> SurfaceStatus {
        tokio::time::timeout(Duration::from_secs(2), handle.settled())
            .await
            .expect("actor settled")
            .expect("actor alive")
    }

    #[tokio::test]
    async fn renders_and_presents_requested_page() {
        let backend = Arc::new(FakeBackend::new(5));
        let surface = RecordingSurface::default();
        let mut handle =
            RenderActorHandle::spawn(backend.clone(), shared_surface(surface.clone()), 2.5);

        handle.request_render(req(2));
        let status = settle(&handle).await;

        assert_eq!(surface.pages(), vec![2]);
        let displayed = status.displayed.unwrap();
        assert_eq!(displayed.page, 2);
        assert_eq!(
            displayed.displayed,
            PixelSize {
                width: 600,
                height: 450
            }
        );
        assert_eq!(
            displayed.backing,
            PixelSize {
                width: 1200,
                height: 900
            }
        );
    }

    #[tokio::test]
    async fn burst_of_requests_converges_on_last_page() {
        let backend = Arc::new(FakeBackend::gated(10));
        let surface = RecordingSurface::default();
        let mut handle =
            RenderActorHandle::spawn(backend.clone(), shared_surface(surface.clone()), 2.5);

        handle.request_render(req(1));
        wait_until_rendering(&handle).await;
        for page in 2..=6 {
            handle.request_render(req(page));
        }
        // Page 1 is cancelled; page 6 is the only one that should start next.
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.release();
        let status = settle(&handle).await;

        assert_eq!(surface.pages(), vec![6]);
        assert_eq!(backend.calls(), vec![1, 6]);
        assert_eq!(status.displayed.map(|d| d.page), Some(6));
    }

    #[tokio::test]
    async fn never_more_than_one_rasterization_in_flight() {
        let backend = Arc::new(FakeBackend::new(50));
        let surface = RecordingSurface::default();
        let mut handle =
            RenderActorHandle::spawn(backend.clone(), shared_surface(surface.clone()), 2.5);

        for page in 1..=50 {
            handle.request_render(req(page));
            if page % 7 == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
        settle(&handle).await;

        assert_eq!(backend.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(surface.pages().last(), Some(&50));
    }

    #[tokio::test]
    async fn render_failure_keeps_actor_usable() {
        let backend = Arc::new(FakeBackend::new(5));
        backend.failing_pages.lock().push(3);
        let surface = RecordingSurface::default();
        let mut handle =
            RenderActorHandle::spawn(backend.clone(), shared_surface(surface.clone()), 2.5);

        handle.request_render(req(2));
        settle(&handle).await;
        handle.request_render(req(3));
        let status = settle(&handle).await;
        assert_eq!(status.failures, 1);
        assert_eq!(status.displayed.map(|d| d.page), Some(2));

        handle.request_render(req(4));
        let status = settle(&handle).await;
        assert_eq!(surface.pages(), vec![2, 4]);
        assert_eq!(status.displayed.map(|d| d.page), Some(4));
    }

    #[tokio::test]
    async fn out_of_range_page_is_a_render_failure() {
        let backend = Arc::new(FakeBackend::new(2));
        let surface = RecordingSurface::default();
        let mut handle =
            RenderActorHandle::spawn(backend.clone(), shared_surface(surface.clone()), 2.5);

        handle.request_render(req(9));
        let status = settle(&handle).await;
        assert_eq!(status.failures, 1);
        assert!(surface.pages().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn repeated_request_for_displayed_frame_is_skipped() {
        let backend = Arc::new(FakeBackend::new(3));
        let surface = RecordingSurface::default();
        let mut handle =
            RenderActorHandle::spawn(backend.clone(), shared_surface(surface.clone()), 2.5);

        handle.request_render(req(1));
        settle(&handle).await;
        handle.request_render(req(1));
        settle(&handle).await;

        assert_eq!(backend.calls(), vec![1]);
        assert_eq!(surface.pages(), vec![1]);
    }

    #[tokio::test]
    async fn repaint_presents_displayed_frame_again() {
        let backend = Arc::new(FakeBackend::new(3));
        let surface = RecordingSurface::default();
        let mut handle =
            RenderActorHandle::spawn(backend.clone(), shared_surface(surface.clone()), 2.5);

        handle.request_render(req(2));
        settle(&handle).await;
        handle.repaint(req(2));
        let status = settle(&handle).await;

        assert_eq!(backend.calls(), vec![2, 2]);
        assert_eq!(surface.pages(), vec![2, 2]);
        assert_eq!(status.displayed.map(|d| d.page), Some(2));
    }

    #[tokio::test]
    async fn same_page_at_new_width_replaces_in_flight_render() {
        let backend = Arc::new(FakeBackend::gated(3));
        let surface = RecordingSurface::default();
        let mut handle =
            RenderActorHandle::spawn(backend.clone(), shared_surface(surface.clone()), 2.5);

        handle.request_render(req(1));
        wait_until_rendering(&handle).await;
        handle.request_render(RenderRequest {
            container_width_px: 932.0,
            ..req(1)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.release();
        settle(&handle).await;

        assert_eq!(backend.calls(), vec![1, 1]);
        let presented = surface.presented.lock().clone();
        assert_eq!(presented.len(), 1);
        assert_eq!(presented[0].page, 1);
        assert_eq!(presented[0].container_width_px, 932.0);
    }

    #[tokio::test]
    async fn detached_actor_never_presents() {
        let backend = Arc::new(FakeBackend::gated(3));
        let surface = RecordingSurface::default();
        let mut handle =
            RenderActorHandle::spawn(backend.clone(), shared_surface(surface.clone()), 2.5);

        handle.request_render(req(1));
        wait_until_rendering(&handle).await;
        handle.detach();
        backend.release();
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();

        assert!(surface.pages().is_empty());
    }
}
