//! Render scheduling state machine.
//!
//! At most one render is in flight. A request that arrives while a render is
//! running cancels it and waits in a single pending slot; later requests
//! overwrite that slot, so only the most recent one ever runs. The pending
//! request starts only after the in-flight render has settled.

use crate::RenderRequest;

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerState {
    Idle,
    Rendering {
        active: RenderRequest,
    },
    Superseding {
        active: RenderRequest,
        pending: RenderRequest,
    },
}

/// How an in-flight render ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleKind {
    /// Finished and was presented.
    Completed,
    Cancelled,
    Failed,
}

/// Work the owner of the scheduler has to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartRender(RenderRequest),
    CancelInFlight,
}

#[derive(Debug)]
pub struct RenderScheduler {
    state: SchedulerState,
    displayed: Option<RenderRequest>,
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderScheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            displayed: None,
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, SchedulerState::Idle)
    }

    /// Request whose frame is currently on the surface.
    pub fn displayed(&self) -> Option<&RenderRequest> {
        self.displayed.as_ref()
    }

    pub fn in_flight(&self) -> Option<&RenderRequest> {
        match &self.state {
            SchedulerState::Idle => None,
            SchedulerState::Rendering { active } | SchedulerState::Superseding { active, .. } => {
                Some(active)
            }
        }
    }

    #[must_use]
    pub fn request(&mut self, request: RenderRequest) -> Vec<Effect> {
        match self.state {
            SchedulerState::Idle => {
                if self.displayed.as_ref() == Some(&request) {
                    return vec![];
                }
                self.state = SchedulerState::Rendering { active: request };
                vec![Effect::StartRender(request)]
            }
            SchedulerState::Rendering { active } => {
                if active == request {
                    return vec![];
                }
                self.state = SchedulerState::Superseding {
                    active,
                    pending: request,
                };
                vec![Effect::CancelInFlight]
            }
            SchedulerState::Superseding {
                ref mut pending, ..
            } => {
                // The in-flight render is already cancelled, so even a request
                // equal to it has to run again.
                *pending = request;
                vec![]
            }
        }
    }

    /// Records that the in-flight render ended. A settle with nothing in
    /// flight is stale and ignored.
    #[must_use]
    pub fn settled(&mut self, kind: SettleKind) -> Vec<Effect> {
        let (finished, pending) = match std::mem::replace(&mut self.state, SchedulerState::Idle) {
            SchedulerState::Idle => return vec![],
            SchedulerState::Rendering { active } => (active, None),
            SchedulerState::Superseding { active, pending } => (active, Some(pending)),
        };

        if kind == SettleKind::Completed {
            self.displayed = Some(finished);
        }

        match pending {
            Some(next) => {
                self.state = SchedulerState::Rendering { active: next };
                vec![Effect::StartRender(next)]
            }
            None => vec![],
        }
    }

    /// Forgets what is on the surface, e.g. after the surface was cleared.
    pub fn forget_displayed(&mut self) {
        self.displayed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(page: usize) -> RenderRequest {
        RenderRequest {
            page,
            container_width_px: 1000.0,
            device_pixel_ratio: 1.0,
            padding_px: 32.0,
        }
    }

    #[test]
    fn idle_request_starts_immediately() {
        let mut scheduler = RenderScheduler::new();
        assert_eq!(scheduler.request(req(1)), vec![Effect::StartRender(req(1))]);
        assert_eq!(
            scheduler.state(),
            &SchedulerState::Rendering { active: req(1) }
        );
    }

    #[test]
    fn request_while_rendering_cancels_and_waits() {
        let mut scheduler = RenderScheduler::new();
        let _ = scheduler.request(req(1));
        assert_eq!(scheduler.request(req(2)), vec![Effect::CancelInFlight]);
        assert_eq!(
            scheduler.state(),
            &SchedulerState::Superseding {
                active: req(1),
                pending: req(2)
            }
        );
    }

    #[test]
    fn pending_slot_is_last_write_wins() {
        let mut scheduler = RenderScheduler::new();
        let _ = scheduler.request(req(1));
        let _ = scheduler.request(req(2));
        assert!(scheduler.request(req(3)).is_empty());
        assert!(scheduler.request(req(4)).is_empty());

        let effects = scheduler.settled(SettleKind::Cancelled);
        assert_eq!(effects, vec![Effect::StartRender(req(4))]);
        assert_eq!(scheduler.in_flight(), Some(&req(4)));

        assert!(scheduler.settled(SettleKind::Completed).is_empty());
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.displayed(), Some(&req(4)));
    }

    #[test]
    fn duplicate_of_in_flight_request_is_dropped() {
        let mut scheduler = RenderScheduler::new();
        let _ = scheduler.request(req(1));
        assert!(scheduler.request(req(1)).is_empty());
        assert_eq!(
            scheduler.state(),
            &SchedulerState::Rendering { active: req(1) }
        );
    }

    #[test]
    fn returning_to_cancelled_page_renders_it_again() {
        let mut scheduler = RenderScheduler::new();
        let _ = scheduler.request(req(1));
        let _ = scheduler.request(req(2));
        let _ = scheduler.request(req(1));
        assert_eq!(
            scheduler.settled(SettleKind::Cancelled),
            vec![Effect::StartRender(req(1))]
        );
    }

    #[test]
    fn redundant_request_for_displayed_page_is_skipped() {
        let mut scheduler = RenderScheduler::new();
        let _ = scheduler.request(req(1));
        let _ = scheduler.settled(SettleKind::Completed);
        assert!(scheduler.request(req(1)).is_empty());

        let wider = RenderRequest {
            container_width_px: 1200.0,
            ..req(1)
        };
        assert_eq!(scheduler.request(wider), vec![Effect::StartRender(wider)]);
    }

    #[test]
    fn failure_keeps_previous_display_and_runs_pending() {
        let mut scheduler = RenderScheduler::new();
        let _ = scheduler.request(req(1));
        let _ = scheduler.settled(SettleKind::Completed);
        let _ = scheduler.request(req(2));
        let _ = scheduler.request(req(3));

        assert_eq!(
            scheduler.settled(SettleKind::Failed),
            vec![Effect::StartRender(req(3))]
        );
        assert_eq!(scheduler.displayed(), Some(&req(1)));
    }

    #[test]
    fn cancellation_does_not_touch_display() {
        let mut scheduler = RenderScheduler::new();
        let _ = scheduler.request(req(1));
        let _ = scheduler.settled(SettleKind::Completed);
        let _ = scheduler.request(req(2));
        assert!(scheduler.settled(SettleKind::Cancelled).is_empty());
        assert_eq!(scheduler.displayed(), Some(&req(1)));
        assert!(scheduler.is_idle());
    }

    #[test]
    fn stale_settle_is_a_no_op() {
        let mut scheduler = RenderScheduler::new();
        let _ = scheduler.request(req(1));
        let _ = scheduler.settled(SettleKind::Completed);

        assert!(scheduler.settled(SettleKind::Cancelled).is_empty());
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.displayed(), Some(&req(1)));
    }

    #[test]
    fn forget_displayed_allows_rerender() {
        let mut scheduler = RenderScheduler::new();
        let _ = scheduler.request(req(1));
        let _ = scheduler.settled(SettleKind::Completed);
        scheduler.forget_displayed();
        assert_eq!(scheduler.request(req(1)), vec![Effect::StartRender(req(1))]);
    }
}
