//! Display, progress and cancellation sink of a render session.

use tessel_core::{Rect, RenderResult, RenderStats};

/// Lifecycle events fired around a frame or animation render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderEvent {
    Pre,
    Post,
    Cancel,
    Complete,
}

/// Everything a render reports back to its host. All methods default to
/// no-ops so implementors only override what they display.
///
/// Callbacks are only invoked from the thread driving the render, never
/// from tile workers.
pub trait RenderCallbacks: Send + Sync {
    /// A new result exists; size display buffers from it.
    fn display_init(&self, _result: &RenderResult) {}

    fn display_clear(&self, _result: &RenderResult) {}

    /// Pixels changed. `result` is either a finished part or the frame
    /// result; `rect` limits the update when set.
    fn display_draw(&self, _result: &RenderResult, _rect: Option<Rect>, _view: usize) {}

    fn stats_draw(&self, _stats: &RenderStats) {}

    fn progress(&self, _fraction: f32) {}

    /// Scene data is being converted; hosts should not touch it.
    fn draw_lock(&self, _locked: bool) {}

    /// Polled between units of work. Returning true cancels the render.
    fn test_break(&self) -> bool {
        false
    }

    fn on_event(&self, _event: RenderEvent) {}
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallbacks;

impl RenderCallbacks for NullCallbacks {}

/// Sink for headless renders: stats lines go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackgroundCallbacks;

impl RenderCallbacks for BackgroundCallbacks {
    fn stats_draw(&self, stats: &RenderStats) {
        tracing::info!("{}", stats);
    }

    fn on_event(&self, event: RenderEvent) {
        tracing::debug!("render event {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_callbacks_never_break() {
        let cb = NullCallbacks;
        cb.progress(0.5);
        cb.display_draw(&RenderResult::empty(1, 1), None, 0);
        assert!(!cb.test_break());
    }

    #[test]
    fn test_background_callbacks_are_object_safe() {
        let cb: Box<dyn RenderCallbacks> = Box::new(BackgroundCallbacks);
        cb.stats_draw(&RenderStats::default());
        assert!(!cb.test_break());
    }
}
