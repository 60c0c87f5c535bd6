//! Scroll-follow decision
//!
//! Whether the view auto-scrolls with streamed content is decided once,
//! when a turn leaves `Idle`, from where the view is at that moment. The
//! only thing that changes it mid-turn is the user scrolling while content
//! is streaming, which turns following off until the next capture.

use super::turn::TurnPhase;

/// The front end's view of a session's history
#[cfg_attr(test, mockall::automock)]
pub trait Viewport: Send + Sync {
    /// Whether the view for `session_id` is currently scrolled to the bottom
    fn is_at_bottom(&self, session_id: &str) -> bool;
}

/// A viewport that is always at the bottom, as in a plain terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct PinnedViewport;

impl Viewport for PinnedViewport {
    fn is_at_bottom(&self, _session_id: &str) -> bool {
        true
    }
}

/// Captured follow flag for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowState {
    following: bool,
}

impl Default for FollowState {
    fn default() -> Self {
        Self { following: true }
    }
}

impl FollowState {
    /// Capture a fresh value at turn start or on session switch
    pub fn capture(at_bottom: bool) -> Self {
        Self {
            following: at_bottom,
        }
    }

    /// Apply an explicit user scroll
    ///
    /// Only a scroll observed while `Streaming` counts. Returns whether the
    /// flag changed.
    pub fn user_scrolled(&mut self, phase: TurnPhase) -> bool {
        if phase != TurnPhase::Streaming || !self.following {
            return false;
        }
        self.following = false;
        true
    }

    pub fn is_following(&self) -> bool {
        self.following
    }
}
