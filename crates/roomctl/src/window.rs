//! Presentation visibility state machine.
//!
//! ```text
//! Hidden --show--> Shown --hide/timeout--> PendingCleanup --timeout--> Hidden
//!                    ^                           |
//!                    +-----------show------------+
//! ```
//!
//! Devices stay loaded while a hide is pending, so showing again within the
//! cleanup delay reuses them without a new scan.

use std::time::Duration;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTimers {
    /// Auto-hide delay after a show. `None` keeps the presentation up.
    pub auto_hide: Option<Duration>,

    /// Auto-hide delay after the last interaction.
    pub interaction_hide: Duration,

    /// Delay between hiding and dropping the loaded devices.
    pub cleanup: Duration,
}

impl Default for WindowTimers {
    fn default() -> Self {
        Self {
            auto_hide: Some(Duration::from_secs(20)),
            interaction_hide: Duration::from_secs(10),
            cleanup: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowVisibility {
    #[default]
    Hidden,
    Shown {
        hide_at: Option<Instant>,
    },
    PendingCleanup {
        cleanup_at: Instant,
    },
}

/// What a show did to the loaded devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowEffect {
    /// Nothing was loaded; a scan is needed.
    Fresh,

    /// A pending cleanup was cancelled; loaded devices can be reused.
    CleanupCancelled,

    /// Already visible; the hide deadline was restarted.
    Restarted,
}

/// Change made by [`WindowVisibility::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The presentation was hidden by its timer.
    AutoHidden,

    /// Loaded devices should be dropped.
    Cleanup,
}

impl WindowVisibility {
    pub fn is_visible(&self) -> bool {
        matches!(self, WindowVisibility::Shown { .. })
    }

    pub fn show(&mut self, now: Instant, timers: &WindowTimers) -> ShowEffect {
        let effect = match self {
            WindowVisibility::Hidden => ShowEffect::Fresh,
            WindowVisibility::PendingCleanup { .. } => ShowEffect::CleanupCancelled,
            WindowVisibility::Shown { .. } => ShowEffect::Restarted,
        };

        *self = WindowVisibility::Shown {
            hide_at: timers.auto_hide.map(|d| now + d),
        };
        effect
    }

    /// Input while shown pushes the hide deadline out to the interaction
    /// delay. Ignored otherwise, and when auto-hide is disabled.
    pub fn interact(&mut self, now: Instant, timers: &WindowTimers) {
        if let WindowVisibility::Shown {
            hide_at: Some(hide_at),
        } = self
        {
            *hide_at = now + timers.interaction_hide;
        }
    }

    /// Hide now. With devices loaded the cleanup timer starts, otherwise the
    /// state goes straight back to `Hidden`.
    pub fn hide(&mut self, now: Instant, timers: &WindowTimers, has_devices: bool) {
        if !self.is_visible() {
            return;
        }

        *self = if has_devices {
            WindowVisibility::PendingCleanup {
                cleanup_at: now + timers.cleanup,
            }
        } else {
            WindowVisibility::Hidden
        };
    }

    /// Fire whichever deadline has passed.
    pub fn tick(&mut self, now: Instant, timers: &WindowTimers, has_devices: bool) -> Option<Expiry> {
        match *self {
            WindowVisibility::Shown {
                hide_at: Some(hide_at),
            } if now >= hide_at => {
                self.hide(now, timers, has_devices);
                Some(Expiry::AutoHidden)
            }
            WindowVisibility::PendingCleanup { cleanup_at } if now >= cleanup_at => {
                *self = WindowVisibility::Hidden;
                Some(Expiry::Cleanup)
            }
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match *self {
            WindowVisibility::Shown { hide_at } => hide_at,
            WindowVisibility::PendingCleanup { cleanup_at } => Some(cleanup_at),
            WindowVisibility::Hidden => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_full_cycle() {
        let timers = WindowTimers::default();
        let t0 = Instant::now();
        let mut window = WindowVisibility::default();

        assert_eq!(window.show(t0, &timers), ShowEffect::Fresh);
        assert_eq!(window.tick(t0 + secs(19), &timers, true), None);
        assert_eq!(
            window.tick(t0 + secs(20), &timers, true),
            Some(Expiry::AutoHidden)
        );
        assert_eq!(
            window,
            WindowVisibility::PendingCleanup {
                cleanup_at: t0 + secs(30)
            }
        );
        assert_eq!(window.tick(t0 + secs(29), &timers, true), None);
        assert_eq!(window.tick(t0 + secs(30), &timers, true), Some(Expiry::Cleanup));
        assert_eq!(window, WindowVisibility::Hidden);
    }

    #[test]
    fn test_reshow_cancels_cleanup() {
        let timers = WindowTimers::default();
        let t0 = Instant::now();
        let mut window = WindowVisibility::default();

        window.show(t0, &timers);
        window.hide(t0 + secs(5), &timers, true);
        assert_eq!(
            window.show(t0 + secs(8), &timers),
            ShowEffect::CleanupCancelled
        );
        assert_eq!(window.tick(t0 + secs(15), &timers, true), None);
        assert!(window.is_visible());
    }

    #[test]
    fn test_interaction_extends_deadline() {
        let timers = WindowTimers::default();
        let t0 = Instant::now();
        let mut window = WindowVisibility::default();

        window.show(t0, &timers);
        window.interact(t0 + secs(15), &timers);
        assert_eq!(window.next_deadline(), Some(t0 + secs(25)));
        assert_eq!(window.tick(t0 + secs(20), &timers, false), None);
        assert_eq!(
            window.tick(t0 + secs(25), &timers, false),
            Some(Expiry::AutoHidden)
        );
        // Nothing loaded, so no cleanup phase
        assert_eq!(window, WindowVisibility::Hidden);
    }

    #[test]
    fn test_hide_while_hidden_is_noop() {
        let timers = WindowTimers::default();
        let mut window = WindowVisibility::default();
        window.hide(Instant::now(), &timers, true);
        assert_eq!(window, WindowVisibility::Hidden);
        window.interact(Instant::now(), &timers);
        assert_eq!(window, WindowVisibility::Hidden);
    }

    #[test]
    fn test_without_auto_hide() {
        let timers = WindowTimers {
            auto_hide: None,
            ..Default::default()
        };
        let t0 = Instant::now();
        let mut window = WindowVisibility::default();

        window.show(t0, &timers);
        window.interact(t0, &timers);
        assert_eq!(window.next_deadline(), None);
        assert_eq!(window.tick(t0 + secs(3600), &timers, true), None);
        assert!(window.is_visible());
    }
}
