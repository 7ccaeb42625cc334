// Copyright (C) 2025-2026  John D. Stray <gnome-extensions@johnstray.com>

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License version 3 as published by
// the Free Software Foundation.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

// SPDX-License-Identifier: GPL-3.0-only

//! Manager of the effective caffeination state. Combines the manual toggle
//! and GameMode activity into one boolean, emits `state-changed` only on real
//! transitions, and optionally auto-releases a manual toggle after a
//! configured timeout.

use std::rc::Rc;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::Duration;
use log::{debug, trace};
use timer::{Guard, Timer};

use crate::events::{Emitter, Signal};
use crate::message_queue::MessageQueueSender;

/// Module Event message type
#[derive(Clone, Copy, Debug)]
pub enum CaffeineEvent {
    ManualTimeoutFired,
}

pub struct CaffeineState<Msg: From<CaffeineEvent> + Clone> {
    manual_release_timer: Timer,
    manual_release_guard: Option<Guard>,
    manual_timeout: Option<Duration>,
    is_manual_inhibited: bool,
    is_gamemode_inhibited: bool,
    is_inhibited: bool,
    // mirror of the manual reason, readable from the DBus service thread
    manual_flag: Arc<AtomicBool>,
    signals: Rc<Emitter>,
    mq: MessageQueueSender<Msg>,
}

impl<Msg: From<CaffeineEvent> + Clone + Send + 'static> CaffeineState<Msg> {
    pub fn new(
        manual_timeout: Option<Duration>,
        mq: MessageQueueSender<Msg>,
        manual_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            manual_release_timer: Timer::new(),
            manual_release_guard: None,
            manual_timeout,
            is_manual_inhibited: false,
            is_gamemode_inhibited: false,
            is_inhibited: false,
            manual_flag,
            signals: Rc::new(Emitter::new("CaffeineState")),
            mq,
        }
    }

    pub fn signals(&self) -> Rc<Emitter> {
        Rc::clone(&self.signals)
    }

    pub fn is_inhibited(&self) -> bool {
        self.is_inhibited
    }

    pub fn is_manual_inhibited(&self) -> bool {
        self.is_manual_inhibited
    }

    pub fn toggle_manual(&mut self) {
        self.set_manual(!self.is_manual_inhibited);
    }

    pub fn set_manual(&mut self, is_manual_inhibited: bool) {
        if self.is_manual_inhibited == is_manual_inhibited {
            trace!(target: "CaffeineState::set_manual", "Manual caffeination already {is_manual_inhibited}");
            return;
        }

        self.is_manual_inhibited = is_manual_inhibited;
        self.manual_flag.store(is_manual_inhibited, Ordering::Relaxed);
        debug!(target: "CaffeineState", "Manual caffeination set to: {is_manual_inhibited}");

        if is_manual_inhibited {
            if let Some(manual_timeout) = self.manual_timeout {
                debug!(target: "CaffeineState::set_manual", "Started auto-release timer");
                let mq = self.mq.clone();
                self.manual_release_guard = Some(
                    self.manual_release_timer
                        .schedule_with_delay(manual_timeout, move || {
                            mq.send(CaffeineEvent::ManualTimeoutFired.into()).unwrap();
                        }),
                );
            }
        } else {
            self.manual_release_guard = None;
        }

        self.update_is_inhibited();
    }

    pub fn set_gamemode(&mut self, is_gamemode_inhibited: bool) {
        self.is_gamemode_inhibited = is_gamemode_inhibited;
        self.update_is_inhibited();
    }

    /// Auto-release scheduled by [CaffeineState::set_manual]
    pub fn release_manual_from_timer(&mut self) {
        debug!(target: "CaffeineState", "Manual caffeination timed out");
        self.set_manual(false);
    }

    fn update_is_inhibited(&mut self) {
        let should_inhibit = self.is_manual_inhibited || self.is_gamemode_inhibited;

        if self.is_inhibited == should_inhibit {
            trace!(target: "CaffeineState", "Tried to update 'is_inhibited', but value is the same");
            return;
        }

        self.is_inhibited = should_inhibit;
        self.signals
            .emit("state-changed", &Signal::StateChanged(should_inhibit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::SignalSource;
    use nix::sys::epoll::{Epoll, EpollCreateFlags};
    use std::cell::RefCell;

    #[derive(Clone, Debug)]
    struct TestMsg;

    impl From<CaffeineEvent> for TestMsg {
        fn from(_: CaffeineEvent) -> Self {
            TestMsg
        }
    }

    fn state() -> CaffeineState<TestMsg> {
        state_with_flag().0
    }

    fn state_with_flag() -> (CaffeineState<TestMsg>, Arc<AtomicBool>) {
        let epoll = Epoll::new(EpollCreateFlags::empty()).unwrap();
        let (mq, _mq_receiver) = crate::message_queue::message_queue(&epoll, 0).unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        (CaffeineState::new(None, mq, Arc::clone(&flag)), flag)
    }

    fn watch_edges(state: &CaffeineState<TestMsg>) -> Rc<RefCell<Vec<bool>>> {
        let edges = Rc::new(RefCell::new(Vec::new()));
        state
            .signals()
            .connect("state-changed", {
                let edges = Rc::clone(&edges);
                Rc::new(move |signal| {
                    if let Signal::StateChanged(on) = signal {
                        edges.borrow_mut().push(*on);
                    }
                })
            })
            .unwrap();
        edges
    }

    #[test]
    fn manual_toggle_round_trip_emits_two_edges() {
        let mut state = state();
        let edges = watch_edges(&state);

        state.toggle_manual();
        state.toggle_manual();

        assert_eq!(*edges.borrow(), vec![true, false]);
        assert!(!state.is_inhibited());
    }

    #[test]
    fn repeated_set_manual_is_deduplicated() {
        let mut state = state();
        let edges = watch_edges(&state);

        state.set_manual(true);
        state.set_manual(true);

        assert_eq!(*edges.borrow(), vec![true]);
    }

    #[test]
    fn gamemode_edge_while_manually_caffeinated_is_silent() {
        let mut state = state();
        let edges = watch_edges(&state);

        state.set_manual(true);
        state.set_gamemode(true);
        state.set_gamemode(false);

        assert_eq!(*edges.borrow(), vec![true]);
        assert!(state.is_inhibited());

        state.set_manual(false);
        assert_eq!(*edges.borrow(), vec![true, false]);
    }

    #[test]
    fn timer_release_clears_only_the_manual_reason() {
        let mut state = state();
        let edges = watch_edges(&state);

        state.set_gamemode(true);
        state.set_manual(true);
        state.release_manual_from_timer();

        assert!(state.is_inhibited());
        assert!(!state.is_manual_inhibited());
        assert_eq!(*edges.borrow(), vec![true]);
    }

    #[test]
    fn shared_manual_flag_tracks_the_timer_release() {
        let (mut state, flag) = state_with_flag();

        state.set_manual(true);
        assert!(flag.load(Ordering::Relaxed));

        state.release_manual_from_timer();
        assert!(!flag.load(Ordering::Relaxed));
        assert!(!state.is_manual_inhibited());
    }
}
