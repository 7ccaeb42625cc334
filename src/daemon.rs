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

//! Long-lived daemon object tying the pieces together. `start()` wires the
//! listener graph, `stop()` tears everything down; both are safe to call in
//! any order and more than once, since the surrounding process (or a service
//! manager restarting it) drives the lifecycle, not this object.

use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;

use log::{debug, error, info};

use crate::caffeine_state::{CaffeineEvent, CaffeineState};
use crate::events::Signal;
use crate::gamemode::GameModeClient;
use crate::idle_inhibitor::IdleInhibitor;
use crate::subscriptions::{SignalSource, SubscriptionTracker};

pub struct Daemon<Msg: From<CaffeineEvent> + Clone + Send + 'static> {
    subscriptions: SubscriptionTracker,
    gamemode: Option<Rc<RefCell<GameModeClient>>>,
    gamemode_caffeine: bool,
    caffeine: Rc<RefCell<CaffeineState<Msg>>>,
    inhibitor: Rc<RefCell<Box<dyn IdleInhibitor>>>,
    started: bool,
}

impl<Msg: From<CaffeineEvent> + Clone + Send + 'static> Daemon<Msg> {
    pub fn new(
        gamemode: Option<GameModeClient>,
        gamemode_caffeine: bool,
        caffeine: CaffeineState<Msg>,
        inhibitor: Box<dyn IdleInhibitor>,
    ) -> Self {
        Self {
            subscriptions: SubscriptionTracker::new(),
            gamemode: gamemode.map(|client| Rc::new(RefCell::new(client))),
            gamemode_caffeine,
            caffeine: Rc::new(RefCell::new(caffeine)),
            inhibitor: Rc::new(RefCell::new(inhibitor)),
            started: false,
        }
    }

    pub fn gamemode(&self) -> Option<&Rc<RefCell<GameModeClient>>> {
        self.gamemode.as_ref()
    }

    pub fn caffeine(&self) -> &Rc<RefCell<CaffeineState<Msg>>> {
        &self.caffeine
    }

    /// Wire the listener graph. Idempotent.
    pub fn start(&mut self) {
        if self.started {
            debug!(target: "Daemon::start", "Already started");
            return;
        }
        self.started = true;
        debug!(target: "Daemon::start", "Starting daemon...");

        // caffeination transitions drive the idle inhibitor
        let caffeine_source: Rc<dyn SignalSource> = self.caffeine.borrow().signals();
        self.subscriptions.subscribe(Some(&caffeine_source), "state-changed", {
            let inhibitor = Rc::clone(&self.inhibitor);
            Rc::new(move |signal| {
                let Signal::StateChanged(caffeinated) = signal else {
                    return;
                };
                let result = if *caffeinated {
                    inhibitor.borrow_mut().inhibit()
                } else {
                    inhibitor.borrow_mut().uninhibit()
                };
                if let Err(err) = result {
                    error!(target: "Daemon", "Failed to update idle inhibitor: {err}");
                }
                crate::print_status(*caffeinated);
            })
        });

        if let Some(gamemode) = &self.gamemode {
            let gamemode_caffeine = self.gamemode_caffeine;
            gamemode.borrow_mut().connect("state-changed", {
                let caffeine = Rc::clone(&self.caffeine);
                Rc::new(move |signal| {
                    let Signal::StateChanged(active) = signal else {
                        return;
                    };
                    info!(target: "Daemon", "GameMode is {}", if *active { "active" } else { "off" });
                    if gamemode_caffeine {
                        caffeine.borrow_mut().set_gamemode(*active);
                    }
                })
            });
            gamemode.borrow_mut().connect(
                "count-changed",
                Rc::new(|signal| {
                    if let Signal::CountChanged(count) = signal {
                        debug!(target: "Daemon", "{count} game(s) registered with GameMode");
                    }
                }),
            );
        }

        debug!(target: "Daemon::start", "Daemon started!");
    }

    /// Tear the listener graph down and force-release inhibition. Safe to call
    /// without a prior [Daemon::start] and safe to call twice; never fails.
    pub fn stop(&mut self) {
        debug!(target: "Daemon::stop", "Stopping daemon...");

        self.subscriptions.unsubscribe_all();

        if let Some(gamemode) = self.gamemode.take() {
            gamemode.borrow_mut().close();
        }

        if let Err(err) = self.inhibitor.borrow_mut().uninhibit() {
            error!(target: "Daemon::stop", "Failed to release idle inhibitor: {err}");
        }

        self.started = false;
        debug!(target: "Daemon::stop", "Daemon stopped!");
    }

    /// Direct report of the effective state, for teardown decisions
    pub fn is_caffeinated(&self) -> Result<bool, Box<dyn Error>> {
        Ok(self.caffeine.try_borrow().map(|c| c.is_inhibited())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamemode::GameModeMsg;
    use crate::idle_inhibitor::dry::DryRunIdleInhibitor;
    use crate::message_queue::{message_queue, MessageQueueReceiver};
    use crate::Msg;
    use nix::sys::epoll::{Epoll, EpollCreateFlags};

    fn daemon(with_gamemode: bool) -> (Daemon<Msg>, MessageQueueReceiver<Msg>) {
        let epoll = Epoll::new(EpollCreateFlags::empty()).unwrap();
        let (mq, mq_receiver) = message_queue::<Msg>(&epoll, 0).unwrap();

        let gamemode = with_gamemode.then(|| {
            let (requests, _requests_rx) = tokio::sync::mpsc::unbounded_channel();
            GameModeClient::new(requests, None)
        });

        let caffeine = CaffeineState::new(
            None,
            mq,
            std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        );
        let inhibitor = Box::<DryRunIdleInhibitor>::default();
        (Daemon::new(gamemode, true, caffeine, inhibitor), mq_receiver)
    }

    #[test]
    fn stop_without_start_is_safe() {
        let (mut daemon, _mq) = daemon(true);
        daemon.stop();
        daemon.stop();
    }

    #[test]
    fn manual_toggle_flows_to_the_inhibitor() {
        let (mut daemon, _mq) = daemon(false);
        daemon.start();

        daemon.caffeine().borrow_mut().toggle_manual();
        assert!(daemon.is_caffeinated().unwrap());

        daemon.caffeine().borrow_mut().toggle_manual();
        assert!(!daemon.is_caffeinated().unwrap());
    }

    #[test]
    fn gamemode_activity_caffeinates() {
        let (mut daemon, _mq) = daemon(true);
        daemon.start();

        let gamemode = Rc::clone(daemon.gamemode().unwrap());
        gamemode.borrow_mut().dispatch(GameModeMsg::Connected(2));
        assert!(daemon.is_caffeinated().unwrap());

        gamemode.borrow_mut().dispatch(GameModeMsg::CountChanged(0));
        assert!(!daemon.is_caffeinated().unwrap());
    }

    #[test]
    fn stop_releases_everything() {
        let (mut daemon, _mq) = daemon(true);
        daemon.start();

        let gamemode = Rc::clone(daemon.gamemode().unwrap());
        gamemode.borrow_mut().dispatch(GameModeMsg::Connected(1));
        assert!(daemon.is_caffeinated().unwrap());

        daemon.stop();
        assert!(daemon.gamemode().is_none());

        // late events after teardown must be inert
        gamemode.borrow_mut().dispatch(GameModeMsg::CountChanged(5));
        assert_eq!(gamemode.borrow().client_count(), 0);
    }

    #[test]
    fn start_twice_does_not_duplicate_listeners() {
        let (mut daemon, _mq) = daemon(true);
        daemon.start();
        daemon.start();

        let gamemode = Rc::clone(daemon.gamemode().unwrap());
        gamemode.borrow_mut().dispatch(GameModeMsg::Connected(1));
        assert!(daemon.is_caffeinated().unwrap());
    }
}
