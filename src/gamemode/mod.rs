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

//! Client for the GameMode daemon (`com.feralinteractive.GameMode`).
//!
//! The daemon exposes a single readable counter, `ClientCount`, plus
//! `RegisterGame`/`UnregisterGame` calls. A tokio pump task owns the bus
//! connection and forwards raw property changes and call replies into the
//! main message queue; the main-thread [GameModeClient] turns raw counts into
//! de-duplicated `state-changed`/`count-changed` signals and completes
//! outstanding call callbacks.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, error, info, trace};
use tokio::sync::mpsc;
use zbus::{proxy, Connection};

use crate::events::{Emitter, Handler, Signal};
use crate::message_queue::MessageQueueSender;
use crate::subscriptions::{HandleId, SignalSource, SubscriptionTracker};

/// Status code reported to completion callbacks when the remote call itself
/// failed, as opposed to a semantic rejection by the daemon
pub const STATUS_TRANSPORT_ERROR: i32 = -2;

#[proxy(
    default_service = "com.feralinteractive.GameMode",
    interface = "com.feralinteractive.GameMode",
    default_path = "/com/feralinteractive/GameMode"
)]
trait GameMode {
    fn register_game(&self, pid: i32) -> zbus::Result<i32>;

    fn unregister_game(&self, pid: i32) -> zbus::Result<i32>;

    #[zbus(property)]
    fn client_count(&self) -> zbus::Result<i32>;
}

/// Raw events pumped from the bus task into the main loop
#[derive(Clone, Debug)]
pub enum GameModeMsg {
    /// The proxy handshake completed; carries the count read at attach time
    Connected(i32),
    /// The proxy could not be established; the client stays disconnected
    ConnectFailed(Arc<zbus::Error>),
    /// `ClientCount` property change, not yet de-duplicated
    CountChanged(i32),
    /// Completion of an outbound register/unregister call
    Reply {
        call: u64,
        status: i32,
        error: Option<Arc<zbus::Error>>,
    },
}

/// Outbound requests from the client to the pump task
#[derive(Clone, Copy, Debug)]
pub enum GameModeRequest {
    Register { call: u64, pid: i32 },
    Unregister { call: u64, pid: i32 },
}

/// Spawn the bus pump task and return the request channel feeding it.
///
/// Dropping the returned sender (and every clone) terminates the task.
pub fn spawn_watch<Msg>(mq: MessageQueueSender<Msg>) -> mpsc::UnboundedSender<GameModeRequest>
where
    Msg: From<GameModeMsg> + Clone + Send + 'static,
{
    let (requests, requests_rx) = mpsc::unbounded_channel();
    tokio::spawn(watch(mq, requests_rx));
    requests
}

async fn watch<Msg>(
    mq: MessageQueueSender<Msg>,
    mut requests: mpsc::UnboundedReceiver<GameModeRequest>,
) where
    Msg: From<GameModeMsg> + Clone + Send + 'static,
{
    let forward = |msg: GameModeMsg| {
        if mq.send(msg.into()).is_err() {
            error!(target: "GameMode::watch", "Main message queue is gone");
        }
    };

    let proxy = {
        let connection = match Connection::session().await {
            Ok(connection) => connection,
            Err(err) => {
                forward(GameModeMsg::ConnectFailed(Arc::new(err)));
                return;
            }
        };
        match GameModeProxy::new(&connection).await {
            Ok(proxy) => proxy,
            Err(err) => {
                forward(GameModeMsg::ConnectFailed(Arc::new(err)));
                return;
            }
        }
    };

    let mut count_changes = proxy.receive_client_count_changed().await;

    // A missing daemon is not fatal: GameMode activates on demand and the
    // property stream starts delivering once it appears.
    let initial_count = match proxy.client_count().await {
        Ok(count) => count,
        Err(err) => {
            debug!(target: "GameMode::watch", "ClientCount unavailable ({err}), assuming 0");
            0
        }
    };
    forward(GameModeMsg::Connected(initial_count));

    loop {
        tokio::select! {
            change = count_changes.next() => {
                let Some(change) = change else { break };
                match change.get().await {
                    Ok(count) => forward(GameModeMsg::CountChanged(count)),
                    Err(err) => {
                        debug!(target: "GameMode::watch", "Failed to read changed ClientCount: {err}");
                    }
                }
            }

            request = requests.recv() => {
                // channel closed means the client was torn down
                let Some(request) = request else { break };
                let (call, result) = match request {
                    GameModeRequest::Register { call, pid } => {
                        (call, proxy.register_game(pid).await)
                    }
                    GameModeRequest::Unregister { call, pid } => {
                        (call, proxy.unregister_game(pid).await)
                    }
                };
                let reply = match result {
                    Ok(status) => GameModeMsg::Reply { call, status, error: None },
                    Err(err) => GameModeMsg::Reply {
                        call,
                        status: STATUS_TRANSPORT_ERROR,
                        error: Some(Arc::new(err)),
                    },
                };
                forward(reply);
            }
        }
    }

    debug!(target: "GameMode::watch", "Bus pump task terminated");
}

/// Last observed `ClientCount`, with the derivation of the two de-duplicated
/// notifications. Pure bookkeeping so the edge rules stay testable without a
/// bus.
#[derive(Debug)]
pub struct CounterState {
    count: i32,
}

impl CounterState {
    /// First observation after the handshake. A pre-existing non-zero count
    /// is reported as a fresh activity edge followed by the count itself.
    pub fn attach(count: i32) -> (Self, Vec<Signal>) {
        let mut signals = Vec::new();
        if count > 0 {
            signals.push(Signal::StateChanged(true));
            signals.push(Signal::CountChanged(count));
        }
        (Self { count }, signals)
    }

    /// Subsequent observation. The activity edge and the count change are
    /// independent; either, both or neither may be reported.
    pub fn observe(&mut self, count: i32) -> Vec<Signal> {
        let was_active = self.count > 0;
        let is_active = count > 0;

        let mut signals = Vec::new();
        if was_active != is_active {
            signals.push(Signal::StateChanged(is_active));
        }
        if count != self.count {
            signals.push(Signal::CountChanged(count));
        }

        self.count = count;
        signals
    }

    pub fn count(&self) -> i32 {
        self.count
    }
}

enum ClientState {
    Disconnected,
    Connected(CounterState),
}

pub type CallCallback = Box<dyn FnOnce(i32, Option<Arc<zbus::Error>>)>;
pub type ReadyCallback = Box<dyn FnOnce()>;

/// Main-thread face of the GameMode connection.
///
/// Listeners attach with [GameModeClient::connect]; every registration goes
/// through the client's own [SubscriptionTracker] so [GameModeClient::close]
/// can tear all of them down in one sweep.
pub struct GameModeClient {
    state: ClientState,
    closed: bool,
    ready: Option<ReadyCallback>,
    signals: Rc<Emitter>,
    subscriptions: SubscriptionTracker,
    pending: HashMap<u64, CallCallback>,
    next_call: u64,
    requests: Option<mpsc::UnboundedSender<GameModeRequest>>,
}

impl GameModeClient {
    /// `ready` is invoked exactly once, when the proxy handshake completes and
    /// before any initial `state-changed`/`count-changed` emission.
    pub fn new(
        requests: mpsc::UnboundedSender<GameModeRequest>,
        ready: Option<ReadyCallback>,
    ) -> Self {
        Self {
            state: ClientState::Disconnected,
            closed: false,
            ready,
            signals: Rc::new(Emitter::new("GameModeClient")),
            subscriptions: SubscriptionTracker::new(),
            pending: HashMap::new(),
            next_call: 1,
            requests: Some(requests),
        }
    }

    /// Attach a listener for `state-changed` or `count-changed`
    pub fn connect(&mut self, signal: &str, handler: Handler) -> Option<HandleId> {
        let source: Rc<dyn SignalSource> = Rc::clone(&self.signals) as Rc<dyn SignalSource>;
        self.subscriptions.subscribe(Some(&source), signal, handler)
    }

    /// Last cached count, 0 while disconnected
    pub fn client_count(&self) -> i32 {
        match &self.state {
            ClientState::Connected(counter) => counter.count(),
            ClientState::Disconnected => 0,
        }
    }

    /// Feed one raw bus event through the state machine
    pub fn dispatch(&mut self, msg: GameModeMsg) {
        if self.closed {
            trace!(target: "GameModeClient::dispatch", "Dropping event after close: {msg:?}");
            return;
        }

        match msg {
            GameModeMsg::Connected(count) => {
                if matches!(self.state, ClientState::Connected(_)) {
                    debug!(target: "GameModeClient::dispatch", "Duplicate handshake ignored");
                    return;
                }

                let (counter, signals) = CounterState::attach(count);
                self.state = ClientState::Connected(counter);
                info!(target: "GameModeClient", "Connected to GameMode, {count} client(s) registered");

                if let Some(ready) = self.ready.take() {
                    ready();
                }
                for signal in signals {
                    self.emit(&signal);
                }
            }

            GameModeMsg::ConnectFailed(err) => {
                error!(target: "GameModeClient", "Error creating GameMode proxy: {err}");
            }

            GameModeMsg::CountChanged(count) => {
                let ClientState::Connected(counter) = &mut self.state else {
                    trace!(target: "GameModeClient::dispatch", "Count change while disconnected");
                    return;
                };
                for signal in counter.observe(count) {
                    self.emit(&signal);
                }
            }

            GameModeMsg::Reply { call, status, error } => {
                if let Some(callback) = self.pending.remove(&call) {
                    callback(status, error);
                } else {
                    trace!(target: "GameModeClient::dispatch", "Reply for unknown call {call}");
                }
            }
        }
    }

    /// Ask GameMode to treat `pid` as a running game. `callback` fires exactly
    /// once: with the daemon's status code, or with
    /// [STATUS_TRANSPORT_ERROR] and the error if the call never reached the
    /// daemon. No retry is attempted here.
    pub fn register_game(&mut self, pid: i32, callback: CallCallback) {
        self.call(pid, callback, |call, pid| GameModeRequest::Register { call, pid });
    }

    /// Inverse of [GameModeClient::register_game], same callback contract
    pub fn unregister_game(&mut self, pid: i32, callback: CallCallback) {
        self.call(pid, callback, |call, pid| GameModeRequest::Unregister { call, pid });
    }

    fn call(
        &mut self,
        pid: i32,
        callback: CallCallback,
        request: fn(u64, i32) -> GameModeRequest,
    ) {
        let call = self.next_call;
        self.next_call += 1;

        let alive = self
            .requests
            .as_ref()
            .is_some_and(|requests| requests.send(request(call, pid)).is_ok());

        if alive {
            self.pending.insert(call, callback);
        } else {
            callback(
                STATUS_TRANSPORT_ERROR,
                Some(Arc::new(zbus::Error::Failure(
                    "GameMode connection is closed".into(),
                ))),
            );
        }
    }

    /// Tear the client down: all listener subscriptions are removed, the pump
    /// task is released, pending callbacks are dropped and the cached count is
    /// discarded. Safe to call more than once; late replies arriving after
    /// this are ignored.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.subscriptions.unsubscribe_all();
        self.signals.clear();
        self.pending.clear();
        self.requests = None;
        self.state = ClientState::Disconnected;

        debug!(target: "GameModeClient::close", "GameMode client closed");
    }

    fn emit(&self, signal: &Signal) {
        let name = match signal {
            Signal::StateChanged(_) => "state-changed",
            Signal::CountChanged(_) => "count-changed",
        };
        self.signals.emit(name, signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn client() -> (GameModeClient, mpsc::UnboundedReceiver<GameModeRequest>) {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        (GameModeClient::new(requests, None), requests_rx)
    }

    fn recording(log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> Handler {
        let log = Rc::clone(log);
        Rc::new(move |signal| log.borrow_mut().push(format!("{tag} {signal:?}")))
    }

    #[test]
    fn attach_with_zero_count_emits_nothing() {
        let (_, signals) = CounterState::attach(0);
        assert!(signals.is_empty());
    }

    #[test]
    fn attach_with_live_count_reports_edge_then_count() {
        let (_, signals) = CounterState::attach(3);
        assert_eq!(
            signals,
            vec![Signal::StateChanged(true), Signal::CountChanged(3)]
        );
    }

    #[test]
    fn observe_unchanged_count_is_silent() {
        let (mut counter, _) = CounterState::attach(2);
        assert!(counter.observe(2).is_empty());
    }

    #[test]
    fn observe_drop_to_zero_reports_both() {
        let (mut counter, _) = CounterState::attach(2);
        assert_eq!(
            counter.observe(0),
            vec![Signal::StateChanged(false), Signal::CountChanged(0)]
        );
    }

    #[test]
    fn observe_active_to_active_reports_only_count() {
        let (mut counter, _) = CounterState::attach(2);
        assert_eq!(counter.observe(5), vec![Signal::CountChanged(5)]);
    }

    #[test]
    fn ready_runs_once_and_before_initial_signals() {
        let (requests, _requests_rx) = mpsc::unbounded_channel();
        let log = Rc::new(RefCell::new(Vec::new()));

        let mut client = GameModeClient::new(requests, {
            let log = Rc::clone(&log);
            Some(Box::new(move || log.borrow_mut().push("ready".to_owned())))
        });
        client.connect("state-changed", recording(&log, "state"));
        client.connect("count-changed", recording(&log, "count"));

        client.dispatch(GameModeMsg::Connected(3));
        client.dispatch(GameModeMsg::Connected(3));

        assert_eq!(
            *log.borrow(),
            vec![
                "ready".to_owned(),
                "state StateChanged(true)".to_owned(),
                "count CountChanged(3)".to_owned(),
            ]
        );
        assert_eq!(client.client_count(), 3);
    }

    #[test]
    fn count_changes_fan_out_after_connect() {
        let (mut client, _requests_rx) = client();
        let log = Rc::new(RefCell::new(Vec::new()));
        client.connect("state-changed", recording(&log, "state"));
        client.connect("count-changed", recording(&log, "count"));

        client.dispatch(GameModeMsg::Connected(0));
        client.dispatch(GameModeMsg::CountChanged(1));
        client.dispatch(GameModeMsg::CountChanged(1));
        client.dispatch(GameModeMsg::CountChanged(0));

        assert_eq!(
            *log.borrow(),
            vec![
                "state StateChanged(true)".to_owned(),
                "count CountChanged(1)".to_owned(),
                "state StateChanged(false)".to_owned(),
                "count CountChanged(0)".to_owned(),
            ]
        );
    }

    #[test]
    fn reply_completes_callback_exactly_once() {
        let (mut client, mut requests_rx) = client();
        let completions = Rc::new(RefCell::new(Vec::new()));

        client.register_game(1234, {
            let completions = Rc::clone(&completions);
            Box::new(move |status, error| {
                completions.borrow_mut().push((status, error.is_some()));
            })
        });

        let request = requests_rx.try_recv().unwrap();
        let GameModeRequest::Register { call, pid } = request else {
            panic!("expected a register request");
        };
        assert_eq!(pid, 1234);

        client.dispatch(GameModeMsg::Reply { call, status: 0, error: None });
        // a duplicate reply for the same call must be ignored
        client.dispatch(GameModeMsg::Reply { call, status: 0, error: None });

        assert_eq!(*completions.borrow(), vec![(0, false)]);
    }

    #[test]
    fn transport_failure_reports_minus_two() {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let mut client = GameModeClient::new(requests, None);
        drop(requests_rx); // pump task gone

        let completions = Rc::new(RefCell::new(Vec::new()));
        client.unregister_game(42, {
            let completions = Rc::clone(&completions);
            Box::new(move |status, error| {
                completions.borrow_mut().push((status, error.is_some()));
            })
        });

        assert_eq!(*completions.borrow(), vec![(STATUS_TRANSPORT_ERROR, true)]);
    }

    #[test]
    fn close_is_idempotent_and_drops_late_replies() {
        let (mut client, mut requests_rx) = client();
        let completions = Rc::new(RefCell::new(Vec::new()));

        client.dispatch(GameModeMsg::Connected(2));
        client.register_game(99, {
            let completions = Rc::clone(&completions);
            Box::new(move |status, _| completions.borrow_mut().push(status))
        });
        let GameModeRequest::Register { call, .. } = requests_rx.try_recv().unwrap() else {
            panic!("expected a register request");
        };

        client.close();
        client.close();

        client.dispatch(GameModeMsg::Reply { call, status: 0, error: None });
        client.dispatch(GameModeMsg::CountChanged(7));

        assert!(completions.borrow().is_empty());
        assert_eq!(client.client_count(), 0);
    }

    #[test]
    fn listeners_are_gone_after_close() {
        let (mut client, _requests_rx) = client();
        let log = Rc::new(RefCell::new(Vec::new()));
        client.connect("state-changed", recording(&log, "state"));

        client.dispatch(GameModeMsg::Connected(1));
        assert_eq!(log.borrow().len(), 1);

        client.close();
        // emitter was cleared together with the tracked subscriptions
        client.signals.emit("state-changed", &Signal::StateChanged(false));
        assert_eq!(log.borrow().len(), 1);
    }
}
