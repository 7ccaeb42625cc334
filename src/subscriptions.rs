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

//! Bookkeeping for signal subscriptions against heterogeneous sources.
//!
//! Some signal sources only speak an older registration API. The
//! [SubscriptionTracker] hides that split: it always tries the primary
//! connect/disconnect pair first and falls back to the legacy pair, and it
//! records every handle it hands out so that [SubscriptionTracker::unsubscribe_all]
//! can later remove all of them without the caller remembering which API
//! was used for which source.

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{self, Display};
use std::rc::Rc;

use log::{debug, error};

use crate::events::Handler;

/// Opaque token identifying one registration on one source
pub type HandleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    /// The source does not implement the requested API
    Unsupported,
    /// No registration with this handle exists on the source
    UnknownHandle(HandleId),
}

impl Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "subscription API not supported by this source"),
            Self::UnknownHandle(handle) => write!(f, "unknown subscription handle {handle}"),
        }
    }
}

impl Error for SignalError {}

/// A source of named signals. The primary connect/disconnect pair is the
/// preferred API; sources that only implement the legacy pair leave the
/// primary methods failing and vice versa. Callers go through the
/// [SubscriptionTracker] rather than dispatching on the concrete type, since
/// the set of source shapes is not closed.
pub trait SignalSource {
    fn connect(&self, signal: &str, handler: Handler) -> Result<HandleId, SignalError>;

    fn disconnect(&self, handle: HandleId) -> Result<(), SignalError>;

    fn connect_legacy(&self, _signal: &str, _handler: Handler) -> Result<HandleId, SignalError> {
        Err(SignalError::Unsupported)
    }

    fn disconnect_legacy(&self, _handle: HandleId) -> Result<(), SignalError> {
        Err(SignalError::Unsupported)
    }
}

struct TrackedSource {
    source: Rc<dyn SignalSource>,
    handles: HashSet<HandleId>,
}

/// Registry of every live subscription, keyed by source identity
#[derive(Default)]
pub struct SubscriptionTracker {
    connections: HashMap<usize, TrackedSource>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `signal` on `source` and record the resulting
    /// handle. A `None` source is a no-op. The returned handle is only useful
    /// for diagnostics; removal happens through [Self::unsubscribe_all].
    pub fn subscribe(
        &mut self,
        source: Option<&Rc<dyn SignalSource>>,
        signal: &str,
        handler: Handler,
    ) -> Option<HandleId> {
        let source = source?;

        let handle = match source.connect(signal, Rc::clone(&handler)) {
            Ok(handle) => handle,
            Err(primary) => {
                debug!(target: "SubscriptionTracker::subscribe",
                    "Primary connect for '{signal}' failed ({primary}), trying legacy API");
                match source.connect_legacy(signal, handler) {
                    Ok(handle) => handle,
                    Err(legacy) => {
                        error!(target: "SubscriptionTracker::subscribe",
                            "Unable to subscribe to '{signal}': {primary}; legacy API: {legacy}");
                        return None;
                    }
                }
            }
        };

        self.connections
            .entry(source_key(source))
            .or_insert_with(|| TrackedSource {
                source: Rc::clone(source),
                handles: HashSet::new(),
            })
            .handles
            .insert(handle);

        Some(handle)
    }

    /// Remove every tracked subscription, attempting each handle exactly once.
    ///
    /// Removal failures never abort the sweep: a handle whose primary
    /// disconnect fails is retried on the legacy API, and a handle failing
    /// both is only reported. The registry is empty afterwards.
    pub fn unsubscribe_all(&mut self) {
        for (_, tracked) in self.connections.drain() {
            for handle in tracked.handles {
                if let Err(primary) = tracked.source.disconnect(handle) {
                    debug!(target: "SubscriptionTracker::unsubscribe_all",
                        "Primary disconnect of handle {handle} failed ({primary}), trying legacy API");
                    if let Err(legacy) = tracked.source.disconnect_legacy(handle) {
                        error!(target: "SubscriptionTracker::unsubscribe_all",
                            "Unable to remove subscription {handle}: {primary}; legacy API: {legacy}");
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn tracked_handles(&self) -> usize {
        self.connections
            .values()
            .map(|tracked| tracked.handles.len())
            .sum()
    }
}

/// Sources are keyed by object identity, like handles in a pointer-keyed map
fn source_key(source: &Rc<dyn SignalSource>) -> usize {
    Rc::as_ptr(source) as *const () as usize
}
