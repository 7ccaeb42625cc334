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

//! Named-signal emitter used for listener fan-out between the daemon's
//! single-threaded components. Each component that wants to be listened to
//! owns an [Emitter]; listeners attach through the [SignalSource] facade so
//! the [crate::subscriptions::SubscriptionTracker] can tear them down later.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::subscriptions::{HandleId, SignalError, SignalSource};

/// Payload delivered to signal handlers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// A derived boolean flipped (GameMode became active/inactive, caffeination
    /// was enabled/disabled)
    StateChanged(bool),
    /// A watched counter moved to a new value
    CountChanged(i32),
}

pub type Handler = Rc<dyn Fn(&Signal)>;

struct Registration {
    id: HandleId,
    signal: String,
    handler: Handler,
}

/// Fan-out point for named signals. Handlers run synchronously on the emitting
/// thread, in registration order.
pub struct Emitter {
    name: &'static str,
    next_id: Cell<HandleId>,
    registrations: RefCell<Vec<Registration>>,
}

impl Emitter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: Cell::new(1),
            registrations: RefCell::new(Vec::new()),
        }
    }

    /// Invoke every handler registered under `signal`.
    ///
    /// The handler list is snapshotted first so a handler may attach or detach
    /// registrations without poisoning the iteration.
    pub fn emit(&self, signal: &str, payload: &Signal) {
        let handlers: Vec<Handler> = self
            .registrations
            .borrow()
            .iter()
            .filter(|registration| registration.signal == signal)
            .map(|registration| Rc::clone(&registration.handler))
            .collect();

        log::trace!(target: "Emitter::emit", "[{}] '{signal}' {payload:?} -> {} handler(s)", self.name, handlers.len());
        for handler in handlers {
            handler(payload);
        }
    }

    /// Drop every registration at once. Object-teardown counterpart of
    /// removing handlers one by one.
    pub fn clear(&self) {
        let removed = self.registrations.borrow_mut().drain(..).count();
        if removed > 0 {
            log::debug!(target: "Emitter::clear", "[{}] dropped {removed} handler(s)", self.name);
        }
    }

    #[cfg(test)]
    fn handler_count(&self) -> usize {
        self.registrations.borrow().len()
    }
}

impl SignalSource for Emitter {
    fn connect(&self, signal: &str, handler: Handler) -> Result<HandleId, SignalError> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.registrations.borrow_mut().push(Registration {
            id,
            signal: signal.to_owned(),
            handler,
        });
        Ok(id)
    }

    fn disconnect(&self, handle: HandleId) -> Result<(), SignalError> {
        let mut registrations = self.registrations.borrow_mut();
        match registrations.iter().position(|registration| registration.id == handle) {
            Some(index) => {
                registrations.remove(index);
                Ok(())
            }
            None => Err(SignalError::UnknownHandle(handle)),
        }
    }
}
