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

//! Session-bus control surface. Panels, bars and menus toggle caffeination
//! through this interface instead of linking against the daemon; every
//! request is forwarded to the main loop through the message queue.

use std::error::Error;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use zbus::{connection, interface};

use crate::message_queue::MessageQueueSender;
use crate::Msg;

const SERVICE_NAME: &str = "com.github.caffeinate.Daemon";
const SERVICE_PATH: &str = "/com/github/caffeinate/Daemon";

/// The served object carries no state of its own. The `ManualCaffeine`
/// property reads the flag the state manager maintains, so it stays truthful
/// when the auto-release timer turns manual caffeination off behind the bus's
/// back, and writes are always forwarded; the state manager deduplicates.
pub struct CaffeinateService {
    mq: MessageQueueSender<Msg>,
    manual_caffeine: Arc<AtomicBool>,
}

impl CaffeinateService {
    pub fn new(mq: MessageQueueSender<Msg>, manual_caffeine: Arc<AtomicBool>) -> Self {
        Self {
            mq,
            manual_caffeine,
        }
    }
}

#[interface(name = "com.github.caffeinate.Daemon")]
impl CaffeinateService {
    #[zbus(property)]
    fn manual_caffeine(&self) -> bool {
        self.manual_caffeine.load(Ordering::Relaxed)
    }

    #[zbus(property)]
    fn set_manual_caffeine(&mut self, value: bool) {
        if let Err(e) = self.mq.send(Msg::SetManualCaffeine(value)) {
            log::error!("Failed to send SetManualCaffeine message: {e}");
        }
    }

    fn toggle_caffeine(&mut self) {
        log::debug!("D-Bus method 'ToggleCaffeine' called.");
        if let Err(e) = self.mq.send(Msg::ToggleCaffeine) {
            log::error!("Failed to send ToggleCaffeine message: {e}");
        }
    }
}

pub async fn start_dbus_service(
    mq: MessageQueueSender<Msg>,
    manual_caffeine: Arc<AtomicBool>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let service = CaffeinateService::new(mq, manual_caffeine);
    let _connection = connection::Builder::session()?
        .name(SERVICE_NAME)?
        .serve_at(SERVICE_PATH, service)?
        .build()
        .await?;

    log::info!("D-Bus control service started successfully.");
    std::future::pending::<()>().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_queue::message_queue;
    use nix::sys::epoll::{Epoll, EpollCreateFlags};

    #[test]
    fn set_manual_caffeine_always_forwards() {
        let epoll = Epoll::new(EpollCreateFlags::empty()).unwrap();
        let (mq, mq_receiver) = message_queue::<Msg>(&epoll, 0).unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        let mut service = CaffeinateService::new(mq, Arc::clone(&flag));

        service.set_manual_caffeine(true);
        assert!(matches!(
            mq_receiver.recv().unwrap(),
            Msg::SetManualCaffeine(true)
        ));

        // the state manager accepts the request, then its auto-release timer
        // turns manual caffeination back off
        flag.store(true, Ordering::Relaxed);
        flag.store(false, Ordering::Relaxed);
        assert!(!service.manual_caffeine());

        // a repeated request must still reach the queue
        service.set_manual_caffeine(true);
        assert!(matches!(
            mq_receiver.recv().unwrap(),
            Msg::SetManualCaffeine(true)
        ));
    }

    #[test]
    fn property_reflects_the_shared_flag() {
        let epoll = Epoll::new(EpollCreateFlags::empty()).unwrap();
        let (mq, _mq_receiver) = message_queue::<Msg>(&epoll, 0).unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        let service = CaffeinateService::new(mq, Arc::clone(&flag));

        assert!(!service.manual_caffeine());
        flag.store(true, Ordering::Relaxed);
        assert!(service.manual_caffeine());
    }
}
