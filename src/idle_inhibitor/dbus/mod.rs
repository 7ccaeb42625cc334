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

use std::error::Error;

use log::{debug, error, info};
use zbus::{blocking::Connection, proxy};

use super::IdleInhibitor;

#[proxy(
    default_service = "org.freedesktop.ScreenSaver",
    interface = "org.freedesktop.ScreenSaver",
    default_path = "/ScreenSaver"
)]
trait ScreenSaver {
    fn inhibit(&self, application_name: &str, reason_for_inhibit: &str) -> zbus::Result<u32>;

    #[zbus(no_reply)]
    fn un_inhibit(&self, cookie: u32) -> zbus::Result<()>;
}

/// `org.freedesktop.ScreenSaver` cookie-based inhibition
pub struct DbusIdleInhibitor<'a> {
    _dbus_connection: Connection,
    dbus_proxy: ScreenSaverProxyBlocking<'a>,
    cookie: Option<u32>,
}

impl<'a> DbusIdleInhibitor<'a> {
    pub fn new() -> Result<DbusIdleInhibitor<'a>, Box<dyn Error>> {
        let dbus_connection = Connection::session()?;
        let dbus_proxy = ScreenSaverProxyBlocking::new(&dbus_connection)?;

        let mut dbus_idle_inhibitor = DbusIdleInhibitor {
            _dbus_connection: dbus_connection,
            dbus_proxy,
            cookie: None,
        };

        // probe the interface once so a broken screensaver service fails fast
        dbus_idle_inhibitor.inhibit()?;
        dbus_idle_inhibitor.uninhibit()?;

        debug!(target: "DbusIdleInhibitor::new", "DBus idle inhibitor created");
        Ok(dbus_idle_inhibitor)
    }
}

impl Drop for DbusIdleInhibitor<'_> {
    fn drop(&mut self) {
        if let Some(cookie) = self.cookie {
            if let Err(error) = self.dbus_proxy.un_inhibit(cookie) {
                error!(target: "DbusIdleInhibitor::drop", "{error}");
            }
            self.cookie = None;
        }
    }
}

impl IdleInhibitor for DbusIdleInhibitor<'_> {
    fn inhibit(&mut self) -> Result<(), Box<dyn Error>> {
        if self.cookie.is_none() {
            self.cookie = Some(
                self.dbus_proxy
                    .inhibit(env!("CARGO_PKG_NAME"), "Caffeination is active")?,
            );
            info!(target: "DbusIdleInhibitor::inhibit", "Caffeination was ENABLED");
        }

        Ok(())
    }

    fn uninhibit(&mut self) -> Result<(), Box<dyn Error>> {
        if let Some(cookie) = self.cookie {
            self.dbus_proxy.un_inhibit(cookie)?;
            self.cookie = None;
            info!(target: "DbusIdleInhibitor::uninhibit", "Caffeination was DISABLED");
        }

        Ok(())
    }
}
