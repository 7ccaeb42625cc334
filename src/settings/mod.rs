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

//! Module responsible with the tool's configuration

use std::{error::Error, path::PathBuf};

use chrono::Duration;
use clap::Parser;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use log::LevelFilter;
use serde::Deserialize;

mod cli;
use cli::Args;

/// Which backend actually performs the inhibition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InhibitorBackend {
    DBus,
    DryRun,
}

/// Struct that stores the settings that affect the tool behaviour
#[derive(Deserialize)]
pub struct Settings {
    #[serde(default = "default_caffeine_timeout")]
    caffeine_timeout: i64,

    #[serde(default = "default_verbosity")]
    verbosity: LevelFilter,

    #[serde(default = "default_gamemode")]
    gamemode: bool,

    #[serde(default = "default_gamemode_caffeine")]
    gamemode_caffeine: bool,

    #[serde(default)]
    dry_run: bool,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let cli = Args::parse();

        let config_path = match cli.config {
            Some(ref p) => PathBuf::from(p),
            None => xdg::BaseDirectories::with_prefix(env!("CARGO_PKG_NAME"))?
                .place_config_file("config.toml")?,
        };

        let settings = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Serialized::defaults(cli))
            .extract()?;

        Ok(settings)
    }

    /// Auto-release timeout for manual caffeination with the [chrono::Duration]
    /// type. A configured value of 0 means "never release" and is returned as
    /// [None]
    pub fn get_caffeine_timeout(&self) -> Option<Duration> {
        match self.caffeine_timeout {
            0 => None,
            d => Some(Duration::seconds(d)),
        }
    }

    /// Returns the current log verbosity
    pub fn get_verbosity(&self) -> LevelFilter {
        self.verbosity
    }

    /// Whether the GameMode daemon should be watched at all
    pub fn is_gamemode_enabled(&self) -> bool {
        self.gamemode
    }

    /// Whether GameMode activity should caffeinate on its own, in addition to
    /// being reported
    pub fn is_gamemode_caffeine(&self) -> bool {
        self.gamemode_caffeine
    }

    pub fn get_idle_inhibitor(&self) -> InhibitorBackend {
        if self.dry_run {
            InhibitorBackend::DryRun
        } else {
            InhibitorBackend::DBus
        }
    }
}

/// Default auto-release timeout, 0 means manual caffeination holds forever
fn default_caffeine_timeout() -> i64 {
    0
}

/// Default log verbosity, set to [LevelFilter::Warn]
fn default_verbosity() -> LevelFilter {
    LevelFilter::Warn
}

fn default_gamemode() -> bool {
    true
}

fn default_gamemode_caffeine() -> bool {
    true
}
