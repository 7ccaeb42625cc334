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

//! Keep the system awake on demand or while GameMode is optimising a game,
//! with a DBus control interface for panels and bars

use std::{
    error::Error,
    io::{self, Write},
    process::ExitCode,
    sync::{
        atomic::{self, AtomicBool},
        Arc,
    },
};

mod caffeine_state;
mod daemon;
mod dbus_server;
mod events;
mod gamemode;
mod idle_inhibitor;
mod message_queue;
mod settings;
mod subscriptions;

use caffeine_state::{CaffeineEvent, CaffeineState};
use daemon::Daemon;
use gamemode::{GameModeClient, GameModeMsg};
use idle_inhibitor::{dbus::DbusIdleInhibitor, dry::DryRunIdleInhibitor, IdleInhibitor};
use message_queue::MessageQueueReceiver;
use nix::{errno::Errno, sys::epoll::*};
use settings::Settings;

#[repr(u64)]
enum MessageQueueType {
    Unknown,
    Main,
}

impl From<u64> for MessageQueueType {
    fn from(value: u64) -> Self {
        match value {
            value if value == Self::Main as u64 => Self::Main,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Msg {
    GameMode(GameModeMsg),
    Caffeine(CaffeineEvent),
    ToggleCaffeine,
    SetManualCaffeine(bool),
}

impl Msg {
    fn handle(&self, daemon: &mut Daemon<Msg>) -> Result<(), Box<dyn Error>> {
        match self {
            Msg::GameMode(gamemode_msg) => {
                if let Some(gamemode) = daemon.gamemode() {
                    gamemode.borrow_mut().dispatch(gamemode_msg.clone());
                }
            }

            Msg::Caffeine(CaffeineEvent::ManualTimeoutFired) => {
                daemon.caffeine().borrow_mut().release_manual_from_timer();
            }

            Msg::ToggleCaffeine => {
                daemon.caffeine().borrow_mut().toggle_manual();
            }

            Msg::SetManualCaffeine(value) => {
                daemon.caffeine().borrow_mut().set_manual(*value);
            }
        }
        Ok(())
    }
}

impl From<GameModeMsg> for Msg {
    fn from(value: GameModeMsg) -> Self {
        Msg::GameMode(value)
    }
}

impl From<CaffeineEvent> for Msg {
    fn from(value: CaffeineEvent) -> Self {
        Msg::Caffeine(value)
    }
}

pub fn print_status(caffeinated: bool) {
    let icon = if caffeinated { "☕" } else { "⌚" };
    let text = if caffeinated {
        "Caffeinated"
    } else {
        "Awake to idle"
    };

    println!("{{\"text\":\"{}\", \"tooltip\":\"{}\"}}", icon, text);
    io::stdout().flush().unwrap();
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("{error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let settings = Settings::new()?;

    simplelog::TermLogger::init(
        settings.get_verbosity(),
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let epoll = Epoll::new(EpollCreateFlags::empty())?;
    let (mq, mq_receiver) =
        message_queue::message_queue::<Msg>(&epoll, MessageQueueType::Main as u64)?;

    let manual_caffeine = Arc::new(AtomicBool::new(false));
    tokio::spawn(dbus_server::start_dbus_service(
        mq.clone(),
        Arc::clone(&manual_caffeine),
    ));

    let gamemode = if settings.is_gamemode_enabled() {
        let requests = gamemode::spawn_watch(mq.clone());
        Some(GameModeClient::new(
            requests,
            Some(Box::new(|| {
                log::info!(target: "main", "GameMode client ready")
            })),
        ))
    } else {
        None
    };

    let caffeine: CaffeineState<Msg> =
        CaffeineState::new(settings.get_caffeine_timeout(), mq.clone(), manual_caffeine);

    let inhibitor: Box<dyn IdleInhibitor> = match settings.get_idle_inhibitor() {
        settings::InhibitorBackend::DBus => Box::new(DbusIdleInhibitor::new()?),
        settings::InhibitorBackend::DryRun => Box::<DryRunIdleInhibitor>::default(),
    };

    let mut daemon = Daemon::new(
        gamemode,
        settings.is_gamemode_caffeine(),
        caffeine,
        inhibitor,
    );
    daemon.start();

    let term = Arc::new(AtomicBool::new(false));
    for sig in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register(*sig, Arc::clone(&term))?;
    }

    print_status(false);

    main_loop(&mut daemon, term, epoll, mq_receiver)?;

    daemon.stop();

    Ok(())
}

fn main_loop(
    daemon: &mut Daemon<Msg>,
    term: Arc<AtomicBool>,
    epoll: Epoll,
    mq_receiver: MessageQueueReceiver<Msg>,
) -> Result<(), Box<dyn Error>> {
    while !term.load(atomic::Ordering::Relaxed) {
        let mut events = [EpollEvent::empty()];
        let event = match epoll.wait(&mut events, EpollTimeout::NONE) {
            Ok(_) => events[0],
            Err(Errno::EINTR) => continue,
            Err(err) => Err(err)?,
        };

        match event.data().into() {
            MessageQueueType::Main => mq_receiver.recv()?.handle(daemon)?,

            MessageQueueType::Unknown => log::error!(target: "main", "Unknown event queue"),
        }
    }
    Ok(())
}
