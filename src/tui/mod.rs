//! Interactive device list. The terminal loop runs on the calling thread and
//! never awaits; device work goes to the [`Bridge`] worker and comes back as
//! [`Update`]s.

use std::{
    io::{stdout, Stdout},
    panic,
    time::Duration,
};

use anyhow::Result;
use crossterm::{
    cursor,
    event::{self, Event, KeyEventKind},
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    bridge::Bridge,
    controller::{Controller, Update},
};

pub mod app;
pub mod ui;

use app::{App, Command};

const TICK: Duration = Duration::from_millis(100);

/// Owns the terminal between [`Tui::enter`] and drop.
pub struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Tui {
    pub fn new() -> Result<Tui> {
        let terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
        Ok(Tui { terminal })
    }

    pub fn enter(&mut self) -> Result<()> {
        terminal::enable_raw_mode()?;
        stdout().execute(EnterAlternateScreen)?;
        stdout().execute(cursor::Hide)?;
        self.terminal.clear()?;
        Ok(())
    }

    pub fn draw(&mut self, app: &App) -> Result<()> {
        self.terminal.draw(|frame| ui::render(frame, app))?;
        Ok(())
    }
}

fn restore() {
    let _ = stdout().execute(cursor::Show);
    let _ = stdout().execute(LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
}

impl Drop for Tui {
    fn drop(&mut self) {
        restore();
    }
}

/// Put the terminal back before a panic message is printed.
fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        restore();
        previous(info);
    }));
}

/// Hand a command to the worker.
fn dispatch(bridge: &Bridge, controller: &Controller, command: Command) -> JoinHandle<()> {
    debug!(?command, "dispatching");
    let controller = controller.clone();
    // outcomes reach the UI as updates; the returned results are only logged
    bridge.submit(async move {
        let outcome = match command {
            Command::Discover => controller.discover().await.map(|_| ()),
            Command::AddDevice(addr) => controller.add_device(addr).await.map(|_| ()),
            Command::Toggle(device) => controller.toggle(device).await.map(|_| ()),
            Command::SetAll { on, devices } => controller.set_all(devices, on).await.map(|_| ()),
            Command::Refresh(devices) => controller.refresh(devices).await.map(|_| ()),
        };
        if let Err(e) = outcome {
            debug!("operation ended with {}", e);
        }
    })
}

/// Run the interactive list until the user quits.
pub fn run(bridge: &Bridge, controller: Controller, mut updates: mpsc::Receiver<Update>) -> Result<()> {
    install_panic_hook();
    let mut tui = Tui::new()?;
    tui.enter()?;

    let mut app = App::new();
    let mut pending: Vec<JoinHandle<()>> = Vec::new();

    while app.running {
        tui.draw(&app)?;

        if event::poll(TICK)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(command) = app.handle_key(key) {
                        pending.push(dispatch(bridge, &controller, command));
                    }
                }
            }
        }

        while let Ok(update) = updates.try_recv() {
            app.apply(update);
        }
        pending.retain(|handle| !handle.is_finished());
    }

    info!(
        unfinished = pending.len(),
        in_flight = bridge.in_flight(),
        "leaving device list"
    );
    Ok(())
}
