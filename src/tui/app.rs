//! UI state and key handling. No terminal or worker access lives here.
use std::net::IpAddr;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::{
    controller::Update,
    device::DeviceRecord,
    store::DeviceStore,
    view::{self, Counters, DeviceRow},
};

pub const READY_STATUS: &str = "Ready - press 'd' to discover your devices";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Search,
    AddDevice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

/// Work for the worker thread, produced by a key press.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Discover,
    AddDevice(IpAddr),
    Toggle(DeviceRecord),
    SetAll { on: bool, devices: Vec<DeviceRecord> },
    Refresh(Vec<DeviceRecord>),
}

pub struct App {
    pub store: DeviceStore,
    pub status: String,
    pub query: String,
    pub input: String,
    pub mode: Mode,
    pub alert: Option<Alert>,
    pub selected: usize,
    pub running: bool,
}

impl Default for App {
    fn default() -> Self {
        App::new()
    }
}

impl App {
    pub fn new() -> App {
        App {
            store: DeviceStore::new(),
            status: String::from(READY_STATUS),
            query: String::new(),
            input: String::new(),
            mode: Mode::Normal,
            alert: None,
            selected: 0,
            running: true,
        }
    }

    pub fn apply(&mut self, update: Update) {
        match update {
            Update::Status(status) => self.status = status,
            Update::Alert { title, message } => self.alert = Some(Alert { title, message }),
            device_change => {
                self.store.apply(&device_change);
                self.clamp_selection();
            }
        }
    }

    pub fn rows(&self) -> Vec<DeviceRow> {
        view::rows(self.store.iter())
    }

    /// Rows passing the current search, in store order.
    pub fn visible_rows(&self) -> Vec<DeviceRow> {
        let rows = self.rows();
        view::visible(&rows, &self.query)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn counters(&self) -> Counters {
        view::counters(self.store.iter())
    }

    pub fn selected_record(&self) -> Option<&DeviceRecord> {
        let rows = self.visible_rows();
        rows.get(self.selected)
            .and_then(|row| self.store.get(&row.addr))
    }

    fn clamp_selection(&mut self) {
        let visible = self.visible_rows().len();
        self.selected = self.selected.min(visible.saturating_sub(1));
    }

    fn warn(&mut self, title: &str, message: &str) {
        self.alert = Some(Alert {
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Command> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.running = false;
            return None;
        }

        if self.alert.is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char('q')) {
                self.alert = None;
            }
            return None;
        }

        match self.mode {
            Mode::Normal => self.handle_normal_key(key),
            Mode::Search => {
                self.handle_search_key(key);
                None
            }
            Mode::AddDevice => self.handle_add_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Option<Command> {
        match key.code {
            KeyCode::Char('q') => {
                self.running = false;
                None
            }
            KeyCode::Char('d') => Some(Command::Discover),
            KeyCode::Char('a') => {
                self.input.clear();
                self.mode = Mode::AddDevice;
                None
            }
            KeyCode::Char('o') => self.batch(|devices| Command::SetAll { on: true, devices }),
            KeyCode::Char('f') => self.batch(|devices| Command::SetAll { on: false, devices }),
            KeyCode::Char('r') => self.batch(Command::Refresh),
            KeyCode::Enter | KeyCode::Char(' ') => {
                self.selected_record().cloned().map(Command::Toggle)
            }
            KeyCode::Char('/') => {
                self.mode = Mode::Search;
                None
            }
            KeyCode::Esc => {
                self.query.clear();
                self.clamp_selection();
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.visible_rows().len() {
                    self.selected += 1;
                }
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                None
            }
            _ => None,
        }
    }

    fn batch<F>(&mut self, command: F) -> Option<Command>
    where
        F: FnOnce(Vec<DeviceRecord>) -> Command,
    {
        if self.store.is_empty() {
            self.warn(
                "No Devices",
                "No devices found. Please discover devices first.",
            );
            return None;
        }
        Some(command(self.store.records()))
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.query.clear();
                self.mode = Mode::Normal;
            }
            KeyCode::Enter => self.mode = Mode::Normal,
            KeyCode::Backspace => {
                self.query.pop();
            }
            KeyCode::Char(c) => self.query.push(c),
            _ => {}
        }
        self.clamp_selection();
    }

    fn handle_add_key(&mut self, key: KeyEvent) -> Option<Command> {
        match key.code {
            KeyCode::Esc => {
                self.input.clear();
                self.mode = Mode::Normal;
                None
            }
            KeyCode::Enter => {
                self.mode = Mode::Normal;
                let input = std::mem::take(&mut self.input);
                let input = input.trim();
                if input.is_empty() {
                    return None;
                }
                match input.parse::<IpAddr>() {
                    Ok(addr) => Some(Command::AddDevice(addr)),
                    Err(_) => {
                        self.warn(
                            "Add Device Error",
                            &format!("'{}' is not an IP address", input),
                        );
                        None
                    }
                }
            }
            KeyCode::Backspace => {
                self.input.pop();
                None
            }
            KeyCode::Char(c) => {
                self.input.push(c);
                None
            }
            _ => None,
        }
    }
}
