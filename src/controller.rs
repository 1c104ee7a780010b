use std::time::Duration;
use tracing::trace;

use crate::domain::{GridConfig, GridError, Message};
use crate::model::Model;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &GridConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, GridError> {
        if !event::poll(Duration::from_millis(self.event_poll_time))? {
            return Ok(None);
        }
        let message = match event::read()? {
            Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                self.route_key(key, model.raw_keyevents())
            }
            Event::Resize(width, height) => Some(Message::Resize(width as usize, height as usize)),
            _ => None,
        };
        Ok(message)
    }

    /// Ctrl-C always quits, other keys go to the input line while it has focus.
    pub fn route_key(&self, key: event::KeyEvent, raw_keys: bool) -> Option<Message> {
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            _ if raw_keys => Some(Message::RawKey(key)),
            _ => self.handle_key(key),
        }
    }

    pub fn handle_key(&self, key: event::KeyEvent) -> Option<Message> {
        let message = match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            (KeyCode::Char('q'), _) => Some(Message::Quit),
            (KeyCode::Up | KeyCode::Char('k'), _) => Some(Message::MoveUp),
            (KeyCode::Down | KeyCode::Char('j'), _) => Some(Message::MoveDown),
            (KeyCode::Left | KeyCode::Char('h'), _) => Some(Message::MoveLeft),
            (KeyCode::Right | KeyCode::Char('l'), _) => Some(Message::MoveRight),
            (KeyCode::Enter, _) => Some(Message::Enter),
            (KeyCode::Char(' '), _) => Some(Message::ToggleSelection),
            (KeyCode::Char('e'), _) => Some(Message::ExpandAll),
            (KeyCode::Char('c'), _) => Some(Message::CollapseAll),
            (KeyCode::PageDown | KeyCode::Char('n'), _) => Some(Message::NextPage),
            (KeyCode::PageUp | KeyCode::Char('p'), _) => Some(Message::PrevPage),
            (KeyCode::Home | KeyCode::Char('g'), _) => Some(Message::FirstPage),
            (KeyCode::End | KeyCode::Char('G'), _) => Some(Message::LastPage),
            (KeyCode::Char('+'), _) => Some(Message::GrowPageSize),
            (KeyCode::Char('-'), _) => Some(Message::ShrinkPageSize),
            (KeyCode::Char('/'), _) => Some(Message::Search),
            (KeyCode::Char('s'), _) => Some(Message::ToggleSort),
            (KeyCode::Char('f'), _) => Some(Message::Filter),
            (KeyCode::Char('r'), _) => Some(Message::ResetFilter),
            (KeyCode::Char('y'), _) => Some(Message::CopyCell),
            (KeyCode::Char('Y'), _) => Some(Message::CopyRow),
            (KeyCode::Char('?'), _) => Some(Message::Help),
            (KeyCode::Esc, _) => Some(Message::Exit),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
