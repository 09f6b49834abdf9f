//! Single-key controls read from the terminal in raw mode.
//!
//! Keys act as soon as they are pressed. Raw mode swallows the interrupt
//! signal, so Ctrl+C is mapped to [`KeyCommand::Quit`] here as well.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

const KEY_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyCommand {
    TogglePause,
    VolumeUp,
    VolumeDown,
    VolumeReset,
    Quit,
}

impl KeyCommand {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'p' | 'P' | ' ' => Some(KeyCommand::TogglePause),
            '+' | ')' => Some(KeyCommand::VolumeUp),
            '-' | '(' => Some(KeyCommand::VolumeDown),
            '^' | '0' => Some(KeyCommand::VolumeReset),
            'q' | 'Q' => Some(KeyCommand::Quit),
            _ => None,
        }
    }

    pub fn from_key(key: &KeyEvent) -> Option<Self> {
        if key.kind == KeyEventKind::Release {
            return None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(KeyCommand::Quit)
            }
            KeyCode::Char(c) => Self::from_char(c),
            KeyCode::Up => Some(KeyCommand::VolumeUp),
            KeyCode::Down => Some(KeyCommand::VolumeDown),
            KeyCode::Esc => Some(KeyCommand::Quit),
            _ => None,
        }
    }
}

pub const HELP: &str = "keys: p pause/resume, + volume up, - volume down, 0 reset volume, q quit";

/// Holds the terminal in raw mode; restores it when dropped.
pub struct RawMode(());

impl RawMode {
    pub fn enable() -> Result<Self> {
        enable_raw_mode().context("enable raw mode")?;
        Ok(Self(()))
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        disable_raw_mode().ok();
    }
}

/// Forward key presses to `tx` until `stop` is raised or the receiver is
/// gone. Read errors end the thread; playback continues without keys.
pub fn spawn_key_reader(
    tx: Sender<KeyCommand>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("terminal-keys".into())
        .spawn(move || {
            if let Err(e) = read_keys(&tx, &stop) {
                tracing::debug!("key controls disabled: {e:#}");
            }
        })
}

fn read_keys(tx: &Sender<KeyCommand>, stop: &AtomicBool) -> Result<()> {
    while !stop.load(Ordering::Relaxed) {
        if !event::poll(KEY_POLL).context("poll terminal events")? {
            continue;
        }
        if let CEvent::Key(k) = event::read().context("read terminal event")? {
            if let Some(cmd) = KeyCommand::from_key(&k) {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn character_keys_map_to_commands() {
        let typed: Vec<_> = "p+-0q"
            .chars()
            .filter_map(|c| KeyCommand::from_key(&press(KeyCode::Char(c))))
            .collect();
        assert_eq!(
            typed,
            vec![
                KeyCommand::TogglePause,
                KeyCommand::VolumeUp,
                KeyCommand::VolumeDown,
                KeyCommand::VolumeReset,
                KeyCommand::Quit,
            ]
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        assert_eq!(KeyCommand::from_key(&press(KeyCode::Char('x'))), None);
        assert_eq!(KeyCommand::from_key(&press(KeyCode::Enter)), None);
        assert_eq!(KeyCommand::from_key(&press(KeyCode::Tab)), None);
    }

    #[test]
    fn ctrl_c_quits_in_raw_mode() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyCommand::from_key(&key), Some(KeyCommand::Quit));
        assert_eq!(KeyCommand::from_key(&press(KeyCode::Char('c'))), None);
    }

    #[test]
    fn arrows_adjust_volume() {
        assert_eq!(KeyCommand::from_key(&press(KeyCode::Up)), Some(KeyCommand::VolumeUp));
        assert_eq!(KeyCommand::from_key(&press(KeyCode::Down)), Some(KeyCommand::VolumeDown));
    }

    #[test]
    fn key_release_is_ignored() {
        let mut key = press(KeyCode::Char('p'));
        key.kind = KeyEventKind::Release;
        assert_eq!(KeyCommand::from_key(&key), None);
    }
}
