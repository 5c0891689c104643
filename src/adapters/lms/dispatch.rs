//! Action name → CLI command table

use std::fmt;
use std::str::FromStr;

use super::codec::Command;
use super::error::{LmsError, Result};

/// Default volume step in percent
pub const DEFAULT_VOLUME_STEP: u8 = 5;

const STEP: &str = "{step}";

/// Abstract player actions exposed over HTTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Play,
    Pause,
    PowerOn,
    PowerOff,
    VolumeUp,
    VolumeDown,
    Next,
    Previous,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Play,
        Action::Pause,
        Action::PowerOn,
        Action::PowerOff,
        Action::VolumeUp,
        Action::VolumeDown,
        Action::Next,
        Action::Previous,
    ];

    /// Canonical route segment (`/volup`, `/{player}/volup`)
    pub fn route_name(self) -> &'static str {
        match self {
            Action::Play => "play",
            Action::Pause => "pause",
            Action::PowerOn => "poweron",
            Action::PowerOff => "poweroff",
            Action::VolumeUp => "volup",
            Action::VolumeDown => "voldown",
            Action::Next => "next",
            Action::Previous => "prev",
        }
    }

    /// Case-insensitive; spaces and underscores are ignored, so
    /// `"volume up"`, `"VOLUME_UP"` and `"volumeup"` are the same action.
    pub fn from_name(name: &str) -> Option<Self> {
        let folded: String = name
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        let action = match folded.as_str() {
            "play" => Action::Play,
            "pause" => Action::Pause,
            "poweron" => Action::PowerOn,
            "poweroff" => Action::PowerOff,
            "volup" | "volumeup" => Action::VolumeUp,
            "voldown" | "volumedown" => Action::VolumeDown,
            "next" | "skip" | "nexttrack" => Action::Next,
            "prev" | "previous" | "previoustrack" => Action::Previous,
            _ => return None,
        };
        Some(action)
    }
}

/// (action, verb, argument template)
const TABLE: &[(Action, &str, &[&str])] = &[
    (Action::Play, "play", &[]),
    (Action::Pause, "pause", &["1"]),
    (Action::PowerOn, "power", &["1"]),
    (Action::PowerOff, "power", &["0"]),
    (Action::VolumeUp, "mixer", &["volume", "+{step}"]),
    (Action::VolumeDown, "mixer", &["volume", "-{step}"]),
    (Action::Next, "playlist", &["index", "+1"]),
    (Action::Previous, "playlist", &["index", "-1"]),
];

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route_name())
    }
}

impl FromStr for Action {
    type Err = LmsError;

    fn from_str(s: &str) -> Result<Self> {
        Action::from_name(s).ok_or_else(|| {
            LmsError::UnknownAction(format!(
                "'{}'; command must be one of {:?}",
                s,
                Action::ALL.map(Action::route_name)
            ))
        })
    }
}

#[derive(Debug, Clone)]
struct ResolvedEntry {
    action: Action,
    verb: &'static str,
    args: Vec<String>,
}

/// Dispatch table with the volume step resolved once at construction
#[derive(Debug, Clone)]
pub struct Dispatcher {
    volume_step: u8,
    entries: Vec<ResolvedEntry>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_STEP)
    }
}

impl Dispatcher {
    pub fn new(volume_step: u8) -> Self {
        let step = volume_step.to_string();
        let entries = TABLE
            .iter()
            .map(|&(action, verb, template)| ResolvedEntry {
                action,
                verb,
                args: template.iter().map(|a| a.replace(STEP, &step)).collect(),
            })
            .collect();

        Self {
            volume_step,
            entries,
        }
    }

    pub fn volume_step(&self) -> u8 {
        self.volume_step
    }

    /// Concrete command for `action` addressed to `native`
    pub fn command(&self, action: Action, native: &str) -> Result<Command> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.action == action)
            .ok_or_else(|| LmsError::UnknownAction(action.to_string()))?;

        Ok(Command::for_player(native, entry.verb).args(entry.args.iter().cloned()))
    }

    /// Parse an action name and build its command
    pub fn dispatch(&self, action_name: &str, native: &str) -> Result<Command> {
        let action: Action = action_name.parse()?;
        self.command(action, native)
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.action.route_name()).collect()
    }
}
