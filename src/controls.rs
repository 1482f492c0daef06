use serde::{Deserialize, Serialize};

/// Keyboard bindings read from the display window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub quit: char,
    pub pause: char,
    pub capture: char,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            quit: 'q',
            pause: 's',
            capture: 'p',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    Pause,
    Capture,
    Other,
}

impl KeyBindings {
    /// Map a raw key code to an action. Negative codes mean no key was pressed.
    pub fn action_for(&self, key: i32) -> Option<KeyAction> {
        if key < 0 {
            return None;
        }
        // highgui may report modifier bits above the low byte
        let Some(ch) = char::from_u32((key & 0xFF) as u32) else {
            return Some(KeyAction::Other);
        };
        Some(if ch == self.quit {
            KeyAction::Quit
        } else if ch == self.pause {
            KeyAction::Pause
        } else if ch == self.capture {
            KeyAction::Capture
        } else {
            KeyAction::Other
        })
    }
}

/// States of the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Frame frozen until the blocking wait returns.
    Paused,
    /// The current annotated frame is saved, then the loop resumes.
    Captured,
    Stopped,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped)
    }
}

/// Pure transition function of the main loop.
pub fn next_state(state: LoopState, action: Option<KeyAction>) -> LoopState {
    use KeyAction::*;
    use LoopState::*;

    match (state, action) {
        (Stopped, _) => Stopped,
        (_, Some(Quit)) => Stopped,
        // a wait that ends without a key (window gone) resumes too
        (Paused, _) => Running,
        (Running | Captured, Some(Pause)) => Paused,
        (Running | Captured, Some(Capture)) => Captured,
        (Running | Captured, Some(Other) | None) => Running,
    }
}
