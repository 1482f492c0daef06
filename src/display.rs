use anyhow::Result;
use opencv::{highgui, prelude::*};
use std::time::Duration;

/// Window that shows annotated frames and reports key presses.
pub trait Display {
    fn show(&mut self, frame: &Mat) -> Result<()>;

    /// Non-blocking key read. `None` when no key is pending.
    fn poll_key(&mut self) -> Result<Option<i32>>;

    /// Wait for a key press, forever when `timeout` is `None`.
    ///
    /// Returns `None` when the wait ended without a key, e.g. no window is left.
    fn wait_key(&mut self, timeout: Option<Duration>) -> Result<Option<i32>>;

    fn close(&mut self) -> Result<()>;
}

/// Poll interval of the running loop, in milliseconds.
const POLL_DELAY_MS: i32 = 5;

pub struct HighguiWindow {
    name: String,
}

impl HighguiWindow {
    pub fn open(name: &str, width: i32, height: i32) -> Result<Self> {
        highgui::named_window(name, highgui::WINDOW_NORMAL)?;
        highgui::resize_window(name, width, height)?;
        Ok(Self { name: name.to_string() })
    }
}

fn key_code(key: i32) -> Option<i32> {
    (key >= 0).then_some(key)
}

impl Display for HighguiWindow {
    fn show(&mut self, frame: &Mat) -> Result<()> {
        highgui::imshow(&self.name, frame)?;
        Ok(())
    }

    fn poll_key(&mut self) -> Result<Option<i32>> {
        Ok(key_code(highgui::wait_key(POLL_DELAY_MS)?))
    }

    fn wait_key(&mut self, timeout: Option<Duration>) -> Result<Option<i32>> {
        // highgui treats a zero delay as "wait forever"
        let delay = match timeout {
            Some(t) => (t.as_millis() as i32).max(1),
            None => 0,
        };
        Ok(key_code(highgui::wait_key(delay)?))
    }

    fn close(&mut self) -> Result<()> {
        highgui::destroy_window(&self.name)?;
        Ok(())
    }
}
