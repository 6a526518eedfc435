use crate::display::{Display, InputEvent};
use crate::error::{ExperimentError, Result};
use std::time::{Duration, Instant};

/// Keys that end the session from any key wait.
pub const ABORT_KEYS: &[&str] = &["escape"];

/// An accepted key press with its time on the session clock (ms)
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPress {
    pub key: String,
    pub timestamp: f64,
}

/// Keyboard listener: filters key events coming from a [`Display`].
#[derive(Debug, Clone, Default)]
pub struct Keyboard {
    keylist: Option<Vec<String>>,
    timeout: Option<Duration>,
}

impl Keyboard {
    /// `keylist: None` accepts every key; `timeout: None` waits forever.
    pub fn new(keylist: Option<Vec<String>>, timeout: Option<Duration>) -> Self {
        Self { keylist, timeout }
    }

    pub fn keylist(&self) -> Option<&[String]> {
        self.keylist.as_deref()
    }

    /// Blocks until a key from the default key list is pressed.
    pub fn get_key(&self, display: &mut Display, flush: bool) -> Result<Option<KeyPress>> {
        self.get_key_with(display, None, self.timeout, flush)
    }

    /// Blocks until a key from `keylist` (or the default list) is pressed,
    /// or `timeout` passes, in which case `None` is returned. With
    /// `flush` set, presses queued before the call are discarded.
    pub fn get_key_with(
        &self,
        display: &mut Display,
        keylist: Option<&[&str]>,
        timeout: Option<Duration>,
        flush: bool,
    ) -> Result<Option<KeyPress>> {
        if flush {
            display.flush_input()?;
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(None);
                    }
                    Some(left)
                }
                None => None,
            };

            match display.next_input(remaining)? {
                Some(InputEvent::Key { name, at }) => {
                    if ABORT_KEYS.contains(&name.as_str()) {
                        return Err(ExperimentError::Aborted(format!("`{name}` pressed")));
                    }
                    if self.accepts(keylist, &name) {
                        let timestamp = display.timer().ms_at(at);
                        log::debug!("key `{}` at {:.3} ms", name, timestamp);
                        return Ok(Some(KeyPress {
                            key: name,
                            timestamp,
                        }));
                    }
                    log::trace!("ignoring key `{}`", name);
                }
                Some(InputEvent::CloseRequested) => {
                    return Err(ExperimentError::Aborted("window closed".to_string()));
                }
                None => {}
            }
        }
    }

    fn accepts(&self, keylist: Option<&[&str]>, name: &str) -> bool {
        match (keylist, &self.keylist) {
            (Some(keys), _) => keys.contains(&name),
            (None, Some(keys)) => keys.iter().any(|k| k == name),
            (None, None) => true,
        }
    }
}
