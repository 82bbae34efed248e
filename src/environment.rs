use anyhow::{anyhow, Result};

/// Host-side controls the session needs beyond the event stream.
///
/// Implementations wrap whatever surface renders the exam (a browser
/// bridge, a kiosk shell, a test double).
pub trait ExamEnvironment: Send {
    /// Asks the host to enter fullscreen. Refusal is an error, never a
    /// violation.
    fn request_fullscreen(&mut self) -> Result<()>;

    fn exit_fullscreen(&mut self) -> Result<()>;
}

/// Environment for hosts with no display control (daemons, replays).
#[derive(Clone, Debug, Default)]
pub struct HeadlessEnvironment {
    allow_fullscreen: bool,
    fullscreen: bool,
}

impl HeadlessEnvironment {
    pub fn new(allow_fullscreen: bool) -> Self {
        Self {
            allow_fullscreen,
            fullscreen: false,
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }
}

impl ExamEnvironment for HeadlessEnvironment {
    fn request_fullscreen(&mut self) -> Result<()> {
        if !self.allow_fullscreen {
            return Err(anyhow!("fullscreen not available on headless host"));
        }
        self.fullscreen = true;
        log::debug!("headless environment entered fullscreen");
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> Result<()> {
        self.fullscreen = false;
        log::debug!("headless environment left fullscreen");
        Ok(())
    }
}
