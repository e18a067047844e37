//! Threads that own an audio stream
//!
//! CPAL streams must stay on the thread that built them. A [`DeviceThread`]
//! starts such a thread and returns at once: the setup outcome is read later
//! with [`DeviceThread::poll_ready`], and [`DeviceThread::stop`] signals the
//! thread without joining it. The player task never waits on a device.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::error::EtudeError;

/// Setup report sent once by the thread body.
pub(crate) type Ready = Sender<Result<(), EtudeError>>;

pub(crate) struct DeviceThread {
    name: &'static str,
    shutdown: Option<Sender<()>>,
    /// Pending until the body reports its setup
    ready: Option<Receiver<Result<(), EtudeError>>>,
}

impl DeviceThread {
    /// Run `body` on a thread named `name`.
    ///
    /// `body` reports its setup on the `Ready` sender, then keeps its device
    /// until the shutdown receiver fires or disconnects.
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> Result<Self, EtudeError>
    where
        F: FnOnce(Receiver<()>, Ready) + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(shutdown_rx, ready_tx))?;
        Ok(Self {
            name,
            shutdown: Some(shutdown_tx),
            ready: Some(ready_rx),
        })
    }

    /// `Ok(true)` once the device runs, `Ok(false)` while it is starting.
    ///
    /// A failed setup is returned once as an error; the thread is stopped
    /// and every later call fails too.
    pub(crate) fn poll_ready(&mut self) -> Result<bool, EtudeError> {
        if self.shutdown.is_none() {
            return Err(EtudeError::DeviceError(format!("{} stopped", self.name)));
        }
        let Some(ready) = self.ready.as_ref() else {
            return Ok(true);
        };
        match ready.try_recv() {
            Ok(Ok(())) => {
                self.ready = None;
                log::debug!("{} running", self.name);
                Ok(true)
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => {
                self.stop();
                Err(EtudeError::DeviceError(format!(
                    "{} exited during setup",
                    self.name
                )))
            }
        }
    }

    /// Tell the thread to release its device. Does not wait for it.
    pub(crate) fn stop(&mut self) {
        self.ready = None;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.try_send(());
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.stop();
    }
}
