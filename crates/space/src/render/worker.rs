use std::io;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::SpaceConfig;

use super::{MirrorInput, RenderBackend, RenderMirror};

/// Feeds queued inputs into a [`RenderMirror`] and draws frames.
pub struct RenderWorker<B: RenderBackend> {
    mirror: RenderMirror<B>,
    inputs: Receiver<MirrorInput>,
    frame_interval: Duration,
}

impl<B: RenderBackend + 'static> RenderWorker<B> {
    pub fn new(mirror: RenderMirror<B>, inputs: Receiver<MirrorInput>, config: &SpaceConfig) -> Self {
        Self {
            mirror,
            inputs,
            frame_interval: config.frame_interval(),
        }
    }

    pub fn mirror(&self) -> &RenderMirror<B> {
        &self.mirror
    }

    /// Applies everything queued, then draws one frame.
    ///
    /// Used directly when rendering shares a thread with its caller.
    /// Returns `false` once shut down or once every sender is gone.
    pub fn pump(&mut self) -> bool {
        loop {
            match self.inputs.try_recv() {
                Ok(input) => {
                    if !self.mirror.apply(input) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return false,
            }
        }

        if let Err(e) = self.mirror.frame() {
            log::error!("Frame failed: {e}");
        }
        true
    }

    /// Runs the worker on its own thread. `control` is a sender on the same
    /// queue, used to deliver the shutdown.
    pub fn spawn(mut self, control: Sender<MirrorInput>) -> io::Result<RenderHandle<B>> {
        let thread = thread::Builder::new()
            .name("render".into())
            .spawn(move || {
                log::info!("Render loop running every {:?}", self.frame_interval);
                loop {
                    let started = Instant::now();
                    if !self.pump() {
                        break;
                    }
                    thread::sleep(self.frame_interval.saturating_sub(started.elapsed()));
                }
                log::info!("Render loop stopped");
                self.mirror
            })?;

        Ok(RenderHandle {
            control,
            thread: Some(thread),
        })
    }
}

pub struct RenderHandle<B: RenderBackend> {
    control: Sender<MirrorInput>,
    thread: Option<JoinHandle<RenderMirror<B>>>,
}

impl<B: RenderBackend> RenderHandle<B> {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the thread after it drains what is already queued and hands the
    /// mirror back. `None` on later calls.
    pub fn stop(&mut self) -> Option<RenderMirror<B>> {
        let thread = self.thread.take()?;
        // A closed queue means the thread already stopped on its own.
        let _ = self.control.send(MirrorInput::Shutdown);

        match thread.join() {
            Ok(mirror) => Some(mirror),
            Err(_) => {
                log::error!("Render thread panicked");
                None
            }
        }
    }
}

impl<B: RenderBackend> Drop for RenderHandle<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
