//! Serialised access from async code
//!
//! A controller is not safe to share: one send/reply cycle must finish before
//! the next starts. [`ControllerHandle`] moves the controller onto a
//! dedicated control thread and feeds it requests through a mailbox, so any
//! number of async tasks can issue commands without interleaving them.

use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::calibration::Calibration;
use crate::controller::Controller;
use crate::dialect::{DialectKind, PanTilt, RunDirection};
use crate::protocol::ProtocolError;

const MAILBOX_DEPTH: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, ProtocolError>>;

enum Request {
    Open {
        device: String,
        reply: Reply<()>,
    },
    Close {
        reply: Reply<()>,
    },
    Pan {
        speed: f64,
        v: f64,
        reply: Reply<()>,
    },
    Tilt {
        speed: f64,
        v: f64,
        reply: Reply<()>,
    },
    Move {
        pan_speed: f64,
        pan: f64,
        tilt_speed: f64,
        tilt: f64,
        reply: Reply<()>,
    },
    Zoom {
        speed: u8,
        z: f64,
        reply: Reply<()>,
    },
    ZoomTo {
        speed: u8,
        fraction: f64,
        reply: Reply<()>,
    },
    Run {
        pan_speed: f64,
        tilt_speed: f64,
        direction: RunDirection,
        start: bool,
        reply: Reply<()>,
    },
    Query {
        reply: Reply<PanTilt>,
    },
    Calibration {
        reply: Reply<Option<Calibration>>,
    },
    ResetCancellation {
        reply: Reply<CancellationToken>,
    },
}

fn serve(mut controller: Controller, mut rx: mpsc::Receiver<Request>) {
    // a failed reply send only means the caller stopped waiting
    while let Some(request) = rx.blocking_recv() {
        match request {
            Request::Open { device, reply } => {
                let _ = reply.send(controller.open(&device));
            }
            Request::Close { reply } => {
                controller.close();
                let _ = reply.send(Ok(()));
            }
            Request::Pan { speed, v, reply } => {
                let _ = reply.send(controller.pan(speed, v));
            }
            Request::Tilt { speed, v, reply } => {
                let _ = reply.send(controller.tilt(speed, v));
            }
            Request::Move {
                pan_speed,
                pan,
                tilt_speed,
                tilt,
                reply,
            } => {
                let _ = reply.send(controller.move_to(pan_speed, pan, tilt_speed, tilt));
            }
            Request::Zoom { speed, z, reply } => {
                let _ = reply.send(controller.zoom(speed, z));
            }
            Request::ZoomTo {
                speed,
                fraction,
                reply,
            } => {
                let _ = reply.send(controller.zoom_to(speed, fraction));
            }
            Request::Run {
                pan_speed,
                tilt_speed,
                direction,
                start,
                reply,
            } => {
                let _ = reply.send(controller.run(pan_speed, tilt_speed, direction, start));
            }
            Request::Query { reply } => {
                let _ = reply.send(controller.query());
            }
            Request::Calibration { reply } => {
                let _ = reply.send(Ok(controller.calibration().cloned()));
            }
            Request::ResetCancellation { reply } => {
                controller.reset_cancellation();
                let _ = reply.send(Ok(controller.cancellation_token()));
            }
        }
    }
    controller.close();
    debug!("control thread finished");
}

/// Async handle to a controller running on its own thread
pub struct ControllerHandle {
    kind: DialectKind,
    tx: Option<mpsc::Sender<Request>>,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    /// Move `controller` onto a new control thread
    pub fn spawn(controller: Controller) -> Result<Self, ProtocolError> {
        let kind = controller.kind();
        let cancel = controller.cancellation_token();
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        let thread = thread::Builder::new()
            .name(format!("camctl-{}", kind))
            .spawn(move || serve(controller, rx))?;

        Ok(Self {
            kind,
            tx: Some(tx),
            cancel,
            thread: Some(thread),
        })
    }

    /// Dialect of the wrapped controller
    pub fn kind(&self) -> DialectKind {
        self.kind
    }

    /// Token that aborts the in-flight read when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Install a fresh token after a cancellation. Tokens handed out earlier
    /// stay cancelled and no longer affect the controller.
    pub async fn reset_cancellation(&mut self) -> Result<(), ProtocolError> {
        self.cancel = self
            .call(|reply| Request::ResetCancellation { reply })
            .await?;
        Ok(())
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, ProtocolError> {
        let tx = self.tx.as_ref().ok_or(ProtocolError::NotConnected)?;
        let (reply, rx) = oneshot::channel();
        tx.send(make(reply))
            .await
            .map_err(|_| ProtocolError::NotConnected)?;
        rx.await.map_err(|_| ProtocolError::NotConnected)?
    }

    /// See [`Controller::open`]
    pub async fn open(&self, device: &str) -> Result<(), ProtocolError> {
        let device = device.to_string();
        self.call(|reply| Request::Open { device, reply }).await
    }

    /// See [`Controller::close`]
    pub async fn close(&self) -> Result<(), ProtocolError> {
        self.call(|reply| Request::Close { reply }).await
    }

    /// See [`Controller::pan`]
    pub async fn pan(&self, speed: f64, v: f64) -> Result<(), ProtocolError> {
        self.call(|reply| Request::Pan { speed, v, reply }).await
    }

    /// See [`Controller::tilt`]
    pub async fn tilt(&self, speed: f64, v: f64) -> Result<(), ProtocolError> {
        self.call(|reply| Request::Tilt { speed, v, reply }).await
    }

    /// See [`Controller::move_to`]
    pub async fn move_to(
        &self,
        pan_speed: f64,
        pan: f64,
        tilt_speed: f64,
        tilt: f64,
    ) -> Result<(), ProtocolError> {
        self.call(|reply| Request::Move {
            pan_speed,
            pan,
            tilt_speed,
            tilt,
            reply,
        })
        .await
    }

    /// See [`Controller::zoom`]
    pub async fn zoom(&self, speed: u8, z: f64) -> Result<(), ProtocolError> {
        self.call(|reply| Request::Zoom { speed, z, reply }).await
    }

    /// See [`Controller::zoom_to`]
    pub async fn zoom_to(&self, speed: u8, fraction: f64) -> Result<(), ProtocolError> {
        self.call(|reply| Request::ZoomTo {
            speed,
            fraction,
            reply,
        })
        .await
    }

    /// See [`Controller::run`]
    pub async fn run(
        &self,
        pan_speed: f64,
        tilt_speed: f64,
        direction: RunDirection,
        start: bool,
    ) -> Result<(), ProtocolError> {
        self.call(|reply| Request::Run {
            pan_speed,
            tilt_speed,
            direction,
            start,
            reply,
        })
        .await
    }

    /// See [`Controller::query`]
    pub async fn query(&self) -> Result<PanTilt, ProtocolError> {
        self.call(|reply| Request::Query { reply }).await
    }

    /// Snapshot of the calibration, `None` until open succeeds
    pub async fn calibration(&self) -> Result<Option<Calibration>, ProtocolError> {
        self.call(|reply| Request::Calibration { reply }).await
    }

    /// Abort any in-flight read, close the device and join the control thread
    pub async fn shutdown(mut self) -> Result<(), ProtocolError> {
        self.cancel.cancel();
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| ProtocolError::IoError(std::io::Error::other(e)))?;
            if joined.is_err() {
                warn!("control thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // the thread closes the device once the mailbox drains
            self.cancel.cancel();
            self.tx.take();
        }
    }
}
