//! Single-slot OTP rendezvous between the login flow and the chat handler.
//!
//! The login flow parks itself in [`OtpChannel::request_code`]; the `/otp`
//! command handler calls [`OtpChannel::submit_code`] from its own task. At
//! most one request is outstanding at a time, the first submission resolves
//! it, and anything after that is reported back as unsolicited.

use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OtpError {
    #[error("no OTP received within {0:?}")]
    Timeout(Duration),

    #[error("an OTP request is already outstanding")]
    AlreadyPending,
}

/// Result of handing a code to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A waiting login flow received the code.
    Delivered,
    /// Nobody was waiting; the code was dropped.
    Unsolicited,
}

#[derive(Debug, Default)]
pub struct OtpChannel {
    slot: Mutex<Option<oneshot::Sender<String>>>,
}

/// Clears the slot when the waiting future finishes or is dropped.
struct SlotReset<'a>(&'a Mutex<Option<oneshot::Sender<String>>>);

impl Drop for SlotReset<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl OtpChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until a code is submitted or `timeout` elapses.
    pub async fn request_code(&self, timeout: Duration) -> Result<String, OtpError> {
        let rx = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(OtpError::AlreadyPending);
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(tx);
            rx
        };
        let _reset = SlotReset(&self.slot);
        info!("otp: waiting up to {:?} for a code", timeout);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(code)) => {
                info!("otp: code received");
                Ok(code)
            }
            // Sender dropped without a code; only the timeout path can do that
            // while we hold the slot, so report it the same way.
            Ok(Err(_)) | Err(_) => {
                warn!("otp: no code within {:?}", timeout);
                Err(OtpError::Timeout(timeout))
            }
        }
    }

    /// Resolve the outstanding request, if any. Never blocks on the waiter.
    pub fn submit_code(&self, code: &str) -> SubmitOutcome {
        let tx = self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        match tx {
            Some(tx) => match tx.send(code.to_string()) {
                Ok(()) => SubmitOutcome::Delivered,
                Err(_) => SubmitOutcome::Unsolicited,
            },
            None => {
                info!("otp: unsolicited code ignored");
                SubmitOutcome::Unsolicited
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}
