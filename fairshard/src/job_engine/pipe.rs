// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use async_channel::{Receiver, Sender};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("pipe closed")]
pub struct Closed;

/// Create an unbounded pipe. Messages from one inlet arrive in the order they
/// were sent; nothing is promised across different inlets.
pub fn pipe<T>() -> (Inlet<T>, Outlet<T>) {
    let (tx, rx) = async_channel::unbounded();
    (Inlet { tx }, Outlet { rx })
}

/// Sending end. Cloning yields another sender of the same pipe.
#[derive(Debug)]
pub struct Inlet<T> {
    tx: Sender<T>,
}

impl<T> Clone for Inlet<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Inlet<T> {
    pub async fn send(&self, msg: T) -> Result<(), Closed> {
        self.tx.send(msg).await.map_err(|_| Closed)
    }

    /// Hand a message over without an executor. The pipe is unbounded, so the
    /// only possible failure is closure.
    pub fn send_now(&self, msg: T) -> Result<(), Closed> {
        self.tx.try_send(msg).map_err(|_| Closed)
    }

    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving end. Clones share the same queue (each message goes to exactly
/// one receiver).
#[derive(Debug)]
pub struct Outlet<T> {
    rx: Receiver<T>,
}

impl<T> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> Outlet<T> {
    /// Wait for the next message. Returns `Closed` once the pipe is closed and
    /// drained, or when every inlet is gone.
    pub async fn recv(&self) -> Result<T, Closed> {
        self.rx.recv().await.map_err(|_| Closed)
    }

    pub fn recv_blocking(&self) -> Result<T, Closed> {
        self.rx.recv_blocking().map_err(|_| Closed)
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn close(&self) -> bool {
        self.rx.close()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
