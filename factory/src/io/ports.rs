//! Local port allocation for deployments.
//!
//! Probing a port (bind, then release) leaves a window before the child process
//! binds it. All allocations in one process go through a single
//! [`PortAllocator`], which remembers handed-out ports until they are released,
//! so concurrent deploys never receive the same port from it. A foreign process
//! can still grab the port inside the window; the launch then fails.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use tracing::debug;

use crate::error::FactoryError;

#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    reserved: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    pub fn new(start: u16) -> Self {
        Self {
            start,
            reserved: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    /// Return the first port at or above `start` that is neither reserved here
    /// nor bound by anyone else, and reserve it.
    pub fn allocate(&self) -> Result<u16> {
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        for port in self.start..=u16::MAX {
            if reserved.contains(&port) {
                continue;
            }
            if port_is_free(port) {
                reserved.insert(port);
                debug!(port, "allocated port");
                return Ok(port);
            }
        }
        Err(FactoryError::NoFreePort { start: self.start }.into())
    }

    /// Mark `port` as in use without probing (e.g. a relaunch on a recorded port).
    pub fn reserve(&self, port: u16) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port);
    }

    pub fn release(&self, port: u16) {
        let removed = self
            .reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&port);
        if removed {
            debug!(port, "released port");
        }
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }
}

/// Try to bind `127.0.0.1:port`; the listener is dropped immediately.
pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
