//! A storage backend whose operations can be held open.
//!
//! Closing the gate parks the next thread that reaches the gated operation,
//! so a test can queue several requests for the background writer and know
//! they will be drained together.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use txdb_storage::{FaultPoint, StorageBackend, StorageResult};

#[derive(Debug, Default)]
struct GateState {
    closed: bool,
    waiting: usize,
}

/// Shared switch for a [`GatedBackend`].
#[derive(Debug, Clone, Default)]
pub struct IoGate {
    state: Arc<(Mutex<GateState>, Condvar)>,
}

impl IoGate {
    /// Makes the gated operation block until [`Self::open`].
    pub fn close(&self) {
        self.state.0.lock().closed = true;
    }

    /// Releases every held operation.
    pub fn open(&self) {
        self.state.0.lock().closed = false;
        self.state.1.notify_all();
    }

    /// Blocks until at least one operation is held at the closed gate.
    pub fn wait_until_held(&self) {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock();
        while state.waiting == 0 {
            cvar.wait(&mut state);
        }
    }

    fn pass(&self) {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock();
        if !state.closed {
            return;
        }
        state.waiting += 1;
        cvar.notify_all();
        while state.closed {
            cvar.wait(&mut state);
        }
        state.waiting -= 1;
    }
}

/// Wraps a backend so that one kind of operation waits on an [`IoGate`].
pub struct GatedBackend {
    inner: Box<dyn StorageBackend>,
    point: FaultPoint,
    gate: IoGate,
}

impl GatedBackend {
    /// Wraps `inner`, gating `point`. Returns the backend and its open gate.
    pub fn new(inner: Box<dyn StorageBackend>, point: FaultPoint) -> (Self, IoGate) {
        let gate = IoGate::default();
        (
            Self {
                inner,
                point,
                gate: gate.clone(),
            },
            gate,
        )
    }

    fn pass(&self, point: FaultPoint) {
        if self.point == point {
            self.gate.pass();
        }
    }
}

impl std::fmt::Debug for GatedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatedBackend")
            .field("point", &self.point)
            .field("gate", &self.gate)
            .finish()
    }
}

impl StorageBackend for GatedBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.pass(FaultPoint::Read);
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.pass(FaultPoint::Append);
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.pass(FaultPoint::Sync);
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.pass(FaultPoint::Truncate);
        self.inner.truncate(new_size)
    }
}
