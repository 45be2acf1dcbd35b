use crate::{Closed, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// The live handle and the index of the most recently used connector.
///
/// The lock is only held to read or swap the handle, never across I/O: operations run on
/// a cloned `Arc` so a rotation does not wait for them. Rotations themselves are
/// serialised by `rotation`.
pub(crate) struct ConnectionState<H> {
    live: RwLock<Live<H>>,
    rotation: Mutex<()>,
}

struct Live<H> {
    handle: Option<Arc<H>>,
    mru: Option<usize>,
    /// Incremented at every swap, lets callers detect a rotation performed by someone else.
    generation: u64,
    closed: bool,
}

/// Snapshot of the live handle.
pub(crate) struct Lease<H> {
    pub(crate) handle: Option<Arc<H>>,
    pub(crate) generation: u64,
}

impl<H> ConnectionState<H> {
    pub(crate) fn new(handle: Option<H>) -> Self {
        Self {
            live: RwLock::new(Live {
                handle: handle.map(Arc::new),
                mru: None,
                generation: 0,
                closed: false,
            }),
            rotation: Mutex::new(()),
        }
    }

    pub(crate) async fn lease(&self) -> Result<Lease<H>> {
        let live = self.live.read().await;
        if live.closed {
            return Err(Closed.into());
        }
        Ok(Lease {
            handle: live.handle.clone(),
            generation: live.generation,
        })
    }

    pub(crate) async fn mru(&self) -> Option<usize> {
        self.live.read().await.mru
    }

    pub(crate) async fn generation(&self) -> u64 {
        self.live.read().await.generation
    }

    /// Installs `handle` as the live one and returns the previous handle.
    ///
    /// Fails (returning the rejected handle) if the connection was closed meanwhile.
    pub(crate) async fn install(
        &self,
        handle: H,
        mru: usize,
    ) -> std::result::Result<(Arc<H>, Option<Arc<H>>), H> {
        let mut live = self.live.write().await;
        if live.closed {
            return Err(handle);
        }
        let handle = Arc::new(handle);
        let previous = live.handle.replace(handle.clone());
        live.mru = Some(mru);
        live.generation += 1;
        Ok((handle, previous))
    }

    /// Marks the state closed and takes the live handle, if any.
    pub(crate) async fn close(&self) -> Option<Arc<H>> {
        let mut live = self.live.write().await;
        live.closed = true;
        live.generation += 1;
        live.handle.take()
    }

    pub(crate) async fn rotation(&self) -> MutexGuard<'_, ()> {
        self.rotation.lock().await
    }
}
