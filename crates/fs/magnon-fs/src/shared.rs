//! Task-facing volume wrapper.
//!
//! [`SharedVolume`] is the entry point for concurrent tasks: it serializes
//! every operation behind an async [`Mutex`] with a bounded acquire, so
//! writers receive distinct monotonic ids and readers observe only completed
//! appends. The guard is released on every exit path by RAII.

use magnon_core::sync::{Mutex, MutexGuard};
use magnon_core::task::yield_now;
use magnon_driver_api::block::BlockDevice;

use crate::error::FsError;
use crate::id::MessageId;
use crate::slot;
use crate::volume::Volume;

/// Try-lock attempts (one cooperative yield apart) before reporting
/// [`FsError::Busy`]; roughly the original's 200 ms semaphore wait.
const ACQUIRE_RETRIES: usize = 1024;

/// A volume shared between cooperative tasks.
pub struct SharedVolume<D: BlockDevice> {
    inner: Mutex<Volume<D>>,
}

impl<D: BlockDevice> SharedVolume<D> {
    /// Wraps a mounted volume for shared use.
    #[must_use]
    pub fn new(volume: Volume<D>) -> Self {
        Self {
            inner: Mutex::new(volume),
        }
    }

    /// Recovers exclusive ownership of the volume (e.g. to unmount it).
    #[must_use]
    pub fn into_inner(self) -> Volume<D> {
        self.inner.into_inner()
    }

    /// Acquires the volume mutex, yielding between attempts.
    ///
    /// # Errors
    ///
    /// [`FsError::Busy`] after [`ACQUIRE_RETRIES`] failed attempts.
    async fn acquire(&self) -> Result<MutexGuard<'_, Volume<D>>, FsError> {
        for _ in 0..ACQUIRE_RETRIES {
            if let Some(guard) = self.inner.try_lock() {
                return Ok(guard);
            }
            yield_now().await;
        }
        Err(FsError::Busy)
    }

    /// Appends one message; see [`Volume::write`].
    ///
    /// # Errors
    ///
    /// As [`Volume::write`], plus [`FsError::Busy`] on mutex timeout.
    pub async fn write(&self, payload: &[u8]) -> Result<MessageId, FsError> {
        // Size screening happens before the lock is taken.
        if !(slot::MIN_MESSAGE_LEN..=slot::MAX_MESSAGE_LEN).contains(&payload.len()) {
            return Err(FsError::InvalidSize);
        }
        let mut vol = self.acquire().await?;
        vol.write(payload).await
    }

    /// Reads message `id` into `out`; see [`Volume::read`].
    ///
    /// # Errors
    ///
    /// As [`Volume::read`], plus [`FsError::Busy`] on mutex timeout.
    pub async fn read(&self, id: MessageId, out: &mut [u8]) -> Result<usize, FsError> {
        let mut vol = self.acquire().await?;
        vol.read(id, out).await
    }

    /// Returns the payload length of message `id`; see [`Volume::message_len`].
    ///
    /// # Errors
    ///
    /// As [`Volume::message_len`], plus [`FsError::Busy`] on mutex timeout.
    pub async fn message_len(&self, id: MessageId) -> Result<usize, FsError> {
        let mut vol = self.acquire().await?;
        vol.message_len(id).await
    }

    /// Blanks message `id` in place; see [`Volume::erase`].
    ///
    /// # Errors
    ///
    /// As [`Volume::erase`], plus [`FsError::Busy`] on mutex timeout.
    pub async fn erase(&self, id: MessageId) -> Result<(), FsError> {
        let mut vol = self.acquire().await?;
        vol.erase(id).await
    }

    /// Overwrites message `id` in place; see [`Volume::update`].
    ///
    /// # Errors
    ///
    /// As [`Volume::update`], plus [`FsError::Busy`] on mutex timeout.
    pub async fn update(&self, id: MessageId, payload: &[u8]) -> Result<(), FsError> {
        let mut vol = self.acquire().await?;
        vol.update(id, payload).await
    }
}
