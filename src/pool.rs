//! Generation-tagged object pools.
//!
//! Every GPU resource in this crate is referenced through a [`Handle`]: a
//! 32-bit slot index paired with a 32-bit generation counter. The pool bumps
//! the generation whenever a slot is recycled, so a handle kept across a
//! destroy is detected as stale instead of silently aliasing the new occupant.
//!
//! # Overview
//!
//! - [`Pool`] is the slab itself: slot storage plus a free list threaded
//!   through per-slot metadata.
//! - [`Handle`] is a `Copy` value; generation 0 is reserved for "invalid".
//! - [`Holder`] is the RAII owner: dropping it retires the handle onto a
//!   shared queue that the context drains at the next frame boundary.

use std::{
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use thiserror::Error;

const FREE_LIST_END: u32 = u32::MAX;
const INVALID_GENERATION: u32 = 0;

/// Errors produced by [`Pool`] lookups and destroys.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The handle's generation is the reserved invalid value.
    #[error("invalid handle")]
    InvalidHandle,
    /// The handle's generation does not match the slot's current generation.
    #[error("stale handle")]
    StaleHandle,
    /// The handle's index lies beyond the pool's slot range.
    #[error("index out of bounds")]
    IndexOutOfBounds,
}

/// A generation-tagged reference to an entry in a [`Pool<T>`].
///
/// Handles are plain 64-bit values: cheap to copy, hash and compare. They do
/// not keep the entry alive; use [`Holder`] for ownership.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// The invalid handle. Equal to `Handle::default()`.
    pub const INVALID: Self = Self {
        index: 0,
        generation: INVALID_GENERATION,
        _marker: PhantomData,
    };

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn valid(&self) -> bool {
        self.generation != INVALID_GENERATION
    }

    pub fn empty(&self) -> bool {
        self.generation == INVALID_GENERATION
    }
}

// Manual impls: deriving would bound `T`, which is only a phantom tag.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}
impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}
impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

struct SlotMeta {
    generation: u32,
    next_free: u32,
}

impl Default for SlotMeta {
    fn default() -> Self {
        Self {
            generation: 1,
            next_free: FREE_LIST_END,
        }
    }
}

/// A slab of `T` with a free list and per-slot generation counters.
///
/// Destroyed slots keep their (incremented) generation, so stale handles are
/// rejected even after the slot has been reused. Iteration walks slots in
/// index order and yields `None` for holes; consumers that iterate (the
/// descriptor manager) must tolerate them.
pub struct Pool<T> {
    slots: Vec<Option<T>>,
    meta: Vec<SlotMeta>,
    free_list_head: u32,
    live: u32,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            meta: Vec::new(),
            free_list_head: FREE_LIST_END,
            live: 0,
        }
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, reusing the free-list head when one exists.
    ///
    /// A reused slot keeps the generation it was given when it was destroyed,
    /// so handles from the previous life remain stale.
    pub fn create(&mut self, value: T) -> Handle<T> {
        let index = if self.free_list_head != FREE_LIST_END {
            let index = self.free_list_head;
            self.free_list_head = self.meta[index as usize].next_free;
            self.meta[index as usize].next_free = FREE_LIST_END;
            self.slots[index as usize] = Some(value);
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(value));
            self.meta.push(SlotMeta::default());
            index
        };
        self.live += 1;
        Handle::new(index, self.meta[index as usize].generation)
    }

    /// Removes the entry, bumps the slot generation and frees the slot.
    pub fn destroy(&mut self, handle: Handle<T>) -> Result<T, PoolError> {
        let index = self.check(handle)? as usize;
        let value = self.slots[index].take().ok_or(PoolError::InvalidHandle)?;
        let meta = &mut self.meta[index];
        meta.generation = meta.generation.wrapping_add(1);
        // Generation 0 encodes "invalid"; skip it on wrap.
        if meta.generation == INVALID_GENERATION {
            meta.generation = 1;
        }
        meta.next_free = self.free_list_head;
        self.free_list_head = index as u32;
        self.live -= 1;
        Ok(value)
    }

    pub fn get(&self, handle: Handle<T>) -> Result<&T, PoolError> {
        let index = self.check(handle)? as usize;
        self.slots[index].as_ref().ok_or(PoolError::InvalidHandle)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T, PoolError> {
        let index = self.check(handle)? as usize;
        self.slots[index].as_mut().ok_or(PoolError::InvalidHandle)
    }

    fn check(&self, handle: Handle<T>) -> Result<u32, PoolError> {
        if handle.empty() {
            return Err(PoolError::InvalidHandle);
        }
        let index = handle.index();
        if index as usize >= self.slots.len() {
            return Err(PoolError::IndexOutOfBounds);
        }
        if handle.generation() != self.meta[index as usize].generation {
            return Err(PoolError::StaleHandle);
        }
        Ok(index)
    }

    /// Number of live entries.
    pub fn size(&self) -> u32 {
        self.live
    }

    /// Number of slots, live or not. This is the capacity the descriptor
    /// table has to cover.
    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.meta.clear();
        self.free_list_head = FREE_LIST_END;
        self.live = 0;
    }

    /// Iterates slots in index order, yielding `None` for holes.
    pub fn iter(&self) -> impl Iterator<Item = Option<&T>> {
        self.slots.iter().map(Option::as_ref)
    }

    /// Drains every live entry, leaving the pool empty.
    pub(crate) fn drain_live(&mut self) -> Vec<T> {
        let out = self.slots.iter_mut().filter_map(Option::take).collect();
        self.clear();
        out
    }

    /// Reconstructs the current handle for a slot index. Returns the invalid
    /// handle when the index is out of range or the slot is free.
    pub fn handle_for_index(&self, index: u32) -> Handle<T> {
        if index as usize >= self.slots.len() || self.slots[index as usize].is_none() {
            return Handle::INVALID;
        }
        Handle::new(index, self.meta[index as usize].generation)
    }
}

impl<T: PartialEq> Pool<T> {
    /// Linear scan for an entry equal to `value`.
    pub fn find_by_equality(&self, value: &T) -> Handle<T> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.as_ref() == Some(value) {
                return Handle::new(index as u32, self.meta[index].generation);
            }
        }
        Handle::INVALID
    }
}

/// A handle retired by a dropped [`Holder`], waiting for the context to route
/// it through the deferred deleter.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Retired {
    Texture(Handle<crate::texture::Texture>),
    Sampler(Handle<crate::sampler::Sampler>),
    Buffer(Handle<crate::buffer::Buffer>),
    ShaderModule(Handle<crate::shader::ShaderModule>),
    GraphicsPipeline(Handle<crate::pipeline::GraphicsPipeline>),
    ComputePipeline(Handle<crate::pipeline::ComputePipeline>),
}

/// Shared between the context and every [`Holder`] it issues. Holders push
/// here on drop; the context drains at frame start.
#[derive(Default)]
pub struct RetireQueue {
    inner: Mutex<Vec<Retired>>,
}

impl RetireQueue {
    pub(crate) fn push(&self, retired: Retired) {
        if let Ok(mut queue) = self.inner.lock() {
            queue.push(retired);
        }
    }

    pub(crate) fn drain(&self) -> Vec<Retired> {
        match self.inner.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => Vec::new(),
        }
    }
}

/// Implemented by every pooled entity type so a [`Holder`] knows how to
/// retire its handle.
pub trait Retire: Sized {
    #[doc(hidden)]
    fn retire(handle: Handle<Self>) -> Retired;
}

macro_rules! impl_retire {
    ($($ty:ty => $variant:ident,)*) => {
        $(impl Retire for $ty {
            fn retire(handle: Handle<Self>) -> Retired {
                Retired::$variant(handle)
            }
        })*
    };
}
impl_retire! {
    crate::texture::Texture => Texture,
    crate::sampler::Sampler => Sampler,
    crate::buffer::Buffer => Buffer,
    crate::shader::ShaderModule => ShaderModule,
    crate::pipeline::GraphicsPipeline => GraphicsPipeline,
    crate::pipeline::ComputePipeline => ComputePipeline,
}

/// Move-only owner of a [`Handle`].
///
/// Dropping a holder retires its handle exactly once; the owning
/// [`Context`](crate::context::Context) picks the retirement up at the next
/// frame start and routes it through the deferred deleter. The context must
/// outlive every holder it issued. [`release`](Self::release) detaches the
/// handle without retiring it.
pub struct Holder<T: Retire> {
    handle: Handle<T>,
    queue: Arc<RetireQueue>,
}

impl<T: Retire> Holder<T> {
    pub(crate) fn new(handle: Handle<T>, queue: Arc<RetireQueue>) -> Self {
        Self { handle, queue }
    }

    pub fn handle(&self) -> Handle<T> {
        self.handle
    }

    /// Detaches the handle; the caller becomes responsible for destroying it.
    pub fn release(mut self) -> Handle<T> {
        std::mem::replace(&mut self.handle, Handle::INVALID)
    }
}

impl<T: Retire> Drop for Holder<T> {
    fn drop(&mut self) {
        if self.handle.valid() {
            self.queue.push(T::retire(self.handle));
        }
    }
}

impl<T: Retire> std::fmt::Debug for Holder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Holder").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Default)]
    struct Dummy(u32);

    #[test]
    fn double_destroy_reports_stale() {
        let mut pool = Pool::new();
        let h = pool.create(Dummy(42));
        assert_eq!(pool.get(h).map(|d| d.0), Ok(42));
        assert!(pool.destroy(h).is_ok());
        assert_eq!(pool.destroy(h).map(|_| ()), Err(PoolError::StaleHandle));
        assert_eq!(pool.get(h).map(|_| ()), Err(PoolError::StaleHandle));
    }

    #[test]
    fn slot_reuse_keeps_index_bumps_generation() {
        let mut pool = Pool::new();
        let h1 = pool.create(Dummy(1));
        pool.destroy(h1).unwrap();
        let h2 = pool.create(Dummy(2));
        assert_eq!(h1.index(), h2.index());
        assert_eq!(h2.generation(), h1.generation() + 1);
        assert_eq!(pool.get(h1).map(|_| ()), Err(PoolError::StaleHandle));
        assert_eq!(pool.get(h2).map(|d| d.0), Ok(2));
    }

    #[test]
    fn invalid_and_out_of_bounds() {
        let mut pool: Pool<Dummy> = Pool::new();
        assert_eq!(
            pool.get(Handle::INVALID).map(|_| ()),
            Err(PoolError::InvalidHandle)
        );
        let _ = pool.create(Dummy(0));
        let far = Handle::<Dummy>::new(99, 1);
        assert_eq!(pool.get(far).map(|_| ()), Err(PoolError::IndexOutOfBounds));
        assert_eq!(
            pool.destroy(far).map(|_| ()),
            Err(PoolError::IndexOutOfBounds)
        );
    }

    #[test]
    fn iteration_yields_holes_in_slot_order() {
        let mut pool = Pool::new();
        let a = pool.create(Dummy(1));
        let _b = pool.create(Dummy(2));
        let _c = pool.create(Dummy(3));
        pool.destroy(a).unwrap();
        let seen: Vec<Option<u32>> = pool.iter().map(|d| d.map(|d| d.0)).collect();
        assert_eq!(seen, vec![None, Some(2), Some(3)]);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.slot_count(), 3);
    }

    #[test]
    fn find_by_equality_scans_live_slots() {
        let mut pool = Pool::new();
        let _a = pool.create(Dummy(1));
        let b = pool.create(Dummy(2));
        assert_eq!(pool.find_by_equality(&Dummy(2)), b);
        assert!(pool.find_by_equality(&Dummy(7)).empty());
    }

    #[test]
    fn handle_for_index_tracks_slot_state() {
        let mut pool = Pool::new();
        let a = pool.create(Dummy(1));
        assert_eq!(pool.handle_for_index(0), a);
        pool.destroy(a).unwrap();
        assert!(pool.handle_for_index(0).empty());
        assert!(pool.handle_for_index(5).empty());
    }

    #[test]
    fn holder_retires_exactly_once() {
        let queue = Arc::new(RetireQueue::default());
        let handle = Handle::<crate::texture::Texture>::new(3, 7);
        {
            let holder = Holder::new(handle, queue.clone());
            let moved = holder;
            assert_eq!(moved.handle(), handle);
        }
        let retired = queue.drain();
        assert_eq!(retired.len(), 1);
        match retired[0] {
            Retired::Texture(h) => assert_eq!(h, handle),
            _ => panic!("wrong retirement variant"),
        }
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn released_holder_does_not_retire() {
        let queue = Arc::new(RetireQueue::default());
        let handle = Handle::<crate::texture::Texture>::new(1, 1);
        let holder = Holder::new(handle, queue.clone());
        assert_eq!(holder.release(), handle);
        assert!(queue.drain().is_empty());
    }
}
