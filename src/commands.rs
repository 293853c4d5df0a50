//! The immediate-commands ring.
//!
//! # Overview
//!
//! A fixed ring of command buffers bound to one queue, each slot paired with
//! a fence (CPU-visible completion) and a binary semaphore (GPU-GPU
//! serialisation). Serial submits are chained: each submission waits on the
//! previous submission's semaphore, so work executes in submit order without
//! any CPU fence wait in between. [`SubmitHandle`] identifies one submission;
//! it stays meaningful after the slot is recycled because the handle carries
//! the submission counter alongside the slot index.
//!
//! At most one submission per slot is in flight at a time. Freed slots are
//! reclaimed by a zero-timeout purge scan that starts just after the most
//! recently submitted slot.

use ash::vk;
use smallvec::SmallVec;

use crate::{
    device::{Device, DeviceQueue},
    error::Result,
};

/// Ring depth. Also the deferred-deletion horizon: a resource destroyed at
/// frame N is torn down at frame N + RING_SIZE.
pub const RING_SIZE: usize = 64;

/// Identifies one submission on the ring. `id == 0` means "empty".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitHandle {
    pub(crate) slot: u32,
    pub(crate) id: u32,
}

impl SubmitHandle {
    pub fn empty(&self) -> bool {
        self.id == 0
    }
}

/// A command buffer checked out of the ring, currently recording.
///
/// Obtain via [`ImmediateCommands::acquire`] (or the context facade), record
/// through [`raw`](Self::raw), then hand it back to `submit`.
#[derive(Debug)]
pub struct CommandBuffer {
    pub(crate) slot: u32,
    command_buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn raw(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

struct Slot {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    semaphore: vk::Semaphore,
    handle: SubmitHandle,
    is_encoding: bool,
}

impl Slot {
    fn in_flight(&self) -> bool {
        !self.handle.empty() && !self.is_encoding
    }

    fn free(&self) -> bool {
        self.handle.empty() && !self.is_encoding
    }
}

pub struct ImmediateCommands {
    device: Device,
    queue: DeviceQueue,
    pool: vk::CommandPool,
    slots: Vec<Slot>,
    /// Binary semaphore of the last submission, consumed as the next
    /// submission's wait. Null once taken (by present) or never submitted.
    last_submit_semaphore: vk::Semaphore,
    /// External wait injected by the swapchain acquire (binary, stage ALL).
    wait_semaphore: vk::Semaphore,
    /// External timeline signal injected by a presenting submit.
    signal_semaphore: vk::Semaphore,
    signal_value: u64,
    next_id: u32,
    last_submitted_slot: usize,
    available: usize,
}

impl ImmediateCommands {
    pub fn new(device: Device, queue: DeviceQueue) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family_index)
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );
        let pool = unsafe { device.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(RING_SIZE as u32);
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };

        let mut slots = Vec::with_capacity(RING_SIZE);
        for command_buffer in buffers {
            let fence = unsafe {
                device.create_fence(&vk::FenceCreateInfo::default(), None)?
            };
            let semaphore = unsafe {
                device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
            };
            slots.push(Slot {
                command_buffer,
                fence,
                semaphore,
                handle: SubmitHandle::default(),
                is_encoding: false,
            });
        }

        Ok(Self {
            device,
            queue,
            pool,
            slots,
            last_submit_semaphore: vk::Semaphore::null(),
            wait_semaphore: vk::Semaphore::null(),
            signal_semaphore: vk::Semaphore::null(),
            signal_value: 0,
            next_id: 1,
            last_submitted_slot: 0,
            available: RING_SIZE,
        })
    }

    pub fn queue(&self) -> DeviceQueue {
        self.queue
    }

    /// Checks a free slot out of the ring and begins its command buffer.
    ///
    /// Spins on the purge scan when every slot is in flight; with a ring of
    /// [`RING_SIZE`] this only happens when the CPU runs that many submits
    /// ahead of the GPU.
    pub fn acquire(&mut self) -> Result<CommandBuffer> {
        while self.available == 0 {
            tracing::debug!("command ring exhausted, purging");
            self.purge()?;
        }
        let index = self
            .slots
            .iter()
            .position(Slot::free)
            .unwrap_or(0);
        let slot = &mut self.slots[index];
        slot.is_encoding = true;
        slot.handle = SubmitHandle {
            slot: index as u32,
            id: self.next_id,
        };
        self.available -= 1;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(slot.command_buffer, &begin_info)?;
        }
        Ok(CommandBuffer {
            slot: index as u32,
            command_buffer: slot.command_buffer,
        })
    }

    /// Ends and submits a command buffer, chaining it behind the previous
    /// submission.
    pub fn submit(&mut self, cmd: CommandBuffer) -> Result<SubmitHandle> {
        let index = cmd.slot as usize;
        unsafe { self.device.end_command_buffer(cmd.command_buffer)? };

        let mut waits: SmallVec<[vk::SemaphoreSubmitInfo; 2]> = SmallVec::new();
        if self.wait_semaphore != vk::Semaphore::null() {
            waits.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(self.wait_semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
        }
        if self.last_submit_semaphore != vk::Semaphore::null() {
            waits.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(self.last_submit_semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
        }
        let mut signals: SmallVec<[vk::SemaphoreSubmitInfo; 2]> = SmallVec::new();
        signals.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(self.slots[index].semaphore)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
        );
        if self.signal_semaphore != vk::Semaphore::null() {
            signals.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(self.signal_semaphore)
                    .value(self.signal_value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
        }

        let buffer_info =
            [vk::CommandBufferSubmitInfo::default().command_buffer(cmd.command_buffer)];
        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .signal_semaphore_infos(&signals)
            .command_buffer_infos(&buffer_info);
        unsafe {
            self.device.queue_submit2(
                self.queue.queue,
                &[submit_info],
                self.slots[index].fence,
            )?;
        }

        self.wait_semaphore = vk::Semaphore::null();
        self.signal_semaphore = vk::Semaphore::null();
        self.signal_value = 0;
        self.last_submit_semaphore = self.slots[index].semaphore;
        self.last_submitted_slot = index;

        let slot = &mut self.slots[index];
        slot.is_encoding = false;
        let handle = slot.handle;

        self.next_id = self.next_id.wrapping_add(1);
        // id 0 encodes "empty"; skip it on wrap.
        if self.next_id == 0 {
            self.next_id = 1;
        }
        Ok(handle)
    }

    /// Registers a binary semaphore the next submission must wait on.
    pub(crate) fn set_wait_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.wait_semaphore = semaphore;
    }

    /// Registers a timeline signal the next submission will emit.
    pub(crate) fn set_signal_semaphore(&mut self, semaphore: vk::Semaphore, value: u64) {
        self.signal_semaphore = semaphore;
        self.signal_value = value;
    }

    /// Takes the binary semaphore of the most recent submission, leaving the
    /// chain unbroken for the next submit only if one happens first. Used as
    /// the present wait.
    pub(crate) fn take_last_submit_semaphore(&mut self) -> vk::Semaphore {
        std::mem::replace(&mut self.last_submit_semaphore, vk::Semaphore::null())
    }

    /// True when the submission has completed (or the handle is empty or its
    /// slot was recycled, both of which imply completion).
    pub fn is_ready(&self, handle: SubmitHandle) -> Result<bool> {
        if handle.empty() {
            return Ok(true);
        }
        let slot = &self.slots[handle.slot as usize];
        if slot.handle.id != handle.id {
            return Ok(true);
        }
        match unsafe { self.device.wait_for_fences(&[slot.fence], true, 0) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Blocks until the submission completes. An empty handle waits for the
    /// whole device to go idle.
    pub fn wait(&mut self, handle: SubmitHandle) -> Result<()> {
        if handle.empty() {
            unsafe { self.device.device_wait_idle()? };
            self.purge()?;
            return Ok(());
        }
        let slot = &self.slots[handle.slot as usize];
        if slot.handle.id == handle.id && !slot.is_encoding {
            unsafe {
                self.device
                    .wait_for_fences(&[slot.fence], true, u64::MAX)?;
            }
        }
        self.purge()
    }

    /// Blocks until every in-flight submission completes.
    pub fn wait_all(&mut self) -> Result<()> {
        let fences: SmallVec<[vk::Fence; RING_SIZE]> = self
            .slots
            .iter()
            .filter(|s| s.in_flight())
            .map(|s| s.fence)
            .collect();
        if !fences.is_empty() {
            unsafe { self.device.wait_for_fences(&fences, true, u64::MAX)? };
        }
        self.purge()
    }

    /// Zero-timeout scan reclaiming completed slots, starting just after the
    /// most recently submitted one so the oldest work is checked first.
    fn purge(&mut self) -> Result<()> {
        for offset in 1..=self.slots.len() {
            let index = (self.last_submitted_slot + offset) % self.slots.len();
            let slot = &self.slots[index];
            if !slot.in_flight() {
                continue;
            }
            match unsafe { self.device.wait_for_fences(&[slot.fence], true, 0) } {
                Ok(()) => unsafe {
                    self.device.reset_fences(&[slot.fence])?;
                    self.device.reset_command_buffer(
                        slot.command_buffer,
                        vk::CommandBufferResetFlags::empty(),
                    )?;
                    let slot = &mut self.slots[index];
                    slot.handle = SubmitHandle::default();
                    self.available += 1;
                },
                Err(vk::Result::TIMEOUT) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl Drop for ImmediateCommands {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for slot in &self.slots {
                self.device.destroy_fence(slot.fence, None);
                self.device.destroy_semaphore(slot.semaphore, None);
            }
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
