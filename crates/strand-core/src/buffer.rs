//! Audio buffer pool and buffer ownership handles.
//!
//! Every audio output variable owns exactly one buffer in the [`BufferPool`],
//! held through an [`OwnedBuffer`] handle. Audio inputs never own storage:
//! connecting one aliases the source's buffer through a [`BufferView`], which
//! can only be obtained by borrowing an `OwnedBuffer`. Views are `Copy` and
//! carry no ownership, so a proxy can never free or reallocate what it reads.
//!
//! Slot 0 of the pool is a permanently silent mono buffer that unconnected
//! inputs read from.

/// A block of audio samples, stored channel-major.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    channels: usize,
    frames: usize,
    samples: Vec<f32>,
}

impl AudioBuffer {
    /// Creates a zeroed buffer.
    pub fn new(channels: usize, frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            frames,
            samples: vec![0.0; channels * frames],
        }
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples of one channel. Panics if `ch >= channels()`.
    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.frames;
        &self.samples[start..start + self.frames]
    }

    /// Mutable samples of one channel. Panics if `ch >= channels()`.
    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.frames;
        &mut self.samples[start..start + self.frames]
    }

    /// Samples of channel `ch % channels()`.
    ///
    /// Lets a mono source feed a stereo consumer without special cases.
    #[inline]
    pub fn channel_wrapped(&self, ch: usize) -> &[f32] {
        self.channel(ch % self.channels)
    }

    /// All samples, channel-major.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Fills every channel with zeros.
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }

    /// Copies `other` into this buffer, wrapping channels when counts differ.
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        for ch in 0..self.channels {
            let src = other.channel_wrapped(ch);
            let dst = self.channel_mut(ch);
            let n = dst.len().min(src.len());
            dst[..n].copy_from_slice(&src[..n]);
        }
    }

    /// Adds `other * gain` sample-by-sample (mix/accumulate).
    pub fn accumulate_from(&mut self, other: &AudioBuffer, gain: f32) {
        for ch in 0..self.channels {
            let src = other.channel_wrapped(ch);
            for (dst, s) in self.channel_mut(ch).iter_mut().zip(src) {
                *dst += *s * gain;
            }
        }
    }

    /// Multiplies every sample by `gain`.
    pub fn scale(&mut self, gain: f32) {
        for s in &mut self.samples {
            *s *= gain;
        }
    }

    /// Root-mean-square level across all channels.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

/// Index of a buffer slot in a [`BufferPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u32);

impl BufferId {
    /// The shared silent buffer.
    pub const SILENCE: BufferId = BufferId(0);

    /// Returns the raw slot index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Exclusive ownership of one pool slot. Not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct OwnedBuffer(BufferId);

impl OwnedBuffer {
    /// Slot owned by this handle.
    pub fn id(&self) -> BufferId {
        self.0
    }

    /// Borrows a non-owning view of the same slot.
    pub fn view(&self) -> BufferView {
        BufferView(self.0)
    }
}

/// Non-owning alias of a buffer owned elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferView(BufferId);

impl BufferView {
    /// Slot this view reads.
    pub fn id(self) -> BufferId {
        self.0
    }
}

/// Pool of audio buffers sized to one cycle.
pub struct BufferPool {
    buffers: Vec<AudioBuffer>,
    frames: usize,
}

impl BufferPool {
    /// Creates a pool holding only the silent slot.
    pub fn new(frames: usize) -> Self {
        Self {
            buffers: vec![AudioBuffer::new(1, frames)],
            frames,
        }
    }

    /// Frames per buffer.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of slots, including the silent one.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns true if only the silent slot exists.
    pub fn is_empty(&self) -> bool {
        self.buffers.len() <= 1
    }

    /// Allocates a new zeroed slot with `channels` channels.
    pub(crate) fn allocate(&mut self, channels: usize) -> OwnedBuffer {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(AudioBuffer::new(channels, self.frames));
        OwnedBuffer(id)
    }

    /// Reads a slot, falling back to silence for an unknown id.
    #[inline]
    pub fn read(&self, id: BufferId) -> &AudioBuffer {
        self.buffers
            .get(id.0 as usize)
            .unwrap_or(&self.buffers[0])
    }

    /// Mutable access to an owned slot.
    #[inline]
    pub fn write(&mut self, owned: &OwnedBuffer) -> Option<&mut AudioBuffer> {
        self.buffers.get_mut(owned.0.0 as usize)
    }

    /// Reads one slot while writing another.
    ///
    /// Returns `None` if both name the same slot.
    pub fn pair(
        &mut self,
        read: BufferId,
        write: &OwnedBuffer,
    ) -> Option<(&AudioBuffer, &mut AudioBuffer)> {
        let r = read.0 as usize;
        let w = write.0.0 as usize;
        if r == w || r >= self.buffers.len() || w >= self.buffers.len() {
            return None;
        }
        if r < w {
            let (head, tail) = self.buffers.split_at_mut(w);
            Some((&head[r], &mut tail[0]))
        } else {
            let (head, tail) = self.buffers.split_at_mut(r);
            Some((&tail[0], &mut head[w]))
        }
    }

    /// Current high-water mark, for [`rollback`](Self::rollback).
    pub(crate) fn mark(&self) -> usize {
        self.buffers.len()
    }

    /// Drops every slot allocated after `mark`.
    pub(crate) fn rollback(&mut self, mark: usize) {
        self.buffers.truncate(mark.max(1));
    }

    /// Zeroes every slot.
    pub fn clear_all(&mut self) {
        for buf in &mut self.buffers {
            buf.clear();
        }
    }

    /// Releases every slot except silence.
    pub(crate) fn release_all(&mut self) {
        self.buffers.truncate(1);
        self.buffers[0].clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_slot_zero() {
        let pool = BufferPool::new(64);
        assert!(pool.is_empty());
        let silent = pool.read(BufferId::SILENCE);
        assert_eq!(silent.frames(), 64);
        assert!(silent.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn view_aliases_owner() {
        let mut pool = BufferPool::new(4);
        let owned = pool.allocate(1);
        pool.write(&owned).unwrap().channel_mut(0).fill(0.5);
        let view = owned.view();
        assert_eq!(pool.read(view.id()).channel(0), &[0.5; 4]);
    }

    #[test]
    fn pair_refuses_same_slot() {
        let mut pool = BufferPool::new(4);
        let a = pool.allocate(1);
        assert!(pool.pair(a.id(), &a).is_none());
    }

    #[test]
    fn pair_in_both_orders() {
        let mut pool = BufferPool::new(2);
        let a = pool.allocate(1);
        let b = pool.allocate(1);
        pool.write(&a).unwrap().channel_mut(0).fill(1.0);
        {
            let (src, dst) = pool.pair(a.id(), &b).unwrap();
            dst.copy_from(src);
        }
        assert_eq!(pool.read(b.id()).channel(0), &[1.0, 1.0]);
        pool.write(&b).unwrap().scale(3.0);
        let (src, dst) = pool.pair(b.id(), &a).unwrap();
        dst.copy_from(src);
        assert_eq!(dst.channel(0), &[3.0, 3.0]);
    }

    #[test]
    fn rollback_keeps_silence() {
        let mut pool = BufferPool::new(8);
        let mark = pool.mark();
        let _ = pool.allocate(2);
        let _ = pool.allocate(2);
        assert_eq!(pool.len(), 3);
        pool.rollback(mark);
        assert_eq!(pool.len(), 1);
        pool.rollback(0);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn wrapped_channel_reads_mono_as_stereo() {
        let mut buf = AudioBuffer::new(1, 3);
        buf.channel_mut(0).copy_from_slice(&[1.0, 2.0, 3.0]);
        let mut stereo = AudioBuffer::new(2, 3);
        stereo.accumulate_from(&buf, 2.0);
        assert_eq!(stereo.channel(1), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn rms_of_constant_signal() {
        let mut buf = AudioBuffer::new(2, 16);
        buf.channel_mut(0).fill(0.5);
        buf.channel_mut(1).fill(-0.5);
        assert!((buf.rms() - 0.5).abs() < 1e-6);
    }
}
