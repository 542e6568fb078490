//! Frame buffers: flat, fixed-stride batches of logical frames.
//!
//! A batch of `batch_width` frames is stored contiguously; frame `f` occupies
//! `[f * stride, (f + 1) * stride)`. Modules see plain slices, the dataflow
//! engine moves [`FrameBuffer`] tokens along its edges.

/// A hard bit (0 or 1).
pub type Bit = u8;

/// A real sample: modulated symbol, channel output, gain or log-likelihood ratio.
pub type Real = f32;

/// Declared element type of a port.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Hard bits, stored as [`Bit`].
    Bit,
    /// Modulated or received symbols, stored as [`Real`].
    Symbol,
    /// Soft values (gains, LLRs), stored as [`Real`].
    Real,
}

impl ElementKind {
    /// Whether elements of this kind are stored as [`Bit`]s.
    pub fn is_bit(self) -> bool {
        matches!(self, ElementKind::Bit)
    }
}

/// An owned, type-tagged batch buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBuffer {
    /// Bit storage.
    Bits(Vec<Bit>),
    /// Real storage (symbols and soft values).
    Reals(Vec<Real>),
}

impl FrameBuffer {
    /// A zero-filled buffer of `len` elements with storage matching `kind`.
    pub fn zeroed(kind: ElementKind, len: usize) -> Self {
        if kind.is_bit() {
            FrameBuffer::Bits(vec![0; len])
        } else {
            FrameBuffer::Reals(vec![0.0; len])
        }
    }

    /// A buffer of `len` elements, every one set to `value` (rounded for bit storage).
    pub fn filled(kind: ElementKind, len: usize, value: Real) -> Self {
        if kind.is_bit() {
            FrameBuffer::Bits(vec![(value != 0.0) as Bit; len])
        } else {
            FrameBuffer::Reals(vec![value; len])
        }
    }

    /// Number of elements across the whole batch.
    pub fn len(&self) -> usize {
        match self {
            FrameBuffer::Bits(b) => b.len(),
            FrameBuffer::Reals(r) => r.len(),
        }
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the storage matches the declared kind.
    pub fn matches(&self, kind: ElementKind) -> bool {
        matches!(self, FrameBuffer::Bits(_)) == kind.is_bit()
    }

    pub fn as_bits(&self) -> Option<&[Bit]> {
        match self {
            FrameBuffer::Bits(b) => Some(b),
            FrameBuffer::Reals(_) => None,
        }
    }

    pub fn as_bits_mut(&mut self) -> Option<&mut [Bit]> {
        match self {
            FrameBuffer::Bits(b) => Some(b),
            FrameBuffer::Reals(_) => None,
        }
    }

    pub fn as_reals(&self) -> Option<&[Real]> {
        match self {
            FrameBuffer::Reals(r) => Some(r),
            FrameBuffer::Bits(_) => None,
        }
    }

    pub fn as_reals_mut(&mut self) -> Option<&mut [Real]> {
        match self {
            FrameBuffer::Reals(r) => Some(r),
            FrameBuffer::Bits(_) => None,
        }
    }
}

/// Frame `index` of a batch with the given per-frame `stride`.
#[inline]
pub fn frame<T>(buffer: &[T], index: usize, stride: usize) -> &[T] {
    &buffer[index * stride..(index + 1) * stride]
}

/// Mutable frame `index` of a batch with the given per-frame `stride`.
#[inline]
pub fn frame_mut<T>(buffer: &mut [T], index: usize, stride: usize) -> &mut [T] {
    &mut buffer[index * stride..(index + 1) * stride]
}

/// Frame indices selected by `mask`; every frame when there is no mask.
pub(crate) fn selected(batch_width: usize, mask: Option<&[bool]>) -> impl Iterator<Item = usize> + '_ {
    (0..batch_width).filter(move |&f| mask.map_or(true, |m| m[f]))
}
