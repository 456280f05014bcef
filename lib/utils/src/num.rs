//! Numeric Utilities

/// A trait for aligning numerical values.
///
/// The alignment does not need to be a power of two.
pub trait AlignableTo: Sized {
    /// Aligns the value up to the nearest multiple of `align`.
    ///
    /// Returns [None] if the result does not fit in `Self`.
    fn align_up(self, align: Self) -> Option<Self>;

    /// Whether the value is already a multiple of `align`.
    fn is_aligned_to(self, align: Self) -> bool;
}

macro_rules! impl_alignable {
    ($($ty:ty),*) => {
        $(
            impl AlignableTo for $ty {
                #[inline(always)]
                fn align_up(self, align: Self) -> Option<Self> {
                    match self % align {
                        0 => Some(self),
                        rem => self.checked_add(align - rem),
                    }
                }

                #[inline(always)]
                fn is_aligned_to(self, align: Self) -> bool {
                    self % align == 0
                }
            }
        )*
    };
}

impl_alignable!(u8, u16, u32, u64, usize);
