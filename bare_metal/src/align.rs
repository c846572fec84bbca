/// Something (usually addresses or sizes) that is alignable to a certain alignment
/// represented in the same type and usually a power of two.
pub trait Alignable: Sized {
    type Alignment;

    /// Return the smallest `x` that is a multiple of `alignment` such that `x >= num`.
    fn align_up(self, alignment: Self::Alignment) -> Self;

    /// Return the largest `x` that is a multiple of `alignment` such that `x <= num`.
    fn align_down(self, alignment: Self::Alignment) -> Self;

    /// Like `align_up`, but returns `None` instead of wrapping around.
    fn checked_align_up(self, alignment: Self::Alignment) -> Option<Self>;

    fn is_aligned(self, alignment: Self::Alignment) -> bool;
}

macro_rules! impl_alignable {
    ($($num:ty),*) => {
        $(
            impl Alignable for $num {
                type Alignment = $num;

                fn align_up(self, alignment: $num) -> $num {
                    match self.checked_align_up(alignment) {
                        Some(aligned) => aligned,
                        None => panic!("align_up overflow"),
                    }
                }

                fn align_down(self, alignment: $num) -> $num {
                    if alignment == 0 {
                        return self;
                    }
                    let mask = alignment - 1;
                    assert!(alignment & mask == 0, "alignment must be power of two");
                    self & !mask
                }

                fn checked_align_up(self, alignment: $num) -> Option<$num> {
                    if alignment == 0 {
                        return Some(self);
                    }
                    let mask = alignment - 1;
                    assert!(alignment & mask == 0, "alignment must be power of two");
                    self.checked_add(mask).map(|n| n & !mask)
                }

                fn is_aligned(self, alignment: $num) -> bool {
                    self.align_down(alignment) == self
                }
            }
        )*
    };
}

impl_alignable!(usize, u64, u32);
