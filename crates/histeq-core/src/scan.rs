//! Prefix sums: sequential reference and work-efficient Blelloch scan.
//!
//! # Algorithm (Blelloch Scan)
//!
//! The input is padded with zeros to a power of two and treated as the
//! leaves of a balanced binary tree of depth `ceil(log2(n))`.
//!
//! 1. **Up-sweep (reduce)**: at level `d`, every node at index
//!    `k * 2^(d+1) + 2^(d+1) - 1` adds the value `2^d` slots before it.
//!    After the last level the final slot holds the total.
//! 2. **Down-sweep (distribute)**: clear the root, then at each level from
//!    the top swap each left child into its parent slot and add the old left
//!    value into the right child. The result is the exclusive scan.
//!
//! The inclusive scan adds the original value back onto every slot.
//! Every node of one level is independent, so each level is a single
//! rayon pass over `2^(d+1)`-sized chunks.
//!
//! ```rust
//! use histeq_core::scan::{blelloch_scan, ScanKind};
//!
//! let mut buckets = [0, 0, 4, 6, 0, 0, 0, 0];
//! blelloch_scan(&mut buckets, ScanKind::Inclusive);
//! assert_eq!(buckets, [0, 0, 4, 10, 10, 10, 10, 10]);
//! ```

use rayon::prelude::*;

/// Values that can be prefix-summed.
///
/// Integer sums wrap on overflow, like `atomic_inc` and `+` on a device `int`.
pub trait ScanValue: Copy + Default + Send + Sync {
    fn combine(self, rhs: Self) -> Self;
}

macro_rules! wrapping_scan_value {
    ($($t:ty),*) => {$(
        impl ScanValue for $t {
            #[inline]
            fn combine(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }
        }
    )*};
}

wrapping_scan_value!(i32, u32, i64, u64, usize);

impl ScanValue for f32 {
    #[inline]
    fn combine(self, rhs: Self) -> Self {
        self + rhs
    }
}

impl ScanValue for f64 {
    #[inline]
    fn combine(self, rhs: Self) -> Self {
        self + rhs
    }
}

/// Scan convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanKind {
    /// `out[i] = in[0] + ... + in[i]`
    #[default]
    Inclusive,
    /// `out[i] = in[0] + ... + in[i - 1]`, `out[0] = 0`
    Exclusive,
}

/// Sequential inclusive prefix sum.
pub fn inclusive_scan<T: ScanValue>(input: &[T]) -> Vec<T> {
    let mut sum = T::default();
    input
        .iter()
        .map(|&v| {
            sum = sum.combine(v);
            sum
        })
        .collect()
}

/// Sequential exclusive prefix sum.
pub fn exclusive_scan<T: ScanValue>(input: &[T]) -> Vec<T> {
    let mut sum = T::default();
    input
        .iter()
        .map(|&v| {
            let out = sum;
            sum = sum.combine(v);
            out
        })
        .collect()
}

/// Up-sweep over a power-of-two sized tree. The last slot ends up holding
/// the sum of all leaves.
pub fn up_sweep<T: ScanValue>(tree: &mut [T]) {
    debug_assert!(tree.len().is_power_of_two());
    let mut stride = 2;
    while stride <= tree.len() {
        let half = stride / 2;
        tree.par_chunks_mut(stride).for_each(|node| {
            node[stride - 1] = node[stride - 1].combine(node[half - 1]);
        });
        stride *= 2;
    }
}

/// Down-sweep over an up-swept tree, leaving the exclusive scan in place.
pub fn down_sweep<T: ScanValue>(tree: &mut [T]) {
    debug_assert!(tree.len().is_power_of_two());
    let Some(root) = tree.last_mut() else {
        return;
    };
    *root = T::default();
    let mut stride = tree.len();
    while stride >= 2 {
        let half = stride / 2;
        tree.par_chunks_mut(stride).for_each(|node| {
            let left = node[half - 1];
            node[half - 1] = node[stride - 1];
            node[stride - 1] = node[stride - 1].combine(left);
        });
        stride /= 2;
    }
}

/// In-place work-efficient scan for any length.
///
/// Lengths that are not a power of two are padded with zero-valued phantom
/// slots, which never change the prefix sums of real slots.
pub fn blelloch_scan<T: ScanValue>(values: &mut [T], kind: ScanKind) {
    let n = values.len();
    if n == 0 {
        return;
    }

    let mut tree = Vec::with_capacity(n.next_power_of_two());
    tree.extend_from_slice(values);
    tree.resize(n.next_power_of_two(), T::default());

    up_sweep(&mut tree);
    down_sweep(&mut tree);

    match kind {
        ScanKind::Exclusive => values.copy_from_slice(&tree[..n]),
        ScanKind::Inclusive => values
            .par_iter_mut()
            .zip(tree.par_iter())
            .for_each(|(v, &prefix)| *v = prefix.combine(*v)),
    }
}

/// True when every element is `>=` its predecessor.
pub fn is_non_decreasing<T: PartialOrd>(values: &[T]) -> bool {
    values.windows(2).all(|w| w[0] <= w[1])
}
