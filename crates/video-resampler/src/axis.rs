//! Per-axis sampling plan.
//!
//! Positions are 16.16 fixed point and name the first kernel tap of each
//! output pixel. An axis of `count` outputs over `width` source pixels
//! splits into regions by how much of the kernel footprint lands inside
//! the source:
//!
//! ```text
//! precopy | preclip | active | postclip | postcopy
//! ```
//!
//! Precopy and postcopy outputs see only the first or last source pixel
//! and are copies of it. Clip regions straddle an edge and read
//! edge-clamped pixels. Active outputs read their taps directly. When the
//! kernel is wider than the source there is no active region and the two
//! clip regions merge into a single dual-clip region.

/// Region widths along one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisRegions {
    pub precopy: u32,
    pub preclip: u32,
    pub active: u32,
    pub postclip: u32,
    pub postcopy: u32,
    pub dualclip: u32,
}

impl AxisRegions {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.precopy + self.preclip + self.active + self.postclip + self.postcopy + self.dualclip
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Axis {
    /// Source step per output pixel, 16.16.
    pub dudx: i64,
    /// Position after the precopy region.
    pub u: i64,
    pub regions: AxisRegions,
}

impl Axis {
    /// Split `count` outputs starting at `u0` over a source `width` pixels
    /// wide, for a kernel `kernel_width` taps wide.
    pub fn compute(dudx: i64, count: u32, u0: i64, width: u32, kernel_width: u32) -> Self {
        let du_kern = i64::from(kernel_width.saturating_sub(1)) << 16;
        let u_limit = i64::from(width) << 16;
        let dx = i64::from(count);
        let mut r = AxisRegions::default();

        if dudx == 0 {
            let u = u0;
            if u < -du_kern {
                r.precopy = count;
            } else if u >= u_limit {
                r.postcopy = count;
            } else if u < 0 {
                if u + du_kern < u_limit {
                    r.preclip = count;
                } else {
                    r.dualclip = count;
                }
            } else if u + du_kern >= u_limit {
                r.postclip = count;
            } else {
                r.active = count;
            }
            return Self {
                dudx,
                u: u0,
                regions: r,
            };
        }

        // (desired - u0 + dudx - 1) / dudx is the first output at or past
        // `desired`.
        let bias = dudx - 1 - u0;
        let first_preclip = ((bias + 0x10000 - du_kern) / dudx).clamp(0, dx);
        let first_active = (bias / dudx).clamp(first_preclip, dx);
        let first_postclip = ((bias + u_limit - du_kern) / dudx).clamp(first_active, dx);
        let first_postcopy = ((bias + u_limit - 0x10000) / dudx).clamp(first_postclip, dx);

        r.precopy = first_preclip as u32;
        r.preclip = (first_active - first_preclip) as u32;
        r.active = (first_postclip - first_active) as u32;
        r.postclip = (first_postcopy - first_postclip) as u32;
        r.postcopy = (dx - first_postcopy) as u32;

        if r.active == 0 && kernel_width > width {
            r.dualclip = r.preclip + r.postclip;
            r.preclip = 0;
            r.postclip = 0;
        }

        Self {
            dudx,
            u: u0 + i64::from(r.precopy) * dudx,
            regions: r,
        }
    }
}

/// How one output pixel is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tap {
    /// Copy a source pixel.
    Copy(u32),
    /// Filter taps `first..first + taps`, all inside the source.
    Direct { first: u32, phase: u8 },
    /// Filter with edge-clamped taps starting at `first`.
    Clipped { first: i64, phase: u8 },
}

impl Axis {
    /// One [`Tap`] per output, in order.
    pub fn schedule(&self, width: u32) -> Vec<Tap> {
        let r = &self.regions;
        let mut taps = Vec::with_capacity(r.total() as usize);
        let last = width.saturating_sub(1);

        taps.extend((0..r.precopy).map(|_| Tap::Copy(0)));

        let mut u = self.u;
        let mut step = |taps: &mut Vec<Tap>, n: u32, direct: bool| {
            for _ in 0..n {
                let phase = ((u >> 8) & 0xFF) as u8;
                let first = u >> 16;
                taps.push(if direct {
                    Tap::Direct {
                        first: first as u32,
                        phase,
                    }
                } else {
                    Tap::Clipped { first, phase }
                });
                u += self.dudx;
            }
        };

        step(&mut taps, r.dualclip, false);
        step(&mut taps, r.preclip, false);
        step(&mut taps, r.active, true);
        step(&mut taps, r.postclip, false);

        taps.extend((0..r.postcopy).map(|_| Tap::Copy(last)));
        taps
    }
}

/// 16.16 step and first-tap position mapping `src` pixels onto `dst`
/// pixels, centre to centre.
pub(crate) fn mapping(src: u32, dst: u32, taps: u32) -> (i64, i64) {
    let dudx = ((i64::from(src) << 16) + i64::from(dst) / 2) / i64::from(dst.max(1));
    let centre = (dudx - 0x10000) >> 1;
    let u0 = centre - (i64::from(taps / 2).saturating_sub(1) << 16);
    (dudx, u0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn matched_width_is_all_active_for_two_taps() {
        let (dudx, u0) = mapping(10, 10, 2);
        assert_eq!((dudx, u0), (0x10000, 0));
        let axis = Axis::compute(dudx, 10, u0, 10, 2);
        assert_eq!(axis.regions.active, 9);
        assert_eq!(axis.regions.postclip, 0);
        assert_eq!(axis.regions.postcopy, 1);
    }

    #[test]
    fn enlarging_has_copy_ends() {
        let (dudx, u0) = mapping(4, 16, 2);
        let axis = Axis::compute(dudx, 16, u0, 4, 2);
        let r = axis.regions;
        assert_eq!(r.total(), 16);
        assert!(r.precopy > 0);
        assert!(r.postcopy > 0);
        assert!(r.active > 0);
    }

    #[test]
    fn wide_kernel_on_tiny_source_is_dual_clipped() {
        let (dudx, u0) = mapping(2, 5, 6);
        let axis = Axis::compute(dudx, 5, u0, 2, 6);
        let r = axis.regions;
        assert_eq!(r.active, 0);
        assert_eq!(r.preclip + r.postclip, 0);
        assert_eq!(r.total(), 5);
        assert!(r.dualclip > 0);
    }

    #[test]
    fn zero_step_puts_everything_in_one_region() {
        let axis = Axis::compute(0, 7, 0x8000, 4, 2);
        assert_eq!(axis.regions.active, 7);
        let axis = Axis::compute(0, 7, -0x30000, 4, 2);
        assert_eq!(axis.regions.precopy, 7);
    }

    proptest! {
        #[test]
        fn regions_partition_and_stay_in_bounds(
            src in 1u32..2000,
            dst in 1u32..2000,
            half_taps in 1u32..12,
        ) {
            let taps = half_taps * 2;
            let (dudx, u0) = mapping(src, dst, taps);
            let axis = Axis::compute(dudx, dst, u0, src, taps);
            prop_assert_eq!(axis.regions.total(), dst);

            for tap in axis.schedule(src) {
                match tap {
                    Tap::Copy(i) => prop_assert!(i < src),
                    Tap::Direct { first, .. } => prop_assert!(first + taps <= src),
                    Tap::Clipped { .. } => {}
                }
            }
        }

        #[test]
        fn large_axes_do_not_overflow(src in 1u32..=65535, dst in 1u32..=65535) {
            let (dudx, u0) = mapping(src, dst, 6);
            let axis = Axis::compute(dudx, dst, u0, src, 6);
            prop_assert_eq!(axis.regions.total(), dst);
        }
    }
}
