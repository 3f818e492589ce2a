/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! [`Clock`] implementation pricing the contended bus cycles.
use core::num::{NonZeroU8, NonZeroU16};
use z80emu::host::{cycles, Clock};
use cycles::*;
use super::arch::Timings;

/// The type used for `Timestamps`: T-states counted from the start of the current frame.
pub type Ts = u32;

/// The clock of the emulated machine.
///
/// Counts T-states from the beginning of the current video frame and adds ULA
/// wait states to memory and I/O cycles addressing contended 16KB pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameClock {
    cur: Ts,
    timings: Timings,
    contended_pages: u8,
    paging_pending: bool,
}

impl FrameClock {
    /// Return a new instance of the clock with the given machine timings.
    pub fn new(timings: Timings) -> Self {
        FrameClock { cur: 0, timings, contended_pages: 0, paging_pending: false }
    }

    /// Reset the internal counter.
    pub fn reset(&mut self) {
        self.cur = 0;
        self.paging_pending = false;
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Replace the machine timings, e.g. after the architecture has changed.
    pub fn set_timings(&mut self, timings: Timings) {
        self.timings = timings;
    }

    /// Set the current frame T-state counter.
    pub fn set_tstates(&mut self, ts: Ts) {
        self.cur = ts;
    }

    /// Set which of the four 16KB pages are contended, one bit per page.
    ///
    /// Clears the pending paging access.
    #[inline]
    pub fn set_contended_pages(&mut self, mask: u8) {
        self.contended_pages = mask;
        self.paging_pending = false;
    }

    /// Return `true` if an I/O cycle addressing the `7FFD` latch has been
    /// charged since the contended pages were last set.
    ///
    /// Such a cycle ends [Clock::is_past_limit] early, so the execution stops
    /// right after the instruction that may have changed the memory paging.
    #[inline]
    pub fn is_paging_pending(&self) -> bool {
        self.paging_pending
    }

    #[inline]
    pub fn contended_pages(&self) -> u8 {
        self.contended_pages
    }

    #[inline(always)]
    fn is_contended(&self, addr: u16) -> bool {
        self.contended_pages & (1 << (addr >> 14)) != 0
    }

    /// Return whether the frame budget has been consumed.
    #[inline]
    pub fn is_frame_over(&self) -> bool {
        self.cur >= self.timings.frame_tstates
    }

    /// Move the counter back by the length of a frame, keeping the overshoot.
    ///
    /// Return the number of T-states the counter was decreased by.
    pub fn wrap_frame(&mut self) -> Ts {
        let frame_tstates = self.timings.frame_tstates;
        self.cur = self.cur.saturating_sub(frame_tstates);
        frame_tstates
    }

    /// Advance the clock by `ts` T-states without contention.
    #[inline]
    pub fn add(&mut self, ts: Ts) {
        self.cur += ts;
    }

    /// Advance the clock by a single `M1` cycle of a halted `CPU` at `pc`.
    ///
    /// Return the number of wait states added.
    #[inline]
    pub fn add_halted_m1(&mut self, pc: u16) -> Ts {
        let wait = if self.is_contended(pc) {
            self.timings.contention(self.cur)
        }
        else {
            0
        };
        self.cur += wait + Ts::from(M1_CYCLE_TS);
        wait
    }

    #[inline(always)]
    fn contend(&mut self, addr: u16) {
        if self.is_contended(addr) {
            self.cur += self.timings.contention(self.cur);
        }
    }
}

impl Clock for FrameClock {
    type Limit = Ts;
    type Timestamp = Ts;

    #[inline]
    fn is_past_limit(&self, limit: Self::Limit) -> bool {
        self.cur >= limit || self.paging_pending
    }

    #[inline]
    fn add_irq(&mut self, _addr: u16) -> Ts {
        self.cur += Ts::from(IRQ_ACK_CYCLE_TS);
        self.cur
    }

    #[inline]
    fn add_no_mreq(&mut self, addr: u16, add_ts: NonZeroU8) {
        if self.is_contended(addr) {
            for _ in 0..add_ts.get() {
                self.cur += self.timings.contention(self.cur) + 1;
            }
        }
        else {
            self.cur += Ts::from(add_ts.get());
        }
    }

    /// Charge the whole I/O cycle and return the T-state at which the port is accessed.
    ///
    /// The early part is contended when the port's high byte addresses a contended page.
    /// An even port (ULA) is contended in its late part, an odd port on a contended page
    /// is contended on each of the remaining T-states.
    #[inline]
    fn add_io(&mut self, port: u16) -> Ts {
        if port & 0x8002 == 0 && !self.timings.arch.is_48k_memory() {
            self.paging_pending = true;
        }
        let contended = self.is_contended(port);
        if contended {
            self.cur += self.timings.contention(self.cur);
        }
        self.cur += 1;
        let io_ts = self.cur;
        if port & 1 == 0 {
            self.cur += self.timings.contention(self.cur);
            self.cur += Ts::from(IO_CYCLE_TS) - 1;
        }
        else if contended {
            for _ in 1..IO_CYCLE_TS {
                self.cur += self.timings.contention(self.cur) + 1;
            }
        }
        else {
            self.cur += Ts::from(IO_CYCLE_TS) - 1;
        }
        io_ts
    }

    #[inline]
    fn add_mreq(&mut self, addr: u16) -> Ts {
        self.contend(addr);
        self.cur += Ts::from(MEMRW_CYCLE_TS);
        self.cur
    }

    #[inline]
    fn add_m1(&mut self, addr: u16) -> Ts {
        self.contend(addr);
        self.cur += Ts::from(M1_CYCLE_TS);
        self.cur
    }

    #[inline]
    fn add_wait_states(&mut self, _bus: u16, wait_states: NonZeroU16) {
        self.cur += Ts::from(wait_states.get());
    }

    #[inline]
    fn as_timestamp(&self) -> Ts {
        self.cur
    }
}
