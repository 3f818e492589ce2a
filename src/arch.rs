/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! Per machine timing constants and the ULA contention law.
#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

/// The emulated Spectrum family member.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Architecture {
    #[default]
    Spec48,
    Spec128,
    Pentagon,
    TK,
    Plus2A3,
}

/// The raster geometry of the framebuffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AspectRatio {
    /// 320x240 pixels: 32 pixels of side border, 24 lines of top and bottom border.
    #[default]
    Ratio4x3,
    /// 360x200 pixels: the 320 pixel wide picture is centered, 4 border lines on top and bottom.
    Ratio16x9,
}

/// The emulation speed, affects only the real-time duration of a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CpuSpeed {
    #[default]
    Normal,
    Fast125,
    Fast150,
}

/// The number of paper lines.
pub const PAPER_LINES: u32 = 192;
/// The offset of the first contended T-state in a paper line from the line's draw start.
pub const CONTENTION_START: u32 = 15;
/// The number of contended T-states in a paper line.
pub const CONTENTION_LENGTH: u32 = 128;
/// The ULA wait states pattern, repeated every 8 T-states inside the contention window.
pub const WAIT_STATES: [u8;8] = [6, 5, 4, 3, 2, 1, 0, 0];

const TSTATES_PER_FRAME_48: u32 = 69888;
const TSTATES_PER_FRAME_TK_50: u32 = 71136;
const TSTATES_PER_FRAME_TK_60: u32 = 59736;
const TSTATES_PER_FRAME_128: u32 = 70908;
const TSTATES_PER_FRAME_PENTAGON: u32 = 71680;

// [100%, 125%, 150%]
const MICROS_PER_FRAME_48: [u32;3] = [19968, 15974, 13312];
const MICROS_PER_FRAME_TK_50: [u32;3] = [19895, 15916, 13263];
const MICROS_PER_FRAME_TK_60: [u32;3] = [16707, 13366, 11138];
const MICROS_PER_FRAME_128: [u32;3] = [19992, 15994, 13328];
const MICROS_PER_FRAME_PENTAGON: [u32;3] = [20480, 16384, 13653];

const TSTATES_PER_LINE_48: u32 = 224;
const TSTATES_PER_LINE_128: u32 = 228;
const TSTATES_PER_LINE_PENTAGON: u32 = 224;

const INT_LENGTH_48: u32 = 32;
const INT_LENGTH_128: u32 = 36;

// The first top border line draw start [4:3, 16:9].
const TS_SCREEN_48: [u32;2] = [8944, 13424];
const TS_SCREEN_128: [u32;2] = [8874, 13434];
const TS_SCREEN_PENTAGON: [u32;2] = [12594, 17074];

const TS_PAPER_48: u32 = 14320;
const TS_PAPER_128: u32 = 14346;
const TS_PAPER_PENTAGON: u32 = 17970;

impl Architecture {
    /// The number of T-states of a single video frame.
    ///
    /// `TK` reports its 50 Hz variant, see [Timings] for the 60 Hz one.
    pub const fn states_per_frame(self) -> u32 {
        match self {
            Architecture::Spec48 => TSTATES_PER_FRAME_48,
            Architecture::Spec128|Architecture::Plus2A3 => TSTATES_PER_FRAME_128,
            Architecture::Pentagon => TSTATES_PER_FRAME_PENTAGON,
            Architecture::TK => TSTATES_PER_FRAME_TK_50,
        }
    }

    /// The real-time duration of a single video frame in microseconds at the normal speed.
    pub const fn micros_per_frame(self) -> u32 {
        self.micros_per_frame_at(CpuSpeed::Normal, false)
    }

    const fn micros_per_frame_at(self, speed: CpuSpeed, tk_60hz: bool) -> u32 {
        let table = match self {
            Architecture::Spec48 => &MICROS_PER_FRAME_48,
            Architecture::Spec128|Architecture::Plus2A3 => &MICROS_PER_FRAME_128,
            Architecture::Pentagon => &MICROS_PER_FRAME_PENTAGON,
            Architecture::TK if tk_60hz => &MICROS_PER_FRAME_TK_60,
            Architecture::TK => &MICROS_PER_FRAME_TK_50,
        };
        table[speed as usize]
    }

    /// The number of T-states of a single raster line.
    pub const fn tstates_per_line(self) -> u32 {
        match self {
            Architecture::Spec48 => TSTATES_PER_LINE_48,
            Architecture::Pentagon => TSTATES_PER_LINE_PENTAGON,
            Architecture::Spec128|Architecture::Plus2A3|Architecture::TK => TSTATES_PER_LINE_128,
        }
    }

    /// The length of the ULA interrupt pulse in T-states.
    pub const fn int_length(self) -> u32 {
        match self {
            Architecture::Spec48|Architecture::TK => INT_LENGTH_48,
            Architecture::Spec128|Architecture::Plus2A3|Architecture::Pentagon => INT_LENGTH_128,
        }
    }

    /// Return `true` if the machine can't page memory with the `7FFD` port.
    pub const fn is_48k_memory(self) -> bool {
        matches!(self, Architecture::Spec48|Architecture::TK)
    }

    /// Return `true` if the ULA of the machine contends the video memory.
    pub const fn is_contended(self) -> bool {
        !matches!(self, Architecture::Pentagon)
    }

    /// A human readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Architecture::Spec48 => "48K",
            Architecture::Spec128 => "128K",
            Architecture::Pentagon => "Pentagon",
            Architecture::TK => "TK",
            Architecture::Plus2A3 => "+2A/+3",
        }
    }
}

/// Timing constants of the configured machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timings {
    pub arch: Architecture,
    pub aspect: AspectRatio,
    pub frame_tstates: u32,
    pub micros_per_frame: u32,
    pub line_tstates: u32,
    pub int_length: u32,
    /// When the first visible (top border) line starts being drawn.
    pub screen_start: u32,
    /// When the first paper line starts being drawn.
    pub paper_start: u32,
}

impl Timings {
    pub fn new(arch: Architecture, aspect: AspectRatio, speed: CpuSpeed, tk_60hz: bool) -> Self {
        let frame_tstates = match arch {
            Architecture::TK if tk_60hz => TSTATES_PER_FRAME_TK_60,
            arch => arch.states_per_frame()
        };
        let aspect_index = match aspect {
            AspectRatio::Ratio4x3 => 0,
            AspectRatio::Ratio16x9 => 1,
        };
        let (screen_start, paper_start) = match arch {
            Architecture::Spec48 => (TS_SCREEN_48[aspect_index], TS_PAPER_48),
            Architecture::Pentagon => (TS_SCREEN_PENTAGON[aspect_index], TS_PAPER_PENTAGON),
            Architecture::Spec128|Architecture::Plus2A3|Architecture::TK => {
                (TS_SCREEN_128[aspect_index], TS_PAPER_128)
            }
        };
        Timings {
            arch, aspect,
            frame_tstates,
            micros_per_frame: arch.micros_per_frame_at(speed, tk_60hz),
            line_tstates: arch.tstates_per_line(),
            int_length: arch.int_length(),
            screen_start,
            paper_start
        }
    }

    /// Return the paper line and the position within that line of the given frame T-state.
    ///
    /// Return `None` outside of the 192 paper lines.
    #[inline]
    pub fn paper_position(&self, ts: u32) -> Option<(u32, u32)> {
        let delta = ts.checked_sub(self.paper_start)?;
        let line = delta / self.line_tstates;
        if line >= PAPER_LINES {
            return None
        }
        Some((line, delta % self.line_tstates))
    }

    /// Return the number of wait states the ULA imposes on a contended access at `ts`.
    #[inline]
    pub fn contention(&self, ts: u32) -> u32 {
        if !self.arch.is_contended() {
            return 0
        }
        match self.paper_position(ts) {
            Some((_, pos)) => wait_states_at(pos),
            None => 0
        }
    }
}

/// The wait states at the given T-state position relative to a paper line draw start.
#[inline]
pub fn wait_states_at(pos: u32) -> u32 {
    match pos.checked_sub(CONTENTION_START) {
        Some(offs) if offs < CONTENTION_LENGTH => WAIT_STATES[(offs & 7) as usize].into(),
        _ => 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_constants_work() {
        assert_eq!(Architecture::Spec48.states_per_frame(), 69888);
        assert_eq!(Architecture::Spec48.micros_per_frame(), 19968);
        assert_eq!(Architecture::Spec128.states_per_frame(), 70908);
        assert_eq!(Architecture::Spec128.micros_per_frame(), 19992);
        assert_eq!(Architecture::Plus2A3.states_per_frame(), 70908);
        assert_eq!(Architecture::Pentagon.states_per_frame(), 71680);
        assert_eq!(Architecture::TK.states_per_frame(), 71136);
        let tk60 = Timings::new(Architecture::TK, AspectRatio::Ratio4x3, CpuSpeed::Normal, true);
        assert_eq!(tk60.frame_tstates, 59736);
        assert_eq!(tk60.micros_per_frame, 16707);
        let fast = Timings::new(Architecture::Spec128, AspectRatio::Ratio16x9, CpuSpeed::Fast150, false);
        assert_eq!(fast.micros_per_frame, 13328);
        assert_eq!(fast.frame_tstates, 70908);
    }

    #[test]
    fn screen_and_paper_starts_agree() {
        for arch in [Architecture::Spec48, Architecture::Spec128, Architecture::Pentagon] {
            let t43 = Timings::new(arch, AspectRatio::Ratio4x3, CpuSpeed::Normal, false);
            let t169 = Timings::new(arch, AspectRatio::Ratio16x9, CpuSpeed::Normal, false);
            assert_eq!(t43.screen_start + 24 * t43.line_tstates, t43.paper_start);
            assert_eq!(t169.screen_start + 4 * t169.line_tstates, t169.paper_start);
        }
    }

    #[test]
    fn contention_law_works() {
        let t48 = Timings::new(Architecture::Spec48, AspectRatio::Ratio4x3, CpuSpeed::Normal, false);
        assert_eq!(t48.contention(14334), 0);
        let pattern: Vec<u32> = (14335..14343).map(|ts| t48.contention(ts)).collect();
        assert_eq!(pattern, [6, 5, 4, 3, 2, 1, 0, 0]);
        assert_eq!(t48.contention(14335 + 127), 0);
        assert_eq!(t48.contention(14335 + 120), 6);
        assert_eq!(t48.contention(14335 + 128), 0);
        assert_eq!(t48.contention(14335 + 224), 6);
        assert_eq!(t48.contention(14335 + 191 * 224), 6);
        assert_eq!(t48.contention(14335 + 192 * 224), 0);
        let t128 = Timings::new(Architecture::Spec128, AspectRatio::Ratio4x3, CpuSpeed::Normal, false);
        assert_eq!(t128.contention(14360), 0);
        assert_eq!(t128.contention(14361), 6);
        assert_eq!(t128.contention(14361 + 228), 6);
        let pentagon = Timings::new(Architecture::Pentagon, AspectRatio::Ratio4x3, CpuSpeed::Normal, false);
        assert!((0..pentagon.frame_tstates).all(|ts| pentagon.contention(ts) == 0));
    }
}
