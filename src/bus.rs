/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! The system `BUS`: memory access and port decoding.
use core::num::NonZeroU16;
use core::ops::Range;
use z80emu::{Io, Memory as _};

use super::vec::Vec;
use super::arch::Timings;
use super::audio::{AudioMixer, BEEPER_LEVELS};
use super::ay::Ay;
use super::clock::Ts;
use super::config::Config;
use super::memory::Memory;
use super::tape::Tape;
use super::video::Video;
use super::wd1793::Wd1793;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

/// The number of keyboard half-rows.
pub const KEYBOARD_ROWS: usize = 8;

/// The state of the keyboard matrix: 8 half-rows of 5 keys, active low.
///
/// The half-row `N` is selected by the zero bit `N` of the high byte of the `ULA` port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Keyboard {
    rows: [u8;KEYBOARD_ROWS],
}

impl Default for Keyboard {
    fn default() -> Self {
        Keyboard { rows: [u8::MAX;KEYBOARD_ROWS] }
    }
}

impl Keyboard {
    /// Press or release the key `bit` (0 to 4) of the half-row `row` (0 to 7).
    pub fn set_key(&mut self, row: usize, bit: u8, pressed: bool) {
        let mask = 1 << (bit & 7);
        let row = &mut self.rows[row & (KEYBOARD_ROWS - 1)];
        if pressed {
            *row &= !mask;
        }
        else {
            *row |= mask;
        }
    }

    pub fn release_all(&mut self) {
        self.rows = [u8::MAX;KEYBOARD_ROWS];
    }

    pub fn rows(&self) -> &[u8;KEYBOARD_ROWS] {
        &self.rows
    }

    /// Return the keys of all half-rows selected by the zero bits of `high`.
    #[inline]
    pub fn read(&self, high: u8) -> u8 {
        self.rows.iter().enumerate()
            .filter(|&(row, _)| high & (1 << row) == 0)
            .fold(u8::MAX, |keys, (_, &row)| keys & row)
    }
}

/// A break signalled by [Bus] when the memory paging has changed.
///
/// The clock has to refresh its contended pages before the execution resumes.
pub type PagingChanged = ();

/// Connects the `CPU` with the memory and the peripherals.
///
/// Any access whose result can be observed on screen catches the raster up
/// with the `CPU` first.
pub struct Bus {
    memory: Memory,
    video: Video,
    ay: Ay,
    audio: AudioMixer,
    wd: Wd1793,
    tape: Tape,
    keyboard: Keyboard,
    kempston: u8,
    ay_enabled: bool,
    kempston_enabled: bool,
    betadisk_enabled: bool,
    global_tstates: u64,
}

impl Bus {
    /// Create a new bus with all the peripherals of the configured machine.
    pub fn new(config: &Config) -> Self {
        let timings = config.timings();
        let mut video = Video::new(timings);
        video.set_fps_overlay(config.fps_overlay);
        let mut memory = Memory::new(config.arch);
        memory.set_trdos_autopage(config.betadisk);
        Bus {
            memory,
            video,
            ay: Ay::new(config.sample_rate),
            audio: AudioMixer::new(config.sample_rate, &timings),
            wd: Wd1793::new(config.disk_fast_mode),
            tape: Tape::new(),
            keyboard: Keyboard::default(),
            kempston: 0,
            ay_enabled: config.ay,
            kempston_enabled: config.kempston,
            betadisk_enabled: config.betadisk,
            global_tstates: 0,
        }
    }

    /// Apply a new configuration. ROMs, RAM and inserted media are kept.
    ///
    /// The caller should reset the bus afterwards.
    pub fn reconfigure(&mut self, config: &Config) {
        let timings = config.timings();
        self.memory.set_arch(config.arch);
        self.memory.set_trdos_autopage(config.betadisk);
        self.video.set_timings(timings);
        self.video.set_fps_overlay(config.fps_overlay);
        if self.ay.sample_rate() != config.sample_rate {
            self.ay.set_sample_rate(config.sample_rate);
            self.audio = AudioMixer::new(config.sample_rate, &timings);
        }
        else {
            self.audio.set_timings(&timings);
        }
        self.wd.set_fast_mode(config.disk_fast_mode);
        self.ay_enabled = config.ay;
        self.kempston_enabled = config.kempston;
        self.betadisk_enabled = config.betadisk;
    }

    /// Reset the peripherals and the global clock. Inserted media are kept.
    pub fn reset(&mut self) {
        self.global_tstates = 0;
        self.memory.reset();
        self.video.reset();
        self.ay.reset();
        self.audio.reset();
        self.wd.reset();
        self.wd.set_clock(0);
        self.tape.stop();
        self.keyboard.release_all();
        self.kempston = 0;
    }

    pub fn timings(&self) -> &Timings {
        self.video.timings()
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn video(&self) -> &Video {
        &self.video
    }

    pub fn video_mut(&mut self) -> &mut Video {
        &mut self.video
    }

    pub fn ay(&self) -> &Ay {
        &self.ay
    }

    pub fn audio(&self) -> &AudioMixer {
        &self.audio
    }

    pub fn wd1793(&self) -> &Wd1793 {
        &self.wd
    }

    pub fn wd1793_mut(&mut self) -> &mut Wd1793 {
        &mut self.wd
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn tape_mut(&mut self) -> &mut Tape {
        &mut self.tape
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    pub fn keyboard_mut(&mut self) -> &mut Keyboard {
        &mut self.keyboard
    }

    /// Set the state of the Kempston joystick: `000FUDLR`, active high.
    pub fn set_kempston(&mut self, state: u8) {
        self.kempston = state;
    }

    pub fn is_ay_enabled(&self) -> bool {
        self.ay_enabled
    }

    pub fn is_betadisk_enabled(&self) -> bool {
        self.betadisk_enabled
    }

    /// The number of T-states elapsed before the current frame.
    pub fn global_tstates(&self) -> u64 {
        self.global_tstates
    }

    pub fn set_global_tstates(&mut self, global_tstates: u64) {
        self.global_tstates = global_tstates;
    }

    /// Return the global T-state of the frame T-state `ts`.
    #[inline]
    pub fn now(&self, ts: Ts) -> u64 {
        self.global_tstates + u64::from(ts)
    }

    /// Catch the raster up with the `CPU` clock at `ts`.
    #[inline]
    pub fn update_video(&mut self, ts: Ts) {
        self.video.update(ts, self.memory.screen_bank());
    }

    /// Finish the frame at `frame_ts` and advance the global clock by `frame_tstates`.
    pub fn end_frame(&mut self, frame_ts: Ts, frame_tstates: Ts) {
        self.update_video(frame_ts);
        self.video.end_frame(frame_tstates);
        self.global_tstates += u64::from(frame_tstates);
        let ay = if self.ay_enabled { Some(&mut self.ay) } else { None };
        self.audio.end_frame(ay);
        if self.betadisk_enabled {
            self.wd.update(self.global_tstates);
        }
    }

    /// Return a copy of the memory view of the given address range.
    pub fn memory_debug(&self, addrs: Range<u16>) -> Vec<u8> {
        self.memory.memory_debug(addrs)
    }

    #[inline]
    fn floating_bus(&self, ts: Ts) -> u8 {
        self.video.floating_bus(ts, self.memory.screen_bank(), self.memory.is_paging_locked())
    }

    #[inline]
    fn is_betadisk_port(&self) -> bool {
        self.betadisk_enabled && self.memory.is_trdos_paged()
    }

    fn read_ula(&mut self, port: u16, ts: Ts) -> u8 {
        let mut data = 0xBF & self.keyboard.read((port >> 8) as u8);
        if self.tape.is_loading() {
            let ear = self.tape.read(self.now(ts));
            data = (data & !0x40) | (u8::from(ear) << 6);
        }
        data | 0xA0
    }

    fn write_ula(&mut self, data: u8, ts: Ts) {
        let border = data & 7;
        if border != self.video.border() {
            self.update_video(ts);
            self.video.set_border(border);
        }
        let ear = u8::from(self.tape.read(self.now(ts)));
        let level = BEEPER_LEVELS[usize::from(((data >> 2) & 4) | (ear << 1) | ((data >> 3) & 1))];
        self.audio.set_level(ts, level);
    }

    /// Write the `7FFD` latch, return whether the paging has changed.
    fn write_paging(&mut self, data: u8, ts: Ts) -> bool {
        if self.memory.is_paging_locked() {
            return false
        }
        if (data ^ self.memory.read_ctrl()) & 0x08 != 0 {
            self.update_video(ts);
        }
        self.memory.write_ctrl(data)
    }
}

impl z80emu::Memory for Bus {
    type Timestamp = Ts;

    #[inline(always)]
    fn read_opcode(&mut self, pc: u16, ir: u16, ts: Ts) -> u8 {
        self.memory.read_opcode(pc, ir, ts)
    }

    #[inline(always)]
    fn read_mem(&self, addr: u16, ts: Ts) -> u8 {
        self.memory.read_mem(addr, ts)
    }

    #[inline(always)]
    fn read_mem16(&self, addr: u16, ts: Ts) -> u16 {
        self.memory.read_mem16(addr, ts)
    }

    #[inline(always)]
    fn write_mem(&mut self, addr: u16, data: u8, ts: Ts) {
        if self.memory.is_screen_addr(addr) {
            self.update_video(ts);
        }
        self.memory.write_mem(addr, data, ts)
    }

    #[inline(always)]
    fn read_debug(&self, addr: u16) -> u8 {
        self.memory.read_debug(addr)
    }
}

impl Io for Bus {
    type Timestamp = Ts;
    type WrIoBreak = PagingChanged;
    type RetiBreak = ();

    #[inline(always)]
    fn is_irq(&mut self, ts: Ts) -> bool {
        ts < self.video.timings().int_length
    }

    #[inline(always)]
    fn irq_data(&mut self, _pc: u16, _ts: Ts) -> (u8, Option<NonZeroU16>) {
        (u8::MAX, None)
    }

    #[inline(always)]
    fn reti(&mut self, _addr: u16, _ts: Ts) -> Option<()> {
        None
    }

    fn read_io(&mut self, port: u16, ts: Ts) -> (u8, Option<NonZeroU16>) {
        if self.is_betadisk_port() {
            match port & 0xFF {
                0x1F|0x3F|0x5F|0x7F => {
                    self.wd.update(self.now(ts));
                    return (self.wd.read(((port >> 5) & 3) as u8), None)
                }
                0xFF => {
                    self.wd.update(self.now(ts));
                    return (self.wd.read_system(), None)
                }
                _ => {}
            }
        }
        if self.kempston_enabled && (port & 0xE0 == 0 || port & 0xFF == 0xDF) {
            return (self.kempston, None)
        }
        if port & 1 == 0 {
            return (self.read_ula(port, ts), None)
        }
        if self.ay_enabled && port & 0xC002 == 0xC000 {
            return (self.ay.register_data(), None)
        }
        let data = self.floating_bus(ts);
        if !self.memory.arch().is_48k_memory() && port & 0x8002 == 0 {
            self.write_paging(data, ts);
        }
        (data, None)
    }

    fn write_io(&mut self, port: u16, data: u8, ts: Ts) -> (Option<PagingChanged>, Option<NonZeroU16>) {
        if self.is_betadisk_port() {
            match port & 0xFF {
                0x1F|0x3F|0x5F|0x7F => {
                    self.wd.update(self.now(ts));
                    self.wd.write(((port >> 5) & 3) as u8, data);
                    return (None, None)
                }
                0xFF => {
                    self.wd.update(self.now(ts));
                    self.wd.write_system(data);
                    return (None, None)
                }
                _ => {}
            }
        }
        if port & 1 == 0 {
            self.write_ula(data, ts);
        }
        if self.ay_enabled && port & 0x8002 == 0x8000 {
            if port & 0x4000 != 0 {
                self.ay.select_register(data);
            }
            else {
                self.audio.update_ay(ts, &mut self.ay);
                self.ay.set_register_data(data);
            }
        }
        if !self.memory.arch().is_48k_memory() && port & 0x8002 == 0 && self.write_paging(data, ts) {
            return (Some(()), None)
        }
        (None, None)
    }
}
