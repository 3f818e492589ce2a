/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! AY-3-8912 Programmable Sound Generator.
//!
//! | Reg | Function             | Mask |
//! |-----|----------------------|------|
//! | 0-5 | tone A, B, C periods | fine 8 bits, coarse 4 bits |
//! | 6   | noise period         | 5 bits |
//! | 7   | mixer, set bit mutes | tone 0-2, noise 3-5 |
//! | 8-10| volume A, B, C       | 4 bits + envelope enable bit 4 |
//! | 11  | envelope period fine | 8 bits |
//! | 12  | envelope period coarse | 8 bits |
//! | 13  | envelope shape       | 4 bits, restarts the envelope |
//!
//! The I/O port registers 14 and 15 are not wired and read back as `0xFF`.
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

/// The AY clock of the 128K Spectrum family in Hz.
pub const DEFAULT_CHIP_FREQ: u32 = 1_773_400;
/// The number of sound state registers.
pub const NUM_REGISTERS: usize = 14;
/// The number of envelope steps of a shape.
pub const ENVELOPE_STEPS: usize = 64;

const MAX_AMP: u32 = 140;
const NOISE_SEED: u32 = 0xFFFF;
const NOISE_TAPS: u32 = 0x14000;

const REGISTER_MASKS: [u8;NUM_REGISTERS] = [
    0xFF, 0x0F, 0xFF, 0x0F, 0xFF, 0x0F, 0x1F, 0xFF, 0x1F, 0x1F, 0x1F, 0xFF, 0xFF, 0x0F
];

/// A logarithmic volume table of 32 levels, 2 levels per amplitude step of the DAC.
///
/// `table[v] = (140 / 3) / sqrt(2)^((v ^ 31) / 3.18)` less `table[0]`.
pub const VOLUME_TABLE: [u32;32] = [
    0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 4, 4, 5, 6, 7,
    8, 9, 10, 11, 13, 14, 16, 18, 20, 23, 26, 29, 32, 36, 40, 45
];

/// The 4-bit volume register to a volume table level.
const VOLUME_LEVELS: [u8;16] = [0, 3, 5, 7, 9, 11, 13, 15, 17, 19, 21, 23, 25, 27, 29, 31];

/// The envelope shapes which restart after the last step, the others hold the last level.
const ENVELOPE_WRAPS: u16 = 1 << 8 | 1 << 10 | 1 << 12 | 1 << 14;

/// The envelope levels of all 16 shapes.
pub static ENVELOPES: [[u8;ENVELOPE_STEPS];16] = envelope_shapes();

const fn envelope_shapes() -> [[u8;ENVELOPE_STEPS];16] {
    let mut shapes = [[0u8;ENVELOPE_STEPS];16];
    let mut shape = 0;
    while shape < 16 {
        let attack = shape & 4 != 0;
        let mut hold = false;
        let mut dir: i32 = if attack { 1 } else { -1 };
        let mut vol: i32 = if attack { -1 } else { 32 };
        let mut pos = 0;
        while pos < ENVELOPE_STEPS {
            if !hold {
                vol += dir;
                if vol < 0 || vol >= 32 {
                    if shape & 8 != 0 {
                        if shape & 2 != 0 {
                            dir = -dir;
                        }
                        vol = if dir > 0 { 0 } else { 31 };
                        if shape & 1 != 0 {
                            hold = true;
                            vol = if dir > 0 { 31 } else { 0 };
                        }
                    }
                    else {
                        vol = 0;
                        hold = true;
                    }
                }
            }
            shapes[shape][pos] = vol as u8;
            pos += 1;
        }
        shape += 1;
    }
    shapes
}

#[derive(Clone, Copy, Debug, Default)]
struct Tone {
    period: u16,
    counter: u16,
    bit: bool,
}

impl Tone {
    #[inline(always)]
    fn clock(&mut self) {
        self.counter += 1;
        if self.counter >= self.period {
            self.counter = 0;
            self.bit = !self.bit;
        }
    }
}

/// The AY-3-8912 sound generator producing unsigned 8-bit mono samples.
#[derive(Clone, Debug)]
pub struct Ay {
    regs: [u8;NUM_REGISTERS],
    selected: u8,
    tones: [Tone;3],
    noise_counter: u16,
    noise_bit: bool,
    lfsr: u32,
    env_counter: u32,
    env_pos: usize,
    chip_freq: u32,
    sample_rate: u32,
    tacts_per_sample: u32,
    amp_global: u32,
}

impl Default for Ay {
    fn default() -> Self {
        Ay::new(44100)
    }
}

impl Ay {
    /// Create a new chip producing samples at the given rate.
    pub fn new(sample_rate: u32) -> Self {
        let mut ay = Ay {
            regs: [0;NUM_REGISTERS],
            selected: u8::MAX,
            tones: Default::default(),
            noise_counter: 0,
            noise_bit: false,
            lfsr: NOISE_SEED,
            env_counter: 0,
            env_pos: 0,
            chip_freq: DEFAULT_CHIP_FREQ,
            sample_rate,
            tacts_per_sample: 1,
            amp_global: 1,
        };
        ay.prepare_generation();
        ay.reset();
        ay
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.prepare_generation();
    }

    pub fn set_chip_freq(&mut self, chip_freq: u32) {
        self.chip_freq = chip_freq;
        self.prepare_generation();
    }

    fn prepare_generation(&mut self) {
        self.tacts_per_sample = (self.chip_freq / self.sample_rate.max(1) / 8).max(1);
        self.amp_global = (self.tacts_per_sample * VOLUME_TABLE[31] * 3 / MAX_AMP).max(1);
        debug!("AY: {} Hz, {} tacts per sample", self.sample_rate, self.tacts_per_sample);
    }

    /// Silence the chip: clear all registers, mute the mixer and restart the generators.
    pub fn reset(&mut self) {
        self.regs = [0;NUM_REGISTERS];
        self.regs[7] = u8::MAX;
        self.selected = u8::MAX;
        self.tones = Default::default();
        self.noise_counter = 0;
        self.noise_bit = false;
        self.lfsr = NOISE_SEED;
        self.env_counter = 0;
        self.env_pos = 0;
    }

    pub fn select_register(&mut self, reg: u8) {
        self.selected = reg;
    }

    pub fn selected_register(&self) -> u8 {
        self.selected
    }

    /// A copy of the sound state registers.
    pub fn registers(&self) -> [u8;NUM_REGISTERS] {
        self.regs
    }

    /// Write the selected register, masked to its width.
    pub fn set_register_data(&mut self, data: u8) {
        let reg = usize::from(self.selected);
        if let Some(&mask) = REGISTER_MASKS.get(reg) {
            let data = data & mask;
            self.regs[reg] = data;
            match reg {
                0..=5 => {
                    let chan = reg >> 1;
                    self.tones[chan].period = u16::from_le_bytes([self.regs[chan * 2], self.regs[chan * 2 + 1]]);
                }
                13 => {
                    self.env_pos = 0;
                    self.env_counter = 0;
                }
                _ => {}
            }
        }
    }

    /// Read the selected register.
    pub fn register_data(&self) -> u8 {
        REGISTER_MASKS.get(usize::from(self.selected))
        .map_or(u8::MAX, |_| self.regs[usize::from(self.selected)])
    }

    #[inline(always)]
    fn noise_period(&self) -> u16 {
        u16::from(self.regs[6]) * 2
    }

    #[inline(always)]
    fn env_period(&self) -> u32 {
        u32::from(u16::from_le_bytes([self.regs[11], self.regs[12]]))
    }

    #[inline(always)]
    fn channel_level(&self, chan: usize, env_level: u8) -> u32 {
        let vol = self.regs[8 + chan];
        let level = if vol & 0x10 != 0 {
            env_level
        }
        else {
            VOLUME_LEVELS[usize::from(vol & 0x0F)]
        };
        VOLUME_TABLE[usize::from(level)]
    }

    fn clock(&mut self) -> u32 {
        for tone in self.tones.iter_mut() {
            tone.clock();
        }
        self.noise_counter += 1;
        if self.noise_counter >= self.noise_period() {
            self.noise_counter = 0;
            let taps = if self.lfsr & 1 != 0 { NOISE_TAPS } else { 0 };
            self.lfsr = (self.lfsr >> 1) ^ taps;
            self.noise_bit = self.lfsr & 1 != 0;
        }
        self.env_counter += 1;
        if self.env_counter >= self.env_period() {
            self.env_counter = 0;
            self.env_pos += 1;
            if self.env_pos >= ENVELOPE_STEPS {
                let shape = self.regs[13];
                self.env_pos = if ENVELOPE_WRAPS & (1 << shape) != 0 { 0 } else { ENVELOPE_STEPS - 1 };
            }
        }
        let env_level = ENVELOPES[usize::from(self.regs[13])][self.env_pos];
        let mixer = self.regs[7];
        let mut mix = 0;
        for (chan, tone) in self.tones.iter().enumerate() {
            let tone_off = mixer & (1 << chan) != 0;
            let noise_off = mixer & (8 << chan) != 0;
            if (tone.bit || tone_off) && (self.noise_bit || noise_off) {
                mix += self.channel_level(chan, env_level);
            }
        }
        mix
    }

    /// Fill `buffer` with the next samples.
    pub fn gen_sound(&mut self, buffer: &mut [u8]) {
        for sample in buffer.iter_mut() {
            let mut mix = 0;
            for _ in 0..self.tacts_per_sample {
                mix += self.clock();
            }
            *sample = (mix / self.amp_global).min(u8::MAX.into()) as u8;
        }
    }
}
