/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! Beeper and AY sample streams mixed once per frame.
use super::vec::Vec;
use super::vec;
use super::arch::Timings;
use super::ay::Ay;
use super::clock::Ts;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

/// The default output sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
/// The number of beeper level samples averaged into a single output sample.
pub const BEEPER_OVERSAMPLE: usize = 6;
/// The beeper level of `EAR` and `MIC` bit combinations: `(EAR << 2) | (tape EAR << 1) | MIC`.
pub const BEEPER_LEVELS: [u8;8] = [0, 19, 34, 53, 97, 101, 130, 134];

/// Produces a frame's worth of unsigned 8-bit mono samples.
///
/// Both streams are caught up to the current T-state before each change
/// of the sound state, so the samples follow the state changes in time.
#[derive(Clone, Debug)]
pub struct AudioMixer {
    sample_rate: u32,
    frame_tstates: Ts,
    samples_per_frame: usize,
    level: u8,
    beeper: Vec<u8>,
    beeper_pos: usize,
    ay: Vec<u8>,
    ay_pos: usize,
    output: Vec<u8>,
}

impl AudioMixer {
    pub fn new(sample_rate: u32, timings: &Timings) -> Self {
        let mut mixer = AudioMixer {
            sample_rate,
            frame_tstates: 0,
            samples_per_frame: 0,
            level: 0,
            beeper: Vec::new(),
            beeper_pos: 0,
            ay: Vec::new(),
            ay_pos: 0,
            output: Vec::new(),
        };
        mixer.set_timings(timings);
        mixer
    }

    /// Resize the sample buffers for the frame duration of `timings`.
    pub fn set_timings(&mut self, timings: &Timings) {
        let samples = u64::from(self.sample_rate) * u64::from(timings.micros_per_frame) / 1_000_000;
        self.samples_per_frame = samples as usize;
        self.frame_tstates = timings.frame_tstates;
        self.beeper = vec![0;self.samples_per_frame * BEEPER_OVERSAMPLE];
        self.ay = vec![0;self.samples_per_frame];
        self.output = vec![0;self.samples_per_frame];
        debug!("audio: {} Hz {} samples per frame", self.sample_rate, self.samples_per_frame);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.level = 0;
        self.beeper_pos = 0;
        self.ay_pos = 0;
        self.output.fill(0);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    /// The current beeper level.
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    fn position(&self, ts: Ts, samples: usize) -> usize {
        let pos = u64::from(ts) * samples as u64 / u64::from(self.frame_tstates.max(1));
        (pos as usize).min(samples)
    }

    /// Catch the beeper stream up to `ts` and change the beeper level.
    pub fn set_level(&mut self, ts: Ts, level: u8) {
        if level != self.level {
            let pos = self.position(ts, self.beeper.len());
            if pos > self.beeper_pos {
                self.beeper[self.beeper_pos..pos].fill(self.level);
                self.beeper_pos = pos;
            }
            self.level = level;
        }
    }

    /// Catch the AY stream up to `ts`, before the chip's state changes.
    pub fn update_ay(&mut self, ts: Ts, ay: &mut Ay) {
        let pos = self.position(ts, self.ay.len());
        if pos > self.ay_pos {
            ay.gen_sound(&mut self.ay[self.ay_pos..pos]);
            self.ay_pos = pos;
        }
    }

    /// Complete the frame's samples and mix them, see [AudioMixer::samples].
    pub fn end_frame(&mut self, ay: Option<&mut Ay>) {
        self.beeper[self.beeper_pos..].fill(self.level);
        let beeper = self.beeper.chunks_exact(BEEPER_OVERSAMPLE).map(|chunk| {
            chunk.iter().map(|&lvl| u32::from(lvl)).sum::<u32>() / BEEPER_OVERSAMPLE as u32
        });
        match ay {
            Some(ay) => {
                ay.gen_sound(&mut self.ay[self.ay_pos..]);
                for ((out, beep), &ay) in self.output.iter_mut().zip(beeper).zip(self.ay.iter()) {
                    *out = (beep + u32::from(ay)).min(u8::MAX.into()) as u8;
                }
            }
            None => {
                for (out, beep) in self.output.iter_mut().zip(beeper) {
                    *out = beep as u8;
                }
            }
        }
        self.beeper_pos = 0;
        self.ay_pos = 0;
    }

    /// The samples of the last completed frame.
    pub fn samples(&self) -> &[u8] {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Architecture, AspectRatio, CpuSpeed};

    fn timings() -> Timings {
        Timings::new(Architecture::Spec48, AspectRatio::Ratio4x3, CpuSpeed::Normal, false)
    }

    #[test]
    fn samples_per_frame_work() {
        let mixer = AudioMixer::new(44100, &timings());
        assert_eq!(mixer.samples_per_frame(), 880);
        let pentagon = Timings::new(Architecture::Pentagon, AspectRatio::Ratio4x3, CpuSpeed::Normal, false);
        assert_eq!(AudioMixer::new(44100, &pentagon).samples_per_frame(), 903);
        let fast = Timings::new(Architecture::Spec48, AspectRatio::Ratio4x3, CpuSpeed::Fast150, false);
        assert_eq!(AudioMixer::new(44100, &fast).samples_per_frame(), 587);
    }

    #[test]
    fn beeper_follows_level_changes() {
        let timings = timings();
        let mut mixer = AudioMixer::new(44100, &timings);
        let half = timings.frame_tstates / 2;
        mixer.set_level(half, BEEPER_LEVELS[4]);
        mixer.end_frame(None);
        let samples = mixer.samples();
        assert_eq!(samples.len(), 880);
        assert!(samples[..439].iter().all(|&s| s == 0));
        assert!(samples[441..].iter().all(|&s| s == 97));
        // the level persists into the next frame
        mixer.end_frame(None);
        assert!(mixer.samples().iter().all(|&s| s == 97));
    }

    #[test]
    fn ay_is_mixed_with_saturation() {
        let timings = timings();
        let mut mixer = AudioMixer::new(44100, &timings);
        let mut ay = Ay::new(44100);
        ay.select_register(7);
        ay.set_register_data(0x3F);
        mixer.set_level(0, BEEPER_LEVELS[7]);
        mixer.update_ay(timings.frame_tstates / 2, &mut ay);
        for reg in 8..=10 {
            ay.select_register(reg);
            ay.set_register_data(15);
        }
        mixer.end_frame(Some(&mut ay));
        let samples = mixer.samples();
        assert_eq!(samples[0], 134);
        assert_eq!(samples[879], u8::MAX);
    }
}
