/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! Machine configuration.
#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

use super::arch::{Architecture, AspectRatio, CpuSpeed, Timings};
use super::audio::DEFAULT_SAMPLE_RATE;

/// The configuration of the emulated machine and its peripherals.
///
/// ```
/// use espectrum_core::{Config, Architecture};
///
/// let config = Config::default()
///              .with_arch(Architecture::Spec128)
///              .with_betadisk(true);
/// assert_eq!(config.timings().frame_tstates, 70908);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    pub arch: Architecture,
    pub aspect: AspectRatio,
    /// Run the TK machines at 60Hz.
    pub tk_60hz: bool,
    pub speed: CpuSpeed,
    /// The audio output sample rate in Hz.
    pub sample_rate: u32,
    pub ay: bool,
    pub kempston: bool,
    pub betadisk: bool,
    /// Run the disk controller without the rotational delays.
    pub disk_fast_mode: bool,
    /// Leave a window for the host's frame rate overlay in the bottom border.
    pub fps_overlay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            arch: Architecture::Spec48,
            aspect: AspectRatio::Ratio4x3,
            tk_60hz: false,
            speed: CpuSpeed::Normal,
            sample_rate: DEFAULT_SAMPLE_RATE,
            ay: true,
            kempston: true,
            betadisk: false,
            disk_fast_mode: true,
            fps_overlay: false,
        }
    }
}

impl Config {
    pub fn with_arch(mut self, arch: Architecture) -> Self {
        self.arch = arch;
        self
    }

    pub fn with_aspect(mut self, aspect: AspectRatio) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn with_tk_60hz(mut self, tk_60hz: bool) -> Self {
        self.tk_60hz = tk_60hz;
        self
    }

    pub fn with_speed(mut self, speed: CpuSpeed) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_ay(mut self, enabled: bool) -> Self {
        self.ay = enabled;
        self
    }

    pub fn with_kempston(mut self, enabled: bool) -> Self {
        self.kempston = enabled;
        self
    }

    pub fn with_betadisk(mut self, enabled: bool) -> Self {
        self.betadisk = enabled;
        self
    }

    pub fn with_disk_fast_mode(mut self, enabled: bool) -> Self {
        self.disk_fast_mode = enabled;
        self
    }

    pub fn with_fps_overlay(mut self, enabled: bool) -> Self {
        self.fps_overlay = enabled;
        self
    }

    /// Return the timings of the configured machine.
    pub fn timings(&self) -> Timings {
        Timings::new(self.arch, self.aspect, self.speed, self.tk_60hz)
    }
}
