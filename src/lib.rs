/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    espectrum-core is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    espectrum-core is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
/*! # ESPectrum core

The cycle-accurate heart of a ZX Spectrum family emulator built on top of the
[z80emu](https://github.com/royaltm/rust-z80emu) Z80 CPU emulator.

```text
  _______                        ___________
=|       |=                     |           |
=|  Cpu  |= ----- Clock ------- | FrameClock| <- contention law (arch)
=|  Z80  |=                     |___________|
=|       |=                      _____|_____
=|       |= <-------------->    |           |-- Memory (ROM/RAM paging)
=|       |=                     |    Bus    |-- Video (ULA raster)
=|_______|=                     |___________|-- Ay, Wd1793, Tape, AudioMixer
```

* [Machine] owns the whole emulated computer and runs it one video frame at a time.
* [FrameClock] implements [z80emu::Clock] and prices every bus cycle, charging
  wait states on contended pages.
* [Bus] implements [z80emu::Memory] and [z80emu::Io], decodes ports and keeps
  the raster engine in step with accesses that can be observed on screen.
* [Video] is the ULA raster engine painting a palette indexed framebuffer.
* [Ay] is the AY-3-8912 digital sound generator.
* [Wd1793] is the microsequenced Betadisk floppy disk controller.
* [Tape] plays TAP images through the EAR line.

To build the crate with `no_std` support set `default-features` to `false`.
Loading media from files requires the `std` feature.
*/
#![cfg_attr(not(feature = "std"), no_std)]
pub mod arch;
pub mod audio;
pub mod ay;
pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod machine;
pub mod memory;
pub mod tape;
pub mod video;
pub mod wd1793;

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
pub(crate) use std::{boxed, vec};
#[cfg(not(feature = "std"))]
pub(crate) use alloc::{boxed, vec};

pub use arch::{Architecture, AspectRatio, CpuSpeed, Timings};
pub use audio::AudioMixer;
pub use ay::Ay;
pub use bus::{Bus, Keyboard};
pub use clock::{FrameClock, Ts};
pub use config::Config;
pub use error::{Error, Result};
pub use machine::{CpuRegisters, Machine, Snapshot};
pub use memory::Memory;
pub use tape::{Tape, TapeStatus};
pub use video::{DrawStatus, Video};
pub use wd1793::Wd1793;
