/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! The emulated computer and its frame driver.
use core::convert::TryFrom;
use z80emu::{Cpu, Clock, BreakCause, Prefix, StkReg16, InterruptMode, Z80NMOS};

#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

use super::vec::Vec;
use super::arch::Architecture;
use super::bus::Bus;
use super::clock::{FrameClock, Ts};
use super::config::Config;
use super::error::{Error, Result};
use super::memory::{PAGE_SIZE, RAM_BANKS};
use super::wd1793::{Disk, DRIVE_UNITS};

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

/// The register set of the `CPU` stored in a [Snapshot].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CpuRegisters {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub af_alt: u16,
    pub bc_alt: u16,
    pub de_alt: u16,
    pub hl_alt: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,
    /// The interrupt mode: 0, 1 or 2.
    pub im: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub halted: bool,
}

impl CpuRegisters {
    /// Read the registers of the `cpu`.
    pub fn from_cpu<C: Cpu>(cpu: &C) -> Self {
        let (iff1, iff2) = cpu.get_iffs();
        CpuRegisters {
            af: cpu.get_reg16(StkReg16::AF),
            bc: cpu.get_reg16(StkReg16::BC),
            de: cpu.get_reg16(StkReg16::DE),
            hl: cpu.get_reg16(StkReg16::HL),
            af_alt: cpu.get_alt_reg16(StkReg16::AF),
            bc_alt: cpu.get_alt_reg16(StkReg16::BC),
            de_alt: cpu.get_alt_reg16(StkReg16::DE),
            hl_alt: cpu.get_alt_reg16(StkReg16::HL),
            ix: cpu.get_index16(Prefix::Xdd),
            iy: cpu.get_index16(Prefix::Yfd),
            sp: cpu.get_sp(),
            pc: cpu.get_pc(),
            i: cpu.get_i(),
            r: cpu.get_r(),
            im: cpu.get_im() as u8,
            iff1, iff2,
            halted: cpu.is_halt(),
        }
    }

    /// Load the registers into the `cpu`.
    pub fn apply<C: Cpu>(&self, cpu: &mut C) -> Result<()> {
        let im = InterruptMode::try_from(self.im)
                 .map_err(|_| Error::InvalidFormat("invalid interrupt mode"))?;
        cpu.reset();
        cpu.set_reg16(StkReg16::AF, self.af_alt);
        cpu.set_reg16(StkReg16::BC, self.bc_alt);
        cpu.set_reg16(StkReg16::DE, self.de_alt);
        cpu.set_reg16(StkReg16::HL, self.hl_alt);
        cpu.ex_af_af();
        cpu.exx();
        cpu.set_reg16(StkReg16::AF, self.af);
        cpu.set_reg16(StkReg16::BC, self.bc);
        cpu.set_reg16(StkReg16::DE, self.de);
        cpu.set_reg16(StkReg16::HL, self.hl);
        cpu.set_index16(Prefix::Xdd, self.ix);
        cpu.set_index16(Prefix::Yfd, self.iy);
        cpu.set_sp(self.sp);
        cpu.set_pc(self.pc);
        cpu.set_i(self.i);
        cpu.set_r(self.r);
        cpu.set_im(im);
        cpu.set_iffs(self.iff1, self.iff2);
        if self.halted {
            cpu.halt();
        }
        Ok(())
    }
}

/// A machine state to be restored with [Machine::load_snapshot].
///
/// Parsing snapshot file formats is left to the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Snapshot {
    pub arch: Architecture,
    pub registers: CpuRegisters,
    pub border: u8,
    /// The value of the `7FFD` latch, ignored by 48K machines.
    pub ctrl_7ffd: Option<u8>,
    pub trdos_paged: bool,
    /// The T-state of the current frame.
    pub tstates: Ts,
    /// RAM bank numbers with their contents.
    pub ram_banks: Vec<(usize, Vec<u8>)>,
}

/// The ZX Spectrum family computer.
///
/// Owns the `CPU`, its clock and the [Bus] with all the peripherals, and runs
/// them one video frame at a time with [Machine::run_frame].
pub struct Machine<C = Z80NMOS> {
    cpu: C,
    clock: FrameClock,
    bus: Bus,
    config: Config,
    frames: u64,
}

impl<C: Cpu + Default> Machine<C> {
    /// Create a new machine from the given configuration.
    ///
    /// ROMs should be installed with [Machine::install_rom] before running.
    pub fn new(config: Config) -> Self {
        Machine::with_cpu(C::default(), config)
    }
}

impl<C: Cpu> Machine<C> {
    /// Create a new machine with the given `cpu` instance.
    pub fn with_cpu(cpu: C, config: Config) -> Self {
        let timings = config.timings();
        info!("{}: {} T-states per frame, {} us", timings.arch.name(),
              timings.frame_tstates, timings.micros_per_frame);
        let mut machine = Machine {
            cpu,
            clock: FrameClock::new(timings),
            bus: Bus::new(&config),
            config,
            frames: 0,
        };
        machine.reset();
        machine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Apply a new configuration and reset the machine.
    pub fn set_config(&mut self, config: Config) {
        let timings = config.timings();
        info!("{}: {} T-states per frame, {} us", timings.arch.name(),
              timings.frame_tstates, timings.micros_per_frame);
        self.config = config;
        self.clock.set_timings(timings);
        self.bus.reconfigure(&config);
        self.reset();
    }

    /// Install a ROM image into the given slot, see [crate::memory::Memory::install_rom].
    pub fn install_rom(&mut self, slot: usize, rom: &[u8]) -> Result<()> {
        self.bus.memory_mut().install_rom(slot, rom)
    }

    /// Reset the `CPU`, the clocks and the peripherals.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.clock.reset();
        self.bus.reset();
        self.clock.set_contended_pages(self.bus.memory().contended_pages());
        self.frames = 0;
    }

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// The T-state of the current frame.
    pub fn tstates(&self) -> Ts {
        self.clock.as_timestamp()
    }

    /// The number of T-states of all completed frames.
    pub fn global_tstates(&self) -> u64 {
        self.bus.global_tstates()
    }

    /// The number of frames run since the last reset.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The framebuffer of the last frame, see [crate::video::PALETTE].
    pub fn framebuffer(&self) -> &[u8] {
        self.bus.video().buffer()
    }

    /// The audio samples of the last frame.
    pub fn audio_samples(&self) -> &[u8] {
        self.bus.audio().samples()
    }

    #[inline]
    fn sync_contended_pages(&mut self) {
        self.clock.set_contended_pages(self.bus.memory().contended_pages());
    }

    /// Whether an interrupt would be accepted at the current T-state.
    #[inline]
    fn is_irq_pending(&self) -> bool {
        self.cpu.is_irq_allowed()
        && self.clock.as_timestamp() < self.clock.timings().int_length
    }

    /// Run the emulation until the end of the current frame.
    pub fn run_frame(&mut self) {
        let frame_tstates = self.clock.timings().frame_tstates;
        self.sync_contended_pages();
        loop {
            if self.cpu.is_halt() && !self.is_irq_pending() {
                self.flush_on_halt();
                break
            }
            match self.cpu.execute_with_limit(&mut self.bus, &mut self.clock, frame_tstates) {
                Ok(()) if !self.clock.is_paging_pending() => break,
                Ok(()) => self.sync_contended_pages(),
                Err(BreakCause::Halt) => {}
                Err(BreakCause::WriteIo(())) => self.sync_contended_pages(),
                Err(BreakCause::Reti(())) => {}
            }
        }
        self.end_frame();
    }

    /// Advance the clock of a halted `CPU` to the end of the frame.
    ///
    /// The `CPU` keeps executing `M1` cycles at `PC` while halted, each one
    /// incrementing the memory refresh register.
    pub fn flush_on_halt(&mut self) {
        let frame_tstates = self.clock.timings().frame_tstates;
        let ts = self.clock.as_timestamp();
        if ts >= frame_tstates {
            return
        }
        let pc = self.cpu.get_pc();
        if self.clock.contended_pages() & (1 << (pc >> 14)) != 0 {
            let mut cycles = 0i32;
            while !self.clock.is_frame_over() {
                self.clock.add_halted_m1(pc);
                cycles += 1;
            }
            self.cpu.add_r(cycles);
        }
        else {
            let cycles = (frame_tstates - ts + 3) / 4;
            self.clock.add(cycles * 4);
            self.cpu.add_r(cycles as i32);
        }
    }

    fn end_frame(&mut self) {
        let frame_ts = self.clock.as_timestamp();
        let frame_tstates = self.clock.wrap_frame();
        self.bus.end_frame(frame_ts, frame_tstates);
        self.frames += 1;
    }

    /// Restore the machine state from the `snapshot`.
    ///
    /// The machine is reconfigured if the snapshot's architecture differs.
    /// On error the machine state is left untouched.
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        for (bank, data) in snapshot.ram_banks.iter() {
            if *bank >= RAM_BANKS {
                return Err(Error::InvalidUnit(*bank));
            }
            if data.len() > PAGE_SIZE {
                return Err(Error::InvalidFormat("RAM bank data is too big"));
            }
        }
        if snapshot.registers.im > 2 {
            return Err(Error::InvalidFormat("invalid interrupt mode"));
        }
        if snapshot.arch != self.config.arch {
            info!("snapshot: switching to {}", snapshot.arch.name());
            self.set_config(self.config.with_arch(snapshot.arch));
        }
        else {
            self.reset();
        }
        let memory = self.bus.memory_mut();
        for (bank, data) in snapshot.ram_banks.iter() {
            memory.load_ram_bank(*bank, data)?;
        }
        memory.restore_ctrl(snapshot.ctrl_7ffd.unwrap_or(0), snapshot.trdos_paged);
        snapshot.registers.apply(&mut self.cpu)?;
        let ts = snapshot.tstates % self.clock.timings().frame_tstates;
        self.clock.set_tstates(ts);
        let video = self.bus.video_mut();
        video.set_border(snapshot.border & 7);
        video.set_tstates(ts);
        self.sync_contended_pages();
        debug!("snapshot: PC: {:04x} T-states: {}", snapshot.registers.pc, ts);
        Ok(())
    }

    /// Capture the machine state.
    pub fn save_snapshot(&self) -> Snapshot {
        let memory = self.bus.memory();
        let arch = memory.arch();
        let banks: &[usize] = if arch.is_48k_memory() { &[5, 2, 0] } else { &[0, 1, 2, 3, 4, 5, 6, 7] };
        Snapshot {
            arch,
            registers: CpuRegisters::from_cpu(&self.cpu),
            border: self.bus.video().border(),
            ctrl_7ffd: (!arch.is_48k_memory()).then(|| memory.read_ctrl()),
            trdos_paged: memory.is_trdos_paged(),
            tstates: self.clock.as_timestamp(),
            ram_banks: banks.iter().map(|&bank| (bank, memory.ram_bank(bank).to_vec())).collect(),
        }
    }

    /// Insert a TAP image, see [crate::tape::Tape::insert_tap].
    pub fn insert_tape(&mut self, image: Vec<u8>) -> Result<()> {
        self.bus.tape_mut().insert_tap(image)
    }

    /// Start playing the tape now.
    pub fn play_tape(&mut self) -> Result<()> {
        let now = self.bus.now(self.clock.as_timestamp());
        self.bus.tape_mut().play(now)
    }

    pub fn stop_tape(&mut self) {
        self.bus.tape_mut().stop()
    }

    /// Insert a TRD or SCL disk image into the drive `unit`.
    pub fn insert_disk(&mut self, unit: usize, image: Vec<u8>) -> Result<()> {
        if unit >= DRIVE_UNITS {
            return Err(Error::InvalidUnit(unit));
        }
        self.bus.wd1793_mut().insert_disk(unit, image)
    }

    /// Remove the disk from the drive `unit` returning it with all the changes written.
    pub fn eject_disk(&mut self, unit: usize) -> Option<Disk> {
        if unit >= DRIVE_UNITS {
            return None
        }
        self.bus.wd1793_mut().eject(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PAGE_SIZE;

    fn machine(config: Config, rom: &[u8]) -> Machine {
        let mut machine = Machine::<Z80NMOS>::new(config);
        machine.install_rom(0, rom).unwrap();
        machine
    }

    #[test]
    fn nop_frame_works() {
        let mut m = machine(Config::default(), &[0;PAGE_SIZE]);
        m.run_frame();
        assert_eq!(m.frames(), 1);
        assert_eq!(m.global_tstates(), 69888);
        assert!(m.tstates() < 69888);
        m.run_frame();
        assert_eq!(m.frames(), 2);
        assert_eq!(m.global_tstates(), 2 * 69888);
        assert_eq!(m.bus().video().frames(), 2);
    }

    #[test]
    fn halted_frame_is_flushed() {
        // DI; HALT
        let mut m = machine(Config::default(), &[0xF3, 0x76]);
        m.run_frame();
        assert!(m.cpu().is_halt());
        assert_eq!(m.tstates(), 0);
        assert_eq!(m.global_tstates(), 69888);
        let r = m.cpu().get_r();
        m.run_frame();
        assert_eq!(m.tstates(), 0);
        assert_eq!(m.cpu().get_r() & 0x7F, r.wrapping_add((69888 / 4) as u8) & 0x7F);
    }

    #[test]
    fn halt_in_contended_page_is_flushed() {
        let mut m = machine(Config::default(), &[0;PAGE_SIZE]);
        m.bus_mut().memory_mut().ram_bank_mut(5)[0] = 0x76;
        m.cpu_mut().set_pc(0x4000);
        m.cpu_mut().set_iffs(false, false);
        m.run_frame();
        assert!(m.cpu().is_halt());
        assert!(m.tstates() < 8);
        assert_eq!(m.frames(), 1);
    }

    #[test]
    fn interrupt_wakes_halted_cpu() {
        // IM 1; EI; HALT at 0, RET handler at 0x38
        let mut rom = [0;PAGE_SIZE];
        rom[..4].copy_from_slice(&[0xED, 0x56, 0xFB, 0x76]);
        rom[4..6].copy_from_slice(&[0x18, 0xFC]);
        rom[0x38] = 0xC9;
        let mut m = machine(Config::default(), &rom);
        m.cpu_mut().set_sp(0x8000);
        m.run_frame();
        assert!(m.cpu().is_halt());
        m.run_frame();
        // the interrupt ended the halt, the loop halts again
        assert!(m.cpu().is_halt());
        assert!(m.tstates() < 8);
        assert_eq!(m.frames(), 2);
    }

    #[test]
    fn snapshot_restores_state() {
        let mut m = machine(Config::default(), &[0xF3, 0x76]);
        let mut snapshot = Snapshot {
            arch: Architecture::Spec128,
            border: 3,
            ctrl_7ffd: Some(0x13),
            tstates: 1000,
            ..Default::default()
        };
        snapshot.registers.pc = 0x8000;
        snapshot.registers.sp = 0xFF00;
        snapshot.registers.hl_alt = 0x1234;
        snapshot.registers.im = 2;
        snapshot.registers.iff1 = true;
        snapshot.ram_banks.push((3, vec![0xAA;16]));
        m.load_snapshot(&snapshot).unwrap();
        assert_eq!(m.config().arch, Architecture::Spec128);
        assert_eq!(m.clock().timings().frame_tstates, 70908);
        assert_eq!(m.tstates(), 1000);
        assert_eq!(m.bus().video().border(), 3);
        assert_eq!(m.bus().memory().bank_latch(), 3);
        assert_eq!(m.clock().contended_pages(), 0b1010);
        assert_eq!(m.cpu().get_pc(), 0x8000);
        assert_eq!(m.cpu().get_alt_reg16(StkReg16::HL), 0x1234);
        assert_eq!(m.cpu().get_im(), InterruptMode::Mode2);
        assert_eq!(m.bus().memory_debug(0xC000..0xC002), [0xAA, 0xAA]);

        let saved = m.save_snapshot();
        assert_eq!(saved.arch, Architecture::Spec128);
        assert_eq!(saved.registers, snapshot.registers);
        assert_eq!(saved.ctrl_7ffd, Some(0x13));
        assert_eq!(saved.tstates, 1000);
        assert_eq!(saved.ram_banks.len(), 8);
        assert_eq!(&saved.ram_banks[3].1[..16], &[0xAA;16]);
    }

    #[test]
    fn invalid_snapshot_is_rejected() {
        let mut m = machine(Config::default(), &[0xF3, 0x76]);
        m.run_frame();
        let mut snapshot = Snapshot { arch: Architecture::Pentagon, ..Default::default() };
        snapshot.ram_banks.push((8, vec![]));
        assert!(matches!(m.load_snapshot(&snapshot), Err(Error::InvalidUnit(8))));
        snapshot.ram_banks.clear();
        snapshot.registers.im = 3;
        assert!(m.load_snapshot(&snapshot).is_err());
        assert_eq!(m.config().arch, Architecture::Spec48);
        assert_eq!(m.frames(), 1);
    }
}
