/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! ROM and RAM banks with the 128K paging latch.
use core::ops::Range;
use super::vec::Vec;
use super::boxed::Box;
use super::arch::Architecture;
use super::clock::Ts;
use super::error::{Error, Result};

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

/// The size of a memory page and of each ROM and RAM bank.
pub const PAGE_SIZE: usize = 0x4000;
/// The number of RAM banks.
pub const RAM_BANKS: usize = 8;
/// The number of ROM slots.
pub const ROM_SLOTS: usize = 5;
/// The ROM slot holding the Betadisk TR-DOS ROM.
pub const TRDOS_ROM: usize = 4;
/// The size of the bitmap and attributes area of a screen bank.
pub const SCREEN_SIZE: u16 = 0x1B00;

const PAGE_SHIFT: u32 = 14;
const PAGE_MASK: u16 = (PAGE_SIZE - 1) as u16;
const TRDOS_ENTRY: Range<u16> = 0x3D00..0x3E00;
const TRDOS_EXIT: u16 = 0x4000;

/// A memory bank.
pub type Bank = Box<[u8;PAGE_SIZE]>;

/// The memory of the Spectrum family.
///
/// Page 0 holds a ROM, page 1 RAM bank 5, page 2 RAM bank 2 and page 3 the RAM bank
/// selected with the `7FFD` latch.
pub struct Memory {
    roms: [Bank;ROM_SLOTS],
    ram: [Bank;RAM_BANKS],
    arch: Architecture,
    rom_in_use: u8,
    bank_latch: u8,
    video_latch: bool,
    rom_latch: bool,
    paging_lock: bool,
    trdos_paged: bool,
    trdos_autopage: bool,
}

fn empty_bank(fill: u8) -> Bank {
    Box::new([fill;PAGE_SIZE])
}

impl Memory {
    pub fn new(arch: Architecture) -> Self {
        let roms = core::array::from_fn(|_| empty_bank(u8::MAX));
        let ram = core::array::from_fn(|_| empty_bank(0));
        let mut memory = Memory {
            roms, ram, arch,
            rom_in_use: 0,
            bank_latch: 0,
            video_latch: false,
            rom_latch: false,
            paging_lock: false,
            trdos_paged: false,
            trdos_autopage: false,
        };
        memory.reset();
        memory
    }

    /// Create a bank from the given data, the rest is filled with `0xFF`.
    pub fn make_rom(rom_in: &[u8]) -> Result<Bank> {
        if rom_in.len() > PAGE_SIZE {
            return Err(Error::InvalidFormat("ROM is too big"));
        }
        let mut rom = empty_bank(u8::MAX);
        rom[0..rom_in.len()].copy_from_slice(rom_in);
        Ok(rom)
    }

    /// Install a ROM into the given slot.
    pub fn install_rom(&mut self, slot: usize, rom_in: &[u8]) -> Result<()> {
        if slot >= ROM_SLOTS {
            return Err(Error::InvalidUnit(slot));
        }
        self.roms[slot] = Self::make_rom(rom_in)?;
        debug!("ROM slot {}: {} bytes", slot, rom_in.len());
        Ok(())
    }

    /// Restore the power-on paging state. RAM contents survive.
    pub fn reset(&mut self) {
        self.rom_in_use = 0;
        self.bank_latch = 0;
        self.video_latch = false;
        self.rom_latch = false;
        self.trdos_paged = false;
        self.paging_lock = self.arch.is_48k_memory();
    }

    /// Change the memory model and reset paging.
    pub fn set_arch(&mut self, arch: Architecture) {
        self.arch = arch;
        self.reset();
    }

    pub fn arch(&self) -> Architecture {
        self.arch
    }

    /// Enable TR-DOS ROM paging on opcode fetches from `3D00h-3DFFh`.
    pub fn set_trdos_autopage(&mut self, enabled: bool) {
        self.trdos_autopage = enabled;
        if !enabled {
            self.page_trdos(false);
        }
    }

    /// Return a bit mask of contended pages, bit N for page N.
    pub fn contended_pages(&self) -> u8 {
        if !self.arch.is_contended() {
            return 0
        }
        let mut mask = 0b0010;
        if self.bank_latch & 1 == 1 {
            mask |= 0b1000;
        }
        mask
    }

    /// Return `true` if the given page is contended.
    pub fn is_contended(&self, addr: u16) -> bool {
        self.contended_pages() & (1 << (addr >> PAGE_SHIFT)) != 0
    }

    /// Return the RAM bank index currently displayed by the ULA.
    #[inline]
    pub fn screen_bank_index(&self) -> usize {
        if self.video_latch { 7 } else { 5 }
    }

    /// Return the RAM bank currently displayed by the ULA.
    #[inline]
    pub fn screen_bank(&self) -> &[u8;PAGE_SIZE] {
        &self.ram[self.screen_bank_index()]
    }

    /// Return `true` if a write to `addr` would modify the displayed picture.
    #[inline]
    pub fn is_screen_addr(&self, addr: u16) -> bool {
        if addr & PAGE_MASK >= SCREEN_SIZE {
            return false
        }
        let screen = self.screen_bank_index();
        match addr >> PAGE_SHIFT {
            1 => screen == 5,
            3 => usize::from(self.bank_latch) == screen,
            _ => false
        }
    }

    /// Return whether the `7FFD` latch is locked.
    pub fn is_paging_locked(&self) -> bool {
        self.paging_lock
    }

    pub fn is_trdos_paged(&self) -> bool {
        self.trdos_paged
    }

    /// Return the RAM bank paged at `C000h`.
    pub fn bank_latch(&self) -> u8 {
        self.bank_latch
    }

    /// Return the value of the `7FFD` latch.
    pub fn read_ctrl(&self) -> u8 {
        self.bank_latch
        | (u8::from(self.video_latch) << 3)
        | (u8::from(self.rom_latch) << 4)
        | (u8::from(self.paging_lock) << 5)
    }

    /// Write the `7FFD` latch. Return `false` if paging is locked.
    pub fn write_ctrl(&mut self, data: u8) -> bool {
        if self.paging_lock {
            return false
        }
        self.set_ctrl(data);
        true
    }

    fn set_ctrl(&mut self, data: u8) {
        self.paging_lock = data & 0x20 != 0;
        self.bank_latch = data & 0x07;
        self.video_latch = data & 0x08 != 0;
        self.rom_latch = data & 0x10 != 0;
        if !self.trdos_paged {
            self.rom_in_use = u8::from(self.rom_latch);
        }
        debug!("7FFD: bank: {} screen: {} rom: {} lock: {}",
               self.bank_latch, self.screen_bank_index(), self.rom_latch, self.paging_lock);
    }

    /// Force the paging state, bypassing the lock.
    pub fn restore_ctrl(&mut self, data: u8, trdos_paged: bool) {
        if self.arch.is_48k_memory() {
            self.reset();
        }
        else {
            self.set_ctrl(data);
        }
        self.page_trdos(trdos_paged);
    }

    /// Page in or out the TR-DOS ROM.
    pub fn page_trdos(&mut self, paged: bool) {
        if paged != self.trdos_paged {
            trace!("TR-DOS paged: {}", paged);
        }
        self.trdos_paged = paged;
        self.rom_in_use = if paged {
            TRDOS_ROM as u8
        }
        else {
            u8::from(self.rom_latch)
        };
    }

    #[inline]
    fn is_basic_rom_paged(&self) -> bool {
        !self.trdos_paged && (self.arch.is_48k_memory() || self.rom_latch)
    }

    pub fn ram_bank(&self, bank: usize) -> &[u8;PAGE_SIZE] {
        &self.ram[bank & (RAM_BANKS - 1)]
    }

    pub fn ram_bank_mut(&mut self, bank: usize) -> &mut [u8;PAGE_SIZE] {
        &mut self.ram[bank & (RAM_BANKS - 1)]
    }

    /// Copy `data` into the RAM bank.
    pub fn load_ram_bank(&mut self, bank: usize, data: &[u8]) -> Result<()> {
        if bank >= RAM_BANKS {
            return Err(Error::InvalidUnit(bank));
        }
        if data.len() > PAGE_SIZE {
            return Err(Error::InvalidFormat("RAM bank data is too big"));
        }
        self.ram[bank][0..data.len()].copy_from_slice(data);
        Ok(())
    }

    #[inline(always)]
    fn page(&self, addr: u16) -> &[u8;PAGE_SIZE] {
        match addr >> PAGE_SHIFT {
            0 => &self.roms[usize::from(self.rom_in_use)],
            1 => &self.ram[5],
            2 => &self.ram[2],
            _ => &self.ram[usize::from(self.bank_latch)],
        }
    }

    /// Return a copy of the memory view of the given address range.
    pub fn memory_debug(&self, addrs: Range<u16>) -> Vec<u8> {
        addrs.map(|addr| z80emu::Memory::read_debug(self, addr)).collect()
    }
}

impl z80emu::Memory for Memory {
    type Timestamp = Ts;

    #[inline(always)]
    fn read_opcode(&mut self, pc: u16, _ir: u16, _ts: Ts) -> u8 {
        if self.trdos_autopage {
            if self.trdos_paged {
                if pc >= TRDOS_EXIT {
                    self.page_trdos(false);
                }
            }
            else if TRDOS_ENTRY.contains(&pc) && self.is_basic_rom_paged() {
                self.page_trdos(true);
            }
        }
        self.read_debug(pc)
    }

    #[inline(always)]
    fn read_mem(&self, addr: u16, _ts: Ts) -> u8 {
        self.read_debug(addr)
    }

    #[inline(always)]
    fn read_mem16(&self, addr: u16, _ts: Ts) -> u16 {
        u16::from_le_bytes([self.read_debug(addr), self.read_debug(addr.wrapping_add(1))])
    }

    #[inline(always)]
    fn write_mem(&mut self, addr: u16, data: u8, _ts: Ts) {
        let offset = usize::from(addr & PAGE_MASK);
        match addr >> PAGE_SHIFT {
            0 => {}
            1 => self.ram[5][offset] = data,
            2 => self.ram[2][offset] = data,
            _ => self.ram[usize::from(self.bank_latch)][offset] = data,
        }
    }

    #[inline(always)]
    fn read_debug(&self, addr: u16) -> u8 {
        self.page(addr)[usize::from(addr & PAGE_MASK)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z80emu::Memory as _;

    #[test]
    fn memory_paging_works() {
        let mut mem = Memory::new(Architecture::Spec128);
        mem.install_rom(0, &[0x00;PAGE_SIZE]).unwrap();
        mem.install_rom(1, &[0x01;PAGE_SIZE]).unwrap();
        assert_eq!(mem.read_debug(0), 0x00);
        assert_eq!(mem.contended_pages(), 0b0010);
        for bank in 0..8u8 {
            assert!(mem.write_ctrl(bank));
            mem.write_mem(0xC000, bank + 0x10, 0);
        }
        assert!(mem.write_ctrl(0x10));
        assert_eq!(mem.read_debug(0), 0x01);
        assert_eq!(mem.read_debug(0xC000), 0x10);
        assert_eq!(mem.read_debug(0x4000), 0x15);
        assert_eq!(mem.read_debug(0x8000), 0x12);
        assert!(mem.write_ctrl(0x03));
        assert_eq!(mem.contended_pages(), 0b1010);
        assert_eq!(mem.read_debug(0xC000), 0x13);
        // write to ROM is ignored
        mem.write_mem(0x0000, 0xAA, 0);
        assert_eq!(mem.read_debug(0), 0x00);
        // screen switch and lock
        assert!(mem.write_ctrl(0x2F));
        assert_eq!(mem.screen_bank_index(), 7);
        assert!(mem.is_screen_addr(0xC000));
        assert!(!mem.is_screen_addr(0x4000));
        assert!(!mem.is_screen_addr(0xDB00));
        assert!(!mem.write_ctrl(0x00));
        assert_eq!(mem.read_ctrl(), 0x2F);
        mem.reset();
        assert_eq!(mem.read_ctrl(), 0);
        assert_eq!(mem.read_debug(0xC000), 0x10);
    }

    #[test]
    fn memory_48k_is_locked() {
        let mut mem = Memory::new(Architecture::Spec48);
        assert!(mem.is_paging_locked());
        assert!(!mem.write_ctrl(0x07));
        assert_eq!(mem.contended_pages(), 0b0010);
        assert!(mem.is_screen_addr(0x5AFF));
        assert!(!mem.is_screen_addr(0x5B00));
        let pentagon = Memory::new(Architecture::Pentagon);
        assert_eq!(pentagon.contended_pages(), 0);
        assert!(Memory::make_rom(&[0;PAGE_SIZE + 1]).is_err());
        assert!(matches!(mem.install_rom(5, &[]), Err(Error::InvalidUnit(5))));
    }

    #[test]
    fn trdos_autopaging_works() {
        let mut mem = Memory::new(Architecture::Spec48);
        mem.install_rom(0, &[0x00;PAGE_SIZE]).unwrap();
        mem.install_rom(TRDOS_ROM, &[0xDD;PAGE_SIZE]).unwrap();
        assert_eq!(mem.read_opcode(0x3D2F, 0, 0), 0x00);
        mem.set_trdos_autopage(true);
        assert_eq!(mem.read_opcode(0x3CFF, 0, 0), 0x00);
        assert_eq!(mem.read_opcode(0x3D2F, 0, 0), 0xDD);
        assert!(mem.is_trdos_paged());
        assert_eq!(mem.read_opcode(0x1234, 0, 0), 0xDD);
        assert_eq!(mem.read_opcode(0x4000, 0, 0), 0x00);
        assert!(!mem.is_trdos_paged());
        assert_eq!(mem.read_debug(0x1234), 0x00);

        let mut mem = Memory::new(Architecture::Spec128);
        mem.set_trdos_autopage(true);
        // the 128K editor ROM doesn't page TR-DOS in
        mem.read_opcode(0x3D00, 0, 0);
        assert!(!mem.is_trdos_paged());
        mem.write_ctrl(0x10);
        mem.read_opcode(0x3D00, 0, 0);
        assert!(mem.is_trdos_paged());
    }

    #[test]
    fn memory_read16_works() {
        let mut mem = Memory::new(Architecture::Spec48);
        let rom: Vec<u8> = (0..PAGE_SIZE).map(|i| (i & 0xFF) as u8).collect();
        mem.install_rom(0, &rom).unwrap();
        for addr in 0x4000..=u16::MAX {
            mem.write_mem(addr, (addr & 0xFF) as u8, 0);
        }
        for addr in 0..=u16::MAX {
            let addr1 = addr.wrapping_add(1);
            let x16 = u16::from_le_bytes([(addr & 0xFF) as u8, (addr1 & 0xFF) as u8]);
            assert_eq!(mem.read_mem16(addr, 0), x16);
        }
        assert_eq!(mem.memory_debug(0x3FFE..0x4002), [0xFE, 0xFF, 0x00, 0x01]);
    }
}
