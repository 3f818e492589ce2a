/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! Bit-level registers and signals of the floppy disk controller.
use bitflags::bitflags;

bitflags! {
    /// The status register bits.
    ///
    /// Bits 1, 2 and 5 change their meaning depending on the type of the last command.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Status: u8 {
        const BUSY        = 0b0000_0001;
        const INDEX       = 0b0000_0010;
        const DRQ         = 0b0000_0010;
        const TRACK0      = 0b0000_0100;
        const LOST_DATA   = 0b0000_0100;
        const CRC_ERROR   = 0b0000_1000;
        const SEEK_ERROR  = 0b0001_0000;
        const NOT_FOUND   = 0b0001_0000;
        const HEAD_LOADED = 0b0010_0000;
        const RECORD_TYPE = 0b0010_0000;
        const PROTECTED   = 0b0100_0000;
        const NOT_READY   = 0b1000_0000;
    }
}

bitflags! {
    /// Selects which drive signals are merged into the status byte when it's read.
    ///
    /// Type I commands report the drive signals, the other types report DRQ
    /// and the record type instead.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct StatusSource: u8 {
        const INDEX         = 0b0001;
        const TRACK0        = 0b0010;
        const WRITE_PROTECT = 0b0100;
        const HEAD_LOADED   = 0b1000;
        const TYPE_I = Self::INDEX.bits() | Self::TRACK0.bits() | Self::WRITE_PROTECT.bits();
    }
}

bitflags! {
    /// The internal control lines of the controller.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Control: u16 {
        /// Head load.
        const HLD     = 0b0000_0000_0001;
        /// Head load timing, the head has settled.
        const HLT     = 0b0000_0000_0010;
        /// Step direction, set when stepping in.
        const DIRE    = 0b0000_0000_0100;
        /// Data request.
        const DRQ     = 0b0000_0000_1000;
        /// Interrupt request.
        const INTRQ   = 0b0000_0001_0000;
        /// Interrupt request forced by the immediate interrupt command.
        const FINTRQ  = 0b0000_0010_0000;
        /// Write gate.
        const WRITING = 0b0000_0100_0000;
    }
}

bitflags! {
    /// The drive units having their motor powered.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DrivePower: u8 {
        const UNIT0 = 0b0001;
        const UNIT1 = 0b0010;
        const UNIT2 = 0b0100;
        const UNIT3 = 0b1000;
    }
}

impl DrivePower {
    /// Return the flag of the drive `unit` (0 to 3).
    #[inline]
    pub fn unit(unit: usize) -> Self {
        DrivePower::from_bits_truncate(1 << (unit & 3))
    }
}

bitflags! {
    /// The signals a drive presents to the controller.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DiskSignals: u8 {
        const TRACK0 = 0b01;
        const INDEX  = 0b10;
    }
}

bitflags! {
    /// The Betadisk interface system register.
    ///
    /// Written bits: drive select, active low controller reset, head load and
    /// active low side select. Read bits: the controller's DRQ and INTRQ lines.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SystemReg: u8 {
        const UNIT  = 0b0000_0011;
        const RESET = 0b0000_0100;
        const HLT   = 0b0000_1000;
        const SIDE  = 0b0001_0000;
        const FM    = 0b0010_0000;
        const DRQ   = 0b0100_0000;
        const INTRQ = 0b1000_0000;
    }
}

impl SystemReg {
    /// The drive unit selected by the register value.
    #[inline]
    pub fn unit(self) -> usize {
        (self & SystemReg::UNIT).bits() as usize
    }
    /// The disk side selected by the register value.
    #[inline]
    pub fn side(self) -> u8 {
        !self.contains(SystemReg::SIDE) as u8
    }
}
