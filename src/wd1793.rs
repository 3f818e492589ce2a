/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
/*! The WD1793 floppy disk controller of the Betadisk interface.

The controller is microsequenced: each command runs as a chain of micro-states
and every disk byte cell (32 us) advances the sequence by one [Wd1793::step].
Status bits, DRQ and INTRQ follow the rotating disk, so software polling the
controller sees the same timing as on the real interface.
*/
use arrayvec::ArrayVec;

mod disk;
mod flags;

pub use disk::*;
pub use flags::*;

use crate::error::{Error, Result};

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

/// The number of drive units of the interface.
pub const DRIVE_UNITS: usize = 4;
/// The number of CPU T-states a disk byte cell lasts.
pub const BYTE_TSTATES: u32 = 112;

/// Step rates in byte cells: rows by the rate select lines, columns by the command rate bits.
pub const STEP_RATES: [[u16;4];8] = [
    [1500, 3000, 5000, 7500],
    [ 750, 1500, 2500, 3750],
    [1500, 3000, 5000, 7500],
    [ 750, 1500, 2500, 3750],
    [  92,   95,   99,  104],
    [  46,   47,   49,   52],
    [  92,   95,   99,  104],
    [  46,   47,   49,   52],
];

const ADDRESS_MARK: u32 = 0xA1A1A1;
const HEAD_SETTLE_DELAY: u32 = 937;
const HEAD_UNLOAD_REVOLUTIONS: u8 = 15;
const RETRIES: u8 = 5;
const SEEK_DATA_OFFSET: u32 = 39;
const FORMAT_DATA_OFFSET: u32 = 41;

const CMD_HEAD_LOAD: u8 = 0x08;
const CMD_UPDATE: u8 = 0x10;
const CMD_VERIFY: u8 = 0x04;
const CMD_SETTLE_DELAY: u8 = 0x04;
const CMD_MULTI: u8 = 0x10;
const CMD_WRITE: u8 = 0x20;
const CMD_SIDE_COMPARE: u8 = 0x02;
const INT_ON_INDEX: u8 = 0x04;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum State {
    Idle,
    SettingHead,
    SettingEnd,
    TypeI0,
    TypeI1,
    TypeICheck,
    TypeIUpdate,
    TypeISeek,
    TypeIEnd,
    TypeIHeadSet,
    ReadHeader,
    ReadHeaderBytes,
    TypeIHeaderRead,
    TypeIISetHead,
    TypeIICommand,
    ReadAddressWait,
    ReadAddressDataFlag,
    ReadAddressBytes,
    ReadSectorHeader,
    ReadDataFlag,
    ReadDataFlag2,
    ReadData,
    ReadCrc,
    WriteDataFlag,
    WriteData,
    WriteCrc1,
    WriteCrc2,
    WriteLast,
    WriteEnd,
    WriteTrackStart,
    WriteTrack,
    WriteTrackCrc,
    ReadTrackStart,
    ReadTrackData,
}

/// What the controller does with the next disk byte cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum StepState {
    Idle,
    Waiting,
    WaitingMark,
    ReadByte,
    WriteByte,
    LastWriteByte,
    WaitIndex,
}

/// The WD1793 controller with its four drive units.
#[derive(Clone, Debug)]
pub struct Wd1793 {
    state: State,
    next: State,
    step_state: StepState,
    command: u8,
    track: u8,
    sector: u8,
    data: u8,
    dsr: u8,
    status: Status,
    source: StatusSource,
    control: Control,
    int_conditions: u8,
    power: DrivePower,
    rate_select: u8,
    counter: u32,
    retry: u8,
    mark: u32,
    header: ArrayVec<u8, 7>,
    header_mark: bool,
    a: u8,
    wb: u8,
    unit: usize,
    side: u8,
    last_signals: DiskSignals,
    track_mark: u16,
    track_sector: u8,
    fast_mode: bool,
    clock: u64,
    units: [Option<Disk>;DRIVE_UNITS],
}

impl Default for Wd1793 {
    fn default() -> Self {
        Wd1793::new(false)
    }
}

impl Wd1793 {
    /// Create a controller with no disks inserted.
    ///
    /// In `fast_mode` head settling and step delays are skipped and multi-sector
    /// reads jump straight to the next sector's data.
    pub fn new(fast_mode: bool) -> Self {
        let mut wd = Wd1793 {
            state: State::Idle,
            next: State::Idle,
            step_state: StepState::Idle,
            command: 0,
            track: 0,
            sector: 0,
            data: 0,
            dsr: 0,
            status: Status::empty(),
            source: StatusSource::empty(),
            control: Control::empty(),
            int_conditions: 0,
            power: DrivePower::empty(),
            rate_select: 0,
            counter: 0,
            retry: 0,
            mark: ADDRESS_MARK,
            header: ArrayVec::new(),
            header_mark: false,
            a: 0,
            wb: 0,
            unit: 0,
            side: 0,
            last_signals: DiskSignals::empty(),
            track_mark: 0,
            track_sector: 0,
            fast_mode,
            clock: 0,
            units: Default::default(),
        };
        wd.reset();
        wd
    }

    /// Reset the controller. Inserted disks and their drive power are kept.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.next = State::Idle;
        self.step_state = StepState::Idle;
        self.counter = 0;
        self.control = Control::empty();
        self.command = 0;
        self.sector = 0;
        self.data = 0;
        self.dsr = 0;
        self.status = Status::empty();
        self.source = StatusSource::TYPE_I;
        self.track = 0xFF;
        self.track_mark = 0;
        self.header.clear();
        self.header_mark = false;
        self.retry = 0;
        self.int_conditions = 0;
        self.mark = ADDRESS_MARK;
        self.a = 0;
        self.wb = 0;
        self.side = 0;
        self.unit = 0;
        for disk in self.units.iter_mut().flatten() {
            disk.invalidate_catalogue();
        }
    }

    pub fn is_fast_mode(&self) -> bool {
        self.fast_mode
    }

    pub fn set_fast_mode(&mut self, fast_mode: bool) {
        self.fast_mode = fast_mode;
    }

    /// Set the drive step rate select lines (0 to 7) indexing [STEP_RATES].
    pub fn set_rate_select(&mut self, rate: u8) {
        self.rate_select = rate & 7;
    }

    /// Insert a disk image into the drive `unit`.
    ///
    /// On error the unit is left empty.
    pub fn insert_disk(&mut self, unit: usize, image: crate::vec::Vec<u8>) -> Result<()> {
        if unit >= DRIVE_UNITS {
            return Err(Error::InvalidUnit(unit))
        }
        self.eject(unit);
        let disk = Disk::new(image).map_err(|err| {
            warn!("wd1793: unit {} rejected the disk: {}", unit, err);
            err
        })?;
        info!("wd1793: unit {} {:?} disk inserted: {} tracks, {} sides{}", unit, disk.kind(),
              disk.tracks(), disk.sides(), if disk.is_write_protected() { ", write protected" } else { "" });
        self.units[unit] = Some(disk);
        self.power.insert(DrivePower::unit(unit));
        Ok(())
    }

    /// Insert a TRD or SCL disk image file into the drive `unit`.
    #[cfg(feature = "std")]
    pub fn open_disk<P: AsRef<std::path::Path>>(&mut self, unit: usize, path: P) -> Result<()> {
        if unit >= DRIVE_UNITS {
            return Err(Error::InvalidUnit(unit))
        }
        self.eject(unit);
        let image = std::fs::read(path.as_ref()).map_err(|err| {
            warn!("wd1793: can't read {}: {}", path.as_ref().display(), err);
            err
        })?;
        self.insert_disk(unit, image)
    }

    /// Eject the disk from the drive `unit` returning it with all the data written to it.
    ///
    /// Ejecting the disk of the selected unit forces the controller idle.
    pub fn eject(&mut self, unit: usize) -> Option<Disk> {
        let disk = self.units.get_mut(unit)?.take()?;
        if unit == self.unit {
            self.finish();
            self.side = 0;
        }
        self.power.remove(DrivePower::unit(unit));
        info!("wd1793: unit {} disk ejected", unit);
        Some(disk)
    }

    /// The disk inserted into the drive `unit`.
    pub fn disk(&self, unit: usize) -> Option<&Disk> {
        self.units.get(unit)?.as_ref()
    }

    /// The selected drive unit.
    pub fn unit(&self) -> usize {
        self.unit
    }

    /// The selected disk side.
    pub fn side(&self) -> u8 {
        self.side
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn track(&self) -> u8 {
        self.track
    }

    pub fn sector(&self) -> u8 {
        self.sector
    }

    pub fn is_busy(&self) -> bool {
        self.status.contains(Status::BUSY)
    }

    pub fn is_intrq(&self) -> bool {
        self.control.intersects(Control::INTRQ|Control::FINTRQ)
    }

    pub fn is_drq(&self) -> bool {
        self.control.contains(Control::DRQ)
    }

    /// Read the register `reg`: 0 status, 1 track, 2 sector, 3 data.
    ///
    /// Reading the status clears INTRQ, reading the data clears DRQ.
    pub fn read(&mut self, reg: u8) -> u8 {
        match reg & 3 {
            0 => {
                self.control.remove(Control::INTRQ);
                self.peek_status()
            }
            1 => self.track,
            2 => self.sector,
            _ => {
                self.control.remove(Control::DRQ);
                self.data
            }
        }
    }

    /// Return the status register without side effects.
    pub fn peek_status(&self) -> u8 {
        let mut status = self.status;
        match self.current_disk() {
            Some(disk) => {
                let signals = disk.signals();
                if self.source.contains(StatusSource::WRITE_PROTECT) {
                    status.set(Status::PROTECTED, disk.is_write_protected());
                }
                if self.source.contains(StatusSource::TRACK0) && signals.contains(DiskSignals::TRACK0) {
                    status.insert(Status::TRACK0);
                }
                if self.source.contains(StatusSource::INDEX) && signals.contains(DiskSignals::INDEX) {
                    status.insert(Status::INDEX);
                }
                else if self.control.contains(Control::DRQ) {
                    status.insert(Status::DRQ);
                }
                if self.source.contains(StatusSource::HEAD_LOADED) {
                    status.insert(Status::HEAD_LOADED);
                }
            }
            None => status.insert(Status::NOT_READY)
        }
        status.bits()
    }

    /// Write the register `reg`: 0 command, 1 track, 2 sector, 3 data.
    pub fn write(&mut self, reg: u8, value: u8) {
        match reg & 3 {
            0 => self.write_command(value),
            1 => self.track = value,
            2 => self.sector = value,
            _ => {
                self.data = value;
                self.control.remove(Control::DRQ);
            }
        }
    }

    /// Read the Betadisk system register: INTRQ and DRQ lines.
    pub fn read_system(&self) -> u8 {
        let mut reg = SystemReg::all() - (SystemReg::DRQ|SystemReg::INTRQ);
        reg.set(SystemReg::INTRQ, self.is_intrq());
        reg.set(SystemReg::DRQ, self.is_drq());
        reg.bits()
    }

    /// Write the Betadisk system register: drive select, controller reset and side.
    pub fn write_system(&mut self, value: u8) {
        let reg = SystemReg::from_bits_retain(value);
        if !reg.contains(SystemReg::RESET) {
            self.reset();
        }
        let unit = reg.unit();
        if unit != self.unit {
            debug!("wd1793: unit {} selected", unit);
            self.unit = unit;
            if let Some(disk) = self.units[unit].as_mut() {
                disk.invalidate_catalogue();
            }
        }
        self.side = reg.side();
    }

    /// Advance the controller to the CPU clock `now`, one step per elapsed byte cell.
    pub fn update(&mut self, now: u64) {
        let steps = now.saturating_sub(self.clock) / u64::from(BYTE_TSTATES);
        if steps != 0 {
            self.clock += steps * u64::from(BYTE_TSTATES);
            self.step(u32::try_from(steps).unwrap_or(u32::MAX));
        }
    }

    /// Set the CPU clock the controller is synchronized to without stepping it.
    pub fn set_clock(&mut self, now: u64) {
        self.clock = now;
    }

    /// Spin the selected disk by `steps` byte cells advancing the command in progress.
    pub fn step(&mut self, steps: u32) {
        for _ in 0..steps {
            let mut byte = 0;
            let mut signals = DiskSignals::empty();
            let write = self.control.contains(Control::WRITING).then_some(self.wb);
            let side = self.side;
            if let Some(disk) = self.units[self.unit].as_mut() {
                let write = write.filter(|_| !disk.is_write_protected());
                disk.rotate(None, write, side);
                byte = disk.data();
                signals = disk.signals();
            }
            let index = signals.contains(DiskSignals::INDEX)
                        && !self.last_signals.contains(DiskSignals::INDEX);
            self.last_signals = signals;

            if index && self.int_conditions & INT_ON_INDEX != 0 {
                self.control.insert(Control::INTRQ);
            }

            match self.step_state {
                StepState::Idle => {
                    if self.retry != 0 && index {
                        self.retry -= 1;
                        if self.retry == 0 {
                            trace!("wd1793: head unloaded");
                            self.control.remove(Control::HLD|Control::HLT);
                        }
                    }
                }
                StepState::Waiting => {
                    if self.fast_mode {
                        self.counter = 0;
                    }
                    else {
                        self.counter = self.counter.saturating_sub(1);
                    }
                    if self.counter == 0 {
                        self.execute();
                    }
                }
                StepState::WaitingMark => {
                    self.check_index(index);
                    if self.mark & 0xFF == u32::from(byte) {
                        self.mark >>= 8;
                        if self.mark == 0 {
                            self.execute();
                            if self.control.contains(Control::WRITING) {
                                self.write_byte(index);
                            }
                        }
                    }
                    else {
                        self.mark = ADDRESS_MARK;
                    }
                }
                StepState::ReadByte => {
                    self.check_index(index);
                    self.a = byte;
                    self.execute();
                    self.a = 0;
                }
                StepState::WriteByte => self.write_byte(index),
                StepState::LastWriteByte => self.execute(),
                StepState::WaitIndex => {
                    if index {
                        self.retry = 1;
                        self.execute();
                    }
                }
            }
        }
    }

    fn current_disk(&self) -> Option<&Disk> {
        self.units[self.unit].as_ref()
    }

    fn current_disk_mut(&mut self) -> Option<&mut Disk> {
        self.units[self.unit].as_mut()
    }

    fn is_write_protected(&self) -> bool {
        self.current_disk().map_or(true, Disk::is_write_protected)
    }

    fn check_index(&mut self, index: bool) {
        if self.retry != 0 && index {
            self.retry -= 1;
            if self.retry == 0 {
                self.execute();
            }
        }
    }

    fn write_byte(&mut self, index: bool) {
        self.check_index(index);
        self.wb = self.a;
        self.execute();
    }

    fn wait_mark(&mut self) {
        self.step_state = StepState::WaitingMark;
        self.mark = ADDRESS_MARK;
    }

    fn start_header(&mut self) {
        self.header.clear();
        self.header_mark = true;
    }

    fn data_request(&mut self) {
        if self.control.contains(Control::DRQ) {
            self.status.insert(Status::LOST_DATA);
        }
        self.control.insert(Control::DRQ);
    }

    fn abort(&mut self) {
        self.status.remove(Status::BUSY);
        self.state = State::Idle;
        self.step_state = StepState::Idle;
        self.control.remove(Control::WRITING|Control::DRQ);
        self.retry = HEAD_UNLOAD_REVOLUTIONS;
    }

    fn finish(&mut self) {
        trace!("wd1793: command {:02x} done, status: {:?}", self.command, self.status);
        self.abort();
        self.control.insert(Control::INTRQ);
    }

    fn seek_error(&mut self) {
        self.status.insert(Status::SEEK_ERROR);
        self.finish();
    }

    fn write_command(&mut self, command: u8) {
        if command & 0xF0 == 0xD0 {
            debug!("wd1793: force interrupt {:02x}", command);
            if self.status.contains(Status::BUSY) {
                self.abort();
            }
            else {
                self.status = Status::empty();
                self.source = StatusSource::TYPE_I;
            }
            match command & 0x0F {
                0 => {
                    self.control.remove(Control::INTRQ|Control::FINTRQ);
                    self.int_conditions = 0;
                }
                cond if cond & 0x08 != 0 => self.control.insert(Control::FINTRQ),
                cond => self.int_conditions = cond
            }
            return
        }

        if self.status.contains(Status::BUSY) {
            debug!("wd1793: busy, command {:02x} ignored", command);
            return
        }

        self.control.remove(Control::INTRQ|Control::FINTRQ);
        self.command = command;

        let ready = self.units[self.unit].is_some()
                    && self.power.contains(DrivePower::unit(self.unit));
        if !ready {
            debug!("wd1793: unit {} not ready, command {:02x}", self.unit, command);
            self.status = Status::NOT_READY;
            self.source = StatusSource::empty();
            self.control.insert(Control::INTRQ);
            return
        }

        debug!("wd1793: command {:02x} track: {} sector: {} side: {}",
               command, self.track, self.sector, self.side);
        if command & 0x80 != 0 {
            if command & 0xC0 == 0x80 || matches!(command & 0xFB, 0xC0|0xE0|0xF0) {
                self.state = State::TypeIISetHead;
                self.status = Status::BUSY;
                self.source = StatusSource::empty();
                if command & CMD_SETTLE_DELAY != 0 {
                    self.step_state = StepState::Waiting;
                    self.counter = HEAD_SETTLE_DELAY;
                }
                else {
                    self.execute();
                }
            }
            else {
                self.control.insert(Control::INTRQ);
            }
        }
        else {
            self.status = Status::BUSY;
            self.source = StatusSource::TYPE_I;
            self.state = State::TypeI0;
            self.execute();
        }
    }

    /// Run the micro-states until the sequence waits for the disk.
    fn execute(&mut self) {
        loop {
            trace!("wd1793: {:?}", self.state);
            match self.state {
                State::Idle => return,
                State::SettingHead => {
                    if self.control.contains(Control::HLD) {
                        self.state = self.next;
                        continue
                    }
                    self.control.insert(Control::HLD);
                    self.counter = 1;
                    self.state = State::SettingEnd;
                    self.step_state = StepState::Waiting;
                    return
                }
                State::SettingEnd => {
                    self.control.insert(Control::HLT);
                    self.state = self.next;
                }
                State::TypeI0 => {
                    if self.command & CMD_HEAD_LOAD != 0 {
                        self.next = State::TypeI1;
                        self.state = State::SettingHead;
                    }
                    else {
                        self.control.remove(Control::HLD);
                        self.state = State::TypeI1;
                    }
                }
                State::TypeI1 => {
                    if self.command & 0x60 != 0 {
                        if self.command & 0x40 != 0 {
                            // step in or out, bit 5 set is out
                            self.control.set(Control::DIRE, self.command & 0x20 == 0);
                        }
                        self.state = if self.command & CMD_UPDATE != 0 {
                            State::TypeIUpdate
                        }
                        else {
                            State::TypeISeek
                        };
                    }
                    else {
                        if self.command & 0x10 == 0 {
                            // restore
                            self.track = 0xFF;
                            self.data = 0;
                        }
                        self.dsr = self.data;
                        self.state = State::TypeICheck;
                    }
                }
                State::TypeICheck => {
                    if self.track == self.dsr {
                        self.state = State::TypeIEnd;
                    }
                    else {
                        self.control.set(Control::DIRE, self.dsr > self.track);
                        self.state = State::TypeIUpdate;
                    }
                }
                State::TypeIUpdate => {
                    self.track = if self.control.contains(Control::DIRE) {
                        self.track.wrapping_add(1)
                    }
                    else {
                        self.track.wrapping_sub(1)
                    };
                    self.state = State::TypeISeek;
                }
                State::TypeISeek => {
                    let dire = self.control.contains(Control::DIRE);
                    let track0 = self.current_disk()
                                     .map_or(false, |disk| disk.signals().contains(DiskSignals::TRACK0));
                    if !dire && track0 {
                        self.track = 0;
                        self.state = State::TypeIEnd;
                        continue
                    }
                    let side = self.side;
                    if let Some(disk) = self.current_disk_mut() {
                        disk.rotate(Some(if dire { Seek::In } else { Seek::Out }), None, side);
                    }
                    let rate = STEP_RATES[usize::from(self.rate_select ^ 4)][usize::from(self.command & 3)];
                    self.counter = u32::from(rate >> 3);
                    self.step_state = StepState::Waiting;
                    self.state = if self.command & 0xE0 == 0 {
                        State::TypeICheck
                    }
                    else {
                        State::TypeIEnd
                    };
                    return
                }
                State::TypeIEnd => {
                    if self.command & CMD_VERIFY != 0 {
                        if self.control.contains(Control::HLD) {
                            self.next = State::TypeIHeadSet;
                            self.state = State::SettingHead;
                        }
                        else {
                            self.retry = RETRIES;
                            self.next = State::TypeIHeaderRead;
                            self.state = State::ReadHeader;
                        }
                        continue
                    }
                    self.source.insert(StatusSource::HEAD_LOADED);
                    self.finish();
                    return
                }
                State::TypeIHeadSet => {
                    self.retry = RETRIES;
                    self.next = State::TypeIHeaderRead;
                    self.state = State::ReadHeader;
                }
                State::ReadHeader => {
                    if self.retry == 0 {
                        return self.seek_error()
                    }
                    self.wait_mark();
                    self.start_header();
                    self.state = State::ReadHeaderBytes;
                    return
                }
                State::ReadHeaderBytes => {
                    if self.retry == 0 {
                        return self.seek_error()
                    }
                    if self.header_mark {
                        self.header_mark = false;
                    }
                    else {
                        self.header.push(self.a);
                    }
                    if self.header.is_full() {
                        self.state = self.next;
                        continue
                    }
                    self.step_state = StepState::ReadByte;
                    return
                }
                State::TypeIHeaderRead => {
                    if self.retry == 0 {
                        return self.seek_error()
                    }
                    if self.header[0] != 0xFE || self.header[1] != self.track {
                        self.state = State::ReadHeader;
                        continue
                    }
                    self.status.remove(Status::CRC_ERROR);
                    return self.finish()
                }
                State::TypeIISetHead => {
                    self.next = State::TypeIICommand;
                    self.state = State::SettingHead;
                }
                State::TypeIICommand => {
                    let command = self.command;
                    if command & 0xC0 == 0x80 {
                        if command & CMD_WRITE != 0 && self.is_write_protected() {
                            self.status.insert(Status::PROTECTED);
                            return self.finish()
                        }
                        self.retry = RETRIES;
                        self.wait_mark();
                        self.start_header();
                        self.state = State::ReadHeaderBytes;
                        self.next = State::ReadSectorHeader;
                    }
                    else if command & 0xF0 == 0xC0 {
                        self.retry = RETRIES;
                        self.state = State::ReadAddressWait;
                        continue
                    }
                    else if command & 0xF0 == 0xF0 {
                        if self.is_write_protected() {
                            self.status.insert(Status::PROTECTED);
                            return self.finish()
                        }
                        self.state = State::WriteTrackStart;
                        self.step_state = StepState::WaitIndex;
                        self.control.insert(Control::DRQ);
                        self.track_mark = 0;
                    }
                    else if command & 0xF0 == 0xE0 {
                        self.state = State::ReadTrackStart;
                        self.step_state = StepState::WaitIndex;
                    }
                    return
                }
                State::ReadAddressWait => {
                    if self.retry == 0 {
                        return self.seek_error()
                    }
                    self.wait_mark();
                    self.start_header();
                    self.state = State::ReadAddressDataFlag;
                    return
                }
                State::ReadAddressDataFlag => {
                    self.step_state = StepState::ReadByte;
                    self.state = State::ReadAddressBytes;
                    return
                }
                State::ReadAddressBytes => {
                    if self.retry == 0 {
                        return self.seek_error()
                    }
                    if self.header_mark {
                        if self.a != 0xFE {
                            self.state = State::ReadAddressWait;
                            continue
                        }
                        self.header_mark = false;
                    }
                    else {
                        self.header.push(self.a);
                        self.data = self.a;
                        self.data_request();
                    }
                    if self.header.len() == 6 {
                        self.sector = self.header[0];
                        self.status.remove(Status::CRC_ERROR);
                        return self.finish()
                    }
                    return
                }
                State::ReadSectorHeader => {
                    if self.header[0] != 0xFE || self.header[1] != self.track {
                        self.state = State::ReadHeader;
                        continue
                    }
                    let command = self.command;
                    let side_mismatch = command & CMD_SIDE_COMPARE != 0
                                        && self.header[2] & ((command >> 3) & 1) != 0;
                    let write = command & CMD_WRITE != 0;
                    let sector = self.sector;
                    if !self.fast_mode || write || !(1..=SECTORS).contains(&sector) {
                        if self.header[3] != sector || side_mismatch {
                            self.state = State::ReadHeader;
                            continue
                        }
                    }
                    else {
                        if side_mismatch {
                            self.state = State::ReadHeader;
                            continue
                        }
                        if let Some(disk) = self.current_disk_mut() {
                            disk.seek_sector(sector, SEEK_DATA_OFFSET);
                        }
                    }
                    self.status.remove(Status::CRC_ERROR);
                    self.counter = SECTOR_SIZE as u32;
                    self.wait_mark();
                    if write {
                        self.state = State::WriteDataFlag;
                        self.control.insert(Control::DRQ);
                    }
                    else {
                        self.state = State::ReadDataFlag;
                    }
                    return
                }
                State::ReadDataFlag => {
                    self.step_state = StepState::ReadByte;
                    self.state = State::ReadDataFlag2;
                    return
                }
                State::ReadDataFlag2 => {
                    match self.a {
                        0xF8 => self.status.insert(Status::RECORD_TYPE),
                        0xFB => self.status.remove(Status::RECORD_TYPE),
                        _ => {
                            self.state = State::TypeIICommand;
                            continue
                        }
                    }
                    self.state = State::ReadData;
                    return
                }
                State::ReadData => {
                    self.data = self.a;
                    self.data_request();
                    self.counter -= 1;
                    if self.counter == 0 {
                        self.state = State::ReadCrc;
                        self.counter = 2;
                    }
                    return
                }
                State::ReadCrc => {
                    self.counter -= 1;
                    if self.counter != 0 {
                        return
                    }
                    self.status.remove(Status::CRC_ERROR);
                    if self.command & CMD_MULTI == 0 {
                        return self.finish()
                    }
                    self.sector = self.sector.wrapping_add(1);
                    let sector = self.sector;
                    if !self.fast_mode || !(1..=SECTORS).contains(&sector) {
                        self.state = State::TypeIICommand;
                        continue
                    }
                    if let Some(disk) = self.current_disk_mut() {
                        disk.seek_sector(sector, SEEK_DATA_OFFSET);
                    }
                    self.counter = SECTOR_SIZE as u32;
                    self.wait_mark();
                    self.state = State::ReadDataFlag;
                    return
                }
                State::WriteDataFlag => {
                    self.step_state = StepState::WriteByte;
                    self.state = State::WriteData;
                    self.control.insert(Control::WRITING);
                    self.a = if self.command & 1 != 0 { 0xF8 } else { 0xFB };
                    return
                }
                State::WriteData => {
                    self.a = self.data;
                    self.data = 0;
                    if self.control.contains(Control::DRQ) {
                        self.status.insert(Status::LOST_DATA);
                    }
                    self.counter -= 1;
                    if self.counter != 0 {
                        self.control.insert(Control::DRQ);
                    }
                    else {
                        self.state = State::WriteCrc1;
                    }
                    return
                }
                State::WriteCrc1 => {
                    self.state = State::WriteCrc2;
                    return
                }
                State::WriteCrc2 => {
                    self.state = State::WriteLast;
                    return
                }
                State::WriteLast => {
                    self.state = State::WriteEnd;
                    self.step_state = StepState::LastWriteByte;
                    return
                }
                State::WriteEnd => {
                    self.control.remove(Control::WRITING);
                    if self.command & CMD_MULTI == 0 {
                        return self.finish()
                    }
                    self.sector = self.sector.wrapping_add(1);
                    self.state = State::TypeIICommand;
                }
                State::WriteTrackStart => {
                    if self.control.contains(Control::DRQ) {
                        self.status.insert(Status::LOST_DATA);
                        return self.finish()
                    }
                    self.control.insert(Control::WRITING);
                    self.state = State::WriteTrack;
                    if let Some(disk) = self.current_disk_mut() {
                        disk.restart_track();
                    }
                }
                State::WriteTrack => {
                    if self.retry == 0 {
                        return self.finish()
                    }
                    self.step_state = StepState::WriteByte;
                    if self.control.contains(Control::DRQ) {
                        self.a = 0;
                        self.status.insert(Status::LOST_DATA);
                        return
                    }
                    match self.data {
                        0xF5 => {
                            self.track_mark += 1;
                            self.a = 0xA1;
                            self.control.insert(Control::DRQ);
                        }
                        0xF7 => {
                            self.track_mark = 0;
                            self.a = 0;
                            self.state = State::WriteTrackCrc;
                        }
                        byte => {
                            self.follow_format_marks(byte);
                            self.a = byte;
                            self.control.insert(Control::DRQ);
                        }
                    }
                    return
                }
                State::WriteTrackCrc => {
                    self.a = 0;
                    self.step_state = StepState::WriteByte;
                    self.state = State::WriteTrack;
                    self.control.insert(Control::DRQ);
                    return
                }
                State::ReadTrackStart => {
                    self.step_state = StepState::ReadByte;
                    self.state = State::ReadTrackData;
                    self.retry = 1;
                    return
                }
                State::ReadTrackData => {
                    if self.retry == 0 {
                        return self.finish()
                    }
                    self.data_request();
                    self.data = self.a;
                    return
                }
            }
        }
    }

    /// Follow the address marks written by the write track command.
    fn follow_format_marks(&mut self, byte: u8) {
        match (self.track_mark, byte) {
            (3, 0xFE) => self.track_mark = 0x100,
            (3, 0xFB) => {
                let sector = self.track_sector;
                if let Some(disk) = self.current_disk_mut() {
                    disk.seek_sector(sector, FORMAT_DATA_OFFSET);
                }
            }
            (mark, _) if mark & 0x100 != 0 => {
                self.track_mark += 1;
                match self.track_mark {
                    0x101 if self.track == 0 && self.side == 1 => {
                        if let Some(disk) = self.current_disk_mut() {
                            disk.set_t0s1_info(byte);
                        }
                    }
                    0x103 => {
                        self.track_sector = byte;
                        self.track_mark = 0;
                    }
                    _ => {}
                }
            }
            _ => self.track_mark = 0
        }
    }
}
