/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! TAP image player feeding the `EAR` input.
//!
//! A TAP image is a sequence of blocks, each prefixed with its 16-bit little-endian
//! length. The first byte of a block is its flag: `0x00` for headers, `0xFF` for data.
//!
//! Each block is played as the ROM loader expects it: a pilot tone, 2 sync pulses,
//! 2 pulses per data bit (most significant first), a tail pulse and a pause.
use core::fmt;
use arrayvec::ArrayString;
use super::vec::Vec;
use super::error::{Error, Result};

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

/// T-states of a pilot pulse.
pub const PILOT_PULSE_LEN: u32 = 2168;
/// T-states of the first sync pulse.
pub const SYNC1_PULSE_LEN: u32 = 667;
/// T-states of the second sync pulse.
pub const SYNC2_PULSE_LEN: u32 = 735;
/// T-states of each of the 2 pulses of a reset bit.
pub const BIT0_PULSE_LEN: u32 = 855;
/// T-states of each of the 2 pulses of a set bit.
pub const BIT1_PULSE_LEN: u32 = 1710;
/// The number of pilot pulses of a header block.
pub const PILOT_PULSES_HEADER: u16 = 8063;
/// The number of pilot pulses of a data block.
pub const PILOT_PULSES_DATA: u16 = 3223;
/// T-states of the tail pulse after the last bit.
pub const TAIL_PULSE_LEN: u32 = 945;
/// T-states of silence between blocks.
pub const PAUSE_LEN: u32 = 1_750_000;

const HEADER_LEN: u16 = 19;
const NAME_LEN: usize = 10;

/// The state of the tape deck.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TapeStatus {
    #[default]
    Stopped,
    Loading,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TapePhase {
    Stopped,
    Sync,
    Sync1,
    Sync2,
    Data1,
    Data2,
    Tail,
    Pause,
}

/// The type of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    ProgramHeader,
    NumberArrayHeader,
    CharacterArrayHeader,
    CodeHeader,
    UnassignedHeader,
    Data,
}

/// An entry of the tape's block listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TapeBlock {
    /// The offset of the block's length prefix in the image.
    pub offset: usize,
    /// The length of the block following the prefix, flag and checksum included.
    pub len: u16,
    pub kind: BlockKind,
    /// The file name of a header block.
    pub name: ArrayString<NAME_LEN>,
}

impl TapeBlock {
    fn parse(offset: usize, block: &[u8]) -> Self {
        let len = block.len() as u16;
        let (kind, name) = match block {
            [0, kind, name @ ..] if len == HEADER_LEN => {
                let kind = match kind {
                    0 => BlockKind::ProgramHeader,
                    1 => BlockKind::NumberArrayHeader,
                    2 => BlockKind::CharacterArrayHeader,
                    3 => BlockKind::CodeHeader,
                    _ => BlockKind::UnassignedHeader,
                };
                let mut text = ArrayString::new();
                for &ch in &name[..NAME_LEN] {
                    text.push(if (0x20..0x7F).contains(&ch) { ch as char } else { '?' });
                }
                (kind, text)
            }
            _ => (BlockKind::Data, ArrayString::new())
        };
        TapeBlock { offset, len, kind, name }
    }
}

impl fmt::Display for TapeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            BlockKind::ProgramHeader => "Program",
            BlockKind::NumberArrayHeader => "Number array",
            BlockKind::CharacterArrayHeader => "Char array",
            BlockKind::CodeHeader => "Code",
            BlockKind::UnassignedHeader => "Unassigned",
            BlockKind::Data => "Data block",
        };
        write!(f, "{:<13}{:>10} {:6}", kind, self.name.as_str(), self.len)
    }
}

/// The TAP image player.
#[derive(Clone, Debug)]
pub struct Tape {
    image: Vec<u8>,
    blocks: Vec<TapeBlock>,
    status: TapeStatus,
    phase: TapePhase,
    cur_block: usize,
    pos: usize,
    block_end: usize,
    cur_byte: u8,
    bit_mask: u8,
    pilot_pulses: u16,
    ear: bool,
    next: u32,
    start: u64,
}

impl Default for Tape {
    fn default() -> Self {
        Tape {
            image: Vec::new(),
            blocks: Vec::new(),
            status: TapeStatus::Stopped,
            phase: TapePhase::Stopped,
            cur_block: 0,
            pos: 0,
            block_end: 0,
            cur_byte: 0,
            bit_mask: 0x80,
            pilot_pulses: 0,
            ear: true,
            next: 0,
            start: 0,
        }
    }
}

impl Tape {
    pub fn new() -> Self {
        Tape::default()
    }

    /// Insert a TAP image, stopping the tape.
    ///
    /// On error the previous image stays inserted.
    pub fn insert_tap(&mut self, image: Vec<u8>) -> Result<()> {
        let mut blocks = Vec::new();
        let mut offset = 0;
        while offset < image.len() {
            let len = match image.get(offset..offset + 2) {
                Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
                _ => return Err(Error::InvalidFormat("truncated TAP block length"))
            };
            let start = offset + 2;
            let end = start + usize::from(len);
            let block = image.get(start..end).ok_or(Error::InvalidFormat("truncated TAP block"))?;
            blocks.push(TapeBlock::parse(offset, block));
            offset = end;
        }
        if blocks.is_empty() {
            return Err(Error::InvalidFormat("empty TAP image"));
        }
        info!("tape: {} blocks", blocks.len());
        self.stop();
        self.image = image;
        self.blocks = blocks;
        self.cur_block = 0;
        Ok(())
    }

    /// Read and insert a TAP image from a file.
    #[cfg(feature = "std")]
    pub fn open_tap<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<()> {
        let image = std::fs::read(path.as_ref()).map_err(|err| {
            warn!("tape: {}: {}", path.as_ref().display(), err);
            Error::from(err)
        })?;
        self.insert_tap(image)
    }

    /// Remove the image.
    pub fn eject(&mut self) {
        self.stop();
        self.image.clear();
        self.blocks.clear();
        self.cur_block = 0;
    }

    pub fn is_inserted(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// The block listing of the inserted image.
    pub fn blocks(&self) -> &[TapeBlock] {
        &self.blocks
    }

    /// The index of the block to be played next.
    pub fn current_block(&self) -> usize {
        self.cur_block
    }

    /// Select the block from which to continue playing, stopping the tape.
    pub fn select_block(&mut self, block: usize) -> Result<()> {
        if block >= self.blocks.len() {
            return Err(Error::InvalidUnit(block));
        }
        self.stop();
        self.cur_block = block;
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.stop();
        self.cur_block = 0;
    }

    pub fn status(&self) -> TapeStatus {
        self.status
    }

    #[inline]
    pub fn is_loading(&self) -> bool {
        self.status == TapeStatus::Loading
    }

    /// The current `EAR` level.
    #[inline]
    pub fn ear(&self) -> bool {
        self.ear
    }

    /// Start playing from the current block at the machine T-state `now`.
    pub fn play(&mut self, now: u64) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(Error::NotFound);
        }
        if self.is_loading() {
            return Ok(())
        }
        self.ear = true;
        self.status = TapeStatus::Loading;
        self.get_block();
        self.start = now;
        debug!("tape: play block {}", self.cur_block);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.is_loading() {
            debug!("tape: stop at block {}", self.cur_block);
        }
        self.status = TapeStatus::Stopped;
        self.phase = TapePhase::Stopped;
    }

    fn get_block(&mut self) {
        let Some(block) = self.blocks.get(self.cur_block) else {
            debug!("tape: end of tape");
            self.cur_block = 0;
            self.stop();
            return
        };
        self.pos = block.offset + 2;
        self.block_end = self.pos + usize::from(block.len);
        self.cur_byte = if block.len == 0 { u8::MAX } else { self.image[self.pos] };
        self.bit_mask = 0x80;
        self.phase = TapePhase::Sync;
        self.next = PILOT_PULSE_LEN;
        self.pilot_pulses = if self.cur_byte == 0 { PILOT_PULSES_HEADER } else { PILOT_PULSES_DATA };
    }

    #[inline]
    fn bit_pulse_len(&self) -> u32 {
        if self.cur_byte & self.bit_mask != 0 { BIT1_PULSE_LEN } else { BIT0_PULSE_LEN }
    }

    fn end_block(&mut self) {
        self.phase = TapePhase::Tail;
        self.next = TAIL_PULSE_LEN;
    }

    /// Advance the tape to the machine T-state `now` and return the `EAR` level.
    pub fn read(&mut self, now: u64) -> bool {
        if !self.is_loading() {
            return self.ear
        }
        let mut current = now.saturating_sub(self.start);
        while current >= u64::from(self.next) {
            current -= u64::from(self.next);
            match self.phase {
                TapePhase::Sync => {
                    self.ear = !self.ear;
                    self.pilot_pulses -= 1;
                    if self.pilot_pulses == 0 {
                        self.phase = TapePhase::Sync1;
                        self.next = SYNC1_PULSE_LEN;
                    }
                }
                TapePhase::Sync1 => {
                    self.ear = !self.ear;
                    self.phase = TapePhase::Sync2;
                    self.next = SYNC2_PULSE_LEN;
                }
                TapePhase::Sync2 => {
                    if self.pos == self.block_end {
                        self.end_block();
                    }
                    else {
                        self.ear = !self.ear;
                        self.phase = TapePhase::Data1;
                        self.next = self.bit_pulse_len();
                    }
                }
                TapePhase::Data1 => {
                    self.ear = !self.ear;
                    self.phase = TapePhase::Data2;
                }
                TapePhase::Data2 => {
                    self.ear = !self.ear;
                    self.bit_mask = self.bit_mask.rotate_right(1);
                    if self.bit_mask == 0x80 {
                        self.pos += 1;
                        if self.pos == self.block_end {
                            self.end_block();
                            continue
                        }
                        self.cur_byte = self.image[self.pos];
                    }
                    self.phase = TapePhase::Data1;
                    self.next = self.bit_pulse_len();
                }
                TapePhase::Tail => {
                    self.ear = false;
                    self.phase = TapePhase::Pause;
                    self.next = PAUSE_LEN;
                }
                TapePhase::Pause => {
                    self.ear = true;
                    self.cur_block += 1;
                    self.get_block();
                    if !self.is_loading() {
                        return self.ear
                    }
                }
                TapePhase::Stopped => return self.ear
            }
        }
        self.start = now - current;
        self.ear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_tap_block(flag: u8, data: &[u8]) -> Vec<u8> {
        let checksum = data.iter().fold(flag, |sum, &b| sum ^ b);
        let len = (data.len() + 2) as u16;
        let mut block = Vec::new();
        block.extend_from_slice(&len.to_le_bytes());
        block.push(flag);
        block.extend_from_slice(data);
        block.push(checksum);
        block
    }

    fn header(name: &[u8;10]) -> Vec<u8> {
        let mut data = vec![3];
        data.extend_from_slice(name);
        data.extend_from_slice(&[0x00, 0x1B, 0x00, 0x40, 0x00, 0x80]);
        make_tap_block(0, &data)
    }

    #[test]
    fn tap_listing_works() {
        let mut image = header(b"screen    ");
        image.extend(make_tap_block(0xFF, &[0xAA;6912]));
        let mut tape = Tape::new();
        assert!(!tape.is_inserted());
        assert!(matches!(tape.play(0), Err(Error::NotFound)));
        tape.insert_tap(image).unwrap();
        let blocks = tape.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, BlockKind::CodeHeader);
        assert_eq!(blocks[0].name.as_str(), "screen    ");
        assert_eq!(blocks[0].len, 19);
        assert_eq!(blocks[1].kind, BlockKind::Data);
        assert_eq!(blocks[1].offset, 21);
        assert_eq!(blocks[1].len, 6914);
        assert_eq!(blocks[1].to_string(), "Data block                6914");
        assert!(tape.insert_tap(vec![5, 0, 1]).is_err());
        assert!(tape.insert_tap(vec![5]).is_err());
        assert_eq!(tape.blocks().len(), 2);
        assert!(tape.select_block(1).is_ok());
        assert!(tape.select_block(2).is_err());
    }

    #[test]
    fn tape_plays_header_pilot() {
        let mut tape = Tape::new();
        tape.insert_tap(header(b"0123456789")).unwrap();
        assert_eq!(tape.status(), TapeStatus::Stopped);
        let start = 1000u64;
        tape.play(start).unwrap();
        assert_eq!(tape.status(), TapeStatus::Loading);
        assert!(tape.read(start));
        let mut now = start;
        let mut ear = true;
        for _ in 0..PILOT_PULSES_HEADER {
            assert_eq!(tape.read(now + u64::from(PILOT_PULSE_LEN) - 1), ear);
            now += u64::from(PILOT_PULSE_LEN);
            ear = !ear;
            assert_eq!(tape.read(now), ear);
        }
        assert_eq!(tape.phase, TapePhase::Sync1);
        now += u64::from(SYNC1_PULSE_LEN);
        assert_eq!(tape.read(now), !ear);
        assert_eq!(tape.phase, TapePhase::Sync2);
        now += u64::from(SYNC2_PULSE_LEN);
        assert_eq!(tape.read(now), ear);
        assert_eq!(tape.phase, TapePhase::Data1);
        // the flag byte 0x00: bit 7 is reset
        assert_eq!(tape.next, BIT0_PULSE_LEN);
    }

    #[test]
    fn data_block_plays_to_the_end() {
        let mut tape = Tape::new();
        let mut image = make_tap_block(0xFF, &[0x80]);
        image.extend(make_tap_block(0xFF, &[]));
        tape.insert_tap(image).unwrap();
        tape.play(0).unwrap();
        assert_eq!(tape.pilot_pulses, PILOT_PULSES_DATA);
        // far enough to play both blocks and stop at the end of the tape
        tape.read(1u64 << 30);
        assert_eq!(tape.status(), TapeStatus::Stopped);
        assert_eq!(tape.current_block(), 0);
        assert!(tape.ear());
    }

    #[test]
    fn bits_are_played_as_pulse_pairs() {
        let mut tape = Tape::new();
        tape.insert_tap(make_tap_block(0xFF, &[])).unwrap();
        tape.play(0).unwrap();
        let sync_end = u64::from(PILOT_PULSES_DATA) * u64::from(PILOT_PULSE_LEN)
                     + u64::from(SYNC1_PULSE_LEN + SYNC2_PULSE_LEN);
        tape.read(sync_end);
        assert_eq!(tape.phase, TapePhase::Data1);
        // 0xFF: 8 set bits, then the checksum
        let mut now = sync_end;
        for _ in 0..8 {
            assert_eq!(tape.next, BIT1_PULSE_LEN);
            now += 2 * u64::from(BIT1_PULSE_LEN);
            tape.read(now);
        }
        assert_eq!(tape.cur_byte, 0xFF);
        assert_eq!(tape.pos, 3);
        for _ in 0..8 {
            now += 2 * u64::from(tape.next);
            tape.read(now);
        }
        assert_eq!(tape.phase, TapePhase::Tail);
        now += u64::from(TAIL_PULSE_LEN);
        assert!(!tape.read(now));
        assert_eq!(tape.phase, TapePhase::Pause);
        now += u64::from(PAUSE_LEN);
        assert!(tape.read(now));
        assert_eq!(tape.status(), TapeStatus::Stopped);
    }
}
