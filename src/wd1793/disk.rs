/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! A rotating floppy disk holding an in-memory TR-DOS image.
use core::fmt;
use crate::boxed::Box;
use crate::vec::Vec;
use crate::error::{Error, Result};
use super::flags::DiskSignals;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

/// The number of sectors on a track.
pub const SECTORS: u8 = 16;
/// The size of a sector in bytes.
pub const SECTOR_SIZE: usize = 256;
/// The number of byte cells of a formatted track, excluding the index pulse.
pub const TRACK_LENGTH: u32 = 6663;
/// The number of byte cells the index pulse lasts.
pub const INDEX_PULSE: u8 = 25;
/// The offset of the disk type byte in a TRD image.
pub const DISK_TYPE_OFFSET: usize = 2048 + 227;
/// The signature of the SCL archives.
pub const SCL_MAGIC: &[u8;8] = b"SINCLAIR";
/// The size of the catalogue track built for SCL archives: 9 sectors.
pub const CATALOGUE_SIZE: usize = 9 * SECTOR_SIZE;

const GAP_START: u32 = 146;
const SECTOR_SLOT: u32 = 392;
const DATA_OFFSET: u32 = 44;

/// The track byte position of the sector ID field of each sector.
pub const SECTOR_ID_POS: [u32;SECTORS as usize] = sector_id_positions();

const fn sector_id_positions() -> [u32;SECTORS as usize] {
    let mut pos = [0;SECTORS as usize];
    let mut i = 0;
    while i < pos.len() {
        pos[i] = GAP_START + 16 + SECTOR_SLOT * i as u32;
        i += 1;
    }
    pos
}

/// The kind of the inserted image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiskKind {
    Trd,
    Scl,
}

/// The drive head movement requested by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Seek {
    In,
    Out,
}

/// A disk inserted into one of the drive units.
///
/// The disk spins one byte cell per call to [Disk::rotate]. Sector ID fields and
/// gaps are synthesized in the IBM System-34 double density layout, sector data
/// is read from and written through to the image.
#[derive(Clone)]
pub struct Disk {
    image: Vec<u8>,
    kind: DiskKind,
    max_track: u8,
    sides: u8,
    write_protect: bool,
    data_offset: isize,
    head: u8,
    index: Option<u32>,
    index_delay: u8,
    buffer: Box<[u8;SECTOR_SIZE]>,
    buffer_pos: Option<u8>,
    buffer_offset: Option<usize>,
    data: u8,
    signals: DiskSignals,
    t0s1_info: u8,
    catalogue: Option<Box<[u8;CATALOGUE_SIZE]>>,
}

impl fmt::Debug for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disk")
         .field("kind", &self.kind)
         .field("size", &self.image.len())
         .field("tracks", &self.tracks())
         .field("sides", &self.sides)
         .field("write_protect", &self.write_protect)
         .field("head", &self.head)
         .field("index", &self.index)
         .finish()
    }
}

impl Disk {
    /// Create a disk from the content of a TRD image or an SCL archive.
    ///
    /// SCL archives are always write protected.
    pub fn new(image: Vec<u8>) -> Result<Self> {
        let (kind, disk_type) = if image.starts_with(SCL_MAGIC) {
            if image.len() < SCL_MAGIC.len() + 1 {
                return Err(Error::InvalidFormat("truncated SCL archive"))
            }
            (DiskKind::Scl, 0x16)
        }
        else {
            match image.get(DISK_TYPE_OFFSET) {
                Some(&disk_type) => (DiskKind::Trd, disk_type),
                None => return Err(Error::InvalidFormat("TRD image too short"))
            }
        };
        let (max_track, sides) = match disk_type {
            0x16 => (79, 2),
            0x17 => (39, 2),
            0x18 => (79, 1),
            0x19 => (39, 1),
            _ => return Err(Error::InvalidFormat("unknown disk type"))
        };
        let (write_protect, data_offset) = match kind {
            DiskKind::Scl => {
                let files = image[SCL_MAGIC.len()] as isize;
                (true, 9 + files * 14 - 4096)
            }
            DiskKind::Trd => (false, 0)
        };
        Ok(Disk {
            image,
            kind,
            max_track,
            sides,
            write_protect,
            data_offset,
            head: 0,
            index: None,
            index_delay: 0,
            buffer: Box::new([0;SECTOR_SIZE]),
            buffer_pos: None,
            buffer_offset: None,
            data: 0,
            signals: DiskSignals::TRACK0,
            t0s1_info: 0,
            catalogue: None,
        })
    }

    pub fn kind(&self) -> DiskKind {
        self.kind
    }

    /// The number of tracks on each side.
    pub fn tracks(&self) -> u8 {
        self.max_track + 1
    }

    pub fn sides(&self) -> u8 {
        self.sides
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_protect
    }

    /// The image content including everything written to the disk.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// The cylinder the head is over.
    pub fn head(&self) -> u8 {
        self.head
    }

    /// The byte cell under the head, `None` during and right after the index pulse.
    pub fn position(&self) -> Option<u32> {
        self.index
    }

    /// The drive signals after the last rotation step.
    pub fn signals(&self) -> DiskSignals {
        self.signals
    }

    /// The byte read by the last rotation step.
    pub fn data(&self) -> u8 {
        self.data
    }

    /// Move the head to the start of the data field of `sector` (1 to 16) shifted by `offset` cells.
    pub fn seek_sector(&mut self, sector: u8, offset: u32) {
        if let Some(pos) = usize::from(sector).checked_sub(1).and_then(|i| SECTOR_ID_POS.get(i)) {
            self.index = Some(pos + offset);
        }
    }

    /// Restart the track from the index hole, as write track does.
    pub fn restart_track(&mut self) {
        self.index = None;
        self.buffer_pos = None;
        self.buffer_offset = None;
        self.index_delay = 0;
    }

    /// Set the track number reported by the sector ID fields of track 0 side 1.
    pub fn set_t0s1_info(&mut self, track: u8) {
        self.t0s1_info = track;
    }

    /// Forget the catalogue track built for an SCL archive.
    pub fn invalidate_catalogue(&mut self) {
        self.catalogue = None;
    }

    /// Spin the disk by one byte cell, optionally stepping the head first.
    ///
    /// With `write` the byte is written to the disk if the cell belongs to the
    /// sector data, other cells ignore it.
    pub fn rotate(&mut self, seek: Option<Seek>, write: Option<u8>, side: u8) {
        self.data = 0;
        match seek {
            Some(Seek::In) if self.head < self.max_track => self.head += 1,
            Some(Seek::Out) if self.head != 0 => self.head -= 1,
            _ => {}
        }
        self.signals = if self.head == 0 { DiskSignals::TRACK0 } else { DiskSignals::empty() };

        if self.index_delay != 0 {
            self.index_delay -= 1;
            self.signals |= DiskSignals::INDEX;
            return
        }

        if let Some(pos) = self.buffer_pos {
            let pos = pos + 1;
            self.buffer_pos = if pos == u8::MAX { None } else { Some(pos) };
            self.index = self.index.map(|index| index + 1);
            match write {
                Some(byte) => {
                    self.buffer[usize::from(pos)] = byte;
                    self.write_through(usize::from(pos), byte);
                }
                None => self.data = self.buffer[usize::from(pos)]
            }
            return
        }

        let index = match self.index {
            Some(index) if index >= TRACK_LENGTH => {
                self.index = None;
                self.buffer_pos = None;
                self.index_delay = INDEX_PULSE;
                return
            }
            Some(index) => index + 1,
            None => 0
        };
        self.index = Some(index);

        let sector = index.checked_sub(GAP_START).map(|rel| rel / SECTOR_SLOT)
                          .filter(|&sector| sector < SECTORS.into());
        match sector {
            Some(sector) if index == SECTOR_ID_POS[sector as usize] + DATA_OFFSET => {
                self.load_sector(sector as u8, side);
                match write {
                    Some(byte) => {
                        self.buffer[0] = byte;
                        self.write_through(0, byte);
                    }
                    None => self.data = self.buffer[0]
                }
                self.buffer_pos = Some(0);
                return
            }
            Some(sector) if index == SECTOR_ID_POS[sector as usize] => {
                self.data = if self.head == 0 && side != 0 { self.t0s1_info } else { self.head };
            }
            _ => {
                self.data = format_byte(index, self.head);
            }
        }
        if write.is_some() {
            self.data = 0;
        }
    }

    fn sector_offset(&self, sector: u8, side: u8) -> Option<usize> {
        let offset = (usize::from(self.head) << (11 + self.sides))
                   + (usize::from(side) << 12)
                   + (usize::from(sector) << 8);
        let offset = offset as isize + self.data_offset;
        usize::try_from(offset).ok()
    }

    fn load_sector(&mut self, sector: u8, side: u8) {
        self.buffer_offset = None;
        if self.kind == DiskKind::Scl && self.head == 0 && side == 0 {
            let catalogue = self.catalogue.get_or_insert_with(|| {
                debug!("disk: building the SCL catalogue track");
                scl_catalogue(&self.image)
            });
            let start = usize::from(sector) * SECTOR_SIZE;
            match catalogue.get(start..start + SECTOR_SIZE) {
                Some(data) => self.buffer.copy_from_slice(data),
                None => self.buffer.fill(0)
            }
            return
        }
        self.buffer.fill(0);
        if let Some(offset) = self.sector_offset(sector, side) {
            if let Some(data) = self.image.get(offset..) {
                let len = data.len().min(SECTOR_SIZE);
                self.buffer[..len].copy_from_slice(&data[..len]);
                self.buffer_offset = Some(offset);
            }
        }
    }

    fn write_through(&mut self, pos: usize, byte: u8) {
        if self.write_protect {
            return
        }
        if let Some(cell) = self.buffer_offset.and_then(|offset| self.image.get_mut(offset + pos)) {
            *cell = byte;
        }
    }
}

/// Return the byte of a formatted track at the byte cell `index`, with `track` in the ID fields.
///
/// Sector data cells are not covered, they come from the image.
pub fn format_byte(index: u32, track: u8) -> u8 {
    if index < GAP_START {
        return match index {
            80..=91 => 0x00,
            92..=94 => 0xC2,
            95 => 0xFC,
            _ => 0x4E
        }
    }
    let rel = index - GAP_START;
    let sector = rel / SECTOR_SLOT;
    if sector >= SECTORS.into() {
        return 0x4E
    }
    match rel % SECTOR_SLOT {
        0..=11 => 0x00,
        12..=14 => 0xA1,
        15 => 0xFE,
        id @ 16..=21 => sector_id(track, sector as u8 + 1)[id as usize - 16],
        22..=43 => 0x4E,
        44..=55 => 0x00,
        56..=58 => 0xA1,
        59 => 0xFB,
        60..=315 => 0xE5,
        316 | 317 => 0xFF,
        _ => 0x4E
    }
}

/// Return the ID field bytes: track, side, sector, size code and the CRC.
pub fn sector_id(track: u8, sector: u8) -> [u8;6] {
    let crc = crc16(&[0xA1, 0xA1, 0xA1, 0xFE, track, 0, sector, 1]);
    let [hi, lo] = crc.to_be_bytes();
    [track, 0, sector, 1, hi, lo]
}

/// CRC-16/CCITT as computed by the controller over the address marks and fields.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &byte| {
        let mut crc = crc ^ (u16::from(byte) << 8);
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
        crc
    })
}

/// Build the TR-DOS catalogue track of an SCL archive.
///
/// The files are laid out one after another from track 1 sector 0.
pub fn scl_catalogue(scl: &[u8]) -> Box<[u8;CATALOGUE_SIZE]> {
    let mut track0 = Box::new([0u8;CATALOGUE_SIZE]);
    let files = scl.get(SCL_MAGIC.len()).copied().unwrap_or(0);
    let mut start_sector = 0usize;
    let mut start_track = 1usize;
    for (entry, header) in track0.chunks_exact_mut(16)
                                 .zip(scl.get(9..).unwrap_or(&[]).chunks_exact(14))
                                 .take(files.into())
    {
        entry[..14].copy_from_slice(header);
        entry[14] = start_sector as u8;
        entry[15] = start_track as u8;
        let next = start_track * 16 + start_sector + usize::from(header[13]);
        start_track = next / 16;
        start_sector = next % 16;
    }
    let free = 2560usize.saturating_sub(start_track * 16 + start_sector) as u16;
    track0[2273] = start_sector as u8;
    track0[2274] = start_track as u8;
    track0[2275] = 0x16;
    track0[2276] = files;
    track0[2277..2279].copy_from_slice(&free.to_le_bytes());
    track0[2279] = 0x10;
    track0[2282..2291].fill(b' ');
    track0[2293..2301].copy_from_slice(b"SCL_DISK");
    track0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec;

    fn trd_image(disk_type: u8) -> Vec<u8> {
        let (tracks, sides) = match disk_type {
            0x16 => (80, 2),
            0x17 => (40, 2),
            0x18 => (80, 1),
            _ => (40, 1)
        };
        let mut image = vec![0u8;tracks * sides * 16 * SECTOR_SIZE];
        image[DISK_TYPE_OFFSET] = disk_type;
        image
    }

    #[test]
    fn sector_positions_work() {
        assert_eq!(SECTOR_ID_POS[0], 162);
        assert_eq!(SECTOR_ID_POS[1], 554);
        assert_eq!(SECTOR_ID_POS[15], 6042);
        assert_eq!(format_byte(SECTOR_ID_POS[3] - 1, 5), 0xFE);
        assert_eq!(format_byte(SECTOR_ID_POS[3] + 2, 5), 4);
        assert_eq!(format_byte(SECTOR_ID_POS[3] + DATA_OFFSET - 1, 5), 0xFB);
        assert_eq!(format_byte(TRACK_LENGTH, 5), 0x4E);
    }

    #[test]
    fn crc16_works() {
        assert_eq!(crc16(&[0xA1, 0xA1, 0xA1]), 0xCDB4);
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn disk_geometry_works() {
        let disk = Disk::new(trd_image(0x16)).unwrap();
        assert_eq!((disk.tracks(), disk.sides()), (80, 2));
        assert_eq!(disk.kind(), DiskKind::Trd);
        assert!(!disk.is_write_protected());
        let disk = Disk::new(trd_image(0x19)).unwrap();
        assert_eq!((disk.tracks(), disk.sides()), (40, 1));
        let mut image = trd_image(0x19);
        image[DISK_TYPE_OFFSET] = 0x42;
        assert!(matches!(Disk::new(image), Err(Error::InvalidFormat(_))));
        assert!(matches!(Disk::new(vec![0;100]), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn disk_rotates_through_index() {
        let mut disk = Disk::new(trd_image(0x16)).unwrap();
        let mut pulses = 0;
        let mut last = DiskSignals::empty();
        let revolution = (TRACK_LENGTH + 2) as usize + INDEX_PULSE as usize;
        for _ in 0..revolution * 3 {
            disk.rotate(None, None, 0);
            let signals = disk.signals();
            if signals.contains(DiskSignals::INDEX) && !last.contains(DiskSignals::INDEX) {
                pulses += 1;
            }
            last = signals;
            assert!(signals.contains(DiskSignals::TRACK0));
        }
        assert_eq!(pulses, 3);
    }

    #[test]
    fn disk_reads_sector_data() {
        let mut image = trd_image(0x16);
        // track 2 side 1 sector 5 (index 4)
        let offset = (2 << 13) + 4096 + (4 << 8);
        for (i, byte) in image[offset..offset + SECTOR_SIZE].iter_mut().enumerate() {
            *byte = i as u8 ^ 0x55;
        }
        let mut disk = Disk::new(image).unwrap();
        disk.rotate(Some(Seek::In), None, 1);
        disk.rotate(Some(Seek::In), None, 1);
        assert_eq!(disk.head(), 2);
        assert!(disk.signals().is_empty());
        disk.seek_sector(5, DATA_OFFSET - 1);
        let data: Vec<u8> = (0..SECTOR_SIZE).map(|_| {
            disk.rotate(None, None, 1);
            disk.data()
        }).collect();
        assert!(data.iter().enumerate().all(|(i, &b)| b == i as u8 ^ 0x55));
        disk.rotate(None, None, 1);
        assert_eq!(disk.position(), Some(SECTOR_ID_POS[4] + 300));
    }

    #[test]
    fn disk_writes_through() {
        let mut disk = Disk::new(trd_image(0x18)).unwrap();
        disk.seek_sector(1, DATA_OFFSET - 1);
        for i in 0..SECTOR_SIZE {
            disk.rotate(None, Some(i as u8), 0);
        }
        assert!(disk.image()[..SECTOR_SIZE].iter().enumerate().all(|(i, &b)| b == i as u8));
        assert!(disk.image()[SECTOR_SIZE..2 * SECTOR_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn scl_catalogue_works() {
        let mut scl = SCL_MAGIC.to_vec();
        scl.push(2);
        scl.extend_from_slice(b"hello   B\x10\x00\x10\x00\x03");
        scl.extend_from_slice(b"world   C\x00\x80\x00\x20\x20");
        scl.resize(scl.len() + 35 * SECTOR_SIZE, 0xAA);
        let disk = Disk::new(scl.clone()).unwrap();
        assert_eq!(disk.kind(), DiskKind::Scl);
        assert!(disk.is_write_protected());
        assert_eq!((disk.tracks(), disk.sides()), (80, 2));
        let track0 = scl_catalogue(&scl);
        assert_eq!(&track0[..8], b"hello   ");
        assert_eq!(&track0[13..16], &[3, 0, 1]);
        assert_eq!(&track0[16 + 13..32], &[0x20, 3, 1]);
        assert_eq!(&track0[2273..2280], &[3, 3, 0x16, 2, 0xCD, 0x09, 0x10]);
        assert_eq!(&track0[2293..2301], b"SCL_DISK");
    }
}
