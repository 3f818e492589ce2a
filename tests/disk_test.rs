/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! Tests the Betadisk interface with disk images stored in files.
use std::fs;
use std::path::PathBuf;
use espectrum_core::*;
use espectrum_core::memory::{PAGE_SIZE, TRDOS_ROM};
use espectrum_core::wd1793::{DiskKind, SECTOR_SIZE, SECTORS};
use z80emu::Cpu;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("espectrum-core-{}-{}", std::process::id(), name))
}

fn trd_image(disk_type: u8) -> Vec<u8> {
    let tracks = if disk_type & 1 == 0 { 80 } else { 40 };
    let sides = if disk_type < 0x18 { 2 } else { 1 };
    let mut image = vec![0u8;tracks * sides * usize::from(SECTORS) * SECTOR_SIZE];
    for (n, byte) in image[..SECTOR_SIZE].iter_mut().enumerate() {
        *byte = n as u8 ^ 0x5A;
    }
    image[2048 + 227] = disk_type;
    image
}

#[test]
fn disk_files_work() {
    let path = temp_path("geometry.trd");
    fs::write(&path, trd_image(0x19)).unwrap();
    let mut wd = Wd1793::default();
    wd.open_disk(1, &path).unwrap();
    fs::remove_file(&path).unwrap();
    let disk = wd.disk(1).unwrap();
    assert_eq!(disk.kind(), DiskKind::Trd);
    assert_eq!((disk.tracks(), disk.sides()), (40, 1));
    assert!(!disk.is_write_protected());

    let missing = temp_path("missing.trd");
    assert!(matches!(wd.open_disk(1, &missing), Err(Error::NotFound)));
    assert!(wd.disk(1).is_none());

    let bad = temp_path("bad.trd");
    fs::write(&bad, [0u8;16]).unwrap();
    assert!(matches!(wd.open_disk(2, &bad), Err(Error::InvalidFormat(_))));
    fs::remove_file(&bad).unwrap();
    assert!(wd.disk(2).is_none());
}

#[test]
fn trdos_code_reads_sector() {
    // LD A,0x3C; OUT (0xFF),A         system: unit 0, side 0
    // LD A,0x08; OUT (0x1F),A         restore
    // wait: IN A,(0xFF); RLCA; JR NC,wait
    // LD A,1; OUT (0x5F),A            sector 1
    // LD HL,0x8000
    // LD A,0x80; OUT (0x1F),A         read sector
    // loop: IN A,(0xFF); AND 0xC0; JR Z,loop
    // RLCA; JR C,done
    // IN A,(0x7F); LD (HL),A; INC HL; JR loop
    // done: DI; HALT
    let code = [
        0x3E, 0x3C, 0xD3, 0xFF,
        0x3E, 0x08, 0xD3, 0x1F,
        0xDB, 0xFF, 0x07, 0x30, 0xFB,
        0x3E, 0x01, 0xD3, 0x5F,
        0x21, 0x00, 0x80,
        0x3E, 0x80, 0xD3, 0x1F,
        0xDB, 0xFF, 0xE6, 0xC0, 0x28, 0xFA,
        0x07, 0x38, 0x06,
        0xDB, 0x7F, 0x77, 0x23, 0x18, 0xF1,
        0xF3, 0x76
    ];
    let mut rom = vec![0u8;PAGE_SIZE];
    rom[..code.len()].copy_from_slice(&code);

    let path = temp_path("read.trd");
    fs::write(&path, trd_image(0x16)).unwrap();

    let mut m: Machine = Machine::new(Config::default().with_betadisk(true));
    m.install_rom(TRDOS_ROM, &rom).unwrap();
    m.bus_mut().wd1793_mut().open_disk(0, &path).unwrap();
    fs::remove_file(&path).unwrap();
    m.bus_mut().memory_mut().page_trdos(true);

    for _ in 0..100 {
        m.run_frame();
        if m.cpu().is_halt() {
            break
        }
    }
    assert!(m.cpu().is_halt());
    assert_eq!(m.cpu().get_reg16(z80emu::StkReg16::HL), 0x8000 + SECTOR_SIZE as u16);
    let data = m.bus().memory_debug(0x8000..0x8100);
    assert!(data.iter().enumerate().all(|(n, &b)| b == n as u8 ^ 0x5A));
    assert_eq!(m.bus().wd1793().sector(), 1);
    assert_eq!(m.bus().wd1793().peek_status() & 0x1C, 0);

    let disk = m.eject_disk(0).unwrap();
    assert_eq!(disk.image().len(), 80 * 2 * 16 * 256);
    assert!(m.eject_disk(0).is_none());
    assert!(matches!(m.insert_disk(4, vec![]), Err(Error::InvalidUnit(4))));
}
