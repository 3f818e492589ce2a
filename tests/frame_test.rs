/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! Tests the frame driver running real Z80 code.
use espectrum_core::*;
use espectrum_core::memory::PAGE_SIZE;
use z80emu::{Cpu, Z80NMOS, opconsts::HALT_OPCODE};

const ARCHS: [Architecture;5] = [Architecture::Spec48, Architecture::Spec128,
                                 Architecture::Pentagon, Architecture::TK,
                                 Architecture::Plus2A3];

fn machine_with_rom(config: Config, code: &[u8]) -> Machine<Z80NMOS> {
    let mut rom = vec![0u8;PAGE_SIZE];
    rom[..code.len()].copy_from_slice(code);
    let mut machine = Machine::new(config);
    machine.install_rom(0, &rom).unwrap();
    machine.install_rom(1, &rom).unwrap();
    machine
}

#[test]
fn nop_frames_advance_global_clock() {
    for arch in ARCHS {
        let config = Config::default().with_arch(arch);
        let frame_tstates = u64::from(config.timings().frame_tstates);
        let mut m = machine_with_rom(config, &[]);
        for frame in 1..=3 {
            m.run_frame();
            assert_eq!(m.frames(), frame, "{:?}", arch);
            assert_eq!(m.global_tstates(), frame * frame_tstates, "{:?}", arch);
            assert!(u64::from(m.tstates()) < frame_tstates);
        }
        assert_eq!(m.audio_samples().len(), m.bus().audio().samples_per_frame());
        m.reset();
        assert_eq!(m.frames(), 0);
        assert_eq!(m.global_tstates(), 0);
        assert_eq!(m.tstates(), 0);
    }
}

#[test]
fn halting_cpu_completes_frame() {
    for arch in ARCHS {
        let config = Config::default().with_arch(arch);
        let frame_tstates = u64::from(config.timings().frame_tstates);
        let mut m = machine_with_rom(config, &[HALT_OPCODE]);
        m.run_frame();
        assert!(m.cpu().is_halt());
        assert_eq!(m.tstates(), 0, "{:?}", arch);
        assert_eq!(m.global_tstates(), frame_tstates);
        assert_eq!(m.frames(), 1);
    }
}

#[test]
fn border_is_painted() {
    // LD A,2; OUT (0xFE),A; DI; HALT
    let mut m = machine_with_rom(Config::default(), &[0x3E, 0x02, 0xD3, 0xFE, 0xF3, 0x76]);
    m.run_frame();
    let video = m.bus().video();
    assert_eq!(video.border(), 2);
    let (width, height) = (video.width(), video.height());
    assert_eq!((width, height), (320, 240));
    let buffer = m.framebuffer();
    assert_eq!(buffer.len(), width * height);
    assert_eq!(buffer[0], 2);
    assert_eq!(buffer[width * height - 1], 2);
    // the paper of an empty screen
    assert_eq!(buffer[120 * width + 160], 0);
}

#[test]
fn wide_aspect_ratio_works() {
    let config = Config::default().with_aspect(AspectRatio::Ratio16x9);
    let mut m = machine_with_rom(config, &[0x3E, 0x04, 0xD3, 0xFE, 0xF3, 0x76]);
    m.run_frame();
    assert_eq!((m.bus().video().width(), m.bus().video().height()), (360, 200));
    assert_eq!(m.framebuffer()[180], 4);
}

#[test]
fn beeper_produces_samples() {
    // LD A,0x10; OUT (0xFE),A; DI; HALT
    let mut m = machine_with_rom(Config::default(), &[0x3E, 0x10, 0xD3, 0xFE, 0xF3, 0x76]);
    m.run_frame();
    let samples = m.audio_samples();
    assert_eq!(samples.len(), 880);
    assert!(samples[10..].iter().all(|&s| s == 97));
    m.run_frame();
    assert!(m.audio_samples().iter().all(|&s| s == 97));
}

#[test]
fn keyboard_is_read_by_code() {
    // LD A,0xFD; IN A,(0xFE); LD (0x8000),A; DI; HALT
    let code = [0x3E, 0xFD, 0xDB, 0xFE, 0x32, 0x00, 0x80, 0xF3, 0x76];
    let mut m = machine_with_rom(Config::default(), &code);
    m.bus_mut().keyboard_mut().set_key(1, 2, true);
    m.run_frame();
    assert_eq!(m.bus().memory_debug(0x8000..0x8001), [0xBB]);
}

#[test]
fn paging_changes_contention() {
    // LD BC,0x7FFD; LD A,1; OUT (C),A; DI; HALT
    let code = [0x01, 0xFD, 0x7F, 0x3E, 0x01, 0xED, 0x79, 0xF3, 0x76];
    let mut m = machine_with_rom(Config::default().with_arch(Architecture::Spec128), &code);
    assert_eq!(m.clock().contended_pages(), 0b0010);
    m.run_frame();
    assert_eq!(m.bus().memory().bank_latch(), 1);
    assert_eq!(m.clock().contended_pages(), 0b1010);
}

#[test]
fn paging_port_read_changes_contention() {
    // LD BC,0x7FFD; IN A,(C); LD (0x8000),A; DI; HALT
    let code = [0x01, 0xFD, 0x7F, 0xED, 0x78, 0x32, 0x00, 0x80, 0xF3, 0x76];
    let mut m = machine_with_rom(Config::default().with_arch(Architecture::Spec128), &code);
    m.run_frame();
    // the top border floats 0xFF onto the bus
    assert_eq!(m.bus().memory_debug(0x8000..0x8001), [0xFF]);
    assert_eq!(m.bus().memory().bank_latch(), 7);
    assert!(m.bus().memory().is_paging_locked());
    assert_eq!(m.clock().contended_pages(), 0b1010);
    assert!(!m.clock().is_paging_pending());
}

#[test]
fn tape_is_heard_on_ear() {
    // LD HL,0x8000; loop: IN A,(0xFE); LD (HL),A; INC L; JR loop
    let code = [0x21, 0x00, 0x80, 0xDB, 0xFE, 0x77, 0x2C, 0x18, 0xFA];
    let mut header = vec![0x13, 0x00, 0x00, 0x03];
    header.extend_from_slice(b"screen    ");
    header.extend_from_slice(&[0x00, 0x1B, 0x00, 0x40, 0x00, 0x80]);
    let checksum = header[2..].iter().fold(0, |sum, b| sum ^ b);
    header.push(checksum);

    let mut m = machine_with_rom(Config::default(), &code);
    m.run_frame();
    assert!(m.bus().memory_debug(0x8000..0x8100).iter().all(|&b| b == 0xBF));

    m.insert_tape(header).unwrap();
    assert_eq!(m.bus().tape().blocks()[0].name.as_str(), "screen    ");
    m.play_tape().unwrap();
    assert!(m.bus().tape().is_loading());
    m.run_frame();
    let sampled = m.bus().memory_debug(0x8000..0x8100);
    assert!(sampled.iter().any(|&b| b == 0xFF));
    assert!(sampled.iter().any(|&b| b == 0xBF));
    m.stop_tape();
    assert!(!m.bus().tape().is_loading());
}

#[test]
fn snapshot_survives_frames() {
    let mut m = machine_with_rom(Config::default().with_arch(Architecture::Spec128),
                                 &[0xF3, HALT_OPCODE]);
    m.run_frame();
    let snapshot = m.save_snapshot();
    assert_eq!(snapshot.ram_banks.len(), 8);
    let mut other: Machine = Machine::new(Config::default());
    other.load_snapshot(&snapshot).unwrap();
    assert_eq!(other.config().arch, Architecture::Spec128);
    assert_eq!(other.save_snapshot(), snapshot);
}
