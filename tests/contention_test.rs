/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! Tests the contention law and the clock pricing of bus cycles.
use rand::prelude::*;
use espectrum_core::*;
use espectrum_core::arch::{WAIT_STATES, CONTENTION_START, CONTENTION_LENGTH, PAPER_LINES};
use z80emu::Clock;

fn timings(arch: Architecture) -> Timings {
    Timings::new(arch, AspectRatio::Ratio4x3, CpuSpeed::Normal, false)
}

#[test]
fn frame_constants_work() {
    for (arch, frame, micros, int_length) in [
        (Architecture::Spec48,   69888, 19968, 32),
        (Architecture::Spec128,  70908, 19992, 36),
        (Architecture::Plus2A3,  70908, 19992, 36),
        (Architecture::Pentagon, 71680, 20480, 36),
        (Architecture::TK,       71136, 19895, 32)]
    {
        let t = timings(arch);
        assert_eq!(arch.states_per_frame(), frame);
        assert_eq!(t.frame_tstates, frame);
        assert_eq!(t.micros_per_frame, micros);
        assert_eq!(t.int_length, int_length);
    }
}

#[test]
fn contention_follows_line_position() {
    let mut rng = thread_rng();
    for arch in [Architecture::Spec48, Architecture::Spec128, Architecture::TK, Architecture::Plus2A3] {
        let t = timings(arch);
        for _ in 0..10_000 {
            let ts = rng.gen_range(0..t.frame_tstates);
            let expected = match ts.checked_sub(t.paper_start) {
                Some(delta) if delta / t.line_tstates < PAPER_LINES => {
                    let pos = delta % t.line_tstates;
                    match pos.checked_sub(CONTENTION_START) {
                        Some(offs) if offs < CONTENTION_LENGTH => u32::from(WAIT_STATES[(offs % 8) as usize]),
                        _ => 0
                    }
                }
                _ => 0
            };
            assert_eq!(t.contention(ts), expected, "{:?} {}", arch, ts);
            // the delay depends only on the position within the line
            let next = ts + t.line_tstates;
            if ts >= t.paper_start && next < t.paper_start + PAPER_LINES * t.line_tstates {
                assert_eq!(t.contention(next), t.contention(ts));
            }
        }
    }
    let pentagon = timings(Architecture::Pentagon);
    assert!((0..pentagon.frame_tstates).all(|ts| pentagon.contention(ts) == 0));
}

#[test]
fn contended_line_costs_more() {
    for arch in [Architecture::Spec48, Architecture::Spec128, Architecture::TK] {
        let t = timings(arch);
        let line_start = t.paper_start + 100 * t.line_tstates;
        let mut slow = FrameClock::new(t);
        slow.set_contended_pages(0b0010);
        slow.set_tstates(line_start);
        let mut fast = slow;
        for _ in 0..50 {
            slow.add_m1(0x4000);
            fast.add_m1(0x8000);
        }
        assert!(slow.as_timestamp() > fast.as_timestamp());
        assert_eq!(fast.as_timestamp(), line_start + 200);
        // no delay is imposed past the paper of the line
        let fast_end = fast.as_timestamp();
        fast.add_m1(0x4000);
        assert_eq!(fast.as_timestamp(), fast_end + 4);
    }
}
