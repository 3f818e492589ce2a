/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! ULA raster engine.
//!
//! The raster engine paints the border and the paper into a palette indexed
//! framebuffer in step with the T-states consumed by the `CPU`.
//!
//! ```text
//!  TopBorderBlank -> TopBorder -> ... (top border lines)
//!  MainScreenBlank -> LeftBorder -> LineDraw [-> LineDrawSync] -> RightBorder -> ... (192 lines)
//!  BottomBorderBlank -> BottomBorder|BottomBorderFps -> ... (bottom border lines)
//!  Blank (until the end of frame)
//! ```
//!
//! Each state consumes T-states handed to [Video::draw] and may pass the leftover
//! to the next state. The `*Blank` states wait for the draw start of the next line.
use super::vec::Vec;
use super::vec;
use super::arch::{Architecture, AspectRatio, Timings, CONTENTION_START, CONTENTION_LENGTH};
use super::clock::Ts;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

mod palette;

pub use palette::{PALETTE, ink_paper};

/// The number of 8 pixel wide columns of a raster line.
const COLUMNS: u32 = 40;
/// The last column of the left border.
const LEFT_BORDER_LAST: u32 = 3;
/// The last column of the paper.
const PAPER_LAST: u32 = 35;
/// The window of the bottom border left for the host's frame rate overlay (4:3).
const FPS_LINES: (u32, u32) = (220, 235);
const FPS_COLUMNS: (u32, u32) = (21, 38);
const FPS_COLUMNS_PENTAGON: (u32, u32) = (84, 155);
/// The window of the paper left for the host's frame rate overlay (16:9).
const FPS_LINES_WIDE: (u32, u32) = (176, 191);
const FPS_COLUMNS_WIDE: (u32, u32) = (17, 34);

/// The state of the raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawStatus {
    TopBorderBlank,
    TopBorder,
    MainScreenBlank,
    LeftBorder,
    LineDraw,
    /// Pentagon's 2 T-states of delay between the paper and the right border.
    ///
    /// The 2 T-states are carried over from the left border into the paper, this
    /// state only closes the paper line. Placing it before or after `LineDraw`
    /// keeps the line length and the paper T-states the same.
    LineDrawSync,
    RightBorder,
    BottomBorderBlank,
    BottomBorder,
    /// A bottom border line skipping the frame rate overlay window.
    BottomBorderFps,
    Blank,
}

/// The ULA raster engine.
pub struct Video {
    timings: Timings,
    status: DrawStatus,
    tstates: Ts,
    tstate_draw: Ts,
    rest: Ts,
    line: u32,
    col: u32,
    col_end: u32,
    bmp_offset: u16,
    att_offset: u16,
    border: u8,
    flashing: u8,
    flash_ctr: u8,
    frames: u32,
    fps_overlay: bool,
    width: usize,
    height: usize,
    x_offset: usize,
    // the first main screen, bottom border and invisible line
    line_ends: [u32;3],
    buffer: Vec<u8>,
}

/// Return the bitmap offset of the paper line.
#[inline]
pub const fn bitmap_offset(line: u32) -> u16 {
    let y = line as u16;
    ((y & 0xC0) | ((y & 0x38) >> 3) | ((y & 0x07) << 3)) << 5
}

/// Return the attributes offset of the paper line.
#[inline]
pub const fn attr_offset(line: u32) -> u16 {
    (((line as u16) >> 3) << 5) + 0x1800
}

impl Video {
    pub fn new(timings: Timings) -> Self {
        let mut video = Video {
            timings,
            status: DrawStatus::TopBorderBlank,
            tstates: 0,
            tstate_draw: 0,
            rest: 0,
            line: 0,
            col: 0,
            col_end: 0,
            bmp_offset: 0,
            att_offset: 0,
            border: 7,
            flashing: 0,
            flash_ctr: 0,
            frames: 0,
            fps_overlay: false,
            width: 0,
            height: 0,
            x_offset: 0,
            line_ends: [0;3],
            buffer: Vec::new(),
        };
        video.set_timings(timings);
        video
    }

    /// Reconfigure the raster geometry and reset the raster.
    pub fn set_timings(&mut self, timings: Timings) {
        self.timings = timings;
        let (width, height, x_offset, line_ends) = match timings.aspect {
            AspectRatio::Ratio4x3 => (320, 240, 0, [24, 216, 240]),
            AspectRatio::Ratio16x9 => (360, 200, 20, [4, 196, 200]),
        };
        self.width = width;
        self.height = height;
        self.x_offset = x_offset;
        self.line_ends = line_ends;
        self.buffer = vec![0;width * height];
        debug!("video: {} {}x{} screen: {} paper: {}",
               timings.arch.name(), width, height, timings.screen_start, timings.paper_start);
        self.reset();
    }

    /// Reset the raster to the beginning of a frame, the border to white.
    pub fn reset(&mut self) {
        self.border = 7;
        self.tstates = 0;
        self.flashing = 0;
        self.flash_ctr = 0;
        self.begin_frame();
    }

    fn begin_frame(&mut self) {
        self.line = 0;
        self.col = 0;
        self.rest = 0;
        self.tstate_draw = self.timings.screen_start;
        self.status = DrawStatus::TopBorderBlank;
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn status(&self) -> DrawStatus {
        self.status
    }

    /// The T-state up to which the raster has been drawn.
    pub fn tstates(&self) -> Ts {
        self.tstates
    }

    /// Set the raster's T-state counter, e.g. after restoring a snapshot.
    ///
    /// The raster of the current frame is not redrawn.
    pub fn set_tstates(&mut self, ts: Ts) {
        self.begin_frame();
        self.tstates = ts;
    }

    /// The number of completed frames.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn border(&self) -> u8 {
        self.border
    }

    pub fn set_border(&mut self, color: u8) {
        self.border = color & 7;
    }

    /// Leave a window for the host's frame rate overlay unpainted.
    pub fn set_fps_overlay(&mut self, enabled: bool) {
        self.fps_overlay = enabled;
    }

    /// Return whether the flashing attributes currently have their ink and paper swapped.
    pub fn is_flash_phase(&self) -> bool {
        self.flashing != 0
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// The framebuffer of palette indices, see [PALETTE].
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Advance the raster by `states` T-states, reading the pixels from the `screen` bank.
    ///
    /// If `contended` is `true` the ULA wait states at the current raster position are
    /// added to `states`. Return the number of T-states consumed.
    pub fn draw(&mut self, states: Ts, contended: bool, screen: &[u8]) -> Ts {
        let mut states = states;
        if contended {
            states += self.timings.contention(self.tstates);
        }
        self.tstates += states;
        let mut pending = states;
        loop {
            let status = self.status;
            if self.timings.arch == Architecture::Pentagon {
                self.step_pentagon(pending, screen);
            }
            else {
                self.step_ula(pending, screen);
            }
            pending = 0;
            if status == self.status {
                break
            }
        }
        states
    }

    /// Catch the raster up with the `CPU` clock at `ts`.
    #[inline]
    pub fn update(&mut self, ts: Ts, screen: &[u8]) {
        if ts > self.tstates {
            self.draw(ts - self.tstates, false, screen);
        }
    }

    /// Finish the frame: rewind the raster by `frame_tstates` and advance the flash phase.
    ///
    /// The raster should be caught up with the end of the frame first.
    pub fn end_frame(&mut self, frame_tstates: Ts) {
        self.tstates = self.tstates.saturating_sub(frame_tstates);
        self.begin_frame();
        self.frames = self.frames.wrapping_add(1);
        if self.flash_ctr & 0x0f == 0 {
            self.flashing ^= 0x80;
        }
        self.flash_ctr = self.flash_ctr.wrapping_add(1);
    }

    /// Return the byte the ULA is reading from the video memory at `ts` or `0xFF`.
    pub fn floating_bus(&self, ts: Ts, screen: &[u8], paging_locked: bool) -> u8 {
        match self.timings.arch {
            Architecture::Pentagon => u8::MAX,
            Architecture::Plus2A3 if paging_locked => u8::MAX,
            Architecture::Plus2A3 => self.ula_fetch(ts, screen).map_or(u8::MAX, |data| data | 1),
            Architecture::Spec48|Architecture::Spec128|Architecture::TK => {
                self.ula_fetch(ts, screen).unwrap_or(u8::MAX)
            }
        }
    }

    fn ula_fetch(&self, ts: Ts, screen: &[u8]) -> Option<u8> {
        let (line, pos) = self.timings.paper_position(ts)?;
        let offs = pos.checked_sub(CONTENTION_START)?;
        if offs >= CONTENTION_LENGTH {
            return None
        }
        let col = ((offs >> 3) << 1) as u16;
        let addr = match offs & 7 {
            3 => bitmap_offset(line) + col,
            4 => attr_offset(line) + col,
            5 => bitmap_offset(line) + col + 1,
            6 => attr_offset(line) + col + 1,
            _ => return None
        };
        screen.get(usize::from(addr)).copied()
    }

    #[inline]
    fn line_start(&self) -> Option<usize> {
        let line = self.line as usize;
        if line < self.height {
            Some(line * self.width)
        }
        else {
            None
        }
    }

    #[inline]
    fn paint_border(&mut self, px: usize, count: usize) {
        if let Some(start) = self.line_start() {
            let start = start + px;
            let border = self.border;
            if let Some(pixels) = self.buffer.get_mut(start..start + count) {
                pixels.fill(border);
            }
        }
    }

    /// Paint a border column of 8 pixels.
    #[inline]
    fn paint_border_column(&mut self, col: u32) {
        self.paint_border(self.x_offset + col as usize * 8, 8);
    }

    /// Paint 2 pixels of the Pentagon border.
    #[inline]
    fn paint_border_half(&mut self, col: u32) {
        self.paint_border(col as usize * 2, 2);
    }

    /// Paint a paper column of 8 pixels and advance the video memory offsets.
    #[inline]
    fn paint_paper_column(&mut self, col: u32, screen: &[u8]) {
        let att = screen.get(usize::from(self.att_offset)).copied().unwrap_or(0);
        let bmp = screen.get(usize::from(self.bmp_offset)).copied().unwrap_or(0);
        self.att_offset = self.att_offset.wrapping_add(1);
        self.bmp_offset = self.bmp_offset.wrapping_add(1);
        if self.is_fps_window_wide(col) {
            return
        }
        let bmp = if att & self.flashing != 0 { !bmp } else { bmp };
        let (ink, paper) = ink_paper(att);
        if let Some(start) = self.line_start() {
            let start = start + self.x_offset + col as usize * 8;
            if let Some(pixels) = self.buffer.get_mut(start..start + 8) {
                for (bit, pixel) in pixels.iter_mut().enumerate() {
                    *pixel = if bmp & (0x80 >> bit) != 0 { ink } else { paper };
                }
            }
        }
    }

    #[inline]
    fn is_fps_window_wide(&self, col: u32) -> bool {
        self.fps_overlay && self.timings.aspect == AspectRatio::Ratio16x9 &&
        (FPS_LINES_WIDE.0..=FPS_LINES_WIDE.1).contains(&self.line) &&
        (FPS_COLUMNS_WIDE.0..=FPS_COLUMNS_WIDE.1).contains(&col)
    }

    #[inline]
    fn is_fps_line(&self) -> bool {
        (FPS_LINES.0..=FPS_LINES.1).contains(&self.line)
    }

    fn bottom_border_status(&self) -> DrawStatus {
        if self.fps_overlay && self.timings.aspect == AspectRatio::Ratio4x3 && self.is_fps_line() {
            DrawStatus::BottomBorderFps
        }
        else {
            DrawStatus::BottomBorder
        }
    }

    fn start_paper_line(&mut self) {
        let paper_line = self.line - self.line_ends[0];
        self.bmp_offset = bitmap_offset(paper_line);
        self.att_offset = attr_offset(paper_line);
    }

    fn end_border_line(&mut self) {
        self.line += 1;
        self.status = match self.status {
            DrawStatus::TopBorder if self.line == self.line_ends[0] => DrawStatus::MainScreenBlank,
            DrawStatus::TopBorder => DrawStatus::TopBorderBlank,
            _ if self.line == self.line_ends[2] => DrawStatus::Blank,
            _ => DrawStatus::BottomBorderBlank,
        };
    }

    fn end_paper_line(&mut self) {
        self.tstate_draw += self.timings.line_tstates;
        self.line += 1;
        self.status = if self.line == self.line_ends[1] {
            DrawStatus::BottomBorderBlank
        }
        else {
            DrawStatus::MainScreenBlank
        };
    }

    /// Paint 4 T-state wide paper columns until the last one, return the leftover.
    fn paper_columns(&mut self, pending: Ts, screen: &[u8]) -> Option<Ts> {
        let states = pending + self.rest;
        self.rest = states & 3;
        let mut columns = states >> 2;
        while columns > 0 {
            self.paint_paper_column(self.col, screen);
            columns -= 1;
            self.col += 1;
            if self.col > PAPER_LAST {
                return Some(columns << 2)
            }
        }
        None
    }

    fn step_ula(&mut self, pending: Ts, screen: &[u8]) {
        use DrawStatus::*;
        match self.status {
            TopBorderBlank|BottomBorderBlank => {
                if self.tstates > self.tstate_draw {
                    self.rest = self.tstates - self.tstate_draw;
                    self.tstate_draw += self.timings.line_tstates;
                    self.col = 0;
                    self.status = if self.status == TopBorderBlank {
                        TopBorder
                    }
                    else {
                        self.bottom_border_status()
                    };
                }
            }
            TopBorder|BottomBorder => {
                let states = pending + self.rest;
                self.rest = states & 3;
                let first = self.col;
                self.col += states >> 2;
                for col in first..self.col.min(COLUMNS) {
                    self.paint_border_column(col);
                }
                if self.col >= COLUMNS {
                    self.end_border_line();
                }
            }
            BottomBorderFps => {
                let states = pending + self.rest;
                self.rest = states & 3;
                for _ in 0..states >> 2 {
                    if self.col < FPS_COLUMNS.0 {
                        self.paint_border_column(self.col);
                    }
                    else if self.col > FPS_COLUMNS.1 {
                        self.paint_border_column(self.col);
                        self.end_border_line();
                        return
                    }
                    self.col += 1;
                }
            }
            MainScreenBlank => {
                if self.tstates > self.tstate_draw {
                    self.rest = self.tstates - self.tstate_draw;
                    self.col = 0;
                    self.start_paper_line();
                    self.status = LeftBorder;
                }
            }
            LeftBorder => {
                let states = pending + self.rest;
                self.rest = states & 3;
                let mut columns = states >> 2;
                while columns > 0 {
                    self.paint_border_column(self.col);
                    columns -= 1;
                    self.col += 1;
                    if self.col > LEFT_BORDER_LAST {
                        self.status = LineDraw;
                        self.rest += columns << 2;
                        break
                    }
                }
            }
            LineDraw => {
                if let Some(leftover) = self.paper_columns(pending, screen) {
                    self.status = RightBorder;
                    self.rest += leftover;
                }
            }
            RightBorder => {
                let states = pending + self.rest;
                self.rest = states & 3;
                for _ in 0..states >> 2 {
                    self.paint_border_column(self.col);
                    self.col += 1;
                    if self.col == COLUMNS {
                        self.end_paper_line();
                        break
                    }
                }
            }
            LineDrawSync|Blank => {}
        }
    }

    fn step_pentagon(&mut self, pending: Ts, screen: &[u8]) {
        use DrawStatus::*;
        let wide = self.timings.aspect == AspectRatio::Ratio16x9;
        match self.status {
            TopBorderBlank|BottomBorderBlank => {
                if self.tstates > self.tstate_draw {
                    self.rest = self.tstates - self.tstate_draw;
                    self.tstate_draw += self.timings.line_tstates;
                    (self.col, self.col_end) = if wide { (10, 170) } else { (0, 160) };
                    self.status = if self.status == TopBorderBlank {
                        TopBorder
                    }
                    else {
                        self.bottom_border_status()
                    };
                }
            }
            TopBorder|BottomBorder => {
                let states = pending + self.rest;
                self.rest = 0;
                let last = self.col_end.min(self.col.saturating_add(states));
                for col in self.col..last {
                    self.paint_border_half(col);
                }
                self.col = last;
                if self.col == self.col_end {
                    self.end_border_line();
                }
            }
            BottomBorderFps => {
                let states = pending + self.rest;
                self.rest = 0;
                for _ in 0..states {
                    if self.col < FPS_COLUMNS_PENTAGON.0 || self.col > FPS_COLUMNS_PENTAGON.1 {
                        self.paint_border_half(self.col);
                    }
                    self.col += 1;
                    if self.col >= self.col_end {
                        self.end_border_line();
                        return
                    }
                }
            }
            MainScreenBlank => {
                if self.tstates > self.tstate_draw {
                    self.rest = self.tstates - self.tstate_draw;
                    self.start_paper_line();
                    (self.col, self.col_end) = if wide { (10, 25) } else { (0, 15) };
                    self.status = LeftBorder;
                }
            }
            LeftBorder => {
                let states = pending + self.rest;
                self.rest = 0;
                for i in 0..states {
                    self.paint_border_half(self.col);
                    self.col += 1;
                    if self.col > self.col_end {
                        self.col = LEFT_BORDER_LAST + 1;
                        self.col_end = if wide { 154 } else { 144 };
                        self.status = LineDraw;
                        // the 2 T-states of the sync delay
                        self.rest = states - (i + 1) + 2;
                        break
                    }
                }
            }
            LineDraw => {
                if let Some(leftover) = self.paper_columns(pending, screen) {
                    self.col = 0;
                    self.status = LineDrawSync;
                    self.rest += leftover;
                }
            }
            LineDrawSync => {
                let states = pending + self.rest;
                self.rest = 0;
                for i in 0..states {
                    self.col += 1;
                    if self.col > 1 {
                        self.col = self.col_end;
                        self.col_end = if wide { 170 } else { 160 };
                        self.status = RightBorder;
                        self.rest = states - (i + 1);
                        break
                    }
                }
            }
            RightBorder => {
                let states = pending + self.rest;
                self.rest = 0;
                for _ in 0..states {
                    self.paint_border_half(self.col);
                    self.col += 1;
                    if self.col == self.col_end {
                        self.end_paper_line();
                        break
                    }
                }
            }
            Blank => {}
        }
    }
}
