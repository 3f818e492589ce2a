/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
/// The `0xRRGGBB` colors of the 16 palette indices: 8 normal and 8 bright ones.
pub const PALETTE: [u32;16] = [
    0x000000, 0x0000D7, 0xD70000, 0xD700D7, 0x00D700, 0x00D7D7, 0xD7D700, 0xD7D7D7,
    0x000000, 0x0000FF, 0xFF0000, 0xFF00FF, 0x00FF00, 0x00FFFF, 0xFFFF00, 0xFFFFFF,
];

/// Return the palette indices of the ink and the paper of the color attribute.
#[inline(always)]
pub const fn ink_paper(attr: u8) -> (u8, u8) {
    let bright = (attr >> 3) & 8;
    ((attr & 7) | bright, ((attr >> 3) & 7) | bright)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ink_paper_works() {
        assert_eq!(ink_paper(0x38), (0, 7));
        assert_eq!(ink_paper(0x78), (8, 15));
        assert_eq!(ink_paper(0xC7), (15, 8));
        assert_eq!(ink_paper(0x0A), (2, 1));
        assert_eq!(PALETTE[usize::from(ink_paper(0x4F).1)], 0x0000FF);
    }
}
