//! Advertisement payload codec for generic advertisement-controlled toys.
//!
//! These devices listen for a BLE advertisement whose manufacturer data
//! looks like an nRF24-style RF frame: a fixed 5-byte address, the command,
//! a CRC-16 and two layers of data whitening. The receiver does not answer,
//! so a command is simply broadcast until the next one replaces it.

/// Manufacturer id the payload is advertised under.
pub const COMPANY_ID: u16 = 0xFFF0;

/// Address every generic device listens on.
pub const ADDRESS: [u8; 5] = [0x77, 0x62, 0x4D, 0x53, 0x45];

/// AD flags prepended to the frame (LE general discoverable, BR/EDR not
/// supported).
pub const FLAGS: [u8; 3] = [0x02, 0x01, 0x06];

/// Highest speed level; `0` stops the motor.
pub const MAX_LEVEL: u32 = 7;

/// Command byte for each level.
const LEVELS: [u8; 8] = [0xE5, 0xF4, 0xF7, 0xF6, 0xF1, 0xF3, 0xE7, 0xE6];

/// Length of the encoded RF frame.
pub const FRAME_LEN: usize = 11;

/// Preamble written before the address, bit-reversed with it.
const PREAMBLE: [u8; 3] = [0x71, 0x0F, 0x55];

/// Offset of the preamble inside the whitening window.
const PREAMBLE_OFFSET: usize = 0x0F;

/// Offset of the address inside the whitening window.
const ADDRESS_OFFSET: usize = 0x12;

/// Bytes of the frame the command overwrites (command byte plus two zero
/// bytes).
const COMMAND_OFFSET: usize = 8;

/// Command byte for `level`, saturated at [`MAX_LEVEL`].
#[must_use]
pub fn command_byte(level: u32) -> u8 {
    let index = usize::try_from(level.min(MAX_LEVEL)).unwrap_or(0);
    LEVELS[index]
}

/// Full manufacturer data for `level`: flags followed by the RF frame.
#[must_use]
pub fn level_payload(level: u32) -> Vec<u8> {
    let mut frame = rf_frame(&ADDRESS, &[0]);
    frame[COMMAND_OFFSET..].copy_from_slice(&[command_byte(level), 0, 0]);

    let mut payload = Vec::with_capacity(FLAGS.len() + FRAME_LEN);
    payload.extend_from_slice(&FLAGS);
    payload.extend_from_slice(&frame);
    payload
}

/// Encode `data` for `address` into an RF frame.
///
/// Layout before whitening: preamble, reversed address, reversed data and
/// the CRC (low byte first). The preamble and address bytes are
/// bit-reversed. The frame is whitened with seed `0x25` from the start of
/// the window and with seed `0x3F` from the address on; the result is the
/// first [`FRAME_LEN`] bytes starting at the preamble.
#[must_use]
pub fn rf_frame(address: &[u8; 5], data: &[u8]) -> [u8; FRAME_LEN] {
    let data_end = ADDRESS_OFFSET + address.len() + data.len();
    let mut buf = vec![0u8; data_end + 2];

    buf[PREAMBLE_OFFSET..ADDRESS_OFFSET].copy_from_slice(&PREAMBLE);
    for (slot, byte) in buf[ADDRESS_OFFSET..ADDRESS_OFFSET + address.len()]
        .iter_mut()
        .zip(address.iter().rev())
    {
        *slot = *byte;
    }
    for (slot, byte) in buf[ADDRESS_OFFSET + address.len()..data_end]
        .iter_mut()
        .zip(data.iter().rev())
    {
        *slot = *byte;
    }
    for byte in &mut buf[PREAMBLE_OFFSET..ADDRESS_OFFSET + address.len()] {
        *byte = byte.reverse_bits();
    }

    let [lo, hi] = crc16(address, data).to_le_bytes();
    buf[data_end] = lo;
    buf[data_end + 1] = hi;

    Whitening::new(0x25).apply(&mut buf);
    Whitening::new(0x3F).apply(&mut buf[ADDRESS_OFFSET..]);

    let mut frame = [0u8; FRAME_LEN];
    frame.copy_from_slice(&buf[PREAMBLE_OFFSET..PREAMBLE_OFFSET + FRAME_LEN]);
    frame
}

/// CRC-16/CCITT (poly `0x1021`, init `0xFFFF`) over the address in reverse
/// order and the bit-reversed data, output reflected and inverted.
#[must_use]
pub fn crc16(address: &[u8], data: &[u8]) -> u16 {
    let bytes = address
        .iter()
        .rev()
        .copied()
        .chain(data.iter().map(|b| b.reverse_bits()));
    let mut crc: u16 = 0xFFFF;
    for byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 == 0 {
                crc << 1
            } else {
                (crc << 1) ^ 0x1021
            };
        }
    }
    !crc.reverse_bits()
}

/// 7-bit whitening LFSR.
#[derive(Debug, Clone, Copy)]
struct Whitening([u8; 7]);

impl Whitening {
    fn new(seed: u8) -> Self {
        Self([
            1,
            (seed >> 5) & 1,
            (seed >> 4) & 1,
            (seed >> 3) & 1,
            (seed >> 2) & 1,
            (seed >> 1) & 1,
            seed & 1,
        ])
    }

    /// Advance the register by one byte and return the mask for it.
    fn next_mask(&mut self) -> u8 {
        let [c0, c1, c2, c3, c4, c5, c6] = self.0;
        let x52 = c5 ^ c2;
        let x41 = c4 ^ c1;
        let x63 = c6 ^ c3;
        let x630 = x63 ^ c0;
        self.0 = [x52 ^ c6, x630, x41, x52, x52 ^ c3, x630 ^ c4, x41 ^ c5];
        ((x52 ^ c6) << 7)
            | (x630 << 6)
            | (x41 << 5)
            | (x52 << 4)
            | (x63 << 3)
            | (c4 << 2)
            | (c5 << 1)
            | c6
    }

    fn apply(mut self, bytes: &mut [u8]) {
        for byte in bytes {
            *byte ^= self.next_mask();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn should_encode_known_stop_frame() {
        assert_eq!(hex(&rf_frame(&ADDRESS, &[0])), "6db643ce97fe427ce5157d");
    }

    #[test]
    fn should_encode_frame_for_arbitrary_data() {
        assert_eq!(hex(&rf_frame(&ADDRESS, &[0x5A])), "6db643ce97fe427cbfca80");
    }

    #[test]
    fn should_compute_crc_over_address_and_data() {
        assert_eq!(crc16(&ADDRESS, &[0]), 0x8308);
    }

    #[test]
    fn should_build_full_payload_for_top_speed() {
        assert_eq!(hex(&level_payload(7)), "0201066db643ce97fe427ce60000");
    }

    #[test]
    fn should_only_vary_command_byte_between_levels() {
        for level in 0..=MAX_LEVEL {
            let payload = level_payload(level);
            assert_eq!(payload.len(), FLAGS.len() + FRAME_LEN);
            assert_eq!(hex(&payload[..11]), "0201066db643ce97fe427c");
            assert_eq!(payload[11], command_byte(level));
            assert_eq!(&payload[12..], &[0, 0]);
        }
    }

    #[test]
    fn should_saturate_levels_above_maximum() {
        assert_eq!(command_byte(3), 0xF6);
        assert_eq!(command_byte(42), 0xE6);
        assert_eq!(level_payload(42), level_payload(MAX_LEVEL));
    }
}
