//! Bit and nibble helpers for advertisement payloads.

/// Upper four bits of `byte`.
pub const fn upper_nibble(byte: u8) -> u8 {
   (byte >> 4) & 0x0f
}

/// Lower four bits of `byte`.
pub const fn lower_nibble(byte: u8) -> u8 {
   byte & 0x0f
}

/// Whether bit `pos` (0 = least significant) of `byte` is set.
pub const fn is_bit_set(byte: u8, pos: u8) -> bool {
   byte & (1 << pos) != 0
}

/// Big-endian u16 from two bytes.
pub const fn be_u16(hi: u8, lo: u8) -> u16 {
   ((hi as u16) << 8) | lo as u16
}

/// Space separated, upper-case hex dump (`07 19 01`).
pub fn hex_dump(data: &[u8]) -> String {
   let encoded = hex::encode_upper(data);
   let mut out = String::with_capacity(data.len() * 3);
   for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
      if i > 0 {
         out.push(' ');
      }
      out.extend(pair.iter().map(|&b| b as char));
   }
   out
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_nibbles() {
      assert_eq!(upper_nibble(0xA7), 0x0A);
      assert_eq!(lower_nibble(0xA7), 0x07);
      assert_eq!(upper_nibble(0x0F), 0x00);
      assert_eq!(lower_nibble(0xF0), 0x00);
   }

   #[test]
   fn test_bits() {
      assert!(is_bit_set(0b0000_0010, 1));
      assert!(!is_bit_set(0b0000_0010, 0));
      assert!(is_bit_set(0x80, 7));
   }

   #[test]
   fn test_be_u16() {
      assert_eq!(be_u16(0x0E, 0x20), 0x0E20);
      assert_eq!(be_u16(0x00, 0xFF), 0x00FF);
   }

   #[test]
   fn test_hex_dump() {
      assert_eq!(hex_dump(&[0x07, 0x19, 0xab]), "07 19 AB");
      assert_eq!(hex_dump(&[]), "");
   }
}
