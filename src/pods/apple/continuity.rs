//! Apple Continuity envelope decoding.
//!
//! Apple's manufacturer-specific advertisement data is a sequence of
//! `(type, length, data)` records. Only the record layout is handled here,
//! the meaning of each record type lives in the sub-protocol modules.

use std::fmt;

use log::debug;
use smallvec::SmallVec;
use thiserror::Error;

use crate::pods::nibble::hex_dump;

/// Company identifier assigned to Apple by the Bluetooth SIG.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// Size of the `(type, length)` header preceding every record.
const HEADER_LEN: usize = 2;

/// Payload bytes of a single record.
pub type Payload = SmallVec<[u8; 32]>;

/// Up to two records are stored inline, which covers nearly all accessories.
pub type Messages = SmallVec<[Message; 2]>;

/// Error type for advertisement decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
   /// Buffer ends before the record it announces
   #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
   PacketTooShort { expected: usize, actual: usize },
}

/// One continuity record.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
   pub kind: u8,
   pub length: usize,
   pub data: Payload,
}

impl fmt::Debug for Message {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(
         f,
         "ContinuityMessage(type={:#04x}, length={}, data={})",
         self.kind,
         self.length,
         hex_dump(&self.data)
      )
   }
}

/// Splits Apple manufacturer data into its continuity records.
///
/// An empty buffer yields no records. A record whose header or payload is cut
/// short fails the whole buffer, partial results are discarded.
pub fn decode(data: &[u8]) -> Result<Messages, ProtoError> {
   let mut messages = Messages::new();
   let mut rest = data;
   let mut offset = 0;

   while !rest.is_empty() {
      let Some((&[kind, length], tail)) = rest.split_first_chunk::<HEADER_LEN>() else {
         return Err(ProtoError::PacketTooShort {
            expected: offset + HEADER_LEN,
            actual: data.len(),
         });
      };
      let length = usize::from(length);
      if tail.len() < length {
         return Err(ProtoError::PacketTooShort {
            expected: offset + HEADER_LEN + length,
            actual: data.len(),
         });
      }

      let (payload, tail) = tail.split_at(length);
      messages.push(Message {
         kind,
         length,
         data: Payload::from_slice(payload),
      });
      offset += HEADER_LEN + length;
      rest = tail;
   }

   debug!("Decoded {} continuity message(s) from {} bytes", messages.len(), data.len());
   Ok(messages)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_single_record() {
      let data = [0x07, 0x03, 0xaa, 0xbb, 0xcc];
      let messages = decode(&data).unwrap();
      assert_eq!(messages.len(), 1);
      assert_eq!(messages[0].kind, 0x07);
      assert_eq!(messages[0].length, 3);
      assert_eq!(messages[0].data.as_slice(), &[0xaa, 0xbb, 0xcc]);
   }

   #[test]
   fn test_multiple_records_keep_order() {
      let data = [0x10, 0x01, 0x01, 0x07, 0x02, 0x05, 0x06, 0x0c, 0x00];
      let messages = decode(&data).unwrap();
      let kinds: Vec<_> = messages.iter().map(|m| m.kind).collect();
      assert_eq!(kinds, vec![0x10, 0x07, 0x0c]);
      assert!(messages[2].data.is_empty());
   }

   #[test]
   fn test_empty_buffer() {
      assert!(decode(&[]).unwrap().is_empty());
   }

   #[test]
   fn test_truncated_payload() {
      let err = decode(&[0x07, 0x19, 0x01, 0x02]).unwrap_err();
      assert_eq!(
         err,
         ProtoError::PacketTooShort {
            expected: 27,
            actual: 4
         }
      );
   }

   #[test]
   fn test_truncated_header() {
      let err = decode(&[0x07, 0x01, 0xff, 0x07]).unwrap_err();
      assert_eq!(
         err,
         ProtoError::PacketTooShort {
            expected: 5,
            actual: 4
         }
      );
   }
}
