use crate::types::SensorFrame;
use byteorder::{ByteOrder, LittleEndian};

/// Binary protocol from the glove MCU:
///
/// | Offset | Size | Field                          |
/// |--------|------|--------------------------------|
/// | 0      | 2    | sync marker `0xAA 0x55`        |
/// | 0      | 40   | 10 × u32 LE sensor channels    |
///
/// The ten fields are decoded starting *at* the marker offset, so field 0
/// overlaps the sync bytes and is reserved. Only the five finger channels
/// (indices 1, 3, 4, 5, 6) carry flex-sensor readings.
pub const FRAME_BYTES: usize = 40;
pub const FRAME_FIELDS: usize = 10;
pub const SYNC: [u8; 2] = [0xAA, 0x55];

/// Locate the sync marker inside a raw read buffer.
pub fn find_sync(buf: &[u8]) -> Option<usize> {
    (0..buf.len().saturating_sub(1)).find(|&i| buf[i] == SYNC[0] && buf[i + 1] == SYNC[1])
}

/// Extract one frame from a raw read buffer.
///
/// Returns `None` if the marker is absent or fewer than `FRAME_BYTES`
/// remain after it — never an error. Leftover bytes are intentionally not
/// carried into the next call: each poll-tick buffer stands alone.
pub fn decode(buf: &[u8]) -> Option<SensorFrame> {
    let start = find_sync(buf)?;
    if buf.len() < start + FRAME_BYTES {
        return None;
    }
    let mut fields = [0u32; FRAME_FIELDS];
    LittleEndian::read_u32_into(&buf[start..start + FRAME_BYTES], &mut fields);
    Some(SensorFrame { fields })
}

/// Build the wire form of a frame. Field 0's low half is forced to the sync
/// marker, matching what the firmware emits. Used by the simulator and tests.
pub fn encode(fields: &[u32; FRAME_FIELDS]) -> Vec<u8> {
    let mut fields = *fields;
    fields[0] = (fields[0] & 0xFFFF_0000) | u32::from(SYNC[1]) << 8 | u32::from(SYNC[0]);
    let mut buf = vec![0u8; FRAME_BYTES];
    LittleEndian::write_u32_into(&fields, &mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Finger;

    fn fields_with(finger: Finger, value: u32) -> [u32; FRAME_FIELDS] {
        let mut fields = [500_000u32; FRAME_FIELDS];
        fields[finger.channel()] = value;
        fields
    }

    #[test]
    fn test_find_sync_at_start() {
        let buf = [0xAA, 0x55, 0x01, 0x02];
        assert_eq!(find_sync(&buf), Some(0));
    }

    #[test]
    fn test_find_sync_with_garbage_prefix() {
        let buf = [0x00, 0x11, 0x22, 0xAA, 0x55, 0x00];
        assert_eq!(find_sync(&buf), Some(3));
    }

    #[test]
    fn test_find_sync_not_found() {
        assert_eq!(find_sync(&[0x00, 0x01, 0x02]), None);
        assert_eq!(find_sync(&[]), None);
        // 0xAA at the last byte can't be confirmed
        assert_eq!(find_sync(&[0x00, 0xAA]), None);
    }

    #[test]
    fn test_decode_roundtrip() {
        let fields = fields_with(Finger::Index, 412_345);
        let wire = encode(&fields);
        assert_eq!(wire.len(), FRAME_BYTES);
        let frame = decode(&wire).expect("frame");
        assert_eq!(frame.value(Finger::Index), 412_345);
        assert_eq!(frame.value(Finger::Thumb), 500_000);
    }

    #[test]
    fn test_decode_invariant_to_leading_garbage() {
        let fields = fields_with(Finger::Pinky, 333_333);
        let clean = decode(&encode(&fields)).unwrap();

        let mut wire = vec![0xDE, 0xAD, 0xBE, 0x00, 0x13];
        wire.extend_from_slice(&encode(&fields));
        let dirty = decode(&wire).unwrap();
        assert_eq!(clean, dirty);
    }

    #[test]
    fn test_decode_truncated_frame_yields_none() {
        let wire = encode(&fields_with(Finger::Thumb, 1));
        assert!(decode(&wire[..FRAME_BYTES - 1]).is_none());
    }

    #[test]
    fn test_decode_marker_too_late_yields_none() {
        // Marker present but fewer than 40 bytes remain after it
        let mut buf = vec![0u8; 30];
        buf.extend_from_slice(&[0xAA, 0x55]);
        buf.extend_from_slice(&[0u8; 20]);
        assert!(decode(&buf).is_none());
    }

    #[test]
    fn test_decode_empty_and_short_buffers() {
        assert!(decode(&[]).is_none());
        assert!(decode(&[0xAA]).is_none());
        assert!(decode(&[0xAA, 0x55]).is_none());
    }

    #[test]
    fn test_little_endian_field_order() {
        // Hand-build a frame: field 1 = 0x04030201
        let mut wire = vec![0u8; FRAME_BYTES];
        wire[0] = 0xAA;
        wire[1] = 0x55;
        wire[4] = 0x01;
        wire[5] = 0x02;
        wire[6] = 0x03;
        wire[7] = 0x04;
        let frame = decode(&wire).unwrap();
        assert_eq!(frame.fields[1], 0x0403_0201);
    }
}
