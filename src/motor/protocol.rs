// LewanSoul / Hiwonder LX-16A serial bus protocol
//
// Packet format: [0x55, 0x55, ID, Length, Command, Params..., Checksum]
// Length   = params + 3 (counts the length byte, command and checksum)
// Checksum = !(ID + Length + Command + Params) & 0xFF
//
// Pure encode/decode, no I/O. The serial backend owns the port.

use std::fmt;

/// Packet header bytes
pub const HEADER: [u8; 2] = [0x55, 0x55];

/// Every servo on the bus listens to this id
pub const BROADCAST_ID: u8 = 254;

/// Length byte overhead on top of the parameter count
const LENGTH_OVERHEAD: usize = 3;

/// Largest parameter block that still fits the one-byte length field
pub const MAX_PARAMS: usize = u8::MAX as usize - LENGTH_OVERHEAD;

/// Servo position range (maps to 0-240°)
pub const MAX_POSITION: u16 = 1000;

/// Longest move time the servo accepts
pub const MAX_MOVE_TIME_MS: u16 = 30_000;

/// Command set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    MoveTimeWrite = 1,
    MoveTimeRead = 2,
    MoveTimeWaitWrite = 7,
    MoveStart = 11,
    MoveStop = 12,
    IdWrite = 13,
    IdRead = 14,
    AngleOffsetAdjust = 17,
    AngleOffsetWrite = 18,
    AngleLimitWrite = 20,
    TempRead = 26,
    VinRead = 27,
    PosRead = 28,
    LoadOrUnloadWrite = 31,
    LedCtrlWrite = 33,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        let command = match code {
            1 => Command::MoveTimeWrite,
            2 => Command::MoveTimeRead,
            7 => Command::MoveTimeWaitWrite,
            11 => Command::MoveStart,
            12 => Command::MoveStop,
            13 => Command::IdWrite,
            14 => Command::IdRead,
            17 => Command::AngleOffsetAdjust,
            18 => Command::AngleOffsetWrite,
            20 => Command::AngleLimitWrite,
            26 => Command::TempRead,
            27 => Command::VinRead,
            28 => Command::PosRead,
            31 => Command::LoadOrUnloadWrite,
            33 => Command::LedCtrlWrite,
            other => return Err(other),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{len} parameter bytes exceed the {max}-byte frame limit")]
    ParamsTooLong { len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Checksum mismatch for servo {id}: expected 0x{expected:02X}, got 0x{received:02X}")]
    ChecksumMismatch { id: u8, expected: u8, received: u8 },

    #[error("Incomplete frame: expected {expected} bytes, got {received}")]
    Incomplete { expected: usize, received: usize },

    #[error("Invalid length byte {length}")]
    InvalidLength { length: u8 },
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u8,
    pub command: u8,
    pub params: Vec<u8>,
}

impl Frame {
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }

    /// Little-endian u16 parameter at `offset`
    pub fn param_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.params.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Little-endian i16 parameter at `offset` (positions go negative past the end stop)
    pub fn param_i16(&self, offset: usize) -> Option<i16> {
        self.param_u16(offset).map(|raw| raw as i16)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id={} cmd={} params={:02X?}", self.id, self.command, self.params)
    }
}

/// Calculate checksum over id, length, command and params
pub fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
    (!sum & 0xFF) as u8
}

/// Build a packet with header and checksum
pub fn encode(id: u8, command: Command, params: &[u8]) -> Result<Vec<u8>, EncodeError> {
    encode_raw(id, command as u8, params)
}

/// Like [`encode`] but with a raw command byte
pub fn encode_raw(id: u8, command: u8, params: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if params.len() > MAX_PARAMS {
        return Err(EncodeError::ParamsTooLong {
            len: params.len(),
            max: MAX_PARAMS,
        });
    }

    let length = (params.len() + LENGTH_OVERHEAD) as u8;
    let mut packet = Vec::with_capacity(6 + params.len());

    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push(length);
    packet.push(command);
    packet.extend_from_slice(params);

    // Checksum over id, length, command, params
    let sum = checksum(&packet[2..]);
    packet.push(sum);

    Ok(packet)
}

/// Parameter block for MoveTimeWrite / MoveTimeWaitWrite
pub fn move_params(position: u16, time_ms: u16) -> [u8; 4] {
    let position = position.min(MAX_POSITION).to_le_bytes();
    let time = time_ms.min(MAX_MOVE_TIME_MS).to_le_bytes();
    [position[0], position[1], time[0], time[1]]
}

/// Decode the first frame found in `bytes`.
///
/// Leading garbage before the header is skipped. Returns the frame and the
/// number of bytes consumed (up to and including its checksum).
pub fn decode(bytes: &[u8]) -> Result<(Frame, usize), DecodeError> {
    let Some(start) = find_header(bytes) else {
        return Err(DecodeError::Incomplete {
            expected: HEADER.len() + 2,
            received: 0,
        });
    };
    let frame = &bytes[start..];

    if frame.len() < 4 {
        return Err(DecodeError::Incomplete {
            expected: 4,
            received: frame.len(),
        });
    }

    let id = frame[2];
    let length = frame[3];
    if (length as usize) < LENGTH_OVERHEAD {
        return Err(DecodeError::InvalidLength { length });
    }

    // Header (2) + id (1) + length-counted bytes
    let total = HEADER.len() + 1 + length as usize;
    if frame.len() < total {
        return Err(DecodeError::Incomplete {
            expected: total,
            received: frame.len(),
        });
    }

    let expected = checksum(&frame[2..total - 1]);
    let received = frame[total - 1];
    if expected != received {
        return Err(DecodeError::ChecksumMismatch { id, expected, received });
    }

    let decoded = Frame {
        id,
        command: frame[4],
        params: frame[5..total - 1].to_vec(),
    };
    Ok((decoded, start + total))
}

fn find_header(bytes: &[u8]) -> Option<usize> {
    bytes.windows(HEADER.len()).position(|w| w == HEADER)
}

/// Streaming decoder for a byte stream.
///
/// Bytes are pushed as they arrive; complete frames are pulled out. A bad
/// frame only costs its header pair: the scan resumes right after it.
#[derive(Debug, Default)]
pub struct FrameScanner {
    buf: Vec<u8>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next frame, a decode failure, or `None` if more bytes are needed
    pub fn next_frame(&mut self) -> Option<Result<Frame, DecodeError>> {
        match decode(&self.buf) {
            Ok((frame, consumed)) => {
                self.buf.drain(..consumed);
                Some(Ok(frame))
            }
            Err(DecodeError::Incomplete { .. }) => {
                self.discard_garbage();
                None
            }
            Err(e) => {
                // Drop everything up to and including the bad header, rescan later
                if let Some(start) = find_header(&self.buf) {
                    self.buf.drain(..start + HEADER.len());
                }
                Some(Err(e))
            }
        }
    }

    /// Caller gave up waiting: report a partial frame, if any, and reset
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        let result = match decode(&self.buf) {
            Err(e @ DecodeError::Incomplete { received, .. }) if received > 0 => Err(e),
            _ => Ok(()),
        };
        self.buf.clear();
        result
    }

    // Keep only bytes that could still start a frame
    fn discard_garbage(&mut self) {
        match find_header(&self.buf) {
            Some(start) => {
                self.buf.drain(..start);
            }
            None => {
                let keep = usize::from(self.buf.last() == Some(&HEADER[0]));
                let drop = self.buf.len() - keep;
                self.buf.drain(..drop);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ID=1, Length=7, MoveTimeWrite, position=500, time=1000
        let data = [1u8, 7, 1, 0xF4, 0x01, 0xE8, 0x03];
        // ~(1+7+1+244+1+232+3) = ~489 = ~0xE9 (low byte) = 0x16
        assert_eq!(checksum(&data), 0x16);
    }

    #[test]
    fn test_build_move_start_broadcast() {
        let packet = encode(BROADCAST_ID, Command::MoveStart, &[]).unwrap();
        // Header (2) + ID (1) + Length (1) + Command (1) + Checksum (1) = 6 bytes
        assert_eq!(packet, vec![0x55, 0x55, 0xFE, 0x03, 0x0B, 0xF3]);
    }

    #[test]
    fn test_round_trip_all_param_lengths() {
        for len in [0usize, 1, 4, 7, 32, MAX_PARAMS] {
            let params: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            let packet = encode(12, Command::MoveTimeWrite, &params).unwrap();
            let (frame, consumed) = decode(&packet).unwrap();
            assert_eq!(consumed, packet.len());
            assert_eq!(frame.id, 12);
            assert_eq!(frame.command(), Some(Command::MoveTimeWrite));
            assert_eq!(frame.params, params);
        }
    }

    #[test]
    fn test_oversized_params_rejected() {
        let params = vec![0u8; MAX_PARAMS + 1];
        assert_eq!(
            encode(1, Command::MoveTimeWrite, &params),
            Err(EncodeError::ParamsTooLong { len: MAX_PARAMS + 1, max: MAX_PARAMS })
        );
    }

    #[test]
    fn test_single_byte_corruption_detected() {
        let packet = encode(7, Command::MoveTimeWaitWrite, &move_params(640, 250)).unwrap();
        for idx in 0..packet.len() {
            for mask in 1..=u8::MAX {
                let mut corrupted = packet.clone();
                corrupted[idx] ^= mask;
                let result = decode(&corrupted);
                match idx {
                    // Broken header: no frame start found
                    0 | 1 => assert!(
                        matches!(result, Err(DecodeError::Incomplete { .. })),
                        "header byte {} ^ {:#04x}: {:?}",
                        idx,
                        mask,
                        result
                    ),
                    // Length changes how many bytes are read, not just their sum
                    3 => assert!(
                        matches!(
                            result,
                            Err(DecodeError::InvalidLength { .. }
                                | DecodeError::Incomplete { .. }
                                | DecodeError::ChecksumMismatch { .. })
                        ),
                        "length byte ^ {:#04x}: {:?}",
                        mask,
                        result
                    ),
                    _ => assert!(
                        matches!(result, Err(DecodeError::ChecksumMismatch { .. })),
                        "byte {} ^ {:#04x} not detected: {:?}",
                        idx,
                        mask,
                        result
                    ),
                }
            }
        }
    }

    #[test]
    fn test_truncated_frame_is_incomplete() {
        let packet = encode(3, Command::PosRead, &[0xF4, 0x01]).unwrap();
        let result = decode(&packet[..packet.len() - 1]);
        assert_eq!(
            result,
            Err(DecodeError::Incomplete { expected: packet.len(), received: packet.len() - 1 })
        );
    }

    #[test]
    fn test_decode_skips_leading_garbage() {
        let mut stream = vec![0x00, 0x55, 0x13];
        let packet = encode(5, Command::VinRead, &[0x10, 0x2C]).unwrap();
        stream.extend_from_slice(&packet);
        let (frame, consumed) = decode(&stream).unwrap();
        assert_eq!(consumed, stream.len());
        assert_eq!(frame.param_u16(0), Some(0x2C10));
    }

    #[test]
    fn test_scanner_resyncs_after_bad_frame() {
        let mut bad = encode(1, Command::PosRead, &[0x00, 0x02]).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = encode(2, Command::PosRead, &[0x2C, 0x01]).unwrap();

        let mut scanner = FrameScanner::new();
        scanner.push(&bad);
        scanner.push(&good);

        assert!(matches!(scanner.next_frame(), Some(Err(DecodeError::ChecksumMismatch { id: 1, .. }))));
        let frame = scanner.next_frame().unwrap().unwrap();
        assert_eq!(frame.id, 2);
        assert_eq!(frame.param_u16(0), Some(300));
        assert!(scanner.next_frame().is_none());
    }

    #[test]
    fn test_scanner_waits_for_split_frame() {
        let packet = encode(9, Command::TempRead, &[41]).unwrap();
        let mut scanner = FrameScanner::new();

        scanner.push(&packet[..4]);
        assert!(scanner.next_frame().is_none());
        scanner.push(&packet[4..]);
        let frame = scanner.next_frame().unwrap().unwrap();
        assert_eq!(frame.params, vec![41]);
    }

    #[test]
    fn test_scanner_finish_reports_partial_frame() {
        let packet = encode(9, Command::PosRead, &[0x10, 0x00]).unwrap();
        let mut scanner = FrameScanner::new();
        scanner.push(&packet[..5]);
        assert!(scanner.next_frame().is_none());
        assert!(matches!(scanner.finish(), Err(DecodeError::Incomplete { .. })));
        assert_eq!(scanner.buffered(), 0);

        // Nothing buffered is not an incomplete frame
        assert_eq!(scanner.finish(), Ok(()));
    }

    #[test]
    fn test_move_params_clamped() {
        assert_eq!(move_params(1500, 40_000), [0xE8, 0x03, 0x30, 0x75]);
    }
}
