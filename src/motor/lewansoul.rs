// LX-16A serial bus backend
//
// One half-duplex multidrop line, explicit per-servo addressing.
// Our own request is echoed back on the line; response matching skips it
// because a request frame never carries the parameters a response does.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, info, trace, warn};

use super::port::{ActuatorPort, PortError};
use super::protocol::{self, BROADCAST_ID, Command, DecodeError, Frame, FrameScanner};
use crate::leg::{JointId, LegId, PerJoint, PerLeg};

/// Default serial configuration for LX-16A servos
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Shorter deadline while scanning the whole id range
pub const SCAN_TIMEOUT_MS: u64 = 50;

/// Servo ids 1-18: L1 coxa/femur/tibia = 1/2/3 ... R3 = 16/17/18
pub fn default_servo_ids() -> PerLeg<PerJoint<u8>> {
    PerLeg::from_fn(|leg| PerJoint::from_fn(|joint| (leg.index() * 3 + joint.index() + 1) as u8))
}

/// LX-16A bus
pub struct LewansoulBus<T = Box<dyn SerialPort>> {
    io: T,
    ids: PerLeg<PerJoint<u8>>,
    scanner: FrameScanner,
    timeout: Duration,
    /// Ids holding a MoveTimeWaitWrite since the last MoveStart
    staged: Vec<u8>,
}

impl LewansoulBus {
    /// Open a new connection to the servo bus
    pub fn open(port_name: &str, ids: PerLeg<PerJoint<u8>>) -> Result<Self, PortError> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE, ids)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(
        port_name: &str,
        baudrate: u32,
        ids: PerLeg<PerJoint<u8>>,
    ) -> Result<Self, PortError> {
        info!("Opening LX-16A bus on {} @ {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        port.clear(serialport::ClearBuffer::All)?;

        Ok(Self::new(port, ids))
    }
}

impl<T: Read + Write> LewansoulBus<T> {
    pub fn new(io: T, ids: PerLeg<PerJoint<u8>>) -> Self {
        Self {
            io,
            ids,
            scanner: FrameScanner::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            staged: Vec::with_capacity(18),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn servo_id(&self, leg: LegId, joint: JointId) -> u8 {
        self.ids[leg][joint]
    }

    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }

    fn send(&mut self, id: u8, command: Command, params: &[u8]) -> Result<(), PortError> {
        let packet = protocol::encode(id, command, params)?;
        trace!("TX {:02X?}", packet);
        self.io.write_all(&packet)?;
        self.io.flush()?;
        Ok(())
    }

    /// Send a read command and wait for the matching response.
    ///
    /// `None` covers every flavor of "no usable answer": silence, a partial
    /// frame at the deadline, or only corrupted frames.
    fn query(&mut self, id: u8, command: Command) -> Option<Frame> {
        self.scanner.clear();
        if let Err(e) = self.send(id, command, &[]) {
            debug!("Query {:?} to servo {} not sent: {}", command, id, e);
            return None;
        }

        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 32];

        while Instant::now() < deadline {
            while let Some(result) = self.scanner.next_frame() {
                match result {
                    Ok(frame) if is_response(&frame, id, command) => return Some(frame),
                    Ok(frame) => trace!("Skipping frame {}", frame),
                    Err(e) => debug!("Dropped frame from servo {}: {}", id, e),
                }
            }

            match self.io.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.scanner.push(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
                Err(e) => {
                    debug!("Read from servo {} failed: {}", id, e);
                    break;
                }
            }
        }

        // Drain whatever complete frames made it in before giving up
        while let Some(result) = self.scanner.next_frame() {
            if let Ok(frame) = result {
                if is_response(&frame, id, command) {
                    return Some(frame);
                }
            }
        }

        match self.scanner.finish() {
            Err(e @ DecodeError::Incomplete { .. }) => debug!("Servo {}: {}", id, e),
            _ => debug!("No response from servo {} to {:?}", id, command),
        }
        None
    }

    /// Move a servo by id
    pub fn move_servo(&mut self, id: u8, position: u16, time_ms: u16) -> Result<(), PortError> {
        debug!("Move servo {}: pos={}, time={}ms", id, position, time_ms);
        self.send(id, Command::MoveTimeWrite, &protocol::move_params(position, time_ms))
    }

    /// Stage a move; nothing happens until MoveStart
    pub fn move_prepare(&mut self, id: u8, position: u16, time_ms: u16) -> Result<(), PortError> {
        debug!("Prepare servo {}: pos={}, time={}ms", id, position, time_ms);
        self.send(id, Command::MoveTimeWaitWrite, &protocol::move_params(position, time_ms))?;
        if !self.staged.contains(&id) {
            self.staged.push(id);
        }
        Ok(())
    }

    /// Start staged moves on every servo at once
    pub fn move_start(&mut self) -> Result<(), PortError> {
        self.send(BROADCAST_ID, Command::MoveStart, &[])?;
        self.staged.clear();
        Ok(())
    }

    /// Overwrite staged moves with "stay where you are".
    ///
    /// The servo has no command to drop a MoveTimeWaitWrite, so each staged id
    /// is re-staged at its present position. A servo that does not answer
    /// keeps its stale target.
    pub fn unstage(&mut self) -> Result<(), PortError> {
        let staged = std::mem::take(&mut self.staged);
        for id in staged {
            match self.read_position(id) {
                Some(pos) => {
                    let hold = pos.clamp(0, protocol::MAX_POSITION as i16) as u16;
                    self.send(id, Command::MoveTimeWaitWrite, &protocol::move_params(hold, 0))?;
                }
                None => warn!("Servo {} did not answer, its staged move stays pending", id),
            }
        }
        Ok(())
    }

    /// Stop a servo where it is
    pub fn stop(&mut self, id: u8) -> Result<(), PortError> {
        self.send(id, Command::MoveStop, &[])
    }

    pub fn set_torque(&mut self, id: u8, enabled: bool) -> Result<(), PortError> {
        self.send(id, Command::LoadOrUnloadWrite, &[u8::from(enabled)])
    }

    /// Angle limits in position units (0-1000)
    pub fn set_angle_limits(&mut self, id: u8, min_pos: u16, max_pos: u16) -> Result<(), PortError> {
        let min = min_pos.min(protocol::MAX_POSITION).to_le_bytes();
        let max = max_pos.min(protocol::MAX_POSITION).to_le_bytes();
        self.send(id, Command::AngleLimitWrite, &[min[0], min[1], max[0], max[1]])
    }

    /// Trim in position units (-125..=125), lost on power cycle
    pub fn set_angle_offset(&mut self, id: u8, offset: i8) -> Result<(), PortError> {
        let offset = offset.clamp(-125, 125);
        self.send(id, Command::AngleOffsetAdjust, &offset.to_le_bytes())
    }

    /// Persist the current trim to EEPROM
    pub fn save_angle_offset(&mut self, id: u8) -> Result<(), PortError> {
        self.send(id, Command::AngleOffsetWrite, &[])
    }

    /// Readdress a servo (ids 0-253)
    pub fn set_id(&mut self, old_id: u8, new_id: u8) -> Result<(), PortError> {
        info!("Changing servo id {} -> {}", old_id, new_id);
        self.send(old_id, Command::IdWrite, &[new_id.min(BROADCAST_ID - 1)])
    }

    /// Id of the servo answering at `id`; use the broadcast id with one servo on the bus
    pub fn read_id(&mut self, id: u8) -> Option<u8> {
        self.query(id, Command::IdRead)?.params.first().copied()
    }

    /// Last commanded target and move time
    pub fn read_move_target(&mut self, id: u8) -> Option<(u16, u16)> {
        let frame = self.query(id, Command::MoveTimeRead)?;
        Some((frame.param_u16(0)?, frame.param_u16(2)?))
    }

    pub fn set_led(&mut self, id: u8, on: bool) -> Result<(), PortError> {
        // 0 = on, 1 = off
        self.send(id, Command::LedCtrlWrite, &[u8::from(!on)])
    }

    /// Present position; negative past the end stop
    pub fn read_position(&mut self, id: u8) -> Option<i16> {
        self.query(id, Command::PosRead)?.param_i16(0)
    }

    /// Input voltage in volts
    pub fn read_voltage(&mut self, id: u8) -> Option<f32> {
        let millivolts = self.query(id, Command::VinRead)?.param_u16(0)?;
        Some(f32::from(millivolts) / 1000.0)
    }

    /// Input voltage of every configured servo
    pub fn read_all_voltages(&mut self) -> PerLeg<PerJoint<Option<f32>>> {
        let ids = self.ids;
        PerLeg::from_fn(|leg| PerJoint::from_fn(|joint| self.read_voltage(ids[leg][joint])))
    }

    /// Temperature in °C
    pub fn read_temperature(&mut self, id: u8) -> Option<u8> {
        self.query(id, Command::TempRead)?.params.first().copied()
    }

    /// Ids in `ids` that answer a position read
    pub fn scan(&mut self, ids: impl IntoIterator<Item = u8>) -> Vec<u8> {
        let saved = self.timeout;
        self.timeout = Duration::from_millis(SCAN_TIMEOUT_MS);

        let found: Vec<u8> = ids
            .into_iter()
            .filter(|&id| match self.read_position(id) {
                Some(pos) => {
                    info!("Found servo {} at position {}", id, pos);
                    true
                }
                None => false,
            })
            .collect();

        self.timeout = saved;
        found
    }
}

fn is_response(frame: &Frame, id: u8, command: Command) -> bool {
    (id == BROADCAST_ID || frame.id == id) && frame.command == command as u8 && !frame.params.is_empty()
}

impl<T: Read + Write> ActuatorPort for LewansoulBus<T> {
    fn write(&mut self, leg: LegId, joint: JointId, signal: u16, duration_ms: u16) -> Result<(), PortError> {
        self.move_servo(self.ids[leg][joint], signal, duration_ms)
    }

    fn prepare(&mut self, leg: LegId, joint: JointId, signal: u16, duration_ms: u16) -> Result<(), PortError> {
        self.move_prepare(self.ids[leg][joint], signal, duration_ms)
    }

    fn commit_broadcast(&mut self) -> Result<(), PortError> {
        self.move_start()
    }

    fn discard_staged(&mut self) -> Result<(), PortError> {
        self.unstage()
    }

    fn read(&mut self, leg: LegId, joint: JointId) -> Option<u16> {
        let position = self.read_position(self.ids[leg][joint])?;
        Some(position.clamp(0, protocol::MAX_POSITION as i16) as u16)
    }

    fn enable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        self.set_torque(self.ids[leg][joint], true)
    }

    fn disable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        self.set_torque(self.ids[leg][joint], false)
    }
}
