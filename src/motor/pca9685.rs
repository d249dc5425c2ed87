//! PCA9685 PWM-expander backend.
//!
//! Two chained 16-channel expanders on one I2C bus drive all 18 hobby servos.
//! There is no addressing beyond the channel index and no read-back: `read`
//! is always `None`. Hobby servos also ignore move durations.

use embedded_hal::i2c::I2c;
use pwm_pca9685::{Address, Channel, Pca9685};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::port::{ActuatorPort, PortError};
use crate::leg::{JointId, LegId, PerJoint, PerLeg};

/// Default I2C addresses of the two expanders
pub const DEFAULT_ADDRESSES: [u8; 2] = [0x40, 0x41];

/// 25 MHz / (4096 * 50 Hz) - 1
const PRESCALE_50HZ: u8 = 121;

/// One PWM period at 50 Hz
const PERIOD_US: u32 = 20_000;

/// Counter resolution
const TICKS: u32 = 4096;

const CHANNELS: [Channel; 16] = [
    Channel::C0,
    Channel::C1,
    Channel::C2,
    Channel::C3,
    Channel::C4,
    Channel::C5,
    Channel::C6,
    Channel::C7,
    Channel::C8,
    Channel::C9,
    Channel::C10,
    Channel::C11,
    Channel::C12,
    Channel::C13,
    Channel::C14,
    Channel::C15,
];

/// Where a joint's servo is wired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmChannel {
    /// 0 = first expander, 1 = second
    pub chip: u8,
    /// 0-15
    pub channel: u8,
}

impl PwmChannel {
    pub const fn new(chip: u8, channel: u8) -> Self {
        Self { chip, channel }
    }
}

/// Default wiring: L1-L3 and R1 on chip 0 (channels 0-11), R2-R3 on chip 1 (0-5)
pub fn default_channels() -> PerLeg<PerJoint<PwmChannel>> {
    PerLeg::from_fn(|leg| {
        PerJoint::from_fn(|joint| {
            let slot = (leg.index() * 3 + joint.index()) as u8;
            if slot < 12 {
                PwmChannel::new(0, slot)
            } else {
                PwmChannel::new(1, slot - 12)
            }
        })
    })
}

/// Pulse width (us) to PCA9685 off-tick at 50 Hz
pub fn pulse_to_ticks(pulse_us: u16) -> u16 {
    let ticks = u32::from(pulse_us) * TICKS / PERIOD_US;
    ticks.min(TICKS - 1) as u16
}

/// One 16-channel PWM expander
pub trait PwmExpander {
    fn set_pulse_us(&mut self, channel: u8, pulse_us: u16) -> Result<(), PortError>;

    /// Output fully off: the servo goes limp
    fn set_off(&mut self, channel: u8) -> Result<(), PortError>;
}

fn channel(chip: u8, channel: u8) -> Result<Channel, PortError> {
    CHANNELS
        .get(usize::from(channel))
        .copied()
        .ok_or(PortError::InvalidChannel { chip, channel })
}

/// A configured PCA9685 together with its position on the chain
pub struct Expander<I2C> {
    chip: u8,
    pwm: Pca9685<I2C>,
}

impl<I2C, E> Expander<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Bring up one expander at 50 Hz
    pub fn new(i2c: I2C, chip: u8, address: u8) -> Result<Self, PortError> {
        info!("Configuring PCA9685 #{} at 0x{:02X}", chip, address);
        let pwm_err = |e: pwm_pca9685::Error<E>| PortError::Pwm {
            chip,
            reason: format!("{:?}", e),
        };

        let mut pwm = Pca9685::new(i2c, Address::from(address)).map_err(pwm_err)?;
        pwm.set_prescale(PRESCALE_50HZ).map_err(pwm_err)?;
        pwm.enable().map_err(pwm_err)?;

        Ok(Self { chip, pwm })
    }
}

impl<I2C, E> PwmExpander for Expander<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    fn set_pulse_us(&mut self, ch: u8, pulse_us: u16) -> Result<(), PortError> {
        let target = channel(self.chip, ch)?;
        self.pwm
            .set_channel_on_off(target, 0, pulse_to_ticks(pulse_us))
            .map_err(|e| PortError::Pwm {
                chip: self.chip,
                reason: format!("{:?}", e),
            })
    }

    fn set_off(&mut self, ch: u8) -> Result<(), PortError> {
        let target = channel(self.chip, ch)?;
        self.pwm.set_channel_full_off(target).map_err(|e| PortError::Pwm {
            chip: self.chip,
            reason: format!("{:?}", e),
        })
    }
}

/// Servos on two chained PWM expanders
pub struct PwmServoBus<X> {
    chips: [X; 2],
    channels: PerLeg<PerJoint<PwmChannel>>,
    staged: Vec<(LegId, JointId, u16)>,
    last_pulse: PerLeg<PerJoint<Option<u16>>>,
}

impl<X: PwmExpander> PwmServoBus<X> {
    pub fn new(chips: [X; 2], channels: PerLeg<PerJoint<PwmChannel>>) -> Self {
        Self {
            chips,
            channels,
            staged: Vec::with_capacity(18),
            last_pulse: PerLeg::default(),
        }
    }

    pub fn chips(&self) -> &[X; 2] {
        &self.chips
    }

    fn apply(&mut self, leg: LegId, joint: JointId, pulse_us: u16) -> Result<(), PortError> {
        let wiring = self.channels[leg][joint];
        let chip = self
            .chips
            .get_mut(usize::from(wiring.chip))
            .ok_or(PortError::InvalidChannel {
                chip: wiring.chip,
                channel: wiring.channel,
            })?;
        chip.set_pulse_us(wiring.channel, pulse_us)?;
        self.last_pulse[leg][joint] = Some(pulse_us);
        Ok(())
    }
}

impl<X: PwmExpander> ActuatorPort for PwmServoBus<X> {
    fn write(&mut self, leg: LegId, joint: JointId, signal: u16, duration_ms: u16) -> Result<(), PortError> {
        trace!("PWM {} {} -> {}us (duration {}ms ignored)", leg, joint, signal, duration_ms);
        self.apply(leg, joint, signal)
    }

    fn prepare(&mut self, leg: LegId, joint: JointId, signal: u16, _duration_ms: u16) -> Result<(), PortError> {
        self.staged.push((leg, joint, signal));
        Ok(())
    }

    /// No hardware broadcast here: all staged pulses go out back-to-back
    fn commit_broadcast(&mut self) -> Result<(), PortError> {
        let staged = std::mem::take(&mut self.staged);
        debug!("PWM commit: {} channels", staged.len());
        for (leg, joint, pulse) in staged {
            self.apply(leg, joint, pulse)?;
        }
        Ok(())
    }

    fn discard_staged(&mut self) -> Result<(), PortError> {
        debug!("PWM discard: {} channels", self.staged.len());
        self.staged.clear();
        Ok(())
    }

    fn read(&mut self, _leg: LegId, _joint: JointId) -> Option<u16> {
        None
    }

    /// Re-drive the last pulse; a servo that never got one stays off
    fn enable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        match self.last_pulse[leg][joint] {
            Some(pulse) => self.apply(leg, joint, pulse),
            None => Ok(()),
        }
    }

    fn disable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        let wiring = self.channels[leg][joint];
        match self.chips.get_mut(usize::from(wiring.chip)) {
            Some(chip) => chip.set_off(wiring.channel),
            None => Err(PortError::InvalidChannel {
                chip: wiring.chip,
                channel: wiring.channel,
            }),
        }
    }
}
