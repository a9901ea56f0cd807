use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};
use serde::{Deserialize, Serialize};

/// Feature bits negotiated between the capture target and the remote tool.
///
/// The client proposes a set in its `ConnectionHeaderPacket`, the server answers with the
/// intersection of that set and its own enabled flags.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureFlags(u32);

impl CaptureFlags {
    pub const NONE: Self = Self(0);
    pub const CPU_ZONES: Self = Self(1 << 0);
    pub const GPU_ZONES: Self = Self(1 << 1);
    pub const CPU_CLOCKS: Self = Self(1 << 2);
    pub const GPU_CLOCKS: Self = Self(1 << 3);
    pub const THERMAL_SENSORS: Self = Self(1 << 4);
    pub const FRAME_BUFFER: Self = Self(1 << 5);
    pub const LOGGING: Self = Self(1 << 6);

    pub const ALL: Self = Self(0x7f);

    /// Framebuffer capture is bandwidth heavy and stays opt-in.
    pub const DEFAULT: Self = Self(Self::ALL.0 & !Self::FRAME_BUFFER.0);

    /// Flags served by the standard sensors thread.
    pub const SENSORS: Self = Self(Self::CPU_CLOCKS.0 | Self::GPU_CLOCKS.0 | Self::THERMAL_SENSORS.0);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::CPU_ZONES, "CPU_ZONES"),
        (Self::GPU_ZONES, "GPU_ZONES"),
        (Self::CPU_CLOCKS, "CPU_CLOCKS"),
        (Self::GPU_CLOCKS, "GPU_CLOCKS"),
        (Self::THERMAL_SENSORS, "THERMAL_SENSORS"),
        (Self::FRAME_BUFFER, "FRAME_BUFFER"),
        (Self::LOGGING, "LOGGING"),
    ];

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Drops bits this build does not know about.
    #[must_use]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitAnd for CaptureFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for CaptureFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitOr for CaptureFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CaptureFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Not for CaptureFlags {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0 & Self::ALL.0)
    }
}

impl fmt::Debug for CaptureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("CaptureFlags(NONE)");
        }
        f.write_str("CaptureFlags(")?;
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unknown = self.0 & !Self::ALL.0;
        if unknown != 0 {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{unknown:#x}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_is_intersection() {
        let server = CaptureFlags::CPU_ZONES | CaptureFlags::GPU_ZONES;
        let client = CaptureFlags::GPU_ZONES | CaptureFlags::THERMAL_SENSORS;
        assert_eq!(server & client, CaptureFlags::GPU_ZONES);
    }

    #[test]
    fn default_excludes_frame_buffer() {
        assert!(!CaptureFlags::DEFAULT.contains(CaptureFlags::FRAME_BUFFER));
        assert!(CaptureFlags::DEFAULT.contains(CaptureFlags::CPU_ZONES | CaptureFlags::LOGGING));
    }

    #[test]
    fn sensors_mask() {
        assert!(CaptureFlags::THERMAL_SENSORS.intersects(CaptureFlags::SENSORS));
        assert!(!CaptureFlags::CPU_ZONES.intersects(CaptureFlags::SENSORS));
    }

    #[test]
    fn truncate_unknown_bits() {
        assert_eq!(CaptureFlags::from_bits_truncate(0xffff_ffff), CaptureFlags::ALL);
        assert!(CaptureFlags::from_bits_truncate(1 << 20).is_empty());
    }
}
