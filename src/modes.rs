//! Measurement modes and their stable textual names.

/// Physical quantity being measured by the multimeter.
///
/// The textual form (see [`MeasurementMode::as_str`]) is relied on by
/// downstream CSV/JSON consumers and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MeasurementMode {
    /// Not measuring.
    #[default]
    Idle = 0,
    /// DC voltage.
    DcVoltage = 1,
    /// AC voltage.
    AcVoltage = 2,
    /// DC current.
    DcCurrent = 3,
    /// AC current.
    AcCurrent = 4,
    /// Resistance.
    Resistance = 5,
    /// Diode test.
    Diode = 6,
    /// Continuity test.
    Continuity = 7,
    /// Internal temperature.
    Temperature = 8,
    /// Capacitance.
    Capacitance = 9,
    /// External (probe) temperature.
    ExternalTemperature = 10,
}

impl MeasurementMode {
    /// Every mode, in wire order.
    pub const ALL: [Self; 11] = [
        Self::Idle,
        Self::DcVoltage,
        Self::AcVoltage,
        Self::DcCurrent,
        Self::AcCurrent,
        Self::Resistance,
        Self::Diode,
        Self::Continuity,
        Self::Temperature,
        Self::Capacitance,
        Self::ExternalTemperature,
    ];

    /// Create a mode from a raw byte value.
    ///
    /// Returns `None` for values this crate does not know.
    pub fn from_raw(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// Stable human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::DcVoltage => "DC voltage",
            Self::AcVoltage => "AC voltage",
            Self::DcCurrent => "DC current",
            Self::AcCurrent => "AC current",
            Self::Resistance => "Resistance",
            Self::Diode => "Diode",
            Self::Continuity => "Continuity",
            Self::Temperature => "Temperature",
            Self::Capacitance => "Capacitance",
            Self::ExternalTemperature => "External temperature",
        }
    }

    /// Unit symbol for readings in this mode, if the mode has one.
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            Self::Idle | Self::Diode | Self::Continuity => None,
            Self::DcVoltage => Some("Vdc"),
            Self::AcVoltage => Some("Vac"),
            Self::DcCurrent => Some("Adc"),
            Self::AcCurrent => Some("Aac"),
            Self::Resistance => Some("Ω"),
            Self::Temperature | Self::ExternalTemperature => Some("°C"),
            Self::Capacitance => Some("F"),
        }
    }

    /// Check if readings in this mode report auto-range state.
    pub fn is_ranged(&self) -> bool {
        matches!(
            self,
            Self::DcVoltage
                | Self::AcVoltage
                | Self::DcCurrent
                | Self::AcCurrent
                | Self::Resistance
                | Self::Capacitance
        )
    }
}

impl std::fmt::Display for MeasurementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip() {
        for mode in MeasurementMode::ALL {
            assert_eq!(MeasurementMode::from_raw(mode.to_raw()), Some(mode));
        }
        assert_eq!(MeasurementMode::from_raw(11), None);
        assert_eq!(MeasurementMode::from_raw(0xFF), None);
    }

    #[test]
    fn test_stable_names() {
        assert_eq!(MeasurementMode::DcVoltage.to_string(), "DC voltage");
        assert_eq!(MeasurementMode::AcCurrent.to_string(), "AC current");
        assert_eq!(
            MeasurementMode::ExternalTemperature.to_string(),
            "External temperature"
        );
    }

    #[test]
    fn test_units() {
        assert_eq!(MeasurementMode::DcVoltage.unit(), Some("Vdc"));
        assert_eq!(MeasurementMode::Resistance.unit(), Some("Ω"));
        assert_eq!(MeasurementMode::Continuity.unit(), None);
        assert_eq!(MeasurementMode::Diode.unit(), None);
    }
}
