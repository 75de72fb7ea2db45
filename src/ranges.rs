//! Per-product range tables.
//!
//! A [`RangeCode`] only means something together with the product and the
//! measurement mode it was issued for: the Pokit Meter and Pokit Pro have
//! different analog front-ends, so the same code selects different full-scale
//! values on each.
//!
//! Codes in every table start at 1; code 0 is reserved for auto-range.

use tracing::{debug, info, warn};

use crate::modes::MeasurementMode;
use crate::products::ProductVariant;
use crate::utils::format_si;

/// Device-specific range selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeCode(pub u8);

impl RangeCode {
    /// Let the device choose its range.
    pub const AUTO: Self = Self(0);

    /// Check if this is the auto-range code.
    pub fn is_auto(&self) -> bool {
        *self == Self::AUTO
    }

    /// Raw byte value.
    pub fn to_raw(&self) -> u8 {
        self.0
    }
}

/// What the caller wants from the range selection.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RangeRequest {
    /// Let the device auto-range.
    #[default]
    Auto,
    /// Smallest range able to measure at least this value, in SI base units
    /// (volts, amps, ohms, farads).
    AtLeast(f64),
}

/// One row of a range table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    /// Full-scale value in the table's base unit.
    pub full_scale: u64,
    /// Code sent to the device to select this range.
    pub code: RangeCode,
}

const fn entry(full_scale: u64, code: u8) -> RangeEntry {
    RangeEntry {
        full_scale,
        code: RangeCode(code),
    }
}

/// Ordered (smallest first) list of ranges for one product and quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeTable {
    /// Decimal exponent of the base unit (e.g. `-3` for millivolts).
    pub exponent: i32,
    /// SI unit symbol, without prefix.
    pub unit: &'static str,
    /// Entries, ordered by ascending full-scale value.
    pub entries: &'static [RangeEntry],
}

// Pokit Meter: millivolts, microamps, ohms, picofarads.
const METER_VOLTAGE: RangeTable = RangeTable {
    exponent: -3,
    unit: "V",
    entries: &[
        entry(300, 1),
        entry(2_000, 2),
        entry(6_000, 3),
        entry(12_000, 4),
        entry(30_000, 5),
        entry(60_000, 6),
    ],
};

const METER_CURRENT: RangeTable = RangeTable {
    exponent: -6,
    unit: "A",
    entries: &[
        entry(10_000, 1),
        entry(30_000, 2),
        entry(150_000, 3),
        entry(300_000, 4),
        entry(2_000_000, 5),
    ],
};

const METER_RESISTANCE: RangeTable = RangeTable {
    exponent: 0,
    unit: "Ω",
    entries: &[
        entry(160, 1),
        entry(330, 2),
        entry(890, 3),
        entry(1_500, 4),
        entry(10_000, 5),
        entry(100_000, 6),
        entry(470_000, 7),
        entry(1_000_000, 8),
    ],
};

const METER_CAPACITANCE: RangeTable = RangeTable {
    exponent: -12,
    unit: "F",
    entries: &[
        entry(100_000, 1),
        entry(10_000_000, 2),
        entry(1_000_000_000, 3),
    ],
};

// Pokit Pro.
const PRO_VOLTAGE: RangeTable = RangeTable {
    exponent: -3,
    unit: "V",
    entries: &[
        entry(250, 1),
        entry(2_000, 2),
        entry(10_000, 3),
        entry(30_000, 4),
        entry(60_000, 5),
        entry(125_000, 6),
        entry(400_000, 7),
        entry(600_000, 8),
    ],
};

const PRO_CURRENT: RangeTable = RangeTable {
    exponent: -6,
    unit: "A",
    entries: &[
        entry(500, 1),
        entry(2_000, 2),
        entry(10_000, 3),
        entry(125_000, 4),
        entry(300_000, 5),
        entry(3_000_000, 6),
        entry(10_000_000, 7),
    ],
};

const PRO_RESISTANCE: RangeTable = RangeTable {
    exponent: 0,
    unit: "Ω",
    entries: &[
        entry(30, 1),
        entry(75, 2),
        entry(400, 3),
        entry(5_000, 4),
        entry(10_000, 5),
        entry(15_000, 6),
        entry(40_000, 7),
        entry(500_000, 8),
        entry(700_000, 9),
        entry(1_000_000, 10),
        entry(3_000_000, 11),
    ],
};

const PRO_CAPACITANCE: RangeTable = RangeTable {
    exponent: -12,
    unit: "F",
    entries: &[
        entry(500_000, 1),
        entry(10_000_000, 2),
        entry(1_000_000_000, 3),
    ],
};

impl RangeTable {
    /// Look up the table for a product and mode.
    ///
    /// Returns `None` for modes without ranges (idle, diode, continuity,
    /// temperature).
    pub fn lookup(product: ProductVariant, mode: MeasurementMode) -> Option<&'static RangeTable> {
        use MeasurementMode::*;
        use ProductVariant::*;

        let table: &'static RangeTable = match (product, mode) {
            (PokitMeter, DcVoltage | AcVoltage) => &METER_VOLTAGE,
            (PokitMeter, DcCurrent | AcCurrent) => &METER_CURRENT,
            (PokitMeter, Resistance) => &METER_RESISTANCE,
            (PokitMeter, Capacitance) => &METER_CAPACITANCE,
            (PokitPro, DcVoltage | AcVoltage) => &PRO_VOLTAGE,
            (PokitPro, DcCurrent | AcCurrent) => &PRO_CURRENT,
            (PokitPro, Resistance) => &PRO_RESISTANCE,
            (PokitPro, Capacitance) => &PRO_CAPACITANCE,
            (_, Idle | Diode | Continuity | Temperature | ExternalTemperature) => return None,
        };
        Some(table)
    }

    /// Code of the first range whose full scale is at least `min_value`
    /// (base units), saturating at the largest range.
    pub fn range_for(&self, min_value: u64) -> RangeCode {
        self.entries
            .iter()
            .find(|e| e.full_scale >= min_value)
            .or_else(|| self.entries.last())
            .map(|e| e.code)
            .unwrap_or(RangeCode::AUTO)
    }

    /// Find the entry for `code`.
    pub fn entry(&self, code: RangeCode) -> Option<&RangeEntry> {
        self.entries.iter().find(|e| e.code == code)
    }

    /// Full-scale value of `code` in SI base units.
    pub fn max_value(&self, code: RangeCode) -> Option<f64> {
        self.entry(code)
            .map(|e| e.full_scale as f64 * 10f64.powi(self.exponent))
    }

    /// Render `code` as e.g. `Up to 300mV`.
    pub fn describe(&self, code: RangeCode) -> Option<String> {
        self.entry(code)
            .map(|e| format!("Up to {}", format_si(e.full_scale, self.exponent, self.unit)))
    }

    /// Convert an SI value into this table's base unit, rounding up.
    fn to_base_units(&self, value: f64) -> u64 {
        if value.is_nan() || value <= 0.0 {
            return 0;
        }
        let scaled = value * 10f64.powi(-self.exponent);
        let rounded = scaled.round();
        // Absorb float noise such as 0.3 * 1000 = 300.00000000000006.
        let scaled = if (scaled - rounded).abs() < 1e-6 {
            rounded
        } else {
            scaled.ceil()
        };
        if scaled >= u64::MAX as f64 {
            u64::MAX
        } else {
            scaled as u64
        }
    }
}

/// Resolve a range request for the given product and mode.
///
/// Modes without a range table, and NaN requests, yield [`RangeCode::AUTO`].
/// Infinite requests saturate at the largest range.
pub fn range_for(product: ProductVariant, mode: MeasurementMode, request: RangeRequest) -> RangeCode {
    let RangeRequest::AtLeast(value) = request else {
        return RangeCode::AUTO;
    };
    if value.is_nan() {
        warn!("Range request for {} is not a number; using auto range", mode);
        return RangeCode::AUTO;
    }

    match RangeTable::lookup(product, mode) {
        Some(table) => {
            let code = table.range_for(table.to_base_units(value));
            debug!(
                "Selected range {:?} for {} >= {} on {}",
                code, mode, value, product
            );
            code
        }
        None => {
            info!("Ignoring range request for {} ({} has no ranges)", value, mode);
            RangeCode::AUTO
        }
    }
}

/// Render a range code for display.
///
/// Auto-range renders as `Auto-range`; codes without a matching table entry
/// render as `None`.
pub fn range_to_string(
    product: ProductVariant,
    mode: MeasurementMode,
    code: RangeCode,
) -> Option<String> {
    if code.is_auto() {
        return Some("Auto-range".to_string());
    }
    RangeTable::lookup(product, mode)?.describe(code)
}
