//! Utility functions for the pokit-ble crate.

/// SI prefixes, largest first, with their decimal exponents.
const SI_PREFIXES: [(i32, &str); 7] = [
    (6, "M"),
    (3, "k"),
    (0, ""),
    (-3, "m"),
    (-6, "μ"),
    (-9, "n"),
    (-12, "p"),
];

/// Format `value × 10^exponent` with the largest SI prefix that keeps the
/// integer part non-zero.
///
/// Integer arithmetic only, so table values render exactly.
///
/// # Example
///
/// ```
/// use pokit_ble::utils::format_si;
///
/// assert_eq!(format_si(300, -3, "V"), "300mV");
/// assert_eq!(format_si(1500, 0, "Ω"), "1.5kΩ");
/// ```
pub fn format_si(value: u64, exponent: i32, unit: &str) -> String {
    if value == 0 {
        return format!("0{}", unit);
    }

    let (prefix_exponent, prefix) = SI_PREFIXES
        .iter()
        .copied()
        .filter(|(p, _)| *p >= exponent)
        .find(|(p, _)| value >= 10u64.pow((p - exponent) as u32))
        .unwrap_or((exponent, ""));

    let divisor = 10u64.pow((prefix_exponent - exponent).max(0) as u32);
    let whole = value / divisor;
    let fraction = value % divisor;

    if fraction == 0 {
        format!("{}{}{}", whole, prefix, unit)
    } else {
        let width = (prefix_exponent - exponent) as usize;
        let digits = format!("{:0width$}", fraction, width = width);
        format!("{}.{}{}{}", whole, digits.trim_end_matches('0'), prefix, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_si_voltages() {
        assert_eq!(format_si(300, -3, "V"), "300mV");
        assert_eq!(format_si(2_000, -3, "V"), "2V");
        assert_eq!(format_si(600_000, -3, "V"), "600V");
    }

    #[test]
    fn test_format_si_currents() {
        assert_eq!(format_si(500, -6, "A"), "500μA");
        assert_eq!(format_si(10_000, -6, "A"), "10mA");
        assert_eq!(format_si(2_000_000, -6, "A"), "2A");
    }

    #[test]
    fn test_format_si_fractions() {
        assert_eq!(format_si(1_500, 0, "Ω"), "1.5kΩ");
        assert_eq!(format_si(1_250, 0, "Ω"), "1.25kΩ");
        assert_eq!(format_si(3_000_000, 0, "Ω"), "3MΩ");
    }

    #[test]
    fn test_format_si_capacitance() {
        assert_eq!(format_si(100_000, -12, "F"), "100nF");
        assert_eq!(format_si(10_000_000, -12, "F"), "10μF");
        assert_eq!(format_si(1_000_000_000, -12, "F"), "1mF");
    }

    #[test]
    fn test_format_si_zero() {
        assert_eq!(format_si(0, -3, "V"), "0V");
    }
}
