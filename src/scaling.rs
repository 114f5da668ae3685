/// Unit prefixes applied to power and energy readings, largest first
const PREFIXES: [(f64, &str); 3] = [(1e9, "G"), (1e6, "M"), (1e3, "k")];

/// Units that get a magnitude prefix; everything else is passed through
const SCALED_UNITS: [&str; 2] = ["W", "Wh"];

/// Rounds to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Scales a power (`W`) or energy (`Wh`) reading into the most readable magnitude.
///
/// `scale(1500.0, "W")` gives `(1.5, "kW")`. Other units keep their label and only
/// get rounded. Already-prefixed units such as `kW` are not part of the scaled set.
pub fn scale(value: f64, unit: &str) -> (f64, String) {
    if !SCALED_UNITS.contains(&unit) {
        return (round2(value), unit.to_string());
    }

    let magnitude = value.abs();
    for (factor, prefix) in PREFIXES {
        if magnitude >= factor {
            return (round2(value / factor), format!("{prefix}{unit}"));
        }
    }
    (round2(value), unit.to_string())
}
