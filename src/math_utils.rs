//! Numeric helpers shared by the cache-key and packing code.

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Render a float the way printf's `%g` does: six significant digits,
/// no trailing zeros, scientific notation for very large or small values.
///
/// Cache paths are built from this rendering, so it must be stable:
/// `50.0 -> "50"`, `12.5 -> "12.5"`, `1e6 -> "1e+06"`.
pub fn format_g(value: f64) -> String {
    const PRECISION: i32 = 6;

    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }

    let exponent = value.abs().log10().floor() as i32;
    // re-derive after rounding: 999999.5 rounds up into the next decade
    let rounded = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let exponent = rounded
        .split('e')
        .nth(1)
        .and_then(|e| e.parse::<i32>().ok())
        .unwrap_or(exponent);

    if exponent < -4 || exponent >= PRECISION {
        let (mantissa, _) = rounded.split_once('e').unwrap_or((rounded.as_str(), ""));
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (PRECISION - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Project lon/lat (degrees) into the 256x256 web-mercator pixel space,
/// where (0,0) is the north-west corner.
pub fn lonlat_to_pixel(lon: f64, lat: f64) -> (f64, f64) {
    use crate::constants::MAP_PIXELS;
    use std::f64::consts::PI;

    let x = (lon + 180.0) * MAP_PIXELS / 360.0;
    let half = MAP_PIXELS / 2.0;
    let y = half - ((lat + 90.0) * PI / 360.0).tan().ln() * half / PI;
    (x, y)
}

/// Convert a horizontal spread in meters to map pixels at the given latitude.
pub fn spread_to_pixels(sigh_m: f64, lat: f64) -> f64 {
    use crate::constants::METERS_PER_PIXEL_AT_EQUATOR;
    sigh_m / (METERS_PER_PIXEL_AT_EQUATOR * lat.to_radians().cos().abs())
}
