use super::PackError;
use crate::constants::SOURCE_COLORS;

pub type Rgb = [u8; 3];

/// Encode a color as one float: `r + g*256 + b*256^2`. Every value fits the
/// 24-bit f32 mantissa exactly.
pub fn pack_color(rgb: Rgb) -> f32 {
    (rgb[0] as f64 + rgb[1] as f64 * 256.0 + rgb[2] as f64 * 65536.0) as f32
}

pub fn unpack_color(packed: f32) -> Rgb {
    let v = packed as u32;
    [(v & 0xff) as u8, ((v >> 8) & 0xff) as u8, ((v >> 16) & 0xff) as u8]
}

/// One single-color table per source, for 1 to 4 simultaneous sources.
pub fn default_palette(source_count: usize) -> Result<Vec<Vec<Rgb>>, PackError> {
    if source_count == 0 || source_count > SOURCE_COLORS.len() {
        return Err(PackError::Palette(source_count));
    }
    Ok(SOURCE_COLORS[..source_count]
        .iter()
        .map(|rgb| vec![*rgb])
        .collect())
}

/// Color for run `run` of `runs` drawn from a source's table. With several
/// colors the table is spread across the runs in order.
pub fn color_for_run(table: &[Rgb], run: usize, runs: usize) -> Option<Rgb> {
    if table.is_empty() || runs == 0 {
        return None;
    }
    let slot = (run * table.len() / runs).min(table.len() - 1);
    Some(table[slot])
}

/// Drop ratio used when the caller has no preference: more sources and
/// shorter windows shed more particles to keep the artifact loadable.
pub fn default_filter_ratio(source_count: usize, duration_hours: f64) -> f64 {
    if source_count == 0 || duration_hours <= 0.0 {
        return 0.0;
    }
    let ratio = (1.0 - 1.0 / source_count as f64) * (8.0 / duration_hours);
    ratio.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_pack_color_round_trip() {
        let rgb = [250, 255, 99];
        assert_eq!(pack_color(rgb), 250.0 + 255.0 * 256.0 + 99.0 * 65536.0);
        assert_eq!(unpack_color(pack_color(rgb)), rgb);
        assert_eq!(unpack_color(pack_color([255, 255, 255])), [255, 255, 255]);
    }

    #[test]
    fn test_default_palette_sizes() {
        assert_eq!(default_palette(1).unwrap(), vec![vec![[250, 255, 99]]]);
        assert_eq!(default_palette(4).unwrap()[3], vec![[255, 119, 0]]);
        assert!(matches!(default_palette(5), Err(PackError::Palette(5))));
        assert!(matches!(default_palette(0), Err(PackError::Palette(0))));
    }

    #[test]
    fn test_color_spread_over_runs() {
        let table = [[0, 0, 0], [1, 1, 1], [2, 2, 2], [3, 3, 3]];
        let picks: Vec<Rgb> = (0..8).map(|k| color_for_run(&table, k, 8).unwrap()).collect();
        assert_eq!(picks[0], [0, 0, 0]);
        assert_eq!(picks[1], [0, 0, 0]);
        assert_eq!(picks[2], [1, 1, 1]);
        assert_eq!(picks[7], [3, 3, 3]);
        assert_eq!(color_for_run(&[], 0, 1), None);
    }

    #[test]
    fn test_default_filter_ratio() {
        assert_abs_diff_eq!(default_filter_ratio(1, 24.0), 0.0);
        assert_abs_diff_eq!(default_filter_ratio(2, 24.0), 0.5 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(default_filter_ratio(4, 2.0), 1.0);
    }
}
