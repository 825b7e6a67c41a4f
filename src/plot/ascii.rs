//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - measured samples: `o`
//! - fitted curve: `-` line
//!
//! With `log_y` the vertical axis is `log10(y)`; non-positive values are not drawn.

use crate::domain::FitCurve;

/// Render measured samples and the fitted curve of one fit window.
pub fn render_fit_plot(curve: &FitCurve, width: usize, height: usize, log_y: bool) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let project = |y: f64| -> Option<f64> {
        if log_y {
            (y > 0.0).then(|| y.log10())
        } else {
            y.is_finite().then_some(y)
        }
    };
    let measured: Vec<(f64, f64)> = curve
        .t
        .iter()
        .zip(&curve.y)
        .filter_map(|(&t, &y)| project(y).map(|v| (t, v)))
        .collect();
    let fitted: Vec<(f64, f64)> = curve
        .t
        .iter()
        .zip(&curve.fitted)
        .filter_map(|(&t, &y)| project(y).map(|v| (t, v)))
        .collect();

    let (t_min, t_max) = x_range(&curve.t).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = y_range(&measured, &fitted).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Draw curve first (so points can overlay).
    draw_curve(&mut grid, &fitted, t_min, t_max, y_min, y_max);
    for &(t, y) in &measured {
        let x = map_x(t, t_min, t_max, width);
        let yy = map_y(y, y_min, y_max, height);
        grid[yy][x] = 'o';
    }

    let mut out = String::new();
    let axis = if log_y { "log10(y)" } else { "y" };
    out.push_str(&format!(
        "Plot: t=[{t_min:.3}, {t_max:.3}] | {axis}=[{y_min:.2}, {y_max:.2}]\n"
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    out
}

fn x_range(t: &[f64]) -> Option<(f64, f64)> {
    let mut min_t = f64::INFINITY;
    let mut max_t = f64::NEG_INFINITY;
    for &v in t {
        min_t = min_t.min(v);
        max_t = max_t.max(v);
    }
    if min_t.is_finite() && max_t.is_finite() && max_t > min_t {
        Some((min_t, max_t))
    } else {
        None
    }
}

fn y_range(measured: &[(f64, f64)], fitted: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for &(_, y) in measured.iter().chain(fitted) {
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }

    if min_y.is_finite() && max_y.is_finite() && max_y > min_y {
        Some((min_y, max_y))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], t_min: f64, t_max: f64, y_min: f64, y_max: f64) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(t, y) in curve {
        let x = map_x(t, t_min, t_max, width);
        let yy = map_y(y, y_min, y_max, height);
        if let Some((x0, y0)) = prev {
            draw_line(grid, x0, y0, x, yy, '-');
        } else {
            grid[yy][x] = '-';
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plot_golden_snapshot_small() {
        let curve = FitCurve {
            t: vec![0.0, 9.0],
            y: vec![110.0, 100.0],
            fitted: vec![110.0, 100.0],
        };

        let txt = render_fit_plot(&curve, 10, 5, false);
        let expected = concat!(
            "Plot: t=[0.000, 9.000] | y=[99.50, 110.50]\n",
            "o-        \n",
            "  --      \n",
            "    --    \n",
            "      --  \n",
            "        -o\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn log_axis_skips_non_positive_samples() {
        let curve = FitCurve {
            t: vec![0.0, 1.0, 2.0],
            y: vec![1000.0, 0.0, 10.0],
            fitted: vec![1000.0, 100.0, 10.0],
        };
        let txt = render_fit_plot(&curve, 10, 5, true);
        assert!(txt.starts_with("Plot: t=[0.000, 2.000] | log10(y)=[0.90, 3.10]\n"), "{txt}");
        let body: String = txt.lines().skip(1).collect();
        assert_eq!(body.matches('o').count(), 2);
    }
}
