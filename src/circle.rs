/// Integer pixel coordinates `(x, y)` covered by a circular brush.
///
/// The center is floored to the pixel grid. A radius of `1` selects the
/// center pixel only; larger radii select every offset with
/// `dx² + dy² < radius²`. Coordinates outside `[0, columns) x [0, rows)` are
/// dropped, and a radius below `1` yields nothing.
pub fn get_circle(
    radius: i32,
    rows: usize,
    columns: usize,
    x: f64,
    y: f64,
) -> Vec<(usize, usize)> {
    if radius < 1 || !x.is_finite() || !y.is_finite() {
        return Vec::new();
    }
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let inside =
        |px: i64, py: i64| px >= 0 && py >= 0 && (px as usize) < columns && (py as usize) < rows;

    if radius == 1 {
        return if inside(x0, y0) {
            vec![(x0 as usize, y0 as usize)]
        } else {
            Vec::new()
        };
    }

    let r = radius as i64;
    let (columns, rows) = (columns as i64, rows as i64);
    let x_min = (-r).max(x0.saturating_neg());
    let x_max = r.min((columns - 1).saturating_sub(x0));
    let y_min = (-r).max(y0.saturating_neg());
    let y_max = r.min((rows - 1).saturating_sub(y0));
    if x_min > x_max || y_min > y_max {
        return Vec::new();
    }

    let window = (x_max - x_min + 1) * (y_max - y_min + 1);
    let mut coords = Vec::with_capacity(window as usize);
    for dy in y_min..=y_max {
        for dx in x_min..=x_max {
            if dx * dx + dy * dy < r * r {
                coords.push(((x0 + dx) as usize, (y0 + dy) as usize));
            }
        }
    }
    coords
}
