use dicom_watershed::Volume;
use ndarray::Array3;

/// Stack of `depth` slices where every pixel carries `value`.
pub fn uniform_volume(
    series: &str,
    depth: usize,
    rows: usize,
    columns: usize,
    value: f32,
) -> Volume {
    let data = Array3::from_elem((depth, rows, columns), value);
    with_ids(Volume::new(data, (1.0, 1.0, 1.0)), series, depth)
}

/// Dark slices with a bright square of side `side` centered in each.
pub fn square_volume(series: &str, depth: usize, size: usize, side: usize) -> Volume {
    assert!(side < size, "square must fit inside the slice");
    let start = (size - side) / 2;
    let inside = start..start + side;
    let data = Array3::from_shape_fn((depth, size, size), |(_, y, x)| {
        if inside.contains(&x) && inside.contains(&y) {
            200.0
        } else {
            10.0
        }
    });
    with_ids(Volume::new(data, (1.0, 1.0, 1.0)), series, depth)
}

/// Slices whose intensity rises along the rows: `offset + scale * (y * columns + x)`.
pub fn ramp_volume(series: &str, depth: usize, size: usize, scale: f32, offset: f32) -> Volume {
    let data = Array3::from_shape_fn((depth, size, size), |(_, y, x)| {
        offset + scale * (y * size + x) as f32
    });
    with_ids(Volume::new(data, (1.0, 1.0, 1.0)), series, depth)
}

fn with_ids(volume: Volume, series: &str, depth: usize) -> Volume {
    let ids = (0..depth).map(|index| format!("{series}.{index}")).collect();
    volume.with_identity(series, ids)
}
