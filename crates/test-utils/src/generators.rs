//! Test data generators for creating synthetic climate-like data.
//!
//! Fields are returned as flat `Vec<f32>` in (time, latitude, longitude)
//! order, longitude fastest.

/// A (time, lat, lon) field built from a closure over indices.
pub fn create_field<F>(n_times: usize, n_lat: usize, n_lon: usize, f: F) -> Vec<f32>
where
    F: Fn(usize, usize, usize) -> f32,
{
    let mut data = Vec::with_capacity(n_times * n_lat * n_lon);
    for t in 0..n_times {
        for i in 0..n_lat {
            for j in 0..n_lon {
                data.push(f(t, i, j));
            }
        }
    }
    data
}

/// Evenly spaced coordinate axis.
pub fn create_axis(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n).map(|k| start + step * k as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_field_order() {
        let field = create_field(2, 2, 3, |t, i, j| (t * 100 + i * 10 + j) as f32);
        assert_eq!(field.len(), 12);
        assert_eq!(field[0], 0.0);
        assert_eq!(field[2], 2.0);
        assert_eq!(field[3], 10.0);
        assert_eq!(field[6], 100.0);
    }

    #[test]
    fn test_create_axis() {
        assert_eq!(create_axis(42.0, -1.0, 3), vec![42.0, 41.0, 40.0]);
    }
}
