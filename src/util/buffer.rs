/// The largest absolute elementwise difference between two buffers, or `None`
/// if their lengths differ.
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max),
    )
}

/// Decide if two float buffers are equal.
///
/// Defaultly, the buffers are considered equal if they have the same length and no element differs by more than 1e-6.
///
/// You can also explicitly specify the tolerance by passing a third argument.
#[macro_export]
macro_rules! buffer_eq {
    ($a:expr, $b:expr) => {
        $crate::buffer_eq!($a, $b, 1e-6)
    };
    ($a:expr, $b:expr, $c:expr) => {{
        $crate::util::max_abs_diff(&$a[..], &$b[..]).map_or(false, |diff| diff <= $c)
    }};
}

/// Assert if two float buffers are equal.
///
/// Defaultly, the buffers are considered equal if they have the same length and no element differs by more than 1e-6.
///
/// You can also explicitly specify the tolerance by passing a third argument.
#[macro_export]
macro_rules! assert_buffer_eq {
    ($a:expr, $b:expr) => {
        $crate::assert_buffer_eq!($a, $b, 1e-6);
    };
    ($a:expr, $b:expr, $c:expr) => {
        assert!(
            $crate::buffer_eq!($a, $b, $c),
            "buffers differ: max abs diff {:?} exceeds {}",
            $crate::util::max_abs_diff(&$a[..], &$b[..]),
            $c
        );
    };
}
