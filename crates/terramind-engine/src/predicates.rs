//! DE-9IM predicates evaluated in longitude/latitude.

use geo::{Geometry, Intersects, Relate};

/// Boundaries meet and interiors are disjoint.
pub fn touches(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    a.relate(b).is_touches()
}

/// Any shared point, boundary or interior.
pub fn intersects(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    a.intersects(b)
}

/// Interiors share at least one point.
pub fn interiors_overlap(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    let m = a.relate(b);
    m.is_intersects() && !m.is_touches()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x0: f64, y0: f64, size: f64) -> Geometry<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
        ]
        .into()
    }

    #[test]
    fn shared_edge_touches() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(1.0, 0.0, 1.0);
        assert!(touches(&a, &b));
        assert!(intersects(&a, &b));
        assert!(!interiors_overlap(&a, &b));
    }

    #[test]
    fn overlap_is_not_touching() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(0.5, 0.5, 1.0);
        assert!(!touches(&a, &b));
        assert!(interiors_overlap(&a, &b));
    }

    #[test]
    fn disjoint_neither_touches_nor_intersects() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(3.0, 3.0, 1.0);
        assert!(!touches(&a, &b));
        assert!(!intersects(&a, &b));
    }
}
