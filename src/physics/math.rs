use crate::resources::SharedRng;
use rand::Rng;

/// Scalar type for physics calculations (f64 for precision)
pub type Scalar = f64;

/// 3D vector type for positions, velocities, and accelerations
pub type Vector = bevy::math::DVec3;

/// 3x3 matrix type used for tidal tensors
pub type Matrix = bevy::math::DMat3;

/// Mass-weighted centroid of a set of `(mass, position, velocity)` samples.
///
/// Returns `(total_mass, center_position, center_velocity)`. An empty or massless
/// set yields zero vectors rather than NaNs.
pub fn center_of_mass<I>(samples: I) -> (Scalar, Vector, Vector)
where
    I: IntoIterator<Item = (Scalar, Vector, Vector)>,
{
    let (mass, weighted_position, weighted_velocity) = samples.into_iter().fold(
        (0.0, Vector::ZERO, Vector::ZERO),
        |(m, p, v), (mass, position, velocity)| (m + mass, p + position * mass, v + velocity * mass),
    );

    if mass > 0.0 {
        (mass, weighted_position / mass, weighted_velocity / mass)
    } else {
        (0.0, Vector::ZERO, Vector::ZERO)
    }
}

/// Uniformly distributed direction on the unit sphere
pub fn random_unit_vector(rng: &mut SharedRng) -> Vector {
    let theta = rng.random_range(0.0..=2.0 * std::f64::consts::PI);
    let phi = libm::acos(rng.random_range(-1.0..=1.0));

    Vector::new(
        libm::sin(phi) * libm::cos(theta),
        libm::sin(phi) * libm::sin(theta),
        libm::cos(phi),
    )
}

/// Any unit vector perpendicular to `v`
pub fn perpendicular_unit(v: Vector) -> Vector {
    let helper = if v.x.abs() < 0.9 * v.length() {
        Vector::X
    } else {
        Vector::Y
    };
    v.cross(helper).normalize_or_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_of_mass_weights_by_mass() {
        let (mass, position, velocity) = center_of_mass([
            (1.0, Vector::new(-1.0, 0.0, 0.0), Vector::new(0.0, -3.0, 0.0)),
            (3.0, Vector::new(1.0, 0.0, 0.0), Vector::new(0.0, 1.0, 0.0)),
        ]);

        assert_eq!(mass, 4.0);
        assert!((position - Vector::new(0.5, 0.0, 0.0)).length() < 1e-15);
        assert!(velocity.length() < 1e-15);
    }

    #[test]
    fn test_center_of_mass_of_empty_set_is_origin() {
        let (mass, position, velocity) = center_of_mass(std::iter::empty());
        assert_eq!(mass, 0.0);
        assert_eq!(position, Vector::ZERO);
        assert_eq!(velocity, Vector::ZERO);
    }

    #[test]
    fn test_random_unit_vector_is_normalized_and_unbiased() {
        let mut rng = SharedRng::from_seed(7);
        let samples = 20_000;
        let mut mean = Vector::ZERO;

        for _ in 0..samples {
            let v = random_unit_vector(&mut rng);
            assert!((v.length() - 1.0).abs() < 1e-12);
            mean += v;
        }

        mean /= samples as Scalar;
        let tolerance = 3.0 / (samples as Scalar).sqrt();
        assert!(mean.length() < tolerance, "Mean direction biased: {mean:?}");
    }

    #[test]
    fn test_perpendicular_unit() {
        for v in [Vector::X, Vector::Y, Vector::new(1.0, 2.0, -3.0)] {
            let p = perpendicular_unit(v);
            assert!(p.dot(v).abs() < 1e-12);
            assert!((p.length() - 1.0).abs() < 1e-12);
        }
    }
}
