//! Linear tidal field around a group, fitted from the accelerations of its tidal samples.

use crate::physics::group_layout::TIDAL_TENSOR_SAMPLES;
use crate::physics::math::{Matrix, Scalar, Vector};
use crate::physics::particle::SoftParticle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TidalTensor {
    pub tensor: Matrix,
    /// Expansion point; accelerations are `tensor * (x - center)`
    pub center: Vector,
    /// Outer changeover radius of the group the tensor was fitted for
    pub r_out: Scalar,
}

impl TidalTensor {
    /// Offsets of the sample points from the group center
    pub fn sample_offsets(r_tidal: Scalar) -> [Vector; TIDAL_TENSOR_SAMPLES] {
        let s = r_tidal / libm::sqrt(3.0);
        std::array::from_fn(|k| {
            Vector::new(
                if k & 1 == 0 { -s } else { s },
                if k & 2 == 0 { -s } else { s },
                if k & 4 == 0 { -s } else { s },
            )
        })
    }

    /// Least-squares fit of a symmetric tensor to the sample accelerations.
    ///
    /// The samples must already have the group's own center-of-mass acceleration removed.
    pub fn fit(samples: &[SoftParticle], center: Vector, r_out: Scalar) -> Self {
        debug_assert_eq!(samples.len(), TIDAL_TENSOR_SAMPLES);

        let mut columns = [Vector::ZERO; 3];
        let mut norms = Vector::ZERO;
        for sample in samples {
            let offset = sample.position - center;
            for (axis, column) in columns.iter_mut().enumerate() {
                *column += sample.acc * offset[axis];
            }
            norms += offset * offset;
        }
        for (axis, column) in columns.iter_mut().enumerate() {
            if norms[axis] > 0.0 {
                *column /= norms[axis];
            }
        }

        let raw = Matrix::from_cols(columns[0], columns[1], columns[2]);
        let tensor = (raw + raw.transpose()) * 0.5;

        Self {
            tensor,
            center,
            r_out,
        }
    }

    /// Move the expansion point, e.g. after a frame shift
    pub fn shift_cm(&mut self, new_center: Vector) {
        self.center = new_center;
    }

    #[inline]
    pub fn acceleration(&self, position: Vector) -> Vector {
        self.tensor * (position - self.center)
    }

    /// Potential per unit mass of the linear field
    #[inline]
    pub fn potential(&self, position: Vector) -> Scalar {
        let d = position - self.center;
        -0.5 * d.dot(self.tensor * d)
    }
}

/// Index of the closest tensor fitted for the same outer changeover radius
pub fn nearest_matching(tensors: &[TidalTensor], position: Vector, r_out: Scalar) -> Option<usize> {
    tensors
        .iter()
        .enumerate()
        .filter(|(_, tt)| (tt.r_out - r_out).abs() <= 1e-10 * r_out.abs().max(1.0))
        .min_by(|(_, a), (_, b)| {
            let da = (a.center - position).length_squared();
            let db = (b.center - position).length_squared();
            da.total_cmp(&db)
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::particle::Particle;

    fn samples_in_field(field: Matrix, center: Vector, r: Scalar) -> Vec<SoftParticle> {
        TidalTensor::sample_offsets(r)
            .iter()
            .map(|offset| {
                let mut p = SoftParticle::new(Particle::new(0, 0.0, center + *offset, Vector::ZERO));
                p.acc = field * *offset;
                p
            })
            .collect()
    }

    #[test]
    fn test_sample_offsets_lie_on_sphere() {
        for offset in TidalTensor::sample_offsets(2.0) {
            assert!((offset.length() - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_fit_recovers_symmetric_field() {
        let field = Matrix::from_cols(
            Vector::new(2.0, 0.5, -0.1),
            Vector::new(0.5, -1.0, 0.3),
            Vector::new(-0.1, 0.3, -1.0),
        );
        let center = Vector::new(5.0, -2.0, 1.0);
        let samples = samples_in_field(field, center, 0.1);

        let tt = TidalTensor::fit(&samples, center, 1.0);
        let difference = tt.tensor - field;
        for col in [difference.x_axis, difference.y_axis, difference.z_axis] {
            assert!(col.length() < 1e-10);
        }

        let probe = center + Vector::new(0.01, 0.02, -0.03);
        assert!((tt.acceleration(probe) - field * (probe - center)).length() < 1e-12);
    }

    #[test]
    fn test_potential_gradient_matches_acceleration() {
        let field = Matrix::from_diagonal(Vector::new(2.0, -1.0, -1.0));
        let tt = TidalTensor::fit(&samples_in_field(field, Vector::ZERO, 1.0), Vector::ZERO, 1.0);
        let x = Vector::new(0.3, -0.2, 0.1);
        let h = 1e-6;
        let gradient = Vector::new(
            (tt.potential(x + Vector::X * h) - tt.potential(x - Vector::X * h)) / (2.0 * h),
            (tt.potential(x + Vector::Y * h) - tt.potential(x - Vector::Y * h)) / (2.0 * h),
            (tt.potential(x + Vector::Z * h) - tt.potential(x - Vector::Z * h)) / (2.0 * h),
        );
        assert!((-gradient - tt.acceleration(x)).length() < 1e-8);
    }

    #[test]
    fn test_nearest_matching_filters_by_radius() {
        let make = |center: Vector, r_out: Scalar| TidalTensor {
            tensor: Matrix::ZERO,
            center,
            r_out,
        };
        let tensors = [
            make(Vector::X * 10.0, 1.0),
            make(Vector::X, 2.0),
            make(Vector::X * 3.0, 1.0),
        ];
        assert_eq!(nearest_matching(&tensors, Vector::ZERO, 1.0), Some(2));
        assert_eq!(nearest_matching(&tensors, Vector::ZERO, 2.0), Some(1));
        assert_eq!(nearest_matching(&tensors, Vector::ZERO, 5.0), None);
    }
}
