//! Vertical coordinate descriptions.

/// How the levels of a vertical grid are defined.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum VerticalCoord {
    /// Explicit level values with a unit label.
    Levels { unit: String, values: Vec<f64> },
    /// Terrain-following: `p = top + sigma * (surface - top)`.
    Sigma { top: f64, sigma: Vec<f64> },
    /// Hybrid: `p = a * top + b * surface`.
    Hybrid {
        top: f64,
        coef_a: Vec<f64>,
        coef_b: Vec<f64>,
    },
}

impl VerticalCoord {
    pub fn len(&self) -> usize {
        match self {
            VerticalCoord::Levels { values, .. } => values.len(),
            VerticalCoord::Sigma { sigma, .. } => sigma.len(),
            VerticalCoord::Hybrid { coef_a, .. } => coef_a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sigma and hybrid coordinates depend on a surface field.
    pub fn is_sigma_or_hybrid(&self) -> bool {
        !matches!(self, VerticalCoord::Levels { .. })
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            VerticalCoord::Levels { unit, .. } => Some(unit),
            _ => None,
        }
    }

    /// Coordinates half-way between adjacent levels (one fewer level).
    pub fn mid_points(&self) -> VerticalCoord {
        fn halves(v: &[f64]) -> Vec<f64> {
            v.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
        }
        match self {
            VerticalCoord::Levels { unit, values } => VerticalCoord::Levels {
                unit: unit.clone(),
                values: halves(values),
            },
            VerticalCoord::Sigma { top, sigma } => VerticalCoord::Sigma {
                top: *top,
                sigma: halves(sigma),
            },
            VerticalCoord::Hybrid { top, coef_a, coef_b } => VerticalCoord::Hybrid {
                top: *top,
                coef_a: halves(coef_a),
                coef_b: halves(coef_b),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_points_of_levels() {
        let v = VerticalCoord::Levels {
            unit: "Pa".into(),
            values: vec![1000.0, 800.0, 500.0],
        };
        let m = v.mid_points();
        assert_eq!(m.len(), 2);
        assert_eq!(
            m,
            VerticalCoord::Levels {
                unit: "Pa".into(),
                values: vec![900.0, 650.0]
            }
        );
        assert!(!m.is_sigma_or_hybrid());
    }

    #[test]
    fn hybrid_is_surface_dependent() {
        let h = VerticalCoord::Hybrid {
            top: 200.0,
            coef_a: vec![0.0, 0.5],
            coef_b: vec![1.0, 0.5],
        };
        assert!(h.is_sigma_or_hybrid());
        assert_eq!(h.unit(), None);
        assert_eq!(h.mid_points().len(), 1);
    }
}
