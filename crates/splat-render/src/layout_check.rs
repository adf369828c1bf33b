use thiserror::Error;

/// Why a set of per-point arrays cannot form a [`crate::point_cloud::PointCloud`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    #[error("{attribute} has {found} entries, expected {expected}")]
    LengthMismatch {
        attribute: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{attribute} of point {index} is not finite")]
    NonFinite {
        attribute: &'static str,
        index: usize,
    },
    #[error("opacity of point {index} is {value}, outside [0, 1]")]
    OpacityOutOfRange { index: usize, value: f32 },
    #[error("color of point {index} is outside [0, 1]")]
    ColorOutOfRange { index: usize },
    #[error("scale of point {index} has a non-positive component")]
    NonPositiveScale { index: usize },
    #[error("rotation of point {index} is a zero quaternion")]
    DegenerateRotation { index: usize },
}

/// Checks that parallel per-point arrays all have the length of the first one.
/// The first violation wins.
pub(crate) struct LayoutCheck {
    expected: Option<usize>,
    error: Option<LayoutError>,
}

impl LayoutCheck {
    pub fn new() -> Self {
        LayoutCheck {
            expected: None,
            error: None,
        }
    }

    pub fn check_len(mut self, attribute: &'static str, len: usize) -> Self {
        if self.error.is_some() {
            return self;
        }

        let expected = *self.expected.get_or_insert(len);
        if len != expected {
            self.error = Some(LayoutError::LengthMismatch {
                attribute,
                expected,
                found: len,
            });
        }
        self
    }

    pub fn finish(self) -> Result<(), LayoutError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_lengths_pass() {
        LayoutCheck::new()
            .check_len("position", 4)
            .check_len("opacity", 4)
            .finish()
            .unwrap();
    }

    #[test]
    fn first_mismatch_is_reported() {
        let err = LayoutCheck::new()
            .check_len("position", 4)
            .check_len("color", 3)
            .check_len("scale", 2)
            .finish()
            .unwrap_err();
        assert_eq!(
            err,
            LayoutError::LengthMismatch {
                attribute: "color",
                expected: 4,
                found: 3
            }
        );
    }
}
