use thiserror::Error;

use crate::multiscale::DescriptorStack;

pub type Result<T> = std::result::Result<T, SlsError>;

#[derive(Debug, Error)]
pub enum SlsError {
    /// Bad configuration or malformed input. Aborts the whole stage, no partial output.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    ExtractionShortfall(#[from] Box<ExtractionShortfall>),

    /// The ground truth homography maps a sample to the plane at infinity.
    #[error("homography maps ({x}, {y}) to a point at infinity")]
    DegenerateProjection { x: usize, y: usize },
}

impl SlsError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SlsError::InvalidInput(msg.into())
    }
}

/// The descriptor extractor returned fewer descriptors than grid points for one or more
/// scales.
///
/// `partial` holds every descriptor that was computed. All columns belonging to a
/// `(point, scale)` pair listed in `scales` are still zero. The stack is handed back so a
/// caller can decide whether to drop the affected points or abort; it is never passed on
/// silently.
#[derive(Debug, Error)]
#[error("descriptor extractor came up short at {} of {} scales", .scales.len(), .partial.num_sigma())]
pub struct ExtractionShortfall {
    pub scales: Vec<ScaleShortfall>,
    pub partial: DescriptorStack,
}

impl ExtractionShortfall {
    /// Sorted, deduplicated indices of grid points missing a descriptor at any scale.
    pub fn missing_points(&self) -> Vec<usize> {
        let mut points: Vec<usize> = self
            .scales
            .iter()
            .flat_map(|s| s.missing.iter().copied())
            .collect();
        points.sort_unstable();
        points.dedup();
        points
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleShortfall {
    pub scale_index: usize,
    pub sigma: f32,
    pub requested: usize,
    pub returned: usize,
    /// Indices of the grid points without a descriptor at this scale.
    pub missing: Vec<usize>,
}
