//! Walks the max-mixture detection factor through two solver-style
//! iterations and shows the winning hypothesis switching as the estimates
//! move.
//!
//! Run with: `cargo run --example max_mixture_demo`

use maxmix_factors::factors::{
    BoundingBox, CouplingMode, Detection, DetectionFactor, Factor, FactorKind,
};
use maxmix_factors::manifold::se3::SE3;
use maxmix_factors::values::{default_key_formatter, Values};
use maxmix_factors::{init_logger, FactorResult};
use nalgebra::Vector3;
use tracing::info;

const DETECTION_KEY: u64 = 0;
const ROBOT_KEY: u64 = 1;

fn main() -> FactorResult<()> {
    init_logger();

    // Two competing hypotheses for the same object: an ambiguous detector
    // reported the object either 2m ahead or 2m ahead and 3m to the left.
    let hypotheses = vec![
        Detection::isotropic(
            BoundingBox::new(Vector3::new(2.0, 0.0, 0.0), Vector3::new(0.5, 0.5, 0.5)),
            0.2,
            1.0,
        )?,
        Detection::isotropic(
            BoundingBox::new(Vector3::new(2.0, 3.0, 0.0), Vector3::new(0.5, 0.5, 0.5)),
            0.2,
            0.5,
        )?,
    ];
    let factor = FactorKind::Detection(DetectionFactor::new(
        hypotheses,
        DETECTION_KEY,
        ROBOT_KEY,
        CouplingMode::TightlyCoupled,
    )?);
    factor.print("graph: ", default_key_formatter);

    let mut values = Values::new();
    values.insert_pose(ROBOT_KEY, SE3::identity());
    values.insert_pose(
        DETECTION_KEY,
        SE3::from_translation(Vector3::new(2.3, 0.4, 0.0)),
    );

    for (iteration, detection_estimate) in [
        Vector3::new(2.3, 0.4, 0.0),
        Vector3::new(2.2, 2.5, 0.0),
    ]
    .into_iter()
    .enumerate()
    {
        values.insert_pose(DETECTION_KEY, SE3::from_translation(detection_estimate));
        let error = factor.error(&values)?;
        let linear = factor.linearize(&values)?;
        info!(
            iteration,
            error,
            residual = %linear.residual.transpose(),
            "linearized around the winning hypothesis"
        );
    }

    Ok(())
}
