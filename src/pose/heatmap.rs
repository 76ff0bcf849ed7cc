use ndarray::{ArrayView3, ArrayViewD, Axis, Ix3};

use crate::types::PredictedPoint;

/// Collapses any leading unit axes of a model output down to
/// `[channels, rows, cols]`.
pub fn squeeze_to_heatmaps<'a>(raw: ArrayViewD<'a, f32>) -> Option<ArrayView3<'a, f32>> {
    let mut view = raw;
    while view.ndim() > 3 && view.shape()[0] == 1 {
        view = view.index_axis_move(Axis(0), 0);
    }
    view.into_dimensionality::<Ix3>().ok()
}

/// Turns a `[channels, rows, cols]` heatmap into one optional point per
/// channel.
///
/// Each point sits at the centre of its channel's strongest cell, in
/// normalized image space, with the raw activation as confidence. A channel
/// with no positive activation yields `None`. An empty tensor yields an empty
/// list.
pub fn convert_to_predicted_points(
    heatmaps: ArrayView3<'_, f32>,
    is_flipped: bool,
) -> Vec<Option<PredictedPoint>> {
    let (_, rows, cols) = heatmaps.dim();
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    heatmaps
        .outer_iter()
        .map(|channel| {
            let mut best: Option<(usize, usize, f32)> = None;
            for ((row, col), &value) in channel.indexed_iter() {
                if !(value > 0.0) {
                    continue;
                }
                if best.map_or(true, |(_, _, max)| value > max) {
                    best = Some((row, col, value));
                }
            }

            best.map(|(row, col, confidence)| {
                let mut x = (col as f32 + 0.5) / cols as f32;
                let y = (row as f32 + 0.5) / rows as f32;
                if is_flipped {
                    x = 1.0 - x;
                }
                PredictedPoint::new(x, y, confidence)
            })
        })
        .collect()
}
