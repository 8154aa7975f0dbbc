//! Compact splines: immutable, sampleable curves over spline-local time.
//!
//! A spline is a list of `(time, value, derivative)` nodes with strictly
//! increasing times; between nodes the curve is the cubic Hermite segment
//! matching both endpoints' values and derivatives. Processors treat
//! splines as opaque shared assets (`Rc<CompactSpline>`).

use thiserror::Error;

/// One control node of a compact spline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineNode {
    pub time: f32,
    pub value: f32,
    pub derivative: f32,
}

impl SplineNode {
    pub fn new(time: f32, value: f32, derivative: f32) -> Self {
        Self {
            time,
            value,
            derivative,
        }
    }
}

/// Errors from spline construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplineError {
    #[error("spline needs at least two nodes")]
    TooFewNodes,
    #[error("node times must be finite and strictly increasing (node {index})")]
    NonMonotonic { index: usize },
}

/// An immutable sampled curve.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactSpline {
    nodes: Vec<SplineNode>,
}

impl CompactSpline {
    /// Build a spline, validating node ordering.
    pub fn from_nodes(nodes: Vec<SplineNode>) -> Result<Self, SplineError> {
        if nodes.len() < 2 {
            return Err(SplineError::TooFewNodes);
        }
        for (index, pair) in nodes.windows(2).enumerate() {
            if !pair[0].time.is_finite() || !pair[1].time.is_finite() || pair[1].time <= pair[0].time
            {
                return Err(SplineError::NonMonotonic { index: index + 1 });
            }
        }
        Ok(Self { nodes })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn start_time(&self) -> f32 {
        self.nodes[0].time
    }

    /// Spline-local time of the last node.
    pub fn end_time(&self) -> f32 {
        self.nodes[self.nodes.len() - 1].time
    }

    pub fn duration(&self) -> f32 {
        self.end_time() - self.start_time()
    }

    pub fn start_value(&self) -> f32 {
        self.nodes[0].value
    }

    pub fn end_value(&self) -> f32 {
        self.nodes[self.nodes.len() - 1].value
    }

    pub fn end_derivative(&self) -> f32 {
        self.nodes[self.nodes.len() - 1].derivative
    }

    /// Evaluate the curve at spline-local time `t`, clamped to the node
    /// range. Returns `(value, derivative)`.
    pub fn sample(&self, t: f32) -> (f32, f32) {
        let first = self.nodes[0];
        let last = self.nodes[self.nodes.len() - 1];
        if t <= first.time {
            return (first.value, first.derivative);
        }
        if t >= last.time {
            return (last.value, last.derivative);
        }

        // First node with time > t; the segment is [hi - 1, hi].
        let hi = self.nodes.partition_point(|n| n.time <= t);
        let a = self.nodes[hi - 1];
        let b = self.nodes[hi];

        let d = b.time - a.time;
        let s = (t - a.time) / d;
        let s2 = s * s;
        let s3 = s2 * s;

        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        let value = h00 * a.value + h10 * d * a.derivative + h01 * b.value + h11 * d * b.derivative;

        let g00 = 6.0 * s2 - 6.0 * s;
        let g10 = 3.0 * s2 - 4.0 * s + 1.0;
        let g01 = -6.0 * s2 + 6.0 * s;
        let g11 = 3.0 * s2 - 2.0 * s;
        let derivative =
            (g00 * a.value + g01 * b.value) / d + g10 * a.derivative + g11 * b.derivative;

        (value, derivative)
    }
}
