//! Zero level sets of sampled scalar fields.
//!
//! Fields are sampled once per node (`resolution + 1` nodes per axis) under a
//! wall-clock budget. A field whose budget ran out is still returned, with the
//! unsampled nodes left as NaN and `timed_out` set; cells touching NaN nodes
//! produce no geometry.

use crate::budget::{CancelToken, TimeBudget};
use crate::error::EngineError;
use log::warn;
use marching_cubes::tables::{EDGE_TABLE, TRI_TABLE};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBounds {
    pub min: f64,
    pub max: f64,
}

impl GridBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn node(&self, i: usize, resolution: usize) -> f64 {
        self.min + (self.max - self.min) * i as f64 / resolution as f64
    }

    fn validate(&self) -> Result<(), EngineError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.max <= self.min {
            return Err(EngineError::InvalidArgument(
                "Each axis range must be finite with max > min.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dense samples over a uniform 2D or 3D grid, x fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarField {
    pub bounds: Vec<GridBounds>,
    /// Cells per axis.
    pub resolution: usize,
    pub values: Vec<f64>,
    pub timed_out: bool,
}

impl ScalarField {
    fn empty(bounds: Vec<GridBounds>, resolution: usize, nodes: usize) -> Self {
        Self {
            bounds,
            resolution,
            values: vec![f64::NAN; nodes],
            timed_out: false,
        }
    }

    pub fn dimension(&self) -> usize {
        self.bounds.len()
    }

    pub fn nodes_per_axis(&self) -> usize {
        self.resolution + 1
    }

    /// Number of nodes holding a finite sample.
    pub fn sampled_nodes(&self) -> usize {
        self.values.iter().filter(|value| value.is_finite()).count()
    }

    fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        let n = self.nodes_per_axis();
        ix + iy * n + iz * n * n
    }

    fn value(&self, ix: usize, iy: usize, iz: usize) -> f64 {
        self.values
            .get(self.index(ix, iy, iz))
            .copied()
            .unwrap_or(f64::NAN)
    }

    fn coordinate(&self, axis: usize, i: usize) -> f64 {
        self.bounds[axis].node(i, self.resolution)
    }
}

/// Checks the grid and returns its node count.
fn validate_grid(bounds: &[GridBounds], resolution: usize) -> Result<usize, EngineError> {
    if resolution == 0 {
        return Err(EngineError::InvalidArgument(
            "Grid resolution must be positive.".to_string(),
        ));
    }
    bounds.iter().try_for_each(GridBounds::validate)?;
    resolution
        .checked_add(1)
        .and_then(|per_axis| per_axis.checked_pow(bounds.len() as u32))
        .ok_or_else(|| {
            EngineError::InvalidArgument(format!("Grid resolution {resolution} is too large."))
        })
}

/// Samples `f(x, y)`, checking the budget and cancellation after each row.
pub fn sample_field_2d(
    mut f: impl FnMut(f64, f64) -> f64,
    bounds: [GridBounds; 2],
    resolution: usize,
    budget: &TimeBudget<'_>,
    cancel: &CancelToken,
) -> Result<ScalarField, EngineError> {
    let nodes = validate_grid(&bounds, resolution)?;
    let mut field = ScalarField::empty(bounds.to_vec(), resolution, nodes);
    let n = field.nodes_per_axis();
    for iy in 0..n {
        let y = field.coordinate(1, iy);
        for ix in 0..n {
            let x = field.coordinate(0, ix);
            let idx = field.index(ix, iy, 0);
            field.values[idx] = f(x, y);
        }
        cancel.check()?;
        if iy + 1 < n && budget.expired() {
            warn!("2D field sampling hit its time budget after {} of {n} rows", iy + 1);
            field.timed_out = true;
            break;
        }
    }
    Ok(field)
}

/// Samples `f(x, y, z)`, checking the budget and cancellation after each row of
/// each slab.
pub fn sample_field_3d(
    mut f: impl FnMut(f64, f64, f64) -> f64,
    bounds: [GridBounds; 3],
    resolution: usize,
    budget: &TimeBudget<'_>,
    cancel: &CancelToken,
) -> Result<ScalarField, EngineError> {
    let nodes = validate_grid(&bounds, resolution)?;
    let mut field = ScalarField::empty(bounds.to_vec(), resolution, nodes);
    let n = field.nodes_per_axis();
    'slabs: for iz in 0..n {
        let z = field.coordinate(2, iz);
        for iy in 0..n {
            let y = field.coordinate(1, iy);
            for ix in 0..n {
                let x = field.coordinate(0, ix);
                let idx = field.index(ix, iy, iz);
                field.values[idx] = f(x, y, z);
            }
            cancel.check()?;
            let last_row = iz + 1 == n && iy + 1 == n;
            if !last_row && budget.expired() {
                warn!(
                    "3D field sampling hit its time budget in slab {} of {n}",
                    iz + 1
                );
                field.timed_out = true;
                break 'slabs;
            }
        }
    }
    Ok(field)
}

/// Position of the zero crossing between two samples, as a fraction of the
/// edge from `v0`.
fn interpolate_factor(v0: f64, v1: f64) -> f64 {
    let denominator = v0 - v1;
    if denominator.abs() <= 1e-12 {
        0.5
    } else {
        (v0 / denominator).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub points: Vec<[f64; 2]>,
    pub closed: bool,
}

/// Grid edge identity: horizontal edges start at node `(ix, iy)` and run +x,
/// vertical edges run +y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EdgeKey {
    Horizontal(usize, usize),
    Vertical(usize, usize),
}

/// Cell-local edge numbering: 0 bottom, 1 right, 2 top, 3 left.
fn cell_edge(ix: usize, iy: usize, edge: u8) -> EdgeKey {
    match edge {
        0 => EdgeKey::Horizontal(ix, iy),
        1 => EdgeKey::Vertical(ix + 1, iy),
        2 => EdgeKey::Horizontal(ix, iy + 1),
        _ => EdgeKey::Vertical(ix, iy),
    }
}

/// Edge pairs crossed by the zero level for a corner sign pattern. Corner bits
/// are set for non-negative values (bit 0 at `(x0, y0)`, counter-clockwise).
/// The two saddle cases join the corners whose sign matches the cell centre.
fn marching_squares_edge_pairs(case_index: u8, centre_positive: bool) -> &'static [(u8, u8)] {
    match case_index {
        0 | 15 => &[],
        1 | 14 => &[(3, 0)],
        2 | 13 => &[(0, 1)],
        3 | 12 => &[(3, 1)],
        4 | 11 => &[(1, 2)],
        6 | 9 => &[(0, 2)],
        7 | 8 => &[(3, 2)],
        5 if centre_positive => &[(3, 2), (0, 1)],
        5 => &[(3, 0), (1, 2)],
        10 if centre_positive => &[(0, 3), (1, 2)],
        10 => &[(0, 1), (2, 3)],
        _ => &[],
    }
}

fn edge_point(field: &ScalarField, key: EdgeKey) -> [f64; 2] {
    match key {
        EdgeKey::Horizontal(ix, iy) => {
            let t = interpolate_factor(field.value(ix, iy, 0), field.value(ix + 1, iy, 0));
            let x0 = field.coordinate(0, ix);
            let x1 = field.coordinate(0, ix + 1);
            [x0 + (x1 - x0) * t, field.coordinate(1, iy)]
        }
        EdgeKey::Vertical(ix, iy) => {
            let t = interpolate_factor(field.value(ix, iy, 0), field.value(ix, iy + 1, 0));
            let y0 = field.coordinate(1, iy);
            let y1 = field.coordinate(1, iy + 1);
            [field.coordinate(0, ix), y0 + (y1 - y0) * t]
        }
    }
}

/// Extracts the zero level of a 2D field as ordered polylines.
pub fn marching_squares(field: &ScalarField) -> Vec<Polyline> {
    if field.dimension() != 2 {
        return Vec::new();
    }
    let cells = field.resolution;
    let mut segments: Vec<(EdgeKey, EdgeKey)> = Vec::new();
    for iy in 0..cells {
        for ix in 0..cells {
            let v = [
                field.value(ix, iy, 0),
                field.value(ix + 1, iy, 0),
                field.value(ix + 1, iy + 1, 0),
                field.value(ix, iy + 1, 0),
            ];
            if v.iter().any(|value| !value.is_finite()) {
                continue;
            }
            let case_index = v
                .iter()
                .enumerate()
                .filter(|(_, value)| **value >= 0.0)
                .fold(0u8, |acc, (corner, _)| acc | (1 << corner));
            let centre_positive = v.iter().sum::<f64>() / 4.0 >= 0.0;
            for &(edge_a, edge_b) in marching_squares_edge_pairs(case_index, centre_positive) {
                segments.push((cell_edge(ix, iy, edge_a), cell_edge(ix, iy, edge_b)));
            }
        }
    }
    stitch(field, &segments)
}

/// Joins segments that share a grid edge into maximal chains.
fn stitch(field: &ScalarField, segments: &[(EdgeKey, EdgeKey)]) -> Vec<Polyline> {
    let mut touching: HashMap<EdgeKey, Vec<usize>> = HashMap::new();
    for (idx, (a, b)) in segments.iter().enumerate() {
        touching.entry(*a).or_default().push(idx);
        touching.entry(*b).or_default().push(idx);
    }
    let mut used = vec![false; segments.len()];
    let next_from = |key: EdgeKey, used: &mut [bool]| -> Option<EdgeKey> {
        let candidates = touching.get(&key)?;
        let &idx = candidates.iter().find(|&&idx| !used[idx])?;
        used[idx] = true;
        let (a, b) = segments[idx];
        Some(if a == key { b } else { a })
    };

    let mut polylines = Vec::new();
    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (a, b) = segments[start];
        let mut chain: VecDeque<EdgeKey> = VecDeque::from([a, b]);
        while let Some(next) = chain.back().and_then(|&tail| next_from(tail, &mut used)) {
            chain.push_back(next);
        }
        while let Some(previous) = chain.front().and_then(|&head| next_from(head, &mut used)) {
            chain.push_front(previous);
        }
        let closed = chain.len() > 3 && chain.front() == chain.back();
        if closed {
            chain.pop_back();
        }
        // Contours through a node visit it from two edges.
        let mut points: Vec<[f64; 2]> = chain.into_iter().map(|key| edge_point(field, key)).collect();
        points.dedup();
        polylines.push(Polyline { points, closed });
    }
    polylines
}

pub type Triangle = [[f64; 3]; 3];

const CUBE_EDGE_CORNERS: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Extracts the zero isosurface of a 3D field.
pub fn marching_cubes(field: &ScalarField) -> Vec<Triangle> {
    if field.dimension() != 3 {
        return Vec::new();
    }
    let cells = field.resolution;
    let mut triangles = Vec::new();
    for iz in 0..cells {
        let (z0, z1) = (field.coordinate(2, iz), field.coordinate(2, iz + 1));
        for iy in 0..cells {
            let (y0, y1) = (field.coordinate(1, iy), field.coordinate(1, iy + 1));
            for ix in 0..cells {
                let (x0, x1) = (field.coordinate(0, ix), field.coordinate(0, ix + 1));
                let corner_points = [
                    [x0, y0, z0],
                    [x1, y0, z0],
                    [x1, y1, z0],
                    [x0, y1, z0],
                    [x0, y0, z1],
                    [x1, y0, z1],
                    [x1, y1, z1],
                    [x0, y1, z1],
                ];
                let corner_values = [
                    field.value(ix, iy, iz),
                    field.value(ix + 1, iy, iz),
                    field.value(ix + 1, iy + 1, iz),
                    field.value(ix, iy + 1, iz),
                    field.value(ix, iy, iz + 1),
                    field.value(ix + 1, iy, iz + 1),
                    field.value(ix + 1, iy + 1, iz + 1),
                    field.value(ix, iy + 1, iz + 1),
                ];
                if corner_values.iter().any(|value| !value.is_finite()) {
                    continue;
                }

                let mut cube_index = 0usize;
                for (corner, value) in corner_values.iter().enumerate() {
                    if *value < 0.0 {
                        cube_index |= 1 << corner;
                    }
                }
                let edge_mask = EDGE_TABLE[cube_index] as i32;
                if edge_mask == 0 {
                    continue;
                }

                let mut edge_vertices = [[0.0; 3]; 12];
                for (edge, vertex) in edge_vertices.iter_mut().enumerate() {
                    if (edge_mask & (1 << edge)) == 0 {
                        continue;
                    }
                    let (ca, cb) = CUBE_EDGE_CORNERS[edge];
                    let a = corner_points[ca];
                    let b = corner_points[cb];
                    let t = interpolate_factor(corner_values[ca], corner_values[cb]);
                    *vertex = [
                        a[0] + (b[0] - a[0]) * t,
                        a[1] + (b[1] - a[1]) * t,
                        a[2] + (b[2] - a[2]) * t,
                    ];
                }

                let tri_row = TRI_TABLE[cube_index];
                let mut offset = 0usize;
                while offset + 2 < tri_row.len() && tri_row[offset] != -1 {
                    triangles.push([
                        edge_vertices[tri_row[offset] as usize],
                        edge_vertices[tri_row[offset + 1] as usize],
                        edge_vertices[tri_row[offset + 2] as usize],
                    ]);
                    offset += 3;
                }
            }
        }
    }
    triangles
}

/// Unordered contour points: one interpolated point per sign-changing edge of
/// every finite cell, stride-subsampled down to `max_points`.
pub fn edge_crossings(field: &ScalarField, max_points: usize) -> Vec<[f64; 2]> {
    if field.dimension() != 2 || max_points == 0 {
        return Vec::new();
    }
    let cells = field.resolution;
    let mut points = Vec::new();
    for iy in 0..cells {
        for ix in 0..cells {
            let corners = [
                field.value(ix, iy, 0),
                field.value(ix + 1, iy, 0),
                field.value(ix + 1, iy + 1, 0),
                field.value(ix, iy + 1, 0),
            ];
            if corners.iter().any(|value| !value.is_finite()) {
                continue;
            }
            for edge in 0..4u8 {
                let a = corners[edge as usize];
                let b = corners[(edge as usize + 1) % 4];
                if (a >= 0.0) != (b >= 0.0) {
                    points.push(edge_point(field, cell_edge(ix, iy, edge)));
                }
            }
        }
    }
    if points.len() > max_points {
        let stride = points.len().div_ceil(max_points);
        points = points.into_iter().step_by(stride).collect();
    }
    points
}
