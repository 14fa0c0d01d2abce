//! Splits tile geometry along a regular grid so that every triangle and line segment lies within
//! one grid cell, which keeps the geometry close to the sphere once it is projected.
//!
//! All coordinates are integer tile-extent units. Points created on grid lines are rounded with
//! `floor(v + 0.5)` and computed from canonically ordered endpoints, so two primitives sharing an
//! edge always create identical points on it.

use glam::IVec2;
use std::collections::HashMap;
use tracing::trace;

use crate::error::MeshError;
use crate::tile::{CanonicalTileId, EXTENT, NORTH_POLE_Y, SOUTH_POLE_Y};

/// Subdivided geometry, ready for upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubdivisionResult {
    /// Interleaved x, y pairs
    pub vertices_flattened: Vec<i16>,
    /// Triangle list into the vertex array
    pub triangle_indices: Vec<u32>,
    /// One index-pair list per input line list
    pub line_indices: Vec<Vec<u32>>,
}

impl SubdivisionResult {
    pub fn vertex_count(&self) -> usize {
        self.vertices_flattened.len() / 2
    }

    #[inline(always)]
    pub fn vertex(&self, index: u32) -> IVec2 {
        let i = index as usize * 2;
        IVec2::new(
            i32::from(self.vertices_flattened[i]),
            i32::from(self.vertices_flattened[i + 1]),
        )
    }
}

#[inline(always)]
fn cross(a: IVec2, b: IVec2, c: IVec2) -> i64 {
    let ab = (i64::from(b.x - a.x), i64::from(b.y - a.y));
    let ac = (i64::from(c.x - a.x), i64::from(c.y - a.y));
    ab.0 * ac.1 - ab.1 * ac.0
}

#[inline(always)]
fn round_half_up(v: f64) -> i32 {
    (v + 0.5).floor() as i32
}

#[inline(always)]
fn canonical(a: IVec2, b: IVec2) -> (IVec2, IVec2) {
    if (a.x, a.y) <= (b.x, b.y) {
        (a, b)
    } else {
        (b, a)
    }
}

/// Where segment a-b meets the vertical line `x`. The caller guarantees the segment spans it.
#[inline(always)]
fn cross_vertical(a: IVec2, b: IVec2, x: i32) -> IVec2 {
    let (p, q) = canonical(a, b);
    let t = f64::from(x - p.x) / f64::from(q.x - p.x);
    IVec2::new(x, round_half_up(f64::from(p.y) + t * f64::from(q.y - p.y)))
}

/// Where segment a-b meets the horizontal line `y`. The caller guarantees the segment spans it.
#[inline(always)]
fn cross_horizontal(a: IVec2, b: IVec2, y: i32) -> IVec2 {
    let (p, q) = canonical(a, b);
    let t = f64::from(y - p.y) / f64::from(q.y - p.y);
    IVec2::new(round_half_up(f64::from(p.x) + t * f64::from(q.x - p.x)), y)
}

/// Grid lines at `k * EXTENT / granularity`, unbounded in both directions.
#[derive(Debug, Clone, Copy)]
struct Grid {
    granularity: i64,
}

impl Grid {
    fn new(granularity: i32) -> Option<Self> {
        (granularity > 1).then(|| Self {
            granularity: i64::from(granularity.min(EXTENT)),
        })
    }

    #[inline(always)]
    fn line(&self, k: i64) -> i32 {
        (k * i64::from(EXTENT)).div_euclid(self.granularity) as i32
    }

    #[inline(always)]
    fn cell_of(&self, v: i32) -> i64 {
        (i64::from(v) * self.granularity).div_euclid(i64::from(EXTENT))
    }

    /// Grid line coordinates strictly between `a` and `b`.
    fn lines_between(&self, a: i32, b: i32) -> impl Iterator<Item = i32> + '_ {
        let (lo, hi) = (a.min(b), a.max(b));
        (self.cell_of(lo)..=self.cell_of(hi) + 1)
            .map(move |k| self.line(k))
            .filter(move |&c| c > lo && c < hi)
    }
}

#[inline(always)]
fn push_dedup(out: &mut Vec<IVec2>, p: IVec2) {
    if out.last() != Some(&p) {
        out.push(p);
    }
}

/// Append the grid crossings strictly inside a-b, ordered from a to b. Crossings are ordered
/// along the canonical direction of the edge, so b-a yields exactly the reverse sequence.
fn push_crossings(grid: Grid, a: IVec2, b: IVec2, out: &mut Vec<IVec2>) {
    let (p, q) = canonical(a, b);
    let mut crossings: Vec<(f64, IVec2)> = Vec::new();
    if p.x != q.x {
        let dx = f64::from(q.x - p.x);
        for x in grid.lines_between(p.x, q.x) {
            crossings.push((f64::from(x - p.x) / dx, cross_vertical(p, q, x)));
        }
    }
    if p.y != q.y {
        let dy = f64::from(q.y - p.y);
        for y in grid.lines_between(p.y, q.y) {
            crossings.push((f64::from(y - p.y) / dy, cross_horizontal(p, q, y)));
        }
    }
    crossings.sort_by(|l, r| l.0.total_cmp(&r.0));
    if p != a {
        crossings.reverse();
    }
    for (_, point) in crossings {
        push_dedup(out, point);
    }
}

/// Insert a vertex at every grid-line crossing of the line. Granularity at or below 1 returns
/// the input unchanged. Rings come back closed.
pub fn subdivide_vertex_line(points: &[IVec2], granularity: i32, is_ring: bool) -> Vec<IVec2> {
    let Some(&first) = points.first() else {
        return Vec::new();
    };
    let grid = Grid::new(granularity);
    let n = points.len();
    let segments = if is_ring { n } else { n - 1 };

    let mut out = Vec::with_capacity(n * 2);
    out.push(first);
    for i in 0..segments {
        let a = points[i];
        let b = points[(i + 1) % n];
        if let Some(grid) = grid {
            push_crossings(grid, a, b, &mut out);
        }
        push_dedup(&mut out, b);
    }
    out
}

#[inline(always)]
fn inside_tile(p: IVec2) -> bool {
    (0..=EXTENT).contains(&p.x) && (0..=EXTENT).contains(&p.y)
}

/// Subdivide a line and drop the runs that leave the tile, splitting it where it does.
pub fn subdivide_line_clipped(points: &[IVec2], granularity: i32) -> Vec<Vec<IVec2>> {
    let mut runs = Vec::new();
    let mut run: Vec<IVec2> = Vec::new();
    for p in subdivide_vertex_line(points, granularity, false) {
        if inside_tile(p) {
            run.push(p);
        } else if !run.is_empty() {
            if run.len() > 1 {
                runs.push(std::mem::take(&mut run));
            } else {
                run.clear();
            }
        }
    }
    if run.len() > 1 {
        runs.push(run);
    }
    runs
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
}

impl Axis {
    #[inline(always)]
    fn of(self, p: IVec2) -> i32 {
        match self {
            Axis::X => p.x,
            Axis::Y => p.y,
        }
    }
}

/// Twice the signed area of a ring.
fn ring_area2(ring: &[IVec2]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (p, q) = (ring[i], ring[(i + 1) % n]);
            i64::from(p.x) * i64::from(q.y) - i64::from(q.x) * i64::from(p.y)
        })
        .sum()
}

/// Where a-b meets the grid line. Exact when an endpoint lies on the line or the edge is
/// perpendicular to it.
#[inline(always)]
fn line_hit(a: IVec2, b: IVec2, axis: Axis, value: i32) -> IVec2 {
    if axis.of(a) == value {
        return a;
    }
    if axis.of(b) == value {
        return b;
    }
    match axis {
        Axis::X => cross_vertical(a, b, value),
        Axis::Y => cross_horizontal(a, b, value),
    }
}

/// Keep the part of `ring` on one side of a grid line, the line itself included.
fn clip_ring(ring: &[IVec2], axis: Axis, value: i32, keep_above: bool) -> Vec<IVec2> {
    let inside = |p: IVec2| {
        if keep_above {
            axis.of(p) >= value
        } else {
            axis.of(p) <= value
        }
    };
    let mut out = Vec::with_capacity(ring.len() + 2);
    let Some(&last) = ring.last() else {
        return out;
    };
    let mut prev = last;
    for &p in ring {
        match (inside(prev), inside(p)) {
            (true, true) => push_dedup(&mut out, p),
            (false, true) => {
                push_dedup(&mut out, line_hit(prev, p, axis, value));
                push_dedup(&mut out, p);
            }
            (true, false) => push_dedup(&mut out, line_hit(prev, p, axis, value)),
            (false, false) => {}
        }
        prev = p;
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

/// Smallest and largest coordinate of the ring along `axis`.
fn ring_span(ring: &[IVec2], axis: Axis) -> (i32, i32) {
    ring.iter()
        .map(|&p| axis.of(p))
        .fold((i32::MAX, i32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Indices in `sorted` whose key lies strictly between `(fixed, lo)` and `(fixed, hi)`.
/// `sorted` is ordered by `(x, y)` when `vertical`, by `(y, x)` otherwise.
fn vertices_between(vertices: &[IVec2], sorted: &[u32], vertical: bool, fixed: i32, lo: i32, hi: i32) -> Vec<u32> {
    let key = |i: u32| {
        let v = vertices[i as usize];
        if vertical {
            (v.x, v.y)
        } else {
            (v.y, v.x)
        }
    };
    let start = sorted.partition_point(|&i| key(i) <= (fixed, lo));
    let end = sorted.partition_point(|&i| key(i) < (fixed, hi));
    sorted[start..end.max(start)].to_vec()
}

/// Extra triangles that stitch T-junctions on axis-aligned edges. An edge a-b with vertices
/// strictly between gets the zero-area fan `(b, a, p1), (b, p1, p2), ...`.
pub fn fix_tjoints(vertices: &[IVec2], triangles: &[u32]) -> Vec<u32> {
    let mut by_x: Vec<u32> = (0..vertices.len() as u32).collect();
    by_x.sort_by_key(|&i| {
        let v = vertices[i as usize];
        (v.x, v.y)
    });
    let mut by_y = by_x.clone();
    by_y.sort_by_key(|&i| {
        let v = vertices[i as usize];
        (v.y, v.x)
    });

    let mut extra = Vec::new();
    for tri in triangles.chunks_exact(3) {
        for (ia, ib) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            let a = vertices[ia as usize];
            let b = vertices[ib as usize];
            let (mut inner, backwards) = if a.x == b.x && a.y != b.y {
                (vertices_between(vertices, &by_x, true, a.x, a.y.min(b.y), a.y.max(b.y)), a.y > b.y)
            } else if a.y == b.y && a.x != b.x {
                (vertices_between(vertices, &by_y, false, a.y, a.x.min(b.x), a.x.max(b.x)), a.x > b.x)
            } else {
                continue;
            };
            if backwards {
                inner.reverse();
            }
            let mut prev = ia;
            for p in inner {
                extra.extend_from_slice(&[ib, prev, p]);
                prev = p;
            }
        }
    }
    extra
}

struct Subdivider {
    grid: Option<Grid>,
    granularity: i32,
    tile: CanonicalTileId,
    vertices: Vec<IVec2>,
    lookup: HashMap<IVec2, u32>,
}

impl Subdivider {
    fn new(granularity: i32, tile: CanonicalTileId) -> Self {
        Self {
            grid: Grid::new(granularity),
            granularity,
            tile,
            vertices: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    fn vertex(&mut self, p: IVec2) -> u32 {
        if let Some(&i) = self.lookup.get(&p) {
            return i;
        }
        let i = self.vertices.len() as u32;
        self.vertices.push(p);
        self.lookup.insert(p, i);
        i
    }

    fn emit(&mut self, tri: [IVec2; 3], out: &mut Vec<u32>) {
        let [a, b, c] = tri;
        let ia = self.vertex(a);
        let ib = self.vertex(b);
        let ic = self.vertex(c);
        out.extend_from_slice(&[ia, ib, ic]);
    }

    fn emit_oriented(&mut self, a: IVec2, b: IVec2, c: IVec2, out: &mut Vec<u32>) {
        match cross(a, b, c) {
            0 => {}
            area if area > 0 => self.emit([a, b, c], out),
            _ => self.emit([a, c, b], out),
        }
    }

    /// Cut the triangle into one piece per grid cell. The triangle outline is first subdivided
    /// with the same crossings its neighbours and the polygon outline use, so consecutive outline
    /// points always share a cell and the cuts below only ever add exact grid points.
    fn clip_triangle(&mut self, grid: Grid, tri: [u32; 3], out: &mut Vec<u32>) -> Result<(), MeshError> {
        let [a, b, c] = tri.map(|i| self.vertices[i as usize]);
        if cross(a, b, c) == 0 {
            return Ok(());
        }

        let mut ring = Vec::new();
        for (p, q) in [(a, b), (b, c), (c, a)] {
            push_dedup(&mut ring, p);
            push_crossings(grid, p, q, &mut ring);
        }
        while ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }

        let (min_x, max_x) = ring_span(&ring, Axis::X);
        for cx in grid.cell_of(min_x)..=grid.cell_of(max_x) {
            let strip = clip_ring(&ring, Axis::X, grid.line(cx), true);
            let strip = clip_ring(&strip, Axis::X, grid.line(cx + 1), false);
            if ring_area2(&strip) == 0 {
                continue;
            }
            let (min_y, max_y) = ring_span(&strip, Axis::Y);
            for cy in grid.cell_of(min_y)..=grid.cell_of(max_y) {
                let piece = clip_ring(&strip, Axis::Y, grid.line(cy), true);
                let piece = clip_ring(&piece, Axis::Y, grid.line(cy + 1), false);
                if ring_area2(&piece) == 0 {
                    continue;
                }
                self.triangulate_piece(&piece, out)?;
            }
        }
        Ok(())
    }

    fn triangulate_piece(&mut self, piece: &[IVec2], out: &mut Vec<u32>) -> Result<(), MeshError> {
        if let &[a, b, c] = piece {
            self.emit_oriented(a, b, c, out);
            return Ok(());
        }
        let coords: Vec<f64> = piece
            .iter()
            .flat_map(|p| [f64::from(p.x), f64::from(p.y)])
            .collect();
        let triangles =
            earcutr::earcut(&coords, &[], 2).map_err(|e| MeshError::Triangulation(format!("{e:?}")))?;
        for t in triangles.chunks_exact(3) {
            self.emit_oriented(piece[t[0]], piece[t[1]], piece[t[2]], out);
        }
        Ok(())
    }

    /// Register the polyline, subdivide it and return chained index pairs.
    fn line_pairs(&mut self, points: &[IVec2], is_ring: bool) -> Vec<u32> {
        let subdivided = subdivide_vertex_line(points, self.granularity, is_ring);
        let indices: Vec<u32> = subdivided.iter().map(|&p| self.vertex(p)).collect();
        let mut pairs = Vec::with_capacity(indices.len() * 2);
        for w in indices.windows(2) {
            if w[0] != w[1] {
                pairs.extend_from_slice(&[w[0], w[1]]);
            }
        }
        pairs
    }

    /// Connect north and south tile edges to the pole sentinels.
    fn fill_poles(&mut self, triangles: &mut Vec<u32>) {
        let north = self.tile.touches_north_pole();
        let south = self.tile.touches_south_pole();
        if !north && !south {
            return;
        }
        let count = triangles.len() / 3;
        for t in 0..count {
            let tri = [triangles[3 * t], triangles[3 * t + 1], triangles[3 * t + 2]];
            for (ia, ib) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                let a = self.vertices[ia as usize];
                let b = self.vertices[ib as usize];
                let pole_y = if north && a.y == 0 && b.y == 0 && a.x < b.x {
                    i32::from(NORTH_POLE_Y)
                } else if south && a.y == EXTENT && b.y == EXTENT && a.x > b.x {
                    i32::from(SOUTH_POLE_Y)
                } else {
                    continue;
                };
                let pa = self.vertex(IVec2::new(a.x, pole_y));
                let pb = self.vertex(IVec2::new(b.x, pole_y));
                triangles.extend_from_slice(&[ib, ia, pa, ib, pa, pb]);
            }
        }
    }

    fn finish(mut self, triangles: Vec<u32>, line_indices: Vec<Vec<u32>>) -> Result<SubdivisionResult, MeshError> {
        let mut out = Vec::with_capacity(triangles.len() * 2);
        for tri in triangles.chunks_exact(3) {
            let tri = [tri[0], tri[1], tri[2]];
            match self.grid {
                Some(grid) => self.clip_triangle(grid, tri, &mut out)?,
                None => {
                    let [a, b, c] = tri.map(|i| self.vertices[i as usize]);
                    match cross(a, b, c) {
                        0 => {}
                        area if area > 0 => out.extend_from_slice(&tri),
                        _ => out.extend_from_slice(&[tri[0], tri[2], tri[1]]),
                    }
                }
            }
        }

        let stitches = fix_tjoints(&self.vertices, &out);
        out.extend(stitches);

        if self.grid.is_some() {
            self.fill_poles(&mut out);
        }

        let mut vertices_flattened = Vec::with_capacity(self.vertices.len() * 2);
        for v in &self.vertices {
            let (Ok(x), Ok(y)) = (i16::try_from(v.x), i16::try_from(v.y)) else {
                return Err(MeshError::CoordinateOutOfRange { x: v.x, y: v.y });
            };
            vertices_flattened.extend_from_slice(&[x, y]);
        }

        trace!(
            vertices = self.vertices.len(),
            triangles = out.len() / 3,
            granularity = self.granularity,
            "subdivided geometry"
        );

        Ok(SubdivisionResult {
            vertices_flattened,
            triangle_indices: out,
            line_indices,
        })
    }
}

/// Reject input that cannot be stored as `i16` before any grid walk.
fn check_range<'a>(points: impl IntoIterator<Item = &'a IVec2>) -> Result<(), MeshError> {
    let limit = i32::from(i16::MIN)..=i32::from(i16::MAX);
    match points
        .into_iter()
        .find(|p| !limit.contains(&p.x) || !limit.contains(&p.y))
    {
        Some(p) => Err(MeshError::CoordinateOutOfRange { x: p.x, y: p.y }),
        None => Ok(()),
    }
}

/// Subdivide already-triangulated geometry. Line lists are index pairs into `vertices` and are
/// subdivided alongside the triangles.
pub fn subdivide_triangles(
    vertices: &[IVec2],
    triangle_indices: &[u32],
    line_lists: &[Vec<u32>],
    tile: CanonicalTileId,
    granularity: i32,
) -> Result<SubdivisionResult, MeshError> {
    check_range(vertices)?;
    let mut subdivider = Subdivider::new(granularity, tile);
    let remap: Vec<u32> = vertices.iter().map(|&v| subdivider.vertex(v)).collect();

    let triangles: Vec<u32> = triangle_indices.iter().map(|&i| remap[i as usize]).collect();

    let mut line_indices = Vec::with_capacity(line_lists.len());
    for list in line_lists {
        let mut pairs = Vec::new();
        for pair in list.chunks_exact(2) {
            let segment = [vertices[pair[0] as usize], vertices[pair[1] as usize]];
            pairs.extend(subdivider.line_pairs(&segment, false));
        }
        line_indices.push(pairs);
    }

    subdivider.finish(triangles, line_indices)
}

/// Triangulate and subdivide a polygon. The first ring is the outer ring, the rest are holes.
/// Ring vertices come first in the output, and every ring yields a closed outline.
pub fn subdivide_fill(
    rings: &[Vec<IVec2>],
    tile: CanonicalTileId,
    granularity: i32,
) -> Result<SubdivisionResult, MeshError> {
    check_range(rings.iter().flatten())?;
    let mut subdivider = Subdivider::new(granularity, tile);
    let mut flat_coords: Vec<f64> = Vec::new();
    let mut hole_indices: Vec<usize> = Vec::new();
    let mut earcut_to_vertex: Vec<u32> = Vec::new();
    let mut line_indices = Vec::with_capacity(rings.len());

    for (ring_index, ring) in rings.iter().enumerate() {
        let mut corners: Vec<IVec2> = Vec::with_capacity(ring.len());
        for &p in ring {
            push_dedup(&mut corners, p);
        }
        while corners.len() > 1 && corners.first() == corners.last() {
            corners.pop();
        }
        if corners.len() < 3 {
            if ring_index == 0 {
                return Ok(SubdivisionResult::default());
            }
            continue;
        }
        if ring_index > 0 {
            hole_indices.push(earcut_to_vertex.len());
        }

        let mut points = subdivide_vertex_line(&corners, granularity, true);
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        let indices: Vec<u32> = points.iter().map(|&p| subdivider.vertex(p)).collect();
        let mut outline = Vec::with_capacity(indices.len() * 2);
        for (i, &a) in indices.iter().enumerate() {
            let b = indices[(i + 1) % indices.len()];
            if a != b {
                outline.extend_from_slice(&[a, b]);
            }
        }
        line_indices.push(outline);

        // Earcut sees the unsubdivided ring. Clipping cuts its edges at the outline's crossings.
        for p in &corners {
            flat_coords.extend_from_slice(&[f64::from(p.x), f64::from(p.y)]);
            earcut_to_vertex.push(subdivider.vertex(*p));
        }
    }

    let triangulation = earcutr::earcut(&flat_coords, &hole_indices, 2)
        .map_err(|e| MeshError::Triangulation(format!("{e:?}")))?;
    let triangles: Vec<u32> = triangulation.iter().map(|&i| earcut_to_vertex[i]).collect();

    subdivider.finish(triangles, line_indices)
}
