use crate::mesh::SubdivisionResult;

/// Most vertices a single 16-bit indexed draw can address.
pub const MAX_VERTEX_ARRAY_LENGTH: usize = u16::MAX as usize;

/// One draw call's range in a packed mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshSegment {
    pub vertex_offset: usize,
    pub vertex_length: usize,
    pub primitive_offset: usize,
    pub primitive_length: usize,
}

/// Subdivided geometry split into 16-bit addressable segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedMesh {
    pub vertices: Vec<[i16; 2]>,
    /// Indices relative to their segment's `vertex_offset`
    pub triangles: Vec<[u16; 3]>,
    pub lines: Vec<[u16; 2]>,
    pub triangle_segments: Vec<MeshSegment>,
    pub line_segments: Vec<MeshSegment>,
}

impl PackedMesh {
    /// Resolve a packed primitive index back to its vertex.
    pub fn vertex(&self, segment: &MeshSegment, index: u16) -> [i16; 2] {
        self.vertices[segment.vertex_offset + usize::from(index)]
    }
}

pub fn pack_mesh(result: &SubdivisionResult) -> PackedMesh {
    pack_mesh_with_limit(result, MAX_VERTEX_ARRAY_LENGTH)
}

/// Pack with an explicit per-segment vertex limit.
pub fn pack_mesh_with_limit(result: &SubdivisionResult, limit: usize) -> PackedMesh {
    let source: Vec<[i16; 2]> = result
        .vertices_flattened
        .chunks_exact(2)
        .map(|v| [v[0], v[1]])
        .collect();
    let triangles: Vec<[u32; 3]> = result
        .triangle_indices
        .chunks_exact(3)
        .map(|t| [t[0], t[1], t[2]])
        .collect();
    let lines: Vec<[u32; 2]> = result
        .line_indices
        .iter()
        .flat_map(|list| list.chunks_exact(2).map(|l| [l[0], l[1]]))
        .collect();

    let mut packed = PackedMesh::default();

    if source.len() < limit {
        packed.triangles = triangles.iter().map(|t| t.map(|i| i as u16)).collect();
        packed.lines = lines.iter().map(|l| l.map(|i| i as u16)).collect();
        packed.triangle_segments.push(MeshSegment {
            vertex_offset: 0,
            vertex_length: source.len(),
            primitive_offset: 0,
            primitive_length: packed.triangles.len(),
        });
        packed.line_segments.push(MeshSegment {
            vertex_offset: 0,
            vertex_length: source.len(),
            primitive_offset: 0,
            primitive_length: packed.lines.len(),
        });
        packed.vertices = source;
        return packed;
    }

    // Lines get their own copies of the vertices they use.
    let mut triangle_out = Vec::with_capacity(triangles.len());
    packed.triangle_segments = fill_segments(&source, &triangles, limit, &mut packed.vertices, &mut triangle_out);
    packed.triangles = triangle_out;

    let mut line_out = Vec::with_capacity(lines.len());
    packed.line_segments = fill_segments(&source, &lines, limit, &mut packed.vertices, &mut line_out);
    packed.lines = line_out;

    packed
}

/// Copy vertices on demand into segments of at most `limit` vertices. A vertex already copied
/// into the current segment is reused, otherwise it is copied again.
fn fill_segments<const N: usize>(
    source: &[[i16; 2]],
    primitives: &[[u32; N]],
    limit: usize,
    vertices: &mut Vec<[i16; 2]>,
    out: &mut Vec<[u16; N]>,
) -> Vec<MeshSegment> {
    let mut segments = Vec::new();
    let mut latest: Vec<Option<usize>> = vec![None; source.len()];
    let mut current = MeshSegment {
        vertex_offset: vertices.len(),
        primitive_offset: out.len(),
        ..MeshSegment::default()
    };

    for primitive in primitives {
        let cutoff = current.vertex_offset;
        let needs_copy = |i: u32, latest: &[Option<usize>]| latest[i as usize].map_or(true, |at| at < cutoff);

        let mut missing: Vec<u32> = primitive.iter().copied().filter(|&i| needs_copy(i, &latest)).collect();
        missing.sort_unstable();
        missing.dedup();

        if current.vertex_length + missing.len() > limit {
            if current.primitive_length > 0 {
                segments.push(current);
            }
            current = MeshSegment {
                vertex_offset: vertices.len(),
                primitive_offset: out.len(),
                ..MeshSegment::default()
            };
        }

        let cutoff = current.vertex_offset;
        let mut packed = [0u16; N];
        for (slot, &i) in packed.iter_mut().zip(primitive.iter()) {
            let at = match latest[i as usize] {
                Some(at) if at >= cutoff => at,
                _ => {
                    let at = vertices.len();
                    vertices.push(source[i as usize]);
                    latest[i as usize] = Some(at);
                    current.vertex_length += 1;
                    at
                }
            };
            *slot = (at - cutoff) as u16;
        }
        out.push(packed);
        current.primitive_length += 1;
    }

    if current.primitive_length > 0 {
        segments.push(current);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_result(n: i16) -> SubdivisionResult {
        let mut result = SubdivisionResult::default();
        for y in 0..=n {
            for x in 0..=n {
                result.vertices_flattened.extend_from_slice(&[x * 10, y * 10]);
            }
        }
        let row = (n + 1) as u32;
        let mut outline = Vec::new();
        for y in 0..n as u32 {
            for x in 0..n as u32 {
                let v0 = y * row + x;
                result.triangle_indices.extend_from_slice(&[v0, v0 + row, v0 + 1, v0 + 1, v0 + row, v0 + row + 1]);
            }
            outline.extend_from_slice(&[y * row, (y + 1) * row]);
        }
        result.line_indices.push(outline);
        result
    }

    fn assert_resolves(result: &SubdivisionResult, packed: &PackedMesh) {
        let expected: Vec<[i16; 2]> = result
            .triangle_indices
            .iter()
            .map(|&i| {
                let v = result.vertex(i);
                [v.x as i16, v.y as i16]
            })
            .collect();
        let mut actual = Vec::new();
        for segment in &packed.triangle_segments {
            assert!(segment.vertex_length <= 8);
            for tri in &packed.triangles[segment.primitive_offset..segment.primitive_offset + segment.primitive_length] {
                for &i in tri {
                    assert!(usize::from(i) < segment.vertex_length);
                    actual.push(packed.vertex(segment, i));
                }
            }
        }
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_small_mesh_single_segment() {
        let result = grid_result(2);
        let packed = pack_mesh(&result);
        assert_eq!(packed.triangle_segments.len(), 1);
        assert_eq!(packed.line_segments.len(), 1);
        assert_eq!(packed.vertices.len(), 9);
        assert_eq!(packed.triangles.len(), 8);
        assert_eq!(packed.lines.len(), 2);
    }

    #[test]
    fn test_split_into_segments() {
        let result = grid_result(4);
        let packed = pack_mesh_with_limit(&result, 8);
        assert!(packed.triangle_segments.len() > 1);
        assert_resolves(&result, &packed);

        let total: usize = packed.triangle_segments.iter().map(|s| s.primitive_length).sum();
        assert_eq!(total, 32);
        let lines: usize = packed.line_segments.iter().map(|s| s.primitive_length).sum();
        assert_eq!(lines, 4);
    }

    #[test]
    fn test_empty_mesh() {
        let packed = pack_mesh(&SubdivisionResult::default());
        assert!(packed.vertices.is_empty());
        assert_eq!(packed.triangle_segments[0].primitive_length, 0);
    }
}
