use glam::{DMat4, DVec2, DVec4, IVec2};
use rayon::prelude::*;
use tracing::warn;

use globe_tiles::geo::{mercator_x_from_lng, mercator_y_from_lat, project_tile_coordinates_to_sphere, MAX_VALID_LATITUDE};
use globe_tiles::mesh::{subdivide_fill, subdivide_vertex_line, SubdivisionGranularitySetting, TileMeshUsage};
use globe_tiles::projection::ClippingPlane;
use globe_tiles::tile::{CanonicalTileId, EXTENT, NORTH_POLE_Y, SOUTH_POLE_Y};
use globe_tiles::{Projection, Transform};

use crate::braille::BrailleCanvas;
use crate::map::geometry::draw_segment;

/// A geographic ring or line as `(lng, lat)` pairs.
pub type LineString = Vec<(f64, f64)>;

/// Wireframes stop at this tile zoom to keep the grid readable.
const MAX_WIREFRAME_ZOOM: u8 = 5;

/// Wireframe lines are drawn every `EXTENT / WIREFRAME_DIVISIONS` units.
const WIREFRAME_DIVISIONS: i32 = 8;

const GRATICULE_STEP_DEGREES: i32 = 30;

const ROOT: CanonicalTileId = CanonicalTileId { z: 0, x: 0, y: 0 };

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub show_land: bool,
    pub show_coastlines: bool,
    pub show_graticule: bool,
    pub show_wireframe: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_land: true,
            show_coastlines: true,
            show_graticule: true,
            show_wireframe: false,
        }
    }
}

/// One canvas per colour.
pub struct MapLayers {
    pub graticule: BrailleCanvas,
    pub wireframe: BrailleCanvas,
    pub land: BrailleCanvas,
    pub coastlines: BrailleCanvas,
}

/// Vertices in root-tile coordinates and the segments between them.
#[derive(Debug, Default, Clone)]
pub struct EdgeLayer {
    vertices: Vec<IVec2>,
    edges: Vec<[u32; 2]>,
}

impl EdgeLayer {
    pub fn add_polyline(&mut self, points: &[IVec2]) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(points);
        for i in 1..points.len() as u32 {
            self.edges.push([base + i - 1, base + i]);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn draw(&self, canvas: &mut BrailleCanvas, projector: &VertexProjector) {
        let screen: Vec<Option<DVec2>> = self.vertices.par_iter().map(|&v| projector.project(v)).collect();
        for &[a, b] in &self.edges {
            if let (Some(pa), Some(pb)) = (screen[a as usize], screen[b as usize]) {
                draw_segment(canvas, pa, pb);
            }
        }
    }
}

/// Projects tile-local points to screen pixels by blending the flat and globe clip positions.
pub struct VertexProjector {
    tile: CanonicalTileId,
    flat: DMat4,
    globe: Option<(DMat4, ClippingPlane, f64)>,
    width: f64,
    height: f64,
}

impl VertexProjector {
    pub fn new(projection: &Projection, transform: &Transform, tile: CanonicalTileId) -> Self {
        let globe = projection
            .as_spherical()
            .filter(|globe| globe.use_globe_rendering())
            .map(|globe| (globe.globe_matrix(), *globe.clipping_plane(), globe.globeness()));
        Self {
            tile,
            flat: transform.tile_pos_matrix(tile),
            globe,
            width: transform.width,
            height: transform.height,
        }
    }

    pub fn project(&self, p: IVec2) -> Option<DVec2> {
        let (x, y) = (f64::from(p.x), f64::from(p.y));
        // Pole rows collapse onto the tile edge on the flat map
        let flat_y = if p.y <= i32::from(NORTH_POLE_Y) {
            0.0
        } else if p.y >= i32::from(SOUTH_POLE_Y) {
            f64::from(EXTENT)
        } else {
            y
        };
        let flat = self.flat * DVec4::new(x, flat_y, 0.0, 1.0);

        let clip = match &self.globe {
            None => flat,
            Some((matrix, plane, globeness)) => {
                let sphere = project_tile_coordinates_to_sphere(x, y, self.tile);
                if !plane.is_visible(sphere) {
                    return None;
                }
                flat.lerp(*matrix * sphere.extend(1.0), *globeness)
            }
        };
        if clip.w <= 0.0 {
            return None;
        }
        Some(DVec2::new(
            (clip.x / clip.w * 0.5 + 0.5) * self.width,
            (-clip.y / clip.w * 0.5 + 0.5) * self.height,
        ))
    }

    /// Whether any of a 3×3 sample of the tile lands near the viewport.
    fn tile_might_be_visible(&self) -> bool {
        let (w, h) = (self.width, self.height);
        (0..=2).any(|i| {
            (0..=2).any(|j| {
                let p = IVec2::new(i * EXTENT / 2, j * EXTENT / 2);
                self.project(p)
                    .is_some_and(|s| s.x >= -w && s.x <= 2.0 * w && s.y >= -h && s.y <= 2.0 * h)
            })
        })
    }
}

/// World geometry pre-subdivided against the root tile, drawn through the active projection.
pub struct MapRenderer {
    granularity: SubdivisionGranularitySetting,
    land: EdgeLayer,
    coastlines: EdgeLayer,
    graticule: EdgeLayer,
    pub settings: DisplaySettings,
}

/// `(lng, lat)` to root-tile extent coordinates.
fn to_root_tile(lng: f64, lat: f64) -> IVec2 {
    let lat = lat.clamp(-MAX_VALID_LATITUDE, MAX_VALID_LATITUDE);
    let extent = f64::from(EXTENT);
    IVec2::new(
        (mercator_x_from_lng(lng) * extent).round() as i32,
        (mercator_y_from_lat(lat) * extent).round() as i32,
    )
}

impl MapRenderer {
    pub fn new(granularity: SubdivisionGranularitySetting) -> Self {
        let mut renderer = Self {
            granularity,
            land: EdgeLayer::default(),
            coastlines: EdgeLayer::default(),
            graticule: EdgeLayer::default(),
            settings: DisplaySettings::default(),
        };
        renderer.build_graticule();
        renderer
    }

    fn line_granularity(&self) -> i32 {
        self.granularity.line.for_zoom(0) as i32
    }

    fn build_graticule(&mut self) {
        let granularity = self.line_granularity();
        let max_lat = MAX_VALID_LATITUDE.floor() as i32;
        for lng in (-180..180).step_by(GRATICULE_STEP_DEGREES as usize) {
            let meridian = [to_root_tile(f64::from(lng), f64::from(max_lat)), to_root_tile(f64::from(lng), f64::from(-max_lat))];
            self.graticule
                .add_polyline(&subdivide_vertex_line(&meridian, granularity, false));
        }
        for lat in (-60..=60).step_by(GRATICULE_STEP_DEGREES as usize) {
            let parallel = [to_root_tile(-180.0, f64::from(lat)), to_root_tile(180.0, f64::from(lat))];
            self.graticule
                .add_polyline(&subdivide_vertex_line(&parallel, granularity, false));
        }
    }

    /// Add a land polygon (outer ring first, then holes). Its outline is subdivided with the
    /// fill granularity so it bends with the globe.
    pub fn add_land(&mut self, rings: &[LineString]) {
        let rings: Vec<Vec<IVec2>> = rings
            .iter()
            .map(|ring| ring.iter().map(|&(lng, lat)| to_root_tile(lng, lat)).collect())
            .collect();
        let granularity = self.granularity.fill.for_zoom(0) as i32;
        match subdivide_fill(&rings, ROOT, granularity) {
            Ok(result) => {
                let base = self.land.vertices.len() as u32;
                self.land
                    .vertices
                    .extend((0..result.vertex_count() as u32).map(|i| result.vertex(i)));
                for outline in &result.line_indices {
                    self.land
                        .edges
                        .extend(outline.chunks_exact(2).map(|pair| [base + pair[0], base + pair[1]]));
                }
            }
            Err(e) => warn!(error = %e, "skipping land polygon"),
        }
    }

    pub fn add_coastline(&mut self, line: &[(f64, f64)]) {
        let points: Vec<IVec2> = line.iter().map(|&(lng, lat)| to_root_tile(lng, lat)).collect();
        let subdivided = subdivide_vertex_line(&points, self.line_granularity(), false);
        self.coastlines.add_polyline(&subdivided);
    }

    pub fn has_data(&self) -> bool {
        !self.land.is_empty() || !self.coastlines.is_empty()
    }

    pub fn land_edge_count(&self) -> usize {
        self.land.edge_count()
    }

    pub fn toggle_wireframe(&mut self) {
        self.settings.show_wireframe = !self.settings.show_wireframe;
    }

    pub fn toggle_graticule(&mut self) {
        self.settings.show_graticule = !self.settings.show_graticule;
    }

    /// Rasterise everything for a canvas of `width`×`height` characters. `transform` must be
    /// sized in dots.
    pub fn render(&self, width: usize, height: usize, projection: &mut Projection, transform: &Transform) -> MapLayers {
        let mut layers = MapLayers {
            graticule: BrailleCanvas::new(width, height),
            wireframe: BrailleCanvas::new(width, height),
            land: BrailleCanvas::new(width, height),
            coastlines: BrailleCanvas::new(width, height),
        };

        let root = VertexProjector::new(projection, transform, ROOT);
        if self.settings.show_graticule {
            self.graticule.draw(&mut layers.graticule, &root);
        }
        if self.settings.show_land {
            self.land.draw(&mut layers.land, &root);
        }
        if self.settings.show_coastlines {
            self.coastlines.draw(&mut layers.coastlines, &root);
        }
        if self.settings.show_wireframe {
            self.draw_wireframe(&mut layers.wireframe, projection, transform);
        }
        layers
    }

    fn draw_wireframe(&self, canvas: &mut BrailleCanvas, projection: &mut Projection, transform: &Transform) {
        let zoom = transform.tile_zoom().min(MAX_WIREFRAME_ZOOM);
        let tiles: Vec<CanonicalTileId> = CanonicalTileId::all_at_zoom(zoom).collect();
        let shared: &Projection = projection;
        let visible: Vec<CanonicalTileId> = tiles
            .into_par_iter()
            .filter(|&tile| VertexProjector::new(shared, transform, tile).tile_might_be_visible())
            .collect();

        let step = EXTENT / WIREFRAME_DIVISIONS;
        for tile in visible {
            let mesh = match projection.tile_mesh(tile, false, true, TileMeshUsage::Raster) {
                Ok(mesh) => mesh,
                Err(e) => {
                    warn!(error = %e, z = tile.z, x = tile.x, y = tile.y, "no mesh for tile");
                    continue;
                }
            };
            let projector = VertexProjector::new(projection, transform, tile);
            let screen: Vec<Option<DVec2>> = mesh
                .vertices
                .par_iter()
                .map(|&[x, y]| projector.project(IVec2::new(i32::from(x), i32::from(y))))
                .collect();

            for tri in mesh.indices.triangles() {
                for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                    let (va, vb) = (mesh.vertices[a as usize], mesh.vertices[b as usize]);
                    let on_lattice = (va[0] == vb[0] && i32::from(va[0]) % step == 0)
                        || (va[1] == vb[1] && i32::from(va[1]) % step == 0);
                    if !on_lattice {
                        continue;
                    }
                    if let (Some(pa), Some(pb)) = (screen[a as usize], screen[b as usize]) {
                        draw_segment(canvas, pa, pb);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globe_tiles::ProjectionConfig;

    fn square(lng: f64, lat: f64, size: f64) -> LineString {
        vec![
            (lng, lat),
            (lng + size, lat),
            (lng + size, lat + size),
            (lng, lat + size),
            (lng, lat),
        ]
    }

    #[test]
    fn test_root_tile_coordinates() {
        assert_eq!(to_root_tile(0.0, 0.0), IVec2::new(4096, 4096));
        assert_eq!(to_root_tile(-180.0, 90.0), IVec2::new(0, 0));
        assert_eq!(to_root_tile(180.0, -90.0), IVec2::new(8192, 8192));
    }

    #[test]
    fn test_flat_projector_matches_transform() {
        let transform = Transform::new(200.0, 120.0);
        let projection = Projection::from_name("mercator", &ProjectionConfig::default());
        let projector = VertexProjector::new(&projection, &transform, ROOT);
        let p = projector.project(IVec2::new(4096, 4096)).unwrap();
        let (x, y) = transform.project_flat(0.0, 0.0).unwrap();
        assert!((p.x - x).abs() < 1e-6 && (p.y - y).abs() < 1e-6);
    }

    #[test]
    fn test_globe_hides_far_side() {
        let mut transform = Transform::new(200.0, 120.0);
        transform.set_zoom(1.0);
        let mut projection = Projection::from_name("globe", &ProjectionConfig::default());
        projection.update(&transform, 0.0);
        let projector = VertexProjector::new(&projection, &transform, ROOT);
        assert!(projector.project(IVec2::new(4096, 4096)).is_some());
        assert!(projector.project(IVec2::new(0, 4096)).is_none());
    }

    #[test]
    fn test_render_draws_land_and_wireframe() {
        let mut renderer = MapRenderer::new(SubdivisionGranularitySetting::globe());
        renderer.add_land(&[square(-20.0, -20.0, 40.0)]);
        assert!(renderer.has_data());
        assert!(renderer.land_edge_count() > 4);
        renderer.toggle_wireframe();

        let mut transform = Transform::new(160.0, 96.0);
        transform.set_zoom(1.0);
        let mut projection = Projection::from_name("globe", &ProjectionConfig::default());
        projection.update(&transform, 0.0);

        let layers = renderer.render(80, 24, &mut projection, &transform);
        assert!(!layers.land.is_blank());
        assert!(!layers.wireframe.is_blank());
        assert!(!layers.graticule.is_blank());
        assert!(layers.coastlines.is_blank());
    }
}
