use anyhow::{Context, Result};
use geojson::{GeoJson, Geometry, Value};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::map::{LineString, MapRenderer};

/// Land polygons, most detailed last so the first file found wins.
const LAND_FILES: [&str; 2] = ["ne_110m_land.json", "ne_50m_land.json"];
const COASTLINE_FILES: [&str; 2] = ["ne_110m_coastline.json", "ne_50m_coastline.json"];

/// Load the first land and coastline files found in `data_dir`. Returns the number of features.
pub fn load_all_geojson(renderer: &mut MapRenderer, data_dir: &Path) -> Result<usize> {
    let mut loaded = 0;

    if let Some(path) = LAND_FILES.iter().map(|f| data_dir.join(f)).find(|p| p.exists()) {
        match read_geojson(&path) {
            Ok(geojson) => {
                for_each_geometry(&geojson, &mut |geometry: &Geometry| {
                    for polygon in polygons(geometry) {
                        renderer.add_land(&polygon);
                        loaded += 1;
                    }
                });
                info!(path = %path.display(), "loaded land polygons");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to load land"),
        }
    }

    if let Some(path) = COASTLINE_FILES.iter().map(|f| data_dir.join(f)).find(|p| p.exists()) {
        match read_geojson(&path) {
            Ok(geojson) => {
                for_each_geometry(&geojson, &mut |geometry: &Geometry| {
                    for line in lines(geometry) {
                        renderer.add_coastline(&line);
                        loaded += 1;
                    }
                });
                info!(path = %path.display(), "loaded coastlines");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to load coastlines"),
        }
    }

    Ok(loaded)
}

fn read_geojson(path: &Path) -> Result<GeoJson> {
    let mut bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    simd_json::serde::from_slice(&mut bytes).with_context(|| format!("parsing {}", path.display()))
}

fn for_each_geometry<F>(geojson: &GeoJson, visit: &mut F)
where
    F: FnMut(&Geometry),
{
    match geojson {
        GeoJson::FeatureCollection(fc) => {
            for geometry in fc.features.iter().filter_map(|f| f.geometry.as_ref()) {
                visit(geometry);
            }
        }
        GeoJson::Feature(f) => {
            if let Some(geometry) = &f.geometry {
                visit(geometry);
            }
        }
        GeoJson::Geometry(geometry) => visit(geometry),
    }
}

fn to_line(coords: &[Vec<f64>]) -> LineString {
    coords
        .iter()
        .filter(|c| c.len() >= 2)
        .map(|c| (c[0], c[1]))
        .collect()
}

/// Polygons as lists of rings.
fn polygons(geometry: &Geometry) -> Vec<Vec<LineString>> {
    match &geometry.value {
        Value::Polygon(rings) => vec![rings.iter().map(|r| to_line(r)).collect()],
        Value::MultiPolygon(polygons) => polygons
            .iter()
            .map(|rings| rings.iter().map(|r| to_line(r)).collect())
            .collect(),
        Value::GeometryCollection(geometries) => geometries.iter().flat_map(polygons).collect(),
        _ => Vec::new(),
    }
}

fn lines(geometry: &Geometry) -> Vec<LineString> {
    match &geometry.value {
        Value::LineString(coords) => vec![to_line(coords)],
        Value::MultiLineString(lines) => lines.iter().map(|l| to_line(l)).collect(),
        Value::GeometryCollection(geometries) => geometries.iter().flat_map(lines).collect(),
        _ => Vec::new(),
    }
}

/// Coarse continents used when no data files are available.
pub fn generate_simple_world(renderer: &mut MapRenderer) {
    let continents: [&[(f64, f64)]; 6] = [
        // North America
        &[
            (-166.0, 68.0), (-164.0, 60.0), (-140.0, 59.0), (-125.0, 49.0), (-117.0, 32.0),
            (-105.0, 20.0), (-87.0, 15.0), (-81.0, 25.0), (-76.0, 35.0), (-67.0, 45.0),
            (-56.0, 52.0), (-78.0, 62.0), (-95.0, 70.0), (-130.0, 70.0),
        ],
        // South America
        &[
            (-78.0, 8.0), (-60.0, 10.0), (-35.0, -6.0), (-40.0, -22.0), (-57.0, -37.0),
            (-68.0, -55.0), (-75.0, -48.0), (-71.0, -18.0), (-81.0, -4.0),
        ],
        // Europe and Asia
        &[
            (-9.0, 37.0), (3.0, 43.0), (13.0, 45.0), (26.0, 38.0), (36.0, 36.0),
            (57.0, 24.0), (77.0, 8.0), (90.0, 22.0), (105.0, 10.0), (122.0, 30.0),
            (142.0, 46.0), (170.0, 66.0), (120.0, 73.0), (70.0, 73.0), (30.0, 70.0),
            (10.0, 59.0), (-5.0, 48.0),
        ],
        // Africa
        &[
            (-17.0, 21.0), (-8.0, 5.0), (9.0, 4.0), (13.0, -12.0), (18.0, -35.0),
            (32.0, -28.0), (40.0, -15.0), (51.0, 12.0), (33.0, 31.0), (10.0, 37.0),
            (-6.0, 36.0),
        ],
        // Australia
        &[
            (114.0, -22.0), (130.0, -12.0), (142.0, -11.0), (153.0, -27.0), (147.0, -39.0),
            (135.0, -34.0), (115.0, -34.0),
        ],
        // Antarctica, stopping at the Mercator limit
        &[
            (-180.0, -70.0), (-90.0, -72.0), (0.0, -70.0), (90.0, -66.0), (180.0, -70.0),
            (180.0, -85.0), (-180.0, -85.0),
        ],
    ];

    for outline in continents {
        let mut ring: LineString = outline.to_vec();
        ring.push(outline[0]);
        renderer.add_land(&[ring]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globe_tiles::mesh::SubdivisionGranularitySetting;

    #[test]
    fn test_geometry_extraction() {
        let geojson: GeoJson = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {}, "geometry":
                    {"type": "MultiPolygon", "coordinates": [
                        [[[0, 0], [10, 0], [10, 10], [0, 0]]],
                        [[[20, 0], [30, 0], [30, 10], [20, 0]], [[22, 1], [28, 1], [28, 8], [22, 1]]]
                    ]}},
                {"type": "Feature", "properties": {}, "geometry":
                    {"type": "LineString", "coordinates": [[0, 0], [5, 5]]}}
            ]
        }"#
        .parse()
        .unwrap();

        let mut found_polygons = Vec::new();
        let mut found_lines = Vec::new();
        for_each_geometry(&geojson, &mut |g: &Geometry| {
            found_polygons.extend(polygons(g));
            found_lines.extend(lines(g));
        });
        assert_eq!(found_polygons.len(), 2);
        assert_eq!(found_polygons[1].len(), 2);
        assert_eq!(found_lines, vec![vec![(0.0, 0.0), (5.0, 5.0)]]);
    }

    #[test]
    fn test_simple_world() {
        let mut renderer = MapRenderer::new(SubdivisionGranularitySetting::globe());
        assert!(!renderer.has_data());
        generate_simple_world(&mut renderer);
        assert!(renderer.has_data());
    }

    #[test]
    fn test_missing_directory_loads_nothing() {
        let mut renderer = MapRenderer::new(SubdivisionGranularitySetting::globe());
        let loaded = load_all_geojson(&mut renderer, Path::new("/nonexistent/globe-tiles")).unwrap();
        assert_eq!(loaded, 0);
    }
}
