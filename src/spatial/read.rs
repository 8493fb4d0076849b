//! Block-group layer reading: GeoPackage first, GeoJSON fallback.
//!
//! The fallback ladder mirrors the input handling of the source data: try the
//! named layer in the GeoPackage, then the first feature layer, then a
//! GeoJSON file with the same stem.

use std::convert::TryFrom;
use std::path::Path;

use geo_types::{Geometry, MultiPolygon};
use geozero::wkb::{FromWkb, WkbDialect};
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::spatial::BlockGroup;
use crate::table::normalize_geoid;

/// Read block groups from the GeoPackage, falling back to GeoJSON. The
/// result is geoid-normalized and sorted so downstream iteration order is
/// deterministic.
pub fn read_block_groups(gpkg: &Path, geojson: &Path, layer: &str) -> Result<Vec<BlockGroup>> {
    if gpkg.is_file() {
        match read_gpkg(gpkg, layer) {
            Ok(bgs) => return finalize(bgs, gpkg),
            Err(err) => warn!("could not read {}: {err}", gpkg.display()),
        }
    }
    if geojson.is_file() {
        let bgs = read_geojson(geojson)?;
        return finalize(bgs, geojson);
    }
    Err(PipelineError::MissingInput(gpkg.to_path_buf()))
}

fn finalize(mut bgs: Vec<BlockGroup>, source: &Path) -> Result<Vec<BlockGroup>> {
    if bgs.is_empty() {
        return Err(PipelineError::Geometry(format!(
            "no block-group geometries found in {}",
            source.display()
        )));
    }
    bgs.sort_by(|a, b| a.geoid.cmp(&b.geoid));
    info!("read {} block-group features from {}", bgs.len(), source.display());
    Ok(bgs)
}

/// Read a feature layer from a GeoPackage. Falls back to the first feature
/// layer when the named one is absent, as the original reader does.
pub fn read_gpkg(path: &Path, layer: &str) -> Result<Vec<BlockGroup>> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let mut stmt =
        conn.prepare("SELECT table_name, column_name FROM gpkg_geometry_columns")?;
    let layers: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    let (table, geom_col) = layers
        .iter()
        .find(|(name, _)| name == layer)
        .or_else(|| {
            if let Some(first) = layers.first() {
                warn!(
                    "layer `{layer}` not found in {}; using `{}`",
                    path.display(),
                    first.0
                );
            }
            layers.first()
        })
        .cloned()
        .ok_or_else(|| {
            PipelineError::Geometry(format!("{} has no feature layers", path.display()))
        })?;

    let id_col = pick_id_column(&conn, &table)?;
    let sql = format!("SELECT \"{id_col}\", \"{geom_col}\" FROM \"{table}\"");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut bgs = Vec::new();
    while let Some(row) = rows.next()? {
        let geoid = match row.get_ref(0)?.as_str() {
            Ok(text) => text.to_string(),
            Err(_) => {
                // Some exports store GEOIDs as integers.
                let raw: i64 = row.get(0)?;
                raw.to_string()
            }
        };
        let blob: Vec<u8> = row.get(1)?;
        let mut cursor = std::io::Cursor::new(&blob[..]);
        let geometry = Geometry::<f64>::from_wkb(&mut cursor, WkbDialect::Geopackage)
            .map_err(|e| PipelineError::Geometry(format!("bad GPKG geometry blob: {e}")))?;
        push_feature(&mut bgs, &geoid, geometry);
    }
    Ok(bgs)
}

fn pick_id_column(conn: &Connection, table: &str) -> Result<String> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<_>>()?;
    for candidate in ["GEOID_BG", "GEOID"] {
        if columns.iter().any(|c| c == candidate) {
            return Ok(candidate.to_string());
        }
    }
    Err(PipelineError::Geometry(format!(
        "layer `{table}` lacks a GEOID/GEOID_BG column"
    )))
}

/// Read block groups from a GeoJSON FeatureCollection.
pub fn read_geojson(path: &Path) -> Result<Vec<BlockGroup>> {
    let content = std::fs::read_to_string(path)?;
    let gj: geojson::GeoJson = content
        .parse()
        .map_err(|e: geojson::Error| PipelineError::Geometry(format!("bad GeoJSON: {e}")))?;
    let features = match gj {
        geojson::GeoJson::FeatureCollection(fc) => fc.features,
        geojson::GeoJson::Feature(f) => vec![f],
        geojson::GeoJson::Geometry(_) => {
            return Err(PipelineError::Geometry(
                "expected a FeatureCollection of block groups".into(),
            ))
        }
    };

    let mut bgs = Vec::new();
    for feature in features {
        let Some(geoid) = feature_geoid(&feature) else {
            return Err(PipelineError::Geometry(
                "feature lacks a GEOID/GEOID_BG property".into(),
            ));
        };
        let Some(gj_geom) = feature.geometry else {
            continue;
        };
        let geometry = Geometry::<f64>::try_from(gj_geom.value)
            .map_err(|e| PipelineError::Geometry(format!("bad GeoJSON geometry: {e}")))?;
        push_feature(&mut bgs, &geoid, geometry);
    }
    Ok(bgs)
}

fn feature_geoid(feature: &geojson::Feature) -> Option<String> {
    let props = feature.properties.as_ref()?;
    for key in ["GEOID_BG", "GEOID"] {
        match props.get(key) {
            Some(serde_json::Value::String(s)) => return Some(s.clone()),
            Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn push_feature(bgs: &mut Vec<BlockGroup>, raw_geoid: &str, geometry: Geometry<f64>) {
    let Some(geoid) = normalize_geoid(raw_geoid) else {
        warn!("skipping feature with blank GEOID");
        return;
    };
    match to_multipolygon(geometry) {
        Some(geometry) => bgs.push(BlockGroup { geoid, geometry }),
        None => warn!("skipping non-polygon feature {geoid}"),
    }
}

fn to_multipolygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Some(mp),
        _ => None,
    }
}
