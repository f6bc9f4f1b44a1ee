//! GeoJSON persistence of bathymetry point collections

use crate::types::{BathyError, BathyResult, BathymetryPoint, Crs};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const CRS_URN_PREFIX: &str = "urn:ogc:def:crs:EPSG::";

/// Write points as a GeoJSON FeatureCollection of corrected positions.
///
/// All points must share one CRS, recorded in the collection's `crs` member.
pub fn write_geojson<W: Write>(points: &[BathymetryPoint], writer: W) -> BathyResult<()> {
    let crs = points.first().map_or(Crs::Wgs84, |p| p.crs);
    if let Some(other) = points.iter().find(|p| p.crs != crs) {
        return Err(BathyError::InvalidInput(format!(
            "Cannot write points in both {} and {} to one collection",
            crs, other.crs
        )));
    }

    let features = points
        .iter()
        .map(|p| {
            let mut properties = match serde_json::to_value(p)? {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            properties.remove("crs");
            Ok(json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [p.easting, p.northing] },
                "properties": properties,
            }))
        })
        .collect::<BathyResult<Vec<Value>>>()?;

    let collection = json!({
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": format!("{}{}", CRS_URN_PREFIX, crs.epsg()) } },
        "features": features,
    });
    serde_json::to_writer(writer, &collection)?;
    Ok(())
}

/// Read a FeatureCollection written by [`write_geojson`]
pub fn read_geojson<R: Read>(reader: R) -> BathyResult<Vec<BathymetryPoint>> {
    let collection: Value = serde_json::from_reader(reader)?;
    if collection.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return Err(BathyError::InvalidInput("Not a GeoJSON FeatureCollection".to_string()));
    }

    let crs = match collection.pointer("/crs/properties/name").and_then(Value::as_str) {
        Some(name) => parse_crs_name(name)?,
        None => Crs::Wgs84,
    };
    let crs_value = serde_json::to_value(crs)?;

    let features = collection
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| BathyError::InvalidInput("FeatureCollection without features".to_string()))?;

    features
        .iter()
        .map(|feature| {
            let mut properties = feature
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .ok_or_else(|| BathyError::InvalidInput("Feature without properties".to_string()))?;
            properties.insert("crs".to_string(), crs_value.clone());
            Ok(serde_json::from_value(Value::Object(properties))?)
        })
        .collect()
}

fn parse_crs_name(name: &str) -> BathyResult<Crs> {
    let code = name
        .rsplit(':')
        .next()
        .and_then(|c| c.parse::<u32>().ok())
        .ok_or_else(|| BathyError::InvalidInput(format!("Unrecognised CRS name: {}", name)))?;
    Crs::from_epsg(code)
}

pub fn save_points<P: AsRef<Path>>(points: &[BathymetryPoint], path: P) -> BathyResult<()> {
    let path = path.as_ref();
    log::info!("Writing {} bathymetry points to {}", points.len(), path.display());
    let mut writer = BufWriter::new(File::create(path)?);
    write_geojson(points, &mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn load_points<P: AsRef<Path>>(path: P) -> BathyResult<Vec<BathymetryPoint>> {
    let path = path.as_ref();
    let points = read_geojson(BufReader::new(File::open(path)?))?;
    log::info!("Read {} bathymetry points from {}", points.len(), path.display());
    Ok(points)
}
