//! Areal geometries out of GeoJSON documents

use crate::error::{Result, SubsetError};
use crate::geometry::{Coord, Polygon};
use serde_json::Value;

/// Collect every polygon of a GeoJSON object
///
/// Accepts `FeatureCollection`, `Feature`, `GeometryCollection`, `Polygon`
/// and `MultiPolygon`. Any other geometry type is an error.
pub fn polygons(value: &Value) -> Result<Vec<Polygon>> {
    let mut out = Vec::new();
    collect(value, &mut out)?;
    Ok(out)
}

fn collect(value: &Value, out: &mut Vec<Polygon>) -> Result<()> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SubsetError::Aoi("GeoJSON object without a type".to_string()))?;

    match kind {
        "FeatureCollection" => {
            for feature in array(value, "features")? {
                collect(feature, out)?;
            }
        }
        "Feature" => match value.get("geometry") {
            Some(geometry) if !geometry.is_null() => collect(geometry, out)?,
            _ => return Err(SubsetError::Aoi("feature without geometry".to_string())),
        },
        "GeometryCollection" => {
            for geometry in array(value, "geometries")? {
                collect(geometry, out)?;
            }
        }
        "Polygon" => out.push(polygon(field(value, "coordinates")?)?),
        "MultiPolygon" => {
            for coordinates in array(value, "coordinates")? {
                out.push(polygon(coordinates)?);
            }
        }
        other => {
            return Err(SubsetError::Aoi(format!(
                "{} is not an areal geometry",
                other
            )));
        }
    }

    Ok(())
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value> {
    value
        .get(name)
        .ok_or_else(|| SubsetError::Aoi(format!("missing {}", name)))
}

fn array<'a>(value: &'a Value, name: &str) -> Result<&'a Vec<Value>> {
    field(value, name)?
        .as_array()
        .ok_or_else(|| SubsetError::Aoi(format!("{} is not an array", name)))
}

fn polygon(coordinates: &Value) -> Result<Polygon> {
    let rings = coordinates
        .as_array()
        .ok_or_else(|| SubsetError::Aoi("polygon coordinates are not an array".to_string()))?;

    let mut rings = rings.iter().map(ring);
    let exterior = rings
        .next()
        .ok_or_else(|| SubsetError::Aoi("polygon without rings".to_string()))??;
    let holes = rings.collect::<Result<Vec<_>>>()?;

    Polygon::new(exterior, holes)
}

fn ring(value: &Value) -> Result<Vec<Coord>> {
    value
        .as_array()
        .ok_or_else(|| SubsetError::Aoi("ring is not an array".to_string()))?
        .iter()
        .map(position)
        .collect()
}

fn position(value: &Value) -> Result<Coord> {
    let items = value
        .as_array()
        .ok_or_else(|| SubsetError::Aoi("position is not an array".to_string()))?;

    match (
        items.first().and_then(Value::as_f64),
        items.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(SubsetError::Aoi(format!("invalid position {}", value))),
    }
}
