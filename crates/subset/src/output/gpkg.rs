//! GeoPackage 1.3 output
//!
//! One feature table of points in EPSG:4326 with a `geom` column holding
//! GeoPackage binary (the `GP` header followed by WKB). Multi-component
//! columns are stored as JSON text.

use super::{list_json, wkb};
use crate::error::Result;
use crate::geometry::BoundingBox;
use crate::table::GeoBatch;
use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use std::path::Path;

/// GeoPackage `application_id` ("GPKG")
const APPLICATION_ID: i32 = 0x4750_4B47;
/// GeoPackage 1.3.0
const USER_VERSION: i32 = 10300;
const SRS_ID: i32 = 4326;

pub const GEOMETRY_COLUMN: &str = "geom";
pub const ID_COLUMN: &str = "fid";

const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

const CORE_TABLES: &str = r#"
CREATE TABLE gpkg_spatial_ref_sys (
    srs_name TEXT NOT NULL,
    srs_id INTEGER PRIMARY KEY,
    organization TEXT NOT NULL,
    organization_coordsys_id INTEGER NOT NULL,
    definition TEXT NOT NULL,
    description TEXT
);
CREATE TABLE gpkg_contents (
    table_name TEXT NOT NULL PRIMARY KEY,
    data_type TEXT NOT NULL,
    identifier TEXT UNIQUE,
    description TEXT DEFAULT '',
    last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    min_x DOUBLE,
    min_y DOUBLE,
    max_x DOUBLE,
    max_y DOUBLE,
    srs_id INTEGER,
    CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
CREATE TABLE gpkg_geometry_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    geometry_type_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL,
    z TINYINT NOT NULL,
    m TINYINT NOT NULL,
    CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
    CONSTRAINT uk_gc_table_name UNIQUE (table_name),
    CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
    CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
"#;

/// Write `batch` as feature table `table` of a new GeoPackage at `path`
pub fn write(batch: &GeoBatch, path: &Path, table: &str) -> Result<()> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch(&format!(
        "PRAGMA application_id = {}; PRAGMA user_version = {};",
        APPLICATION_ID, USER_VERSION
    ))?;

    let tx = conn.transaction()?;
    tx.execute_batch(CORE_TABLES)?;
    insert_spatial_ref_sys(&tx)?;

    let schema = batch.schema();
    let columns = schema
        .fields()
        .iter()
        .zip(batch.batch().columns())
        .map(|(field, array)| SqlColumn::new(array).map(|c| (field.name().clone(), c)))
        .collect::<Result<Vec<_>>>()?;

    let mut ddl = format!(
        "CREATE TABLE {} ({} INTEGER PRIMARY KEY AUTOINCREMENT, {} POINT",
        quote(table),
        quote(ID_COLUMN),
        quote(GEOMETRY_COLUMN)
    );
    for (name, column) in &columns {
        ddl.push_str(&format!(", {} {}", quote(name), column.sql_type()));
    }
    ddl.push(')');
    tx.execute(&ddl, [])?;

    let bbox = batch.bbox().unwrap_or(BoundingBox {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 0.0,
        max_y: 0.0,
    });
    tx.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, description, min_x, min_y, max_x, max_y, srs_id)
         VALUES (?1, 'features', ?1, 'GEDI subset', ?2, ?3, ?4, ?5, ?6)",
        params![table, bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y, SRS_ID],
    )?;
    tx.execute(
        "INSERT INTO gpkg_geometry_columns (table_name, column_name, geometry_type_name, srs_id, z, m)
         VALUES (?1, ?2, 'POINT', ?3, 0, 0)",
        params![table, GEOMETRY_COLUMN, SRS_ID],
    )?;

    {
        let placeholders = vec!["?"; columns.len() + 1].join(", ");
        let names = std::iter::once(quote(GEOMETRY_COLUMN))
            .chain(columns.iter().map(|(name, _)| quote(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            names,
            placeholders
        ))?;

        let lon = batch.lon().values();
        let lat = batch.lat().values();
        for row in 0..batch.num_rows() {
            let geometry = Value::Blob(geometry_blob(lon[row], lat[row]));
            let values = std::iter::once(Ok(geometry))
                .chain(columns.iter().map(|(_, column)| column.value(row)))
                .collect::<Result<Vec<_>>>()?;
            insert.execute(params_from_iter(values))?;
        }
    }

    tx.commit()?;
    Ok(())
}

fn insert_spatial_ref_sys(conn: &Connection) -> Result<()> {
    let mut insert = conn.prepare(
        "INSERT INTO gpkg_spatial_ref_sys (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    insert.execute(params![
        "Undefined cartesian SRS",
        -1,
        "NONE",
        -1,
        "undefined",
        "undefined cartesian coordinate reference system"
    ])?;
    insert.execute(params![
        "Undefined geographic SRS",
        0,
        "NONE",
        0,
        "undefined",
        "undefined geographic coordinate reference system"
    ])?;
    insert.execute(params![
        "WGS 84 geodetic",
        SRS_ID,
        "EPSG",
        SRS_ID,
        WGS84_WKT,
        "longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid"
    ])?;
    Ok(())
}

/// GeoPackage binary: `GP`, version 0, little-endian flags without
/// envelope, SRS id, then WKB
fn geometry_blob(x: f64, y: f64) -> Vec<u8> {
    let mut blob = Vec::with_capacity(8 + wkb::POINT_SIZE);
    blob.extend_from_slice(b"GP");
    blob.push(0);
    blob.push(0b0000_0001);
    blob.extend_from_slice(&SRS_ID.to_le_bytes());
    blob.extend_from_slice(&wkb::point(x, y));
    blob
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// A column converted once to the SQLite storage class it is written as
enum SqlColumn {
    Integer(Int64Array),
    Real(Float64Array),
    Boolean(BooleanArray),
    Text(StringArray),
    Json(ArrayRef),
}

impl SqlColumn {
    fn new(array: &ArrayRef) -> Result<Self> {
        Ok(match array.data_type() {
            DataType::Boolean => SqlColumn::Boolean(array.as_boolean().clone()),
            dt if dt.is_integer() => {
                SqlColumn::Integer(cast(array, &DataType::Int64)?.as_primitive::<Int64Type>().clone())
            }
            dt if dt.is_floating() || dt.is_numeric() => {
                SqlColumn::Real(cast(array, &DataType::Float64)?.as_primitive::<Float64Type>().clone())
            }
            DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => {
                SqlColumn::Json(array.clone())
            }
            _ => SqlColumn::Text(cast(array, &DataType::Utf8)?.as_string::<i32>().clone()),
        })
    }

    fn sql_type(&self) -> &'static str {
        match self {
            SqlColumn::Integer(_) => "INTEGER",
            SqlColumn::Real(_) => "DOUBLE",
            SqlColumn::Boolean(_) => "BOOLEAN",
            SqlColumn::Text(_) | SqlColumn::Json(_) => "TEXT",
        }
    }

    fn value(&self, row: usize) -> Result<Value> {
        Ok(match self {
            SqlColumn::Integer(a) if a.is_valid(row) => Value::Integer(a.value(row)),
            SqlColumn::Real(a) if a.is_valid(row) && !a.value(row).is_nan() => Value::Real(a.value(row)),
            SqlColumn::Boolean(a) if a.is_valid(row) => Value::Integer(i64::from(a.value(row))),
            SqlColumn::Text(a) if a.is_valid(row) => Value::Text(a.value(row).to_string()),
            SqlColumn::Json(a) => match list_json(a.as_ref(), row)? {
                Some(json) => Value::Text(json),
                None => Value::Null,
            },
            _ => Value::Null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::two_dimensional;
    use crate::table::{BEAM_COLUMN, FILENAME_COLUMN};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn sample() -> GeoBatch {
        let xvar = two_dimensional(Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0, 4.0])), 2).unwrap();
        let schema = Arc::new(Schema::new(vec![
            Field::new("agbd", DataType::Float32, true),
            Field::new("l2_quality_flag", DataType::UInt8, true),
            Field::new("xvar", xvar.data_type().clone(), true),
            Field::new(FILENAME_COLUMN, DataType::Utf8, true),
            Field::new(BEAM_COLUMN, DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(arrow::array::Float32Array::from(vec![Some(10.5), None])),
                Arc::new(arrow::array::UInt8Array::from(vec![1, 0])),
                xvar,
                Arc::new(StringArray::from(vec!["a.h5", "a.h5"])),
                Arc::new(StringArray::from(vec!["0000", "1011"])),
            ],
        )
        .unwrap();
        GeoBatch::try_new(batch, Float64Array::from(vec![12.0, 12.5]), Float64Array::from(vec![-1.5, -1.0])).unwrap()
    }

    #[test]
    fn test_write_geopackage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subset.gpkg");
        write(&sample(), &path, "subset").unwrap();

        let conn = Connection::open(&path).unwrap();
        let app_id: i32 = conn.query_row("PRAGMA application_id", [], |r| r.get(0)).unwrap();
        assert_eq!(app_id, APPLICATION_ID);

        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('subset') ORDER BY cid").unwrap();
        let names: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(names, vec!["fid", "geom", "agbd", "l2_quality_flag", "xvar", "filename", "BEAM"]);

        let (agbd, xvar, beam): (Option<f64>, String, String) = conn
            .query_row("SELECT agbd, xvar, BEAM FROM subset ORDER BY fid LIMIT 1", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(agbd, Some(10.5));
        assert_eq!(xvar, "[1.0,2.0]");
        assert_eq!(beam, "0000");

        let null_agbd: Option<f64> = conn
            .query_row("SELECT agbd FROM subset WHERE fid = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(null_agbd, None);

        let blob: Vec<u8> = conn
            .query_row("SELECT geom FROM subset WHERE fid = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(&blob[0..2], b"GP");
        assert_eq!(i32::from_le_bytes(blob[4..8].try_into().unwrap()), 4326);
        assert_eq!(&blob[8..], wkb::point(12.0, -1.5).as_slice());

        let (kind, min_x): (String, f64) = conn
            .query_row("SELECT data_type, min_x FROM gpkg_contents WHERE table_name = 'subset'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(kind, "features");
        assert_eq!(min_x, 12.0);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("land_cover_data/landsat_treecover"), "\"land_cover_data/landsat_treecover\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
