//! FlatGeobuf output
//!
//! Written without a spatial index: magic bytes, the size-prefixed
//! `Header` table, then one size-prefixed `Feature` table per row. The
//! tables are assembled slot by slot with the flatbuffers builder.

use super::list_json;
use crate::error::Result;
use crate::table::GeoBatch;
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type, UInt8Type,
    UInt16Type, UInt32Type, UInt64Type,
};
use flatbuffers::{FlatBufferBuilder, TableFinishedWIPOffset, VOffsetT, WIPOffset};
use std::io::Write;

pub const MAGIC: [u8; 8] = [0x66, 0x67, 0x62, 0x03, 0x66, 0x67, 0x62, 0x00];

const GEOMETRY_POINT: u8 = 1;

/// Byte offset of field `id` in a table's vtable
const fn slot(id: u16) -> VOffsetT {
    4 + 2 * id
}

mod header {
    pub const NAME: u16 = 0;
    pub const ENVELOPE: u16 = 1;
    pub const GEOMETRY_TYPE: u16 = 2;
    pub const COLUMNS: u16 = 7;
    pub const FEATURES_COUNT: u16 = 8;
    pub const INDEX_NODE_SIZE: u16 = 9;
    pub const CRS: u16 = 10;
    pub const TITLE: u16 = 11;
}

mod column {
    pub const NAME: u16 = 0;
    pub const TYPE: u16 = 1;
    pub const NULLABLE: u16 = 7;
}

mod crs {
    pub const ORG: u16 = 0;
    pub const CODE: u16 = 1;
}

mod feature {
    pub const GEOMETRY: u16 = 0;
    pub const PROPERTIES: u16 = 1;
}

mod geometry {
    pub const XY: u16 = 1;
    pub const TYPE: u16 = 6;
}

/// FlatGeobuf `ColumnType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ColumnType {
    Byte = 0,
    UByte = 1,
    Bool = 2,
    Short = 3,
    UShort = 4,
    Int = 5,
    UInt = 6,
    Long = 7,
    ULong = 8,
    Float = 9,
    Double = 10,
    String = 11,
    Json = 12,
}

/// A property column, cast where FlatGeobuf has no matching type
struct Property {
    name: String,
    kind: ColumnType,
    array: ArrayRef,
}

impl Property {
    fn new(name: &str, array: &ArrayRef) -> Result<Self> {
        let (kind, array) = match array.data_type() {
            DataType::Boolean => (ColumnType::Bool, array.clone()),
            DataType::Int8 => (ColumnType::Byte, array.clone()),
            DataType::UInt8 => (ColumnType::UByte, array.clone()),
            DataType::Int16 => (ColumnType::Short, array.clone()),
            DataType::UInt16 => (ColumnType::UShort, array.clone()),
            DataType::Int32 => (ColumnType::Int, array.clone()),
            DataType::UInt32 => (ColumnType::UInt, array.clone()),
            DataType::Int64 => (ColumnType::Long, array.clone()),
            DataType::UInt64 => (ColumnType::ULong, array.clone()),
            DataType::Float32 => (ColumnType::Float, array.clone()),
            DataType::Float64 => (ColumnType::Double, array.clone()),
            DataType::Utf8 => (ColumnType::String, array.clone()),
            DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => {
                (ColumnType::Json, array.clone())
            }
            dt if dt.is_numeric() => (ColumnType::Double, cast(array, &DataType::Float64)?),
            _ => (ColumnType::String, cast(array, &DataType::Utf8)?),
        };
        Ok(Self {
            name: name.to_string(),
            kind,
            array,
        })
    }

    /// Append `u16 index` and the little-endian value; nulls are omitted
    fn encode(&self, index: u16, row: usize, out: &mut Vec<u8>) -> Result<()> {
        if self.array.is_null(row) {
            return Ok(());
        }
        let a = &self.array;
        let start = out.len();
        out.extend_from_slice(&index.to_le_bytes());
        match self.kind {
            ColumnType::Bool => out.push(u8::from(a.as_boolean().value(row))),
            ColumnType::Byte => out.extend_from_slice(&a.as_primitive::<Int8Type>().value(row).to_le_bytes()),
            ColumnType::UByte => out.push(a.as_primitive::<UInt8Type>().value(row)),
            ColumnType::Short => out.extend_from_slice(&a.as_primitive::<Int16Type>().value(row).to_le_bytes()),
            ColumnType::UShort => out.extend_from_slice(&a.as_primitive::<UInt16Type>().value(row).to_le_bytes()),
            ColumnType::Int => out.extend_from_slice(&a.as_primitive::<Int32Type>().value(row).to_le_bytes()),
            ColumnType::UInt => out.extend_from_slice(&a.as_primitive::<UInt32Type>().value(row).to_le_bytes()),
            ColumnType::Long => out.extend_from_slice(&a.as_primitive::<Int64Type>().value(row).to_le_bytes()),
            ColumnType::ULong => out.extend_from_slice(&a.as_primitive::<UInt64Type>().value(row).to_le_bytes()),
            ColumnType::Float => out.extend_from_slice(&a.as_primitive::<Float32Type>().value(row).to_le_bytes()),
            ColumnType::Double => out.extend_from_slice(&a.as_primitive::<Float64Type>().value(row).to_le_bytes()),
            ColumnType::String => push_string(out, a.as_string::<i32>().value(row)),
            ColumnType::Json => match list_json(a.as_ref(), row)? {
                Some(json) => push_string(out, &json),
                None => out.truncate(start),
            },
        }
        Ok(())
    }
}

fn push_string(out: &mut Vec<u8>, value: &str) {
    let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

/// Write `batch` as a FlatGeobuf point layer named `name`
pub fn write<W: Write>(batch: &GeoBatch, mut out: W, name: &str) -> Result<()> {
    let schema = batch.schema();
    let properties = schema
        .fields()
        .iter()
        .zip(batch.batch().columns())
        .map(|(field, array)| Property::new(field.name(), array))
        .collect::<Result<Vec<_>>>()?;

    out.write_all(&MAGIC)?;

    let mut fbb = FlatBufferBuilder::new();
    let root = build_header(&mut fbb, batch, &properties, name);
    fbb.finish_size_prefixed(root, None);
    out.write_all(fbb.finished_data())?;

    let lon = batch.lon().values();
    let lat = batch.lat().values();
    let mut buf = Vec::new();
    for row in 0..batch.num_rows() {
        buf.clear();
        for (index, property) in properties.iter().enumerate() {
            let index = u16::try_from(index).unwrap_or(u16::MAX);
            property.encode(index, row, &mut buf)?;
        }

        fbb.reset();
        let root = build_feature(&mut fbb, lon[row], lat[row], &buf);
        fbb.finish_size_prefixed(root, None);
        out.write_all(fbb.finished_data())?;
    }

    out.flush()?;
    Ok(())
}

fn build_header<'a>(
    fbb: &mut FlatBufferBuilder<'a>,
    batch: &GeoBatch,
    properties: &[Property],
    name: &str,
) -> WIPOffset<TableFinishedWIPOffset> {
    let columns = properties
        .iter()
        .map(|property| {
            let name = fbb.create_string(&property.name);
            let start = fbb.start_table();
            fbb.push_slot_always(slot(column::NAME), name);
            fbb.push_slot::<u8>(slot(column::TYPE), property.kind as u8, 0);
            fbb.push_slot::<bool>(slot(column::NULLABLE), true, true);
            fbb.end_table(start)
        })
        .collect::<Vec<_>>();
    let columns = fbb.create_vector(&columns);

    let envelope = batch
        .bbox()
        .map(|b| fbb.create_vector(&[b.min_x, b.min_y, b.max_x, b.max_y]));

    let org = fbb.create_string("EPSG");
    let start = fbb.start_table();
    fbb.push_slot_always(slot(crs::ORG), org);
    fbb.push_slot::<i32>(slot(crs::CODE), 4326, 0);
    let crs = fbb.end_table(start);

    let layer_name = fbb.create_string(name);
    let title = fbb.create_string("GEDI subset");

    let start = fbb.start_table();
    fbb.push_slot_always(slot(header::NAME), layer_name);
    if let Some(envelope) = envelope {
        fbb.push_slot_always(slot(header::ENVELOPE), envelope);
    }
    fbb.push_slot::<u8>(slot(header::GEOMETRY_TYPE), GEOMETRY_POINT, 0);
    fbb.push_slot_always(slot(header::COLUMNS), columns);
    fbb.push_slot::<u64>(slot(header::FEATURES_COUNT), batch.num_rows() as u64, 0);
    // no spatial index
    fbb.push_slot_always::<u16>(slot(header::INDEX_NODE_SIZE), 0);
    fbb.push_slot_always(slot(header::CRS), crs);
    fbb.push_slot_always(slot(header::TITLE), title);
    fbb.end_table(start)
}

fn build_feature<'a>(
    fbb: &mut FlatBufferBuilder<'a>,
    x: f64,
    y: f64,
    properties: &[u8],
) -> WIPOffset<TableFinishedWIPOffset> {
    let xy = fbb.create_vector(&[x, y]);
    let start = fbb.start_table();
    fbb.push_slot_always(slot(geometry::XY), xy);
    fbb.push_slot::<u8>(slot(geometry::TYPE), GEOMETRY_POINT, 0);
    let geometry = fbb.end_table(start);

    let properties = (!properties.is_empty()).then(|| fbb.create_vector(properties));

    let start = fbb.start_table();
    fbb.push_slot_always(slot(feature::GEOMETRY), geometry);
    if let Some(properties) = properties {
        fbb.push_slot_always(slot(feature::PROPERTIES), properties);
    }
    fbb.end_table(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{BEAM_COLUMN, FILENAME_COLUMN};
    use arrow::array::{Float32Array, Float64Array, StringArray, UInt8Array};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use flatbuffers::{ForwardsUOffset, Table, Vector};
    use std::sync::Arc;

    fn sample() -> GeoBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("agbd", DataType::Float32, true),
            Field::new("l4_quality_flag", DataType::UInt8, true),
            Field::new(FILENAME_COLUMN, DataType::Utf8, true),
            Field::new(BEAM_COLUMN, DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float32Array::from(vec![Some(2.5), None, Some(4.0)])),
                Arc::new(UInt8Array::from(vec![1, 1, 0])),
                Arc::new(StringArray::from(vec!["g.h5", "g.h5", "g.h5"])),
                Arc::new(StringArray::from(vec!["0000", "0000", "0101"])),
            ],
        )
        .unwrap();
        GeoBatch::try_new(
            batch,
            Float64Array::from(vec![10.0, 10.5, 11.0]),
            Float64Array::from(vec![-2.0, -1.5, -1.0]),
        )
        .unwrap()
    }

    /// Split a size-prefixed flatbuffer off the front of `buf`
    fn next_block(buf: &[u8]) -> (&[u8], &[u8]) {
        let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        (&buf[4..4 + len], &buf[4 + len..])
    }

    fn root(block: &[u8]) -> Table<'_> {
        let loc = u32::from_le_bytes(block[0..4].try_into().unwrap()) as usize;
        // SAFETY: blocks come from the builder in this module
        unsafe { Table::new(block, loc) }
    }

    #[test]
    fn test_write_flatgeobuf() {
        let mut buf = Vec::new();
        write(&sample(), &mut buf, "subset").unwrap();
        assert_eq!(&buf[0..8], &MAGIC);

        let (header_block, mut rest) = next_block(&buf[8..]);
        let header = root(header_block);
        unsafe {
            assert_eq!(header.get::<ForwardsUOffset<&str>>(slot(header::NAME), None), Some("subset"));
            assert_eq!(header.get::<u8>(slot(header::GEOMETRY_TYPE), Some(0)), Some(GEOMETRY_POINT));
            assert_eq!(header.get::<u64>(slot(header::FEATURES_COUNT), Some(0)), Some(3));
            assert_eq!(header.get::<u16>(slot(header::INDEX_NODE_SIZE), Some(16)), Some(0));
            let columns = header
                .get::<ForwardsUOffset<Vector<ForwardsUOffset<Table>>>>(slot(header::COLUMNS), None)
                .unwrap();
            let names: Vec<_> = columns
                .iter()
                .map(|c| c.get::<ForwardsUOffset<&str>>(slot(column::NAME), None).unwrap())
                .collect();
            assert_eq!(names, vec!["agbd", "l4_quality_flag", FILENAME_COLUMN, BEAM_COLUMN]);
            assert_eq!(
                columns.get(0).get::<u8>(slot(column::TYPE), Some(0)),
                Some(ColumnType::Float as u8)
            );
        }

        let mut features = Vec::new();
        while !rest.is_empty() {
            let (block, tail) = next_block(rest);
            features.push(block);
            rest = tail;
        }
        assert_eq!(features.len(), 3);

        let second = root(features[1]);
        unsafe {
            let geometry = second
                .get::<ForwardsUOffset<Table>>(slot(feature::GEOMETRY), None)
                .unwrap();
            let xy = geometry
                .get::<ForwardsUOffset<Vector<f64>>>(slot(geometry::XY), None)
                .unwrap();
            assert_eq!(xy.iter().collect::<Vec<_>>(), vec![10.5, -1.5]);

            // null agbd is omitted, so the first property is column 1
            let props = second
                .get::<ForwardsUOffset<Vector<u8>>>(slot(feature::PROPERTIES), None)
                .unwrap();
            let bytes = props.bytes();
            assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 1);
            assert_eq!(bytes[2], 1);
        }
    }

    #[test]
    fn test_empty_layer() {
        let schema = Arc::new(Schema::new(vec![Field::new("agbd", DataType::Float64, true)]));
        let mut buf = Vec::new();
        write(&GeoBatch::empty(schema), &mut buf, "empty").unwrap();
        let (header_block, rest) = next_block(&buf[8..]);
        assert!(rest.is_empty());
        let header = root(header_block);
        unsafe {
            assert_eq!(header.get::<u64>(slot(header::FEATURES_COUNT), Some(0)), Some(0));
        }
    }
}
