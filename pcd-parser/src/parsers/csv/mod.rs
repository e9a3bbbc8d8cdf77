use std::{collections::HashMap, path::PathBuf};

use csv::ReaderBuilder;

use pcd_core::pointcloud::{
    point::{Color, Point, PointCloud},
    scalar::Scalar,
};

use super::{Parser, ParserProvider};
use crate::ParseError;

const COLUMNS: [&str; 6] = ["x", "y", "z", "r", "g", "b"];

pub struct CsvParserProvider {
    pub filenames: Vec<PathBuf>,
}

impl ParserProvider for CsvParserProvider {
    fn get_parser(&self) -> Box<dyn Parser> {
        Box::new(CsvParser {
            filenames: self.filenames.clone(),
        })
    }
}

/// Reads point tables back: one header row, then `x,y,z,r,g,b` rows.
/// Rows that lack any of the six columns are skipped.
pub struct CsvParser {
    pub filenames: Vec<PathBuf>,
}

impl Parser for CsvParser {
    fn parse(&self) -> Result<PointCloud, ParseError> {
        let mut points = Vec::new();

        for filename in &self.filenames {
            let mut reader = ReaderBuilder::new()
                .has_headers(true)
                .flexible(true)
                .from_path(filename)?;

            let field_mapping = create_field_mapping(reader.headers()?)?;

            let mut skipped = 0;
            for record in reader.records() {
                let record = record?;
                let line = record.position().map_or(0, |p| p.line());

                let mut values = [Scalar::F64(0.0); 6];
                let mut complete = true;
                for (slot, field) in values.iter_mut().zip(COLUMNS) {
                    match get_field_value(&record, &field_mapping, field) {
                        Some(value) => *slot = parse_value(field, line, value)?,
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                if !complete {
                    skipped += 1;
                    continue;
                }

                let [x, y, z, r, g, b] = values;
                points.push(Point::new([x, y, z], Color::rgb(r, g, b)));
            }

            if skipped > 0 {
                log::debug!("skipped {} short rows in {:?}", skipped, filename);
            }
        }

        Ok(PointCloud::new(points))
    }
}

fn create_field_mapping(
    headers: &csv::StringRecord,
) -> Result<HashMap<&'static str, usize>, ParseError> {
    let mut mapping = HashMap::new();

    let aliases = [
        ("x", "x"),
        ("y", "y"),
        ("z", "z"),
        ("r", "r"),
        ("g", "g"),
        ("b", "b"),
        ("red", "r"),
        ("green", "g"),
        ("blue", "b"),
    ];

    for (index, header) in headers.iter().enumerate() {
        let normalized_header = header.trim().to_lowercase().replace(['_', '-'], "");

        for (alias, attr_name) in aliases {
            if normalized_header == alias {
                mapping.entry(attr_name).or_insert(index);
                break;
            }
        }
    }

    for attr_name in COLUMNS {
        if !mapping.contains_key(attr_name) {
            return Err(ParseError::MissingColumn(attr_name));
        }
    }

    Ok(mapping)
}

fn get_field_value<'a>(
    record: &'a csv::StringRecord,
    field_mapping: &HashMap<&'static str, usize>,
    field_name: &str,
) -> Option<&'a str> {
    field_mapping
        .get(field_name)
        .and_then(|&index| record.get(index))
}

fn parse_value(field: &'static str, line: u64, value: &str) -> Result<Scalar, ParseError> {
    value
        .trim()
        .parse::<f64>()
        .map(Scalar::F64)
        .map_err(|_| ParseError::InvalidNumber {
            field,
            line,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn parse(content: &str) -> Result<PointCloud, ParseError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.csv");
        fs::write(&path, content).unwrap();

        let provider = CsvParserProvider {
            filenames: vec![path],
        };
        provider.get_parser().parse()
    }

    #[test]
    fn test_parse_table() {
        let pc = parse("x,y,z,r,g,b\r\n0.5,1.0,-2.0,255,0,0\r\n1e-05,2,3,0.1,0.2,0.3\r\n").unwrap();

        assert_eq!(pc.len(), 2);
        assert_eq!(pc.points[0].position(), [0.5, 1.0, -2.0]);
        assert_eq!(pc.points[0].color.r, Scalar::F64(255.0));
        assert_eq!(pc.points[1].x, Scalar::F64(1e-5));
        assert_eq!(pc.metadata.bounding_volume.max, [0.5, 2.0, 3.0]);
        assert_eq!(pc.metadata.bounding_volume.min, [1e-5, 1.0, -2.0]);
    }

    #[test]
    fn test_short_rows_are_skipped() {
        let pc = parse("x,y,z,r,g,b\n1,2,3,4,5,6\n1,2,3\n7,8,9,10,11,12\n").unwrap();
        assert_eq!(pc.len(), 2);
        assert_eq!(pc.points[1].z, Scalar::F64(9.0));
    }

    #[test]
    fn test_column_aliases_and_order() {
        let pc = parse("Red,Green,Blue,X,Y,Z\n1,2,3,4,5,6\n").unwrap();
        assert_eq!(pc.points[0].position(), [4.0, 5.0, 6.0]);
        assert_eq!(pc.points[0].color.b, Scalar::F64(3.0));
    }

    #[test]
    fn test_missing_column() {
        assert!(matches!(
            parse("x,y,z,r,g\n1,2,3,4,5\n"),
            Err(ParseError::MissingColumn("b"))
        ));
    }

    #[test]
    fn test_invalid_number() {
        assert!(matches!(
            parse("x,y,z,r,g,b\n1,2,oops,4,5,6\n"),
            Err(ParseError::InvalidNumber { field: "z", line: 2, .. })
        ));
    }
}
