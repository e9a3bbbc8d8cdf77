//! Reader for point-cloud samples saved with `np.save(path, {"xyz": ..., "rgb": ...})`.
//!
//! Such a file is a `.npy` container holding a 0-d object array, and its payload
//! is a pickle of that array. The pickle is decoded by a restricted unpickler
//! that can only rebuild NumPy arrays and dtypes, then checked against the
//! record layout.

use std::{fs, path::PathBuf};

use pcd_core::pointcloud::point::PointCloud;

use super::{Parser, ParserProvider};
use crate::ParseError;

pub mod array;
pub mod header;
pub mod pickle;
pub mod record;

pub use record::SampleRecord;

use pickle::Value;

pub struct NpyParserProvider {
    pub filename: PathBuf,
}

impl ParserProvider for NpyParserProvider {
    fn get_parser(&self) -> Box<dyn Parser> {
        Box::new(NpyParser {
            filename: self.filename.clone(),
        })
    }
}

pub struct NpyParser {
    pub filename: PathBuf,
}

impl Parser for NpyParser {
    fn parse(&self) -> Result<PointCloud, ParseError> {
        let data = fs::read(&self.filename)?;
        let record = decode_sample(&data)?;
        log::debug!(
            "decoded {} positions and {} colors from {:?}",
            record.positions.len(),
            record.colors.len(),
            self.filename
        );

        Ok(PointCloud::from_channels(record.positions, record.colors))
    }
}

pub fn decode_sample(data: &[u8]) -> Result<SampleRecord, ParseError> {
    let (header, offset) = header::read_header(data)?;
    if !header.is_object() {
        return Err(ParseError::NotObjectArray {
            descr: header.descr,
        });
    }
    let len = header.element_count();
    if len != 1 {
        return Err(ParseError::NotASingleRecord { len });
    }

    let record = match pickle::unpickle(&data[offset..])? {
        Value::Array(array) => array.item()?,
        other => other,
    };
    SampleRecord::try_from(record)
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::scalar::Scalar;

    use super::*;
    use crate::fixtures::{npy_bytes, record_bytes, sample_bytes, write_sample, Channel};

    fn xyz() -> Channel {
        Channel::f32(&[[0.5, -1.25, 3.0], [4.0, 5.5, -6.0], [0.1, 0.2, 0.3]])
    }

    fn rgb() -> Channel {
        Channel::u8(&[[255, 0, 0], [0, 255, 0], [0, 0, 255]])
    }

    #[test]
    fn test_decode_every_protocol() {
        for protocol in 2..=5 {
            let record = decode_sample(&sample_bytes(&xyz(), &rgb(), protocol))
                .unwrap_or_else(|e| panic!("protocol {protocol}: {e}"));

            assert_eq!(record.positions.len(), 3, "protocol {protocol}");
            assert_eq!(
                record.positions[1],
                [Scalar::F32(4.0), Scalar::F32(5.5), Scalar::F32(-6.0)]
            );
            assert_eq!(record.positions[2][0], Scalar::F32(0.1));
            assert_eq!(record.colors.len(), 3);
            assert_eq!(record.colors[2].b, Scalar::UInt(255));
            assert_eq!(record.colors[2].a, None);
        }
    }

    #[test]
    fn test_decode_big_endian_and_rgba() {
        let xyz = Channel::f64(&[[1.0, 2.0, 3.0]]).big_endian();
        let rgba = Channel::f32(&[[0.25, 0.5, 0.75, 1.0]]).big_endian();
        let record = decode_sample(&sample_bytes(&xyz, &rgba, 3)).unwrap();

        assert_eq!(
            record.positions,
            vec![[Scalar::F64(1.0), Scalar::F64(2.0), Scalar::F64(3.0)]]
        );
        assert_eq!(record.colors[0].g, Scalar::F32(0.5));
        assert_eq!(record.colors[0].a, Some(Scalar::F32(1.0)));
    }

    #[test]
    fn test_numeric_npy_is_not_a_sample() {
        let data = npy_bytes("<f4", &[1, 3], &[0; 12]);
        assert!(matches!(
            decode_sample(&data),
            Err(ParseError::NotObjectArray { descr }) if descr == "<f4"
        ));
    }

    #[test]
    fn test_object_array_of_several_records() {
        let data = npy_bytes("|O", &[2], b"\x80\x03N.");
        assert!(matches!(
            decode_sample(&data),
            Err(ParseError::NotASingleRecord { len: 2 })
        ));

        let data = npy_bytes("|O", &[0], &[]);
        assert!(matches!(
            decode_sample(&data),
            Err(ParseError::NotASingleRecord { len: 0 })
        ));
    }

    #[test]
    fn test_missing_rgb() {
        let data = record_bytes(&[("xyz", &xyz()), ("normals", &xyz())], 3);
        assert!(matches!(
            decode_sample(&data),
            Err(ParseError::MissingField("rgb"))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let data = sample_bytes(&xyz(), &rgb(), 3);
        assert!(decode_sample(&data[..data.len() - 20]).is_err());
    }

    #[test]
    fn test_parser_pairs_shorter_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.npy");
        write_sample(&path, &xyz(), &Channel::u8(&[[1, 2, 3]])).unwrap();

        let provider = NpyParserProvider { filename: path };
        let point_cloud = provider.get_parser().parse().unwrap();

        assert_eq!(point_cloud.len(), 1);
        assert_eq!(point_cloud.metadata.unpaired, 2);
        assert_eq!(point_cloud.points[0].color.r, Scalar::UInt(1));
    }

    #[test]
    fn test_parser_reads_empty_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.npy");
        write_sample(&path, &Channel::f32::<3>(&[]), &Channel::u8::<3>(&[])).unwrap();

        let provider = NpyParserProvider { filename: path };
        let point_cloud = provider.get_parser().parse().unwrap();

        assert!(point_cloud.is_empty());
        assert!(point_cloud.points.first().is_none());
        assert_eq!(point_cloud.metadata.unpaired, 0);
    }

    #[test]
    fn test_parser_reports_missing_file() {
        let provider = NpyParserProvider {
            filename: PathBuf::from("/nonexistent/sample.npy"),
        };
        assert!(matches!(
            provider.get_parser().parse(),
            Err(ParseError::Io(_))
        ));
    }
}
