use std::{fs::File, io::Write, path::Path};

use csv::{Terminator, WriterBuilder};
use pcd_core::pointcloud::point::PointCloud;

use crate::ExportError;

pub const HEADER: [&str; 6] = ["x", "y", "z", "r", "g", "b"];

/// Writes the header and one `x,y,z,r,g,b` row per point. Returns the number
/// of data rows.
pub fn write_csv<W: Write>(writer: W, point_cloud: &PointCloud) -> Result<usize, ExportError> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::CRLF)
        .from_writer(writer);

    writer.write_record(HEADER)?;

    let mut row = Vec::with_capacity(HEADER.len());
    for point in point_cloud.iter() {
        row.clear();
        row.extend(point.to_row().iter().map(ToString::to_string));
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(point_cloud.len())
}

/// Creates (or truncates) the file at `path` and writes the table into it.
pub fn export_csv(path: &Path, point_cloud: &PointCloud) -> Result<usize, ExportError> {
    let file = File::create(path)?;
    let rows = write_csv(file, point_cloud)?;
    log::debug!("wrote {} rows to {:?}", rows, path);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pcd_core::pointcloud::{
        point::{Color, Point},
        scalar::Scalar,
    };

    use super::*;

    fn point_cloud() -> PointCloud {
        let color = Color::rgba(255u8.into(), 128u8.into(), 0u8.into(), 255u8.into());
        PointCloud::new(vec![
            Point::new(
                [Scalar::F32(0.5), Scalar::F32(-1.0), Scalar::F32(1e-5)],
                color.clone(),
            ),
            Point::new(
                [Scalar::F64(2.0), Scalar::F64(3.25), Scalar::F64(4.0)],
                Color::rgb(Scalar::F32(0.1), Scalar::F32(0.2), Scalar::F32(0.3)),
            ),
        ])
    }

    #[test]
    fn test_write_csv() {
        let mut buffer = Vec::new();
        let rows = write_csv(&mut buffer, &point_cloud()).unwrap();

        assert_eq!(rows, 2);
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "x,y,z,r,g,b\r\n0.5,-1.0,1e-05,255,128,0\r\n2.0,3.25,4.0,0.1,0.2,0.3\r\n"
        );
    }

    #[test]
    fn test_empty_cloud_writes_header_only() {
        let mut buffer = Vec::new();
        let rows = write_csv(&mut buffer, &PointCloud::new(vec![])).unwrap();

        assert_eq!(rows, 0);
        assert_eq!(buffer, b"x,y,z,r,g,b\r\n");
    }

    #[test]
    fn test_export_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("point_cloud.csv");
        fs::write(&path, "stale content that is longer than the new table\n".repeat(10)).unwrap();

        export_csv(&path, &PointCloud::new(vec![])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x,y,z,r,g,b\r\n");
    }

    #[test]
    fn test_export_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("point_cloud.csv");
        assert!(matches!(
            export_csv(&path, &PointCloud::new(vec![])),
            Err(ExportError::Io(_))
        ));
    }
}
