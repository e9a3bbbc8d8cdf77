use super::scalar::Scalar;

#[derive(Debug, Clone, PartialEq)]
pub struct Color {
    pub r: Scalar,
    pub g: Scalar,
    pub b: Scalar,
    pub a: Option<Scalar>,
}

impl Color {
    pub fn rgb(r: Scalar, g: Scalar, b: Scalar) -> Self {
        Color { r, g, b, a: None }
    }

    pub fn rgba(r: Scalar, g: Scalar, b: Scalar, a: Scalar) -> Self {
        Color { r, g, b, a: Some(a) }
    }

    pub fn channels(&self) -> usize {
        if self.a.is_some() {
            4
        } else {
            3
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub x: Scalar,
    pub y: Scalar,
    pub z: Scalar,
    pub color: Color,
}

impl Point {
    pub fn new(position: [Scalar; 3], color: Color) -> Self {
        let [x, y, z] = position;
        Point { x, y, z, color }
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x.as_f64(), self.y.as_f64(), self.z.as_f64()]
    }

    /// Values in table order `x, y, z, r, g, b`. Alpha is never part of a row.
    pub fn to_row(&self) -> [Scalar; 6] {
        [
            self.x,
            self.y,
            self.z,
            self.color.r,
            self.color.g,
            self.color.b,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct PointCloud {
    pub points: Vec<Point>,
    pub metadata: Metadata,
}

impl PointCloud {
    pub fn new(points: Vec<Point>) -> Self {
        let mut bounding_volume = BoundingVolume {
            min: [f64::MAX, f64::MAX, f64::MAX],
            max: [f64::MIN, f64::MIN, f64::MIN],
        };
        let mut color_channels = 0;
        let mut point_count = 0;

        for point in &points {
            let [x, y, z] = point.position();
            bounding_volume.max[0] = bounding_volume.max[0].max(x);
            bounding_volume.max[1] = bounding_volume.max[1].max(y);
            bounding_volume.max[2] = bounding_volume.max[2].max(z);
            bounding_volume.min[0] = bounding_volume.min[0].min(x);
            bounding_volume.min[1] = bounding_volume.min[1].min(y);
            bounding_volume.min[2] = bounding_volume.min[2].min(z);

            color_channels = color_channels.max(point.color.channels());
            point_count += 1;
        }

        if point_count == 0 {
            bounding_volume = BoundingVolume::default();
        }

        let metadata = Metadata {
            point_count,
            bounding_volume,
            color_channels,
            unpaired: 0,
        };

        PointCloud { points, metadata }
    }

    /// Pairs the i-th position with the i-th color. When the sequences differ in
    /// length the surplus of the longer one is dropped.
    pub fn from_channels(positions: Vec<[Scalar; 3]>, colors: Vec<Color>) -> Self {
        let unpaired = positions.len().abs_diff(colors.len());
        if unpaired > 0 {
            log::warn!(
                "{} positions and {} colors, dropping {} unpaired samples",
                positions.len(),
                colors.len(),
                unpaired
            );
        }

        let points = positions
            .into_iter()
            .zip(colors)
            .map(|(position, color)| Point::new(position, color))
            .collect();

        let mut point_cloud = PointCloud::new(points);
        point_cloud.metadata.unpaired = unpaired;
        point_cloud
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }
}

// Extent of the positions, in their values as f64.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundingVolume {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub point_count: usize,
    pub bounding_volume: BoundingVolume,
    pub color_channels: usize,
    pub unpaired: usize,
}
