use std::path::PathBuf;

use pcd_parser::parsers::{npy::NpyParserProvider, ParserProvider as _};

fn main() {
    let filename = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("samples/0.npy"));
    let provider = NpyParserProvider { filename };
    let parser = provider.get_parser();

    let point_cloud = parser.parse().unwrap();

    println!(
        "Number of points: {num_points}",
        num_points = point_cloud.points.len()
    );

    match point_cloud.points.first() {
        Some(point) => println!("First point: {:?}", point),
        None => println!("The sample holds no points"),
    }
}
