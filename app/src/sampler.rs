use std::{
    fs,
    path::{Path, PathBuf},
};

use rand::Rng;

use pcd_exporter::csv::export_csv;
use pcd_parser::parsers::{get_extension, npy::NpyParserProvider, Extension, ParserProvider as _};

use crate::SampleError;

/// Names of the `.npy` files in `directory`, sorted so that an index always
/// refers to the same file while the directory is unchanged.
pub fn list_candidates(directory: &Path) -> Result<Vec<String>, SampleError> {
    let read_dir_error = |source| SampleError::ReadDir {
        directory: directory.to_path_buf(),
        source,
    };

    let mut candidates = Vec::new();
    for entry in fs::read_dir(directory).map_err(read_dir_error)? {
        let entry = entry.map_err(read_dir_error)?;
        let Ok(name) = entry.file_name().into_string() else {
            log::debug!("skipping non UTF-8 file name {:?}", entry.file_name());
            continue;
        };
        if get_extension(&name) != Some(Extension::Npy) {
            continue;
        }
        // Symlinks are followed so that a link to a directory is skipped like
        // the directory itself.
        match fs::metadata(entry.path()) {
            Ok(metadata) if metadata.is_dir() => continue,
            Ok(_) => candidates.push(name),
            Err(e) => log::debug!("skipping unreadable entry {:?}: {}", name, e),
        }
    }

    candidates.sort();
    Ok(candidates)
}

/// Effective index for a list of `len` candidates: the requested index clamped
/// into `[0, len - 1]`, or a uniform draw from that range. `None` when `len == 0`.
fn select_index<R: Rng + ?Sized>(
    len: usize,
    requested: Option<i64>,
    rng: &mut R,
) -> Option<usize> {
    let last = len.checked_sub(1)?;
    Some(match requested {
        Some(index) => index.clamp(0, i64::try_from(last).unwrap_or(i64::MAX)) as usize,
        None => rng.gen_range(0..=last),
    })
}

/// Picks one sample from `directory`, writes it as a table to `output_path`
/// and returns the index that was used.
pub fn select_and_save(
    directory: &Path,
    output_path: &Path,
    index: Option<i64>,
) -> Result<usize, SampleError> {
    select_and_save_with_rng(directory, output_path, index, &mut rand::thread_rng())
}

pub fn select_and_save_with_rng<R: Rng + ?Sized>(
    directory: &Path,
    output_path: &Path,
    index: Option<i64>,
    rng: &mut R,
) -> Result<usize, SampleError> {
    let candidates = list_candidates(directory)?;
    let Some(index) = select_index(candidates.len(), index, rng) else {
        return Err(SampleError::NoCandidates {
            directory: directory.to_path_buf(),
        });
    };
    let chosen = &candidates[index];
    log::info!("Using file '{}' at index {}", chosen, index);

    let start_local = std::time::Instant::now();
    let provider = NpyParserProvider {
        filename: sample_path(directory, chosen),
    };
    let point_cloud = provider.get_parser().parse()?;
    log::info!(
        "loaded {} points ({} color channels) in {:?}",
        point_cloud.metadata.point_count,
        point_cloud.metadata.color_channels,
        start_local.elapsed()
    );
    log::debug!(
        "bounding volume: {:?} - {:?}",
        point_cloud.metadata.bounding_volume.min,
        point_cloud.metadata.bounding_volume.max
    );

    let rows = export_csv(output_path, &point_cloud)?;
    log::info!("wrote {} rows to {:?}", rows, output_path);

    Ok(index)
}

fn sample_path(directory: &Path, name: &str) -> PathBuf {
    directory.join(name)
}
