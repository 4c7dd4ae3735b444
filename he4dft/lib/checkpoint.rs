//! Gzip-compressed binary snapshots of grids.
//!
//! A checkpoint holds one grid (its shape, boundary, frame momentum and
//! values) and nothing else; files are named `<prefix>-<iteration>.grd` so that
//! a run can be resumed from the iteration encoded in the name.

use std::{
    fs::File,
    io::{ BufReader, BufWriter, Write },
    path::Path,
};
use flate2::{ Compression, read::GzDecoder, write::GzEncoder };
use ndarray as nd;
use num_complex::Complex64 as C64;
use regex::Regex;
use serde::{ Deserialize, Serialize, de::DeserializeOwned };
use tracing::debug;
use crate::{
    error::{ CheckpointError, HeResult, ShapeError },
    grid::{ Boundary, CGrid, Grid, GridElem, GridShape, RGrid },
};

/// File extension of checkpoint files.
pub const EXTENSION: &str = "grd";

#[derive(Serialize, Deserialize)]
struct Blob<A> {
    shape: GridShape,
    boundary: Boundary,
    momentum: [f64; 3],
    data: nd::Array3<A>,
}

fn path_string(path: &Path) -> String { path.display().to_string() }

/// Write `grid` to `path`.
pub fn write_grid<A, P>(path: P, grid: &Grid<A>) -> Result<(), CheckpointError>
where
    A: GridElem + Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let io_err = |source| CheckpointError::Io { path: path_string(path), source };
    let file = File::create(path).map_err(io_err)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
    let blob = Blob {
        shape: *grid.shape(),
        boundary: grid.boundary(),
        momentum: grid.momentum(),
        data: grid.data().clone(),
    };
    bincode::serialize_into(&mut encoder, &blob)
        .map_err(|err| CheckpointError::Encode {
            path: path_string(path), msg: err.to_string() })?;
    encoder.finish()
        .and_then(|mut writer| writer.flush())
        .map_err(io_err)?;
    debug!("wrote checkpoint {}", path.display());
    Ok(())
}

/// Read a grid written by [`write_grid`].
pub fn read_grid<A, P>(path: P) -> Result<Grid<A>, CheckpointError>
where
    A: GridElem + DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|source| CheckpointError::Io { path: path_string(path), source })?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let blob: Blob<A> = bincode::deserialize_from(decoder)
        .map_err(|err| CheckpointError::Decode {
            path: path_string(path), msg: err.to_string() })?;
    let Blob { shape, boundary, momentum, data } = blob;
    let mut grid = Grid::from_array(&shape, data)
        .map_err(|err| CheckpointError::Decode {
            path: path_string(path), msg: err.to_string() })?;
    grid.set_boundary(boundary);
    grid.set_momentum(momentum);
    Ok(grid)
}

/// Read a grid and require it to have shape `shape`.
pub fn read_grid_checked<A, P>(path: P, shape: &GridShape) -> HeResult<Grid<A>>
where
    A: GridElem + DeserializeOwned,
    P: AsRef<Path>,
{
    let grid: Grid<A> = read_grid(path)?;
    ShapeError::check(shape, grid.shape())?;
    Ok(grid)
}

/// Read a density checkpoint as a real, non-negative amplitude `√ρ`.
pub fn read_density_amplitude<P>(path: P, shape: &GridShape) -> HeResult<CGrid>
where P: AsRef<Path>
{
    let rho: RGrid = read_grid_checked(path, shape)?;
    let mut psi = CGrid::zeros(shape).with_boundary(rho.boundary());
    nd::Zip::from(psi.data_mut()).and(rho.data())
        .par_for_each(|p, r| { *p = C64::from(r.max(0.0).sqrt()); });
    Ok(psi)
}

/// File name for the checkpoint of `prefix` at iteration `iter`.
pub fn checkpoint_name(prefix: &str, iter: usize) -> String {
    format!("{prefix}-{iter}.{EXTENSION}")
}

/// Recover the iteration index from a checkpoint file name (the final path
/// component is used), or `None` if it does not have the form
/// `<prefix>-<iter>.grd`.
pub fn iteration_from_name(name: &str, prefix: &str) -> Option<usize> {
    let file_name = Path::new(name).file_name()?.to_str()?;
    let pattern
        = Regex::new(&format!(r"^{}-(\d+)\.{EXTENSION}$", regex::escape(prefix)))
        .ok()?;
    pattern.captures(file_name)?[1].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("he4dft-checkpoint-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn complex_grid_round_trip() {
        let shape = GridShape::new(6, 4, 5, 0.75).unwrap();
        let mut psi = CGrid::from_fn(&shape, &|x: f64, y: f64, z: f64| {
            C64::new(x + 2.0 * y, z - x)
        });
        psi.set_momentum([0.0, 0.25, 0.0]);
        let psi = psi.with_boundary(Boundary::Neumann);
        let path = scratch(&checkpoint_name("wf", 12));
        write_grid(&path, &psi).unwrap();
        let back: CGrid = read_grid(&path).unwrap();
        assert_eq!(back.shape(), psi.shape());
        assert_eq!(back.boundary(), Boundary::Neumann);
        assert_eq!(back.momentum(), [0.0, 0.25, 0.0]);
        assert_eq!(back.data(), psi.data());
        let other = GridShape::new(6, 4, 6, 0.75).unwrap();
        assert!(read_grid_checked::<C64, _>(&path, &other).is_err());
    }

    #[test]
    fn density_restart_takes_square_root() {
        let shape = GridShape::new(4, 4, 4, 1.0).unwrap();
        let mut rho = RGrid::zeros(&shape);
        rho.fill(0.25);
        let path = scratch("density-3.grd");
        write_grid(&path, &rho).unwrap();
        let psi = read_density_amplitude(&path, &shape).unwrap();
        assert_eq!(psi.at([1, 2, 3]), C64::new(0.5, 0.0));
    }

    #[test]
    fn unreadable_checkpoints_are_reported() {
        let missing = scratch("does-not-exist.grd");
        assert!(matches!(
            read_grid::<f64, _>(&missing),
            Err(CheckpointError::Io { .. }),
        ));
        let garbage = scratch("garbage.grd");
        std::fs::write(&garbage, b"not a checkpoint").unwrap();
        assert!(read_grid::<f64, _>(&garbage).is_err());
    }

    #[test]
    fn iteration_is_parsed_from_name() {
        assert_eq!(iteration_from_name("bubble-2500.grd", "bubble"), Some(2500));
        assert_eq!(iteration_from_name("out/run/bubble-7.grd", "bubble"), Some(7));
        assert_eq!(iteration_from_name("bubble-x.grd", "bubble"), None);
        assert_eq!(iteration_from_name("droplet-12.grd", "bubble"), None);
        assert_eq!(iteration_from_name("bubble-12.dat", "bubble"), None);
        assert_eq!(iteration_from_name("el.wf-3.grd", "el.wf"), Some(3));
        assert_eq!(iteration_from_name("elXwf-3.grd", "el.wf"), None);
    }
}
