//! Hyperspectral cubes, reference maps and labeled sample extraction

use crate::core::{HsiError, Result, Sample, SampleSet};
use crate::data::{read_mat_file, read_npy_file};
use log::{debug, info};
use ndarray::{s, Array2, Array3, ArrayD, ArrayView1, Axis, Ix2, Ix3};
use std::path::Path;

/// Load an array from `.npy` or `.mat`, dispatching on the file extension
pub fn load_array<P: AsRef<Path>>(path: P) -> Result<ArrayD<f64>> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "npy" => read_npy_file(path),
        "mat" => read_mat_file(path),
        _ => Err(HsiError::UnsupportedFormat(format!(
            "{}: expected a .npy or .mat file",
            path.display()
        ))),
    }
}

/// Side length of a square neighbourhood; must be odd so the window has a
/// central pixel
pub fn validate_neighborhood_size(size: usize) -> Result<()> {
    if size == 0 || size % 2 == 0 {
        return Err(HsiError::InvalidParameter(format!(
            "neighborhood size must be a positive odd number, got {size}"
        )));
    }
    Ok(())
}

/// `height x width x bands` raster of spectral vectors
#[derive(Debug, Clone, PartialEq)]
pub struct HyperspectralCube {
    data: Array3<f64>,
}

impl HyperspectralCube {
    pub fn new(data: Array3<f64>) -> Result<Self> {
        if data.len_of(Axis(2)) == 0 {
            return Err(HsiError::InvalidDataset(
                "cube must have at least one band".to_string(),
            ));
        }
        Ok(Self { data })
    }

    /// Create a cube from row-major pixel-interleaved values
    pub fn from_shape_vec(height: usize, width: usize, bands: usize, values: Vec<f64>) -> Result<Self> {
        Self::new(Array3::from_shape_vec((height, width, bands), values)?)
    }

    pub fn from_array(array: ArrayD<f64>) -> Result<Self> {
        let shape = array.shape().to_vec();
        let data = array.into_dimensionality::<Ix3>().map_err(|_| {
            HsiError::InvalidDataset(format!(
                "hyperspectral cube must be 3-D (height, width, bands), got shape {shape:?}"
            ))
        })?;
        Self::new(data)
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn bands(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// Spectrum of the pixel at (row, col)
    pub fn pixel(&self, row: usize, col: usize) -> ArrayView1<'_, f64> {
        self.data.slice(s![row, col, ..])
    }

    /// Every pixel spectrum in row-major order
    pub fn pixels(&self) -> impl Iterator<Item = ArrayView1<'_, f64>> {
        self.data.lanes(Axis(2)).into_iter()
    }

    /// Flattened `size x size` window centred on (row, col)
    ///
    /// Values are ordered window row, window column, band. Positions outside
    /// the scene take the spectrum of the nearest edge pixel.
    pub fn patch(&self, row: usize, col: usize, size: usize) -> Vec<f64> {
        let radius = (size / 2) as isize;
        let clamp = |v: isize, len: usize| v.clamp(0, len as isize - 1) as usize;

        let mut values = Vec::with_capacity(size * size * self.bands());
        for dr in -radius..=radius {
            let r = clamp(row as isize + dr, self.height());
            for dc in -radius..=radius {
                let c = clamp(col as isize + dc, self.width());
                values.extend(self.pixel(r, c).iter());
            }
        }
        values
    }
}

/// Per-pixel ground-truth class codes, 0 meaning unlabeled
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMap {
    codes: Array2<usize>,
}

impl ReferenceMap {
    pub fn new(codes: Array2<usize>) -> Self {
        Self { codes }
    }

    /// Convert a 2-D array (or `height x width x 1`) of integral codes
    pub fn from_array(array: ArrayD<f64>) -> Result<Self> {
        let array = if array.ndim() == 3 && array.shape()[2] == 1 {
            array.index_axis_move(Axis(2), 0)
        } else {
            array
        };
        let shape = array.shape().to_vec();
        let array = array.into_dimensionality::<Ix2>().map_err(|_| {
            HsiError::InvalidDataset(format!(
                "reference map must be 2-D (height, width), got shape {shape:?}"
            ))
        })?;

        if let Some(bad) = array
            .iter()
            .find(|v| !v.is_finite() || **v < 0.0 || v.fract() != 0.0)
        {
            return Err(HsiError::InvalidDataset(format!(
                "reference map holds non-class value {bad}"
            )));
        }
        Ok(Self::new(array.mapv(|v| v as usize)))
    }

    pub fn height(&self) -> usize {
        self.codes.nrows()
    }

    pub fn width(&self) -> usize {
        self.codes.ncols()
    }

    pub fn codes(&self) -> &Array2<usize> {
        &self.codes
    }

    /// Number of labeled (non-zero) pixels
    pub fn labeled_count(&self) -> usize {
        self.codes.iter().filter(|&&c| c != 0).count()
    }

    /// Highest class code present
    pub fn n_classes(&self) -> usize {
        self.codes.iter().copied().max().unwrap_or(0)
    }
}

fn check_alignment(cube: &HyperspectralCube, reference: &ReferenceMap) -> Result<()> {
    if cube.height() != reference.height() || cube.width() != reference.width() {
        return Err(HsiError::ShapeMismatch {
            expected: vec![cube.height(), cube.width()],
            actual: vec![reference.height(), reference.width()],
        });
    }
    Ok(())
}

/// Collect the spectra of all labeled pixels in row-major order
///
/// Class codes are shifted to zero-based labels (`code - 1`).
pub fn extract_labeled_samples(
    cube: &HyperspectralCube,
    reference: &ReferenceMap,
) -> Result<SampleSet> {
    extract_labeled_patches(cube, reference, 1)
}

/// Collect the `size x size` neighbourhood of every labeled pixel
///
/// Each sample holds `size * size * bands` values laid out as in
/// [`HyperspectralCube::patch`] and carries the label of its central pixel.
pub fn extract_labeled_patches(
    cube: &HyperspectralCube,
    reference: &ReferenceMap,
    size: usize,
) -> Result<SampleSet> {
    validate_neighborhood_size(size)?;
    check_alignment(cube, reference)?;

    let mut set = SampleSet::new(size * size * cube.bands());
    for ((row, col), &code) in reference.codes().indexed_iter() {
        if code != 0 {
            set.push(Sample::new(cube.patch(row, col, size), code - 1))?;
        }
    }

    if set.samples().is_empty() {
        return Err(HsiError::EmptyDataset);
    }

    debug!("Class populations: {:?}", set.class_counts());
    Ok(set)
}

/// Every pixel spectrum of the cube in row-major order, for full-scene
/// prediction
pub fn cube_pixels(cube: &HyperspectralCube) -> Vec<Vec<f64>> {
    cube.pixels().map(|p| p.to_vec()).collect()
}

/// Every pixel neighbourhood of the cube in row-major order
pub fn cube_patches(cube: &HyperspectralCube, size: usize) -> Result<Vec<Vec<f64>>> {
    validate_neighborhood_size(size)?;
    let mut patches = Vec::with_capacity(cube.height() * cube.width());
    for row in 0..cube.height() {
        for col in 0..cube.width() {
            patches.push(cube.patch(row, col, size));
        }
    }
    Ok(patches)
}

/// Load a cube and its reference map, returning the labeled samples
pub fn load_labeled<P1: AsRef<Path>, P2: AsRef<Path>>(
    data_path: P1,
    reference_path: P2,
) -> Result<SampleSet> {
    load_labeled_patches(data_path, reference_path, 1)
}

/// Load a cube and its reference map, returning the labeled neighbourhoods
pub fn load_labeled_patches<P1: AsRef<Path>, P2: AsRef<Path>>(
    data_path: P1,
    reference_path: P2,
    size: usize,
) -> Result<SampleSet> {
    let cube = HyperspectralCube::from_array(load_array(&data_path)?)?;
    let reference = ReferenceMap::from_array(load_array(&reference_path)?)?;

    info!(
        "Loaded {}x{} cube with {} bands, {} labeled pixels in {} classes",
        cube.height(),
        cube.width(),
        cube.bands(),
        reference.labeled_count(),
        reference.n_classes()
    );

    extract_labeled_patches(&cube, &reference, size)
}
