//! # oephys_nwb
//!
//! oephys_nwb converts simultaneous patch-clamp electrophysiology and two-photon imaging
//! sessions into the [Neurodata Without Borders](https://www.nwb.org/) (NWB) format. It
//! takes the per-cell HDF5 files produced by the acquisition rig (raw voltage traces and
//! stimulus timing), the processed HDF5 files (spikes, segmented soma fluorescence) and the
//! TIFF stacks of the imaging session, and combines them into a single NWB file per cell.
//!
//! The workspace contains three crates:
//!
//! - `liboephys_nwb`: the conversion library (this crate)
//! - `oephys_nwb_cli`: a command line tool which sweeps a directory tree and converts every
//! cell it finds
//! - `oephys_dashboard`: a GUI for browsing converted NWB files (voltage, spikes, dF/F and
//! the imaging frames)
//!
//! ## Installation
//!
//! Currently the only method of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Before building and running oephys_nwb, HDF5 must be installed. Typically this will
//! be installed using a package manager (homebrew, apt, etc), and the Rust libraries will
//! auto detect the location of the HDF install. If a newer version was installed to a custom
//! location, write the following snippet into the file `.cargo/config.toml` in the
//! oephys_nwb repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! Replace `/path/to/my/hdf5/install/` with the path to your HDF5 installation.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./oephys_nwb_cli` and for the
//! dashboard use `cargo install --path ./oephys_dashboard` from the top level repository.
//!
//! ## Configuration
//!
//! Conversions are controlled by a YAML configuration file. A template can be generated
//! with `oephys_nwb_cli new -p config.yml`. The fields are:
//!
//! - raw_path: Directory containing the raw HDF5 files and TIFF stacks. Each subdirectory is
//! treated as a group of cells.
//! - processed_path: Directory containing the processed HDF5 files
//! - calibration_path (Optional): Directory of calibration quality files (`*medium.h5`). If
//! given, only the cells with a calibration file are converted and the calibration data is
//! searched first for every dataset.
//! - output_path (Optional): Where NWB files are written. Defaults to `nwb_converted` next to
//! the calibration directory, or next to the raw directory.
//! - subjects_path (Optional): JSON table of subject information. Defaults to the bundled table.
//! - metadata_path (Optional): YAML metadata merged over the generated metadata
//! - zoom_pairs: Map of cell id to the id of its low-zoom imaging session
//! - link_raw_ophys: Link the TIFF files rather than copying the frames into the NWB file
//! - add_ophys_processed, add_ophys_acquisition, add_spiking_data, add_ecephys_raw,
//! add_ecephys_filtered, add_trials: Toggle each part of the conversion
//! - read_check: Re-open every written file and check its contents
//! - ids (Optional): Positions of the cells (in sweep order) to convert
//! - n_threads: Number of worker threads to divide the cells amongst. Must be at least 1.
//!
//! ```yml
//! raw_path: /data/raw_data
//! processed_path: /data/processed_data
//! calibration_path: null
//! output_path: null
//! subjects_path: null
//! metadata_path: null
//! zoom_pairs: {}
//! link_raw_ophys: true
//! add_ophys_processed: true
//! add_ophys_acquisition: true
//! add_spiking_data: true
//! add_ecephys_raw: true
//! add_ecephys_filtered: true
//! add_trials: true
//! read_check: true
//! ids: null
//! n_threads: 1
//! ```
//!
//! ## Output
//!
//! Each cell produces one NWB 2.x file:
//!
//! ```text
//! <cell_id>.nwb - nwb_version, identifier, session_start_time, ...
//! |---- acquisition
//! |    |---- raw_membrane_voltage(ElectricalSeries)
//! |    |---- raw_ophys(TwoPhotonSeries)
//! |    |---- raw_ophys_lowzoom(TwoPhotonSeries)
//! |---- processing
//! |    |---- ecephys
//! |    |    |---- filtered_membrane_voltage(ElectricalSeries)
//! |    |---- ophys
//! |    |    |---- image_segmentation/plane_segmentation
//! |    |    |---- fluorescence/roi_response_series
//! |---- intervals/trials
//! |---- units
//! ```
pub mod config;
pub mod converter;
pub mod ecephys;
pub mod error;
pub mod interfaces;
pub mod metadata;
pub mod nwb;
pub mod nwb_reader;
pub mod nwb_writer;
pub mod ophys;
pub mod paths;
pub mod process;
pub mod roi;
pub mod source;
pub mod subjects;
pub mod sweep;
pub mod tiff_stack;
pub mod timeseries;
pub mod worker_status;
