use ndarray::Array2;

use super::config::ConversionOptions;
use super::error::{InterfaceError, NwbError};
use super::interfaces::{ensure_device, DataInterface};
use super::metadata::{
    default_ecephys, rate_from_interval, EcephysMetadata, Metadata, TrialsMetadata,
};
use super::nwb::{self, ElectricalSeries, Electrode, ElectrodeGroup, NwbFile, Timing, Trials, Units};
use super::source::{
    sample_time, SessionSources, EPHYS_DT_NAME, FILTERED_VOLTAGE_NAME, SPIKES_NAME, STIM_OFF_NAME,
    STIM_ON_NAME, SWEEP_ORDER_NAME, SWEEP_TABLE_NAME, VOLTAGE_NAME,
};

pub const ECEPHYS_MODULE_NAME: &str = "ecephys";
const ECEPHYS_MODULE_DESCRIPTION: &str = "contains processed extracellular electrophysiology data";

/// Convert spike data into spike times in seconds.
///
/// The processed data stores either the (1-based) sample indices of the spikes or a binary spike
/// train with one entry per voltage sample. A train is recognised by having the length of the
/// voltage trace and only 0/1 values.
pub fn spike_times_from_samples(spk: &[f64], dt: f64, n_samples: usize) -> Vec<f64> {
    let is_train = n_samples > 0
        && spk.len() == n_samples
        && spk.iter().all(|v| *v == 0.0 || *v == 1.0);
    if is_train {
        spk.iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(idx, _)| idx as f64 * dt)
            .collect()
    } else {
        spk.iter()
            .filter(|v| v.is_finite())
            .map(|v| sample_time(*v, dt))
            .collect()
    }
}

/// Lay the sweep table out with one row per sweep.
///
/// Tables written column-major come out transposed; when the rows cannot hold the largest sweep
/// index but the columns can, the table is flipped.
fn orient_sweep_table(table: &Array2<f64>, sweep_order: &[f64]) -> Array2<f64> {
    let max_order = sweep_order
        .iter()
        .filter(|o| o.is_finite() && **o >= 0.0)
        .fold(-1.0_f64, |acc, o| acc.max(*o));
    if max_order < 0.0 {
        return table.to_owned();
    }
    let needed = max_order as usize + 1;
    if table.nrows() < needed && table.ncols() >= needed {
        table.t().to_owned()
    } else {
        table.to_owned()
    }
}

/// Build the trials table from the (1-based) stimulus on/off sample indices and the sweep
/// parameters.
///
/// A negative or out-of-range sweep order marks a blank sweep, whose parameters are all NaN.
pub fn build_trials(
    stim_on: &[f64],
    stim_off: &[f64],
    sweep_order: &[f64],
    sweep_table: Option<&Array2<f64>>,
    dt: f64,
    names: &TrialsMetadata,
) -> Result<Trials, NwbError> {
    if stim_on.len() != stim_off.len() {
        log::warn!(
            "Stimulus onsets ({}) and offsets ({}) differ in length. Extra entries are ignored.",
            stim_on.len(),
            stim_off.len()
        );
    }
    let table = sweep_table.map(|t| orient_sweep_table(t, sweep_order));
    let n_columns = table.as_ref().map(|t| t.ncols()).unwrap_or(0);
    let mut trials = Trials::new(names.column_names(n_columns));

    for (idx, (on, off)) in stim_on.iter().zip(stim_off.iter()).enumerate() {
        let row = sweep_order
            .get(idx)
            .filter(|o| o.is_finite() && **o >= 0.0)
            .map(|o| *o as usize);
        let values = match (&table, row) {
            (Some(t), Some(r)) if r < t.nrows() => t.row(r).to_vec(),
            _ => vec![f64::NAN; n_columns],
        };
        trials.add_trial(sample_time(*on, dt), sample_time(*off, dt), values)?;
    }
    Ok(trials)
}

/// Electrophysiology of the patched cell: membrane voltage, spikes and stimulus trials
#[derive(Debug)]
pub struct EcephysInterface<'a> {
    sources: &'a SessionSources,
}

impl<'a> EcephysInterface<'a> {
    pub fn new(sources: &'a SessionSources) -> Self {
        Self { sources }
    }

    fn section(metadata: &Metadata) -> Result<&EcephysMetadata, InterfaceError> {
        metadata
            .ecephys
            .as_ref()
            .ok_or(InterfaceError::MissingMetadata("Ecephys"))
    }

    /// Device, electrode group and the single recording electrode
    pub fn add_electrodes(
        &self,
        nwb: &mut NwbFile,
        metadata: &Metadata,
    ) -> Result<(), InterfaceError> {
        let ecephys = Self::section(metadata)?;
        ensure_device(nwb, &ecephys.device)?;
        let group = &ecephys.electrode_group;
        if nwb.electrode_group(&group.name).is_none() {
            nwb.create_electrode_group(ElectrodeGroup {
                name: group.name.clone(),
                description: group.description.clone(),
                location: group.location.clone(),
                device: group.device.clone(),
            })?;
        }
        if nwb.electrodes.is_empty() {
            nwb.add_electrode(Electrode {
                id: 0,
                x: f64::NAN,
                y: f64::NAN,
                z: f64::NAN,
                imp: f64::NAN,
                location: String::from("location"),
                filtering: String::from("none"),
                group: group.name.clone(),
            })?;
        }
        Ok(())
    }

    fn electrical_series(
        &self,
        nwb: &NwbFile,
        dataset: &str,
        name: &str,
        description: &str,
        rate: f64,
    ) -> Result<ElectricalSeries, InterfaceError> {
        let electrodes = nwb.create_electrode_table_region(&[0], "electrode")?;
        Ok(ElectricalSeries {
            name: name.to_string(),
            description: description.to_string(),
            data: self.sources.read_vec(dataset)?,
            electrodes,
            timing: Timing {
                starting_time: 0.0,
                rate,
            },
        })
    }

    /// Raw membrane voltage as acquisition
    pub fn add_raw(&self, nwb: &mut NwbFile, metadata: &Metadata) -> Result<(), InterfaceError> {
        self.add_electrodes(nwb, metadata)?;
        let meta = &Self::section(metadata)?.electrical_series_raw;
        let series =
            self.electrical_series(nwb, VOLTAGE_NAME, &meta.name, &meta.description, meta.rate)?;
        nwb.add_acquisition(nwb::Acquisition::Electrical(series))?;
        Ok(())
    }

    /// Filtered membrane voltage in the ecephys processing module
    pub fn add_filtered(
        &self,
        nwb: &mut NwbFile,
        metadata: &Metadata,
    ) -> Result<(), InterfaceError> {
        self.add_electrodes(nwb, metadata)?;
        let meta = &Self::section(metadata)?.electrical_series_filtered;
        let series = self.electrical_series(
            nwb,
            FILTERED_VOLTAGE_NAME,
            &meta.name,
            &meta.description,
            meta.rate,
        )?;
        nwb.processing_module(ECEPHYS_MODULE_NAME, ECEPHYS_MODULE_DESCRIPTION)
            .add(nwb::DataInterface::Electrical(series))?;
        Ok(())
    }

    /// Spike times of the cell as the single unit of the units table
    pub fn add_spiking_data(&self, nwb: &mut NwbFile) -> Result<(), InterfaceError> {
        let dt = self.sources.ephys_dt()?;
        let spk = self.sources.read_vec(SPIKES_NAME)?;
        let n_samples = if self.sources.has(VOLTAGE_NAME) {
            self.sources.read_vec(VOLTAGE_NAME)?.len()
        } else if self.sources.has(FILTERED_VOLTAGE_NAME) {
            self.sources.read_vec(FILTERED_VOLTAGE_NAME)?.len()
        } else {
            0
        };
        let times = spike_times_from_samples(&spk, dt, n_samples);
        log::info!("Adding {} spikes to the units table", times.len());
        let mut units = Units {
            description: String::from("spike times of the recorded cell"),
            ..Default::default()
        };
        units.add_unit(times);
        nwb.set_units(units);
        Ok(())
    }

    pub fn add_trials(&self, nwb: &mut NwbFile, metadata: &Metadata) -> Result<(), InterfaceError> {
        let dt = self.sources.ephys_dt()?;
        let stim_on = self.sources.read_vec(STIM_ON_NAME)?;
        let stim_off = self.sources.read_vec(STIM_OFF_NAME)?;
        let sweep_order = if self.sources.has(SWEEP_ORDER_NAME) {
            self.sources.read_vec(SWEEP_ORDER_NAME)?
        } else {
            Vec::new()
        };
        let sweep_table = if self.sources.has(SWEEP_TABLE_NAME) {
            Some(self.sources.read_matrix(SWEEP_TABLE_NAME)?)
        } else {
            None
        };
        let trials = build_trials(
            &stim_on,
            &stim_off,
            &sweep_order,
            sweep_table.as_ref(),
            dt,
            &metadata.trials,
        )?;
        log::info!("Adding {} trials", trials.len());
        nwb.set_trials(trials);
        Ok(())
    }
}

impl DataInterface for EcephysInterface<'_> {
    fn name(&self) -> &'static str {
        "Ecephys"
    }

    fn get_metadata(&self, mut base: Metadata) -> Result<Metadata, InterfaceError> {
        if base.ecephys.is_none() {
            let rate = rate_from_interval(EPHYS_DT_NAME, self.sources.ephys_dt()?)?;
            base.ecephys = Some(default_ecephys(rate));
        }
        Ok(base)
    }

    fn run_conversion(
        &self,
        nwb: &mut NwbFile,
        metadata: &Metadata,
        options: &ConversionOptions,
    ) -> Result<(), InterfaceError> {
        if options.add_spiking_data {
            self.add_spiking_data(nwb)?;
        }
        if options.add_ecephys_raw {
            self.add_raw(nwb, metadata)?;
        }
        if options.add_ecephys_filtered {
            self.add_filtered(nwb, metadata)?;
        }
        if options.add_trials {
            self.add_trials(nwb, metadata)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::write_session_files;
    use ndarray::array;

    #[test]
    fn test_spike_times() {
        assert_eq!(spike_times_from_samples(&[2.0, 6.0], 0.5, 10), vec![0.5, 2.5]);
        // A 0/1 train with one entry per sample
        assert_eq!(
            spike_times_from_samples(&[0.0, 1.0, 0.0, 1.0], 0.5, 4),
            vec![0.5, 1.5]
        );
    }

    #[test]
    fn test_trials_with_blank_sweep() {
        let table = array![[0.0, 0.04], [90.0, 0.08]];
        let names = TrialsMetadata {
            sweep_columns: vec![String::from("orientation")],
        };
        let trials =
            build_trials(&[1.0, 5.0], &[4.0, 9.0], &[1.0, -1.0], Some(&table), 0.5, &names)
                .unwrap();
        assert_eq!(trials.columns, vec!["orientation", "sweep_param_1"]);
        assert_eq!(trials.start_time, vec![0.0, 2.0]);
        assert_eq!(trials.stop_time, vec![1.5, 4.0]);
        assert_eq!(trials.values[0], vec![90.0, 0.08]);
        assert!(trials.values[1].iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_column_major_sweep_table_is_flipped() {
        // Three sweeps stored as columns
        let table = array![[0.0, 45.0, 90.0], [0.1, 0.2, 0.3]];
        let trials = build_trials(
            &[1.0],
            &[2.0],
            &[2.0],
            Some(&table),
            1.0,
            &TrialsMetadata::default(),
        )
        .unwrap();
        assert_eq!(trials.values[0], vec![90.0, 0.3]);
    }

    #[test]
    fn test_trials_without_sweeps() {
        let trials =
            build_trials(&[1.0, 2.0], &[2.0], &[], None, 1.0, &TrialsMetadata::default()).unwrap();
        assert_eq!(trials.len(), 1);
        assert!(trials.columns.is_empty());
    }

    #[test]
    fn test_run_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let (raw, processed) = write_session_files(dir.path(), "101");
        let sources = SessionSources::open(&raw, &processed, None).unwrap();
        let interface = EcephysInterface::new(&sources);
        let metadata = interface.get_metadata(Metadata::default()).unwrap();
        let ecephys = metadata.ecephys.as_ref().unwrap();
        assert!((ecephys.electrical_series_raw.rate - 1000.0).abs() < 1e-9);

        let mut nwb = NwbFile::new("1234", "session description", "1900-01-01T00:00:00Z");
        interface
            .run_conversion(&mut nwb, &metadata, &ConversionOptions::default())
            .unwrap();

        assert_eq!(nwb.electrodes.len(), 1);
        assert!(nwb.acquisition("raw_membrane_voltage").is_some());
        let module = nwb.get_processing_module(ECEPHYS_MODULE_NAME).unwrap();
        assert!(module.get("filtered_membrane_voltage").is_some());
        let units = nwb.units.as_ref().unwrap();
        assert_eq!(units.spike_times[0].len(), 2);
        assert!((units.spike_times[0][1] - 0.005).abs() < 1e-12);
        let trials = nwb.trials.as_ref().unwrap();
        assert_eq!(trials.len(), 2);
        assert_eq!(trials.values[0], vec![90.0, 0.08]);
    }
}
