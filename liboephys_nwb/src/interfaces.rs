use super::config::ConversionOptions;
use super::error::InterfaceError;
use super::metadata::{DeviceMetadata, Metadata};
use super::nwb::{Device, NwbFile};

/// A source of data for an NWB file.
///
/// An interface contributes its section of the metadata and then adds its objects to the file.
/// The converter runs the metadata step for every interface before any conversion so that the
/// YAML sidecar can override auto-filled values.
pub trait DataInterface {
    fn name(&self) -> &'static str;

    /// Fill in this interface's metadata on top of base
    fn get_metadata(&self, base: Metadata) -> Result<Metadata, InterfaceError>;

    /// Add everything enabled in options to the file
    fn run_conversion(
        &self,
        nwb: &mut NwbFile,
        metadata: &Metadata,
        options: &ConversionOptions,
    ) -> Result<(), InterfaceError>;
}

/// Add the device described by metadata unless the file already has it
pub(crate) fn ensure_device(
    nwb: &mut NwbFile,
    device: &DeviceMetadata,
) -> Result<(), InterfaceError> {
    if nwb.device(&device.name).is_none() {
        nwb.add_device(Device {
            name: device.name.clone(),
            description: device.description.clone(),
        })?;
    }
    Ok(())
}
