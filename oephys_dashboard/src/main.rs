//! # oephys_dashboard
//!
//! Part of the oephys_nwb crate family.
//!
//! This is the application to browse converted NWB files with a GUI using [egui](https://github.com/emilk/egui).
//!
//! ## Install
//!
//! Use `cargo install --path ./oephys_dashboard`
//!
//! ## Use
//!
//! To launch the application simply invoke it after it is installed
//!
//! ```bash
//! oephys_dashboard
//! ```
//!
//! Pick a data directory (or type the path of a file), then load an `.nwb` file. The time
//! controls select the window shown in the plots:
//!
//! - start (s): Beginning of the window. Steps of 0.05 s up to the end of the recording minus the duration.
//! - duration (s): Length of the window, between 0.5 and 100 s.
//! - frame cursor: Time of the imaging frame shown on the right. Defaults to the middle of the window.
//!
//! The plots show the filtered membrane voltage (raw if no filtered trace was converted), the
//! spike times and the dF/F trace of the segmented soma. The "Pixel Mask" button toggles the
//! outline of the soma ROI over the imaging frame.
//!
//! Dashboard settings can be saved using File->Save and loaded using File->Open

mod app;
mod session;
use app::DashboardApp;
use std::fs::File;

/// The program entry point
fn main() {
    // Setup logging to a file
    match File::create("./oephys_dashboard.log") {
        Ok(log_file) => {
            if let Err(e) = simplelog::WriteLogger::init(
                simplelog::LevelFilter::Info,
                simplelog::Config::default(),
                log_file,
            ) {
                eprintln!("Could not initialize logging: {e}");
            }
        }
        Err(e) => eprintln!("Could not create log file: {e}"),
    }
    log::info!("Starting oephys dashboard");

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_title("Oephys Dashboard")
            .with_inner_size(eframe::epaint::vec2(1200.0, 800.0))
            .with_min_inner_size(eframe::epaint::vec2(800.0, 600.0)),
        ..Default::default()
    };
    match eframe::run_native(
        "oephys_dashboard",
        native_options,
        Box::new(|cc| Ok(Box::new(DashboardApp::new(cc)))),
    ) {
        Ok(()) => (),
        Err(e) => log::error!("Eframe error: {}", e),
    }
}
