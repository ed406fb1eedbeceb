use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use eframe::egui::{
    self, Color32, ColorImage, DragValue, RichText, Sense, Slider, Stroke, TextureHandle,
    TextureOptions,
};
use egui_plot::{Line, Plot, PlotPoints, VLine};
use rfd::FileDialog;

use liboephys_nwb::timeseries::{frame_for_time, spikes_in_window};

use super::session::Session;

const MIN_DURATION: f64 = 0.5;
const MAX_DURATION: f64 = 100.0;
const START_STEP: f64 = 0.05;
const PLOT_HEIGHT: f32 = 180.0;
/// Above this many samples a trace is decimated before plotting
const MAX_PLOT_POINTS: usize = 20_000;

fn render_error_dialog(show: &mut bool, ctx: &egui::Context) {
    egui::Window::new("Error").open(show).show(ctx, |ui| {
        ui.label(
            "There was an error! Check the log file oephys_dashboard.log for more information.",
        )
    });
}

fn to_points(times: &[f64], values: &[f64]) -> PlotPoints {
    let stride = (times.len() / MAX_PLOT_POINTS).max(1);
    times
        .iter()
        .zip(values.iter())
        .step_by(stride)
        .map(|(t, v)| [*t, *v])
        .collect::<Vec<[f64; 2]>>()
        .into()
}

/// The dashboard state that can be saved and restored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub data_dir: PathBuf,
    pub nwb_path: String,
    pub duration: f64,
    pub show_mask: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("None"),
            nwb_path: String::new(),
            duration: 3.0,
            show_mask: false,
        }
    }
}

/// The displayed imaging frame
struct FrameTexture {
    index: usize,
    texture: TextureHandle,
    width: usize,
    height: usize,
}

/// The UI app which inherits the eframe::App trait.
pub struct DashboardApp {
    settings: DashboardSettings,
    session: Option<Session>,
    start: f64,
    cursor: f64,
    window: (f64, f64),
    frame: Option<FrameTexture>,
    failed_frame: Option<usize>,
    show_error_window: bool,
}

impl DashboardApp {
    /// Create the application
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let mut visuals = egui::Visuals::dark();
        visuals.override_text_color = Some(Color32::LIGHT_GRAY);
        cc.egui_ctx.set_visuals(visuals);
        DashboardApp {
            settings: DashboardSettings::default(),
            session: None,
            start: 0.0,
            cursor: 0.0,
            window: (0.0, 0.0),
            frame: None,
            failed_frame: None,
            show_error_window: false,
        }
    }

    fn load_session(&mut self) {
        let path = PathBuf::from(self.settings.nwb_path.trim());
        match Session::load(&path) {
            Ok(session) => {
                log::info!(
                    "Loaded {} (tmax {:.2} s)",
                    session.path().display(),
                    session.max_t()
                );
                self.session = Some(session);
                self.start = 0.0;
                self.frame = None;
                self.failed_frame = None;
            }
            Err(e) => {
                self.show_error_window = true;
                log::error!("{e}");
            }
        }
    }

    /// Latest allowed window start
    fn max_start(&self) -> f64 {
        match &self.session {
            Some(session) => (session.max_t() - self.settings.duration).max(0.0),
            None => 0.0,
        }
    }

    /// Keep the window inside the recording and reset the cursor when the window moves
    fn sync_window(&mut self) {
        self.settings.duration = self.settings.duration.clamp(MIN_DURATION, MAX_DURATION);
        self.start = self.start.clamp(0.0, self.max_start());
        let window = (self.start, self.start + self.settings.duration);
        if window != self.window {
            self.window = window;
            self.cursor = 0.5 * (window.0 + window.1);
        }
    }

    fn update_frame(&mut self, ctx: &egui::Context) {
        let session = match &self.session {
            Some(s) if s.has_imaging() => s,
            _ => return,
        };
        let index = frame_for_time(self.cursor, session.imaging_rate);
        if self.frame.as_ref().map(|f| f.index) == Some(index) || self.failed_frame == Some(index) {
            return;
        }
        match session.frame(index) {
            Ok(frame) => {
                let image = ColorImage::from_gray([frame.width, frame.height], &frame.pixels);
                self.frame = Some(FrameTexture {
                    index,
                    texture: ctx.load_texture("imaging_frame", image, TextureOptions::NEAREST),
                    width: frame.width,
                    height: frame.height,
                });
                self.failed_frame = None;
            }
            Err(e) => {
                self.failed_frame = Some(index);
                self.show_error_window = true;
                log::error!("{e}");
            }
        }
    }

    /// Write the current settings to a file
    fn write_settings(&mut self, path: &Path) {
        if let Ok(mut file) = File::create(path) {
            match serde_yaml::to_string(&self.settings) {
                Ok(yaml_str) => {
                    if let Err(x) = file.write_all(yaml_str.as_bytes()) {
                        log::error!("Error writing settings to file {}: {}", path.display(), x)
                    }
                }
                Err(x) => log::error!(
                    "Unable to write settings to file, serializer error: {}",
                    x
                ),
            };
        } else {
            self.show_error_window = true;
            log::error!("Could not open file {} for settings write", path.display());
        }
    }

    /// Read the settings from a file
    fn read_settings(&mut self, path: &Path) {
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_yaml::from_str::<DashboardSettings>(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(settings) => self.settings = settings,
            Err(e) => {
                self.show_error_window = true;
                log::error!("Could not read settings from {}: {}", path.display(), e)
            }
        }
    }

    fn render_file_browser(&mut self, ui: &mut egui::Ui) {
        egui::Grid::new("FileGrid").show(ui, |ui| {
            ui.label(format!(
                "Data directory: {}",
                self.settings.data_dir.display()
            ));
            if ui.button("Open...").clicked() {
                let mut dialog = FileDialog::new();
                if let Ok(dir) = std::env::current_dir() {
                    dialog = dialog.set_directory(dir);
                }
                if let Some(path) = dialog.pick_folder() {
                    self.settings.data_dir = path;
                }
            }
            ui.end_row();

            ui.label("NWB file:");
            ui.text_edit_singleline(&mut self.settings.nwb_path);
            if ui.button("Browse...").clicked() {
                let mut dialog = FileDialog::new().add_filter("NWB file", &["nwb"]);
                if self.settings.data_dir.is_dir() {
                    dialog = dialog.set_directory(&self.settings.data_dir);
                }
                if let Some(path) = dialog.pick_file() {
                    self.settings.nwb_path = path.to_string_lossy().to_string();
                }
            }
            if ui.button("Load").clicked() {
                self.load_session();
            }
            ui.end_row();
        });
    }

    fn render_time_controls(&mut self, ui: &mut egui::Ui) {
        let max_start = self.max_start();
        ui.horizontal(|ui| {
            ui.label(format!("start (s): {:.2}", self.start));
            ui.add(
                Slider::new(&mut self.start, 0.0..=max_start)
                    .step_by(START_STEP)
                    .show_value(false),
            );
            ui.label("duration (s):");
            ui.add(
                DragValue::new(&mut self.settings.duration)
                    .speed(0.1)
                    .range(MIN_DURATION..=MAX_DURATION),
            );
        });
        self.sync_window();
        let (t0, t1) = self.window;
        ui.horizontal(|ui| {
            ui.label(format!("frame cursor (s): {:.3}", self.cursor));
            ui.add(Slider::new(&mut self.cursor, t0..=t1).show_value(false));
        });
    }

    fn render_traces(&self, ui: &mut egui::Ui) {
        let session = match &self.session {
            Some(s) => s,
            None => return,
        };
        let (t0, t1) = self.window;
        let cursor = || VLine::new(self.cursor).color(Color32::YELLOW);

        Plot::new("ephys")
            .height(PLOT_HEIGHT)
            .y_axis_label("V")
            .include_x(t0)
            .include_x(t1)
            .show(ui, |plot_ui| {
                if let Some(ephys) = &session.ephys {
                    let (times, values) = ephys.window(t0, t1);
                    plot_ui.line(Line::new(to_points(&times, &values)).name("membrane voltage"));
                }
                plot_ui.vline(cursor());
            });

        Plot::new("spikes")
            .height(PLOT_HEIGHT / 2.0)
            .include_x(t0)
            .include_x(t1)
            .include_y(0.0)
            .include_y(1.0)
            .show_axes([true, false])
            .show(ui, |plot_ui| {
                for spike in spikes_in_window(&session.spikes, t0, t1) {
                    plot_ui.vline(VLine::new(spike).color(Color32::LIGHT_RED));
                }
                plot_ui.vline(cursor());
            });

        Plot::new("dff")
            .height(PLOT_HEIGHT)
            .y_axis_label("dF/F")
            .include_x(t0)
            .include_x(t1)
            .show(ui, |plot_ui| {
                if let Some(dff) = &session.dff {
                    let (times, values) = dff.window(t0, t1);
                    plot_ui.line(
                        Line::new(to_points(&times, &values))
                            .name("dF/F")
                            .color(Color32::LIGHT_GREEN),
                    );
                }
                plot_ui.vline(cursor());
            });
    }

    fn render_imaging(&mut self, ui: &mut egui::Ui) {
        let (session, frame) = match (&self.session, &self.frame) {
            (Some(s), Some(f)) => (s, f),
            _ => {
                ui.label("No imaging data");
                return;
            }
        };
        ui.horizontal(|ui| {
            ui.label(format!("frame: {}", frame.index));
            let text = if self.settings.show_mask {
                "Pixel Mask (on)"
            } else {
                "Pixel Mask (off)"
            };
            if ui.button(text).clicked() {
                self.settings.show_mask = !self.settings.show_mask;
            }
        });

        let available = ui.available_width().min(ui.available_height());
        let scale = available / frame.width.max(frame.height) as f32;
        let size = egui::vec2(frame.width as f32 * scale, frame.height as f32 * scale);
        let (response, painter) = ui.allocate_painter(size, Sense::hover());
        let rect = response.rect;
        painter.image(
            frame.texture.id(),
            rect,
            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            Color32::WHITE,
        );
        if self.settings.show_mask {
            let to_screen = |(x, y): (f32, f32)| rect.min + egui::vec2(x * scale, y * scale);
            let stroke = Stroke::new(1.5, Color32::RED);
            for [a, b] in session.outline(frame.height, frame.width) {
                painter.line_segment([to_screen(a), to_screen(b)], stroke);
            }
        }
    }
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        render_error_dialog(&mut self.show_error_window, ctx);
        self.update_frame(ctx);
        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            //Menus
            ui.menu_button("File", |ui| {
                if ui.button("Open...").clicked() {
                    if let Some(path) = FileDialog::new()
                        .add_filter("YAML file", &["yaml", "yml"])
                        .pick_file()
                    {
                        self.read_settings(&path);
                    }
                }
                if ui.button("Save...").clicked() {
                    if let Some(path) = FileDialog::new()
                        .add_filter("YAML file", &["yaml", "yml"])
                        .save_file()
                    {
                        self.write_settings(&path);
                    }
                }
            });
            ui.separator();
            self.render_file_browser(ui);
            ui.separator();
            self.render_time_controls(ui);
        });

        egui::SidePanel::right("imaging")
            .default_width(400.0)
            .show(ctx, |ui| {
                ui.label(RichText::new("Imaging").color(Color32::LIGHT_BLUE).size(18.0));
                self.render_imaging(ui);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            match &self.session {
                Some(session) => ui.label(
                    RichText::new(session.path().display().to_string())
                        .color(Color32::LIGHT_BLUE)
                        .size(18.0),
                ),
                None => ui.label(RichText::new("No file loaded").size(18.0)),
            };
            self.render_traces(ui);
        });
    }
}
