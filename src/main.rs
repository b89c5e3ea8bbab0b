use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

use anyhow::{Context, Result};
use clap::Parser;
use eframe::egui::{
    self, Button, Key, Pos2, Rect, RichText, ScrollArea, Sense, TextEdit, Ui, Vec2,
};
use tracing_subscriber::EnvFilter;

use spanview::{api, colors, persistent, related_errors, spans_interface, types};

use api::{
    fetch_related_errors, prompts_update, PromptStatus, PromptsUpdateParams, ReqwestTransport,
};
use persistent::PersistentDataV1;
use related_errors::{ErrorEventsSnapshot, RelatedErrorsConfig};
use spans_interface::{SpansInterface, SpansView};
use types::{time_point_to_utc_string, RawEvent, TimePoint, MILLISECONDS_PER_SECOND};

/// Prompt shown above the trace, explaining what the search bar matches.
const SEARCH_HINT_FEATURE: &str = "spans_search_hint";

#[derive(clap::Parser, Debug)]
#[clap(version, about = "Viewer for the spans of a transaction event")]
struct LaunchConfig {
    /// Transaction event (JSON) to open on start
    file: Option<PathBuf>,
    /// Base url of the API, e.g. https://sentry.example.com/api/0
    #[clap(long, env = "SPANVIEW_API_URL")]
    api_url: Option<String>,
    #[clap(long, env = "SPANVIEW_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,
    /// Organization slug used for the related errors query
    #[clap(long, env = "SPANVIEW_ORG")]
    org: Option<String>,
    /// Numeric organization id, needed to record prompt dismissals
    #[clap(long, env = "SPANVIEW_ORGANIZATION_ID")]
    organization_id: Option<String>,
    /// Relate every error in the trace, not only the ones of this transaction
    #[clap(long)]
    no_transaction_filter: bool,
    #[clap(long, default_value_t = 0.0)]
    time_padding_secs: f64,
}

fn main() -> eframe::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LaunchConfig::parse();
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1280.0, 800.0]),
        ..Default::default()
    };
    eframe::run_native(
        "spanview",
        options,
        Box::new(move |_cc| Ok(Box::new(App::new(config)))),
    )
}

struct Layout {
    row_height: f32,
    indent_width: f32,
    label_width: f32,
    bar_height: f32,
}

struct App {
    layout: Layout,
    settings: PersistentDataV1,
    auth_token: Option<String>,
    related_errors_config: RelatedErrorsConfig,

    interface: Option<SpansInterface>,
    search_text: String,
    related_errors_receiver: Option<Receiver<ErrorEventsSnapshot>>,
    load_error: Option<String>,
}

impl App {
    fn new(config: LaunchConfig) -> App {
        let mut settings = persistent::load_persistent_data().unwrap_or_else(|e| {
            tracing::warn!("Failed to load persistent data: {e:#}");
            PersistentDataV1::default()
        });
        // Command line wins over whatever was saved last time.
        if config.api_url.is_some() {
            settings.api_url = config.api_url;
        }
        if config.org.is_some() {
            settings.org_slug = config.org;
        }
        if config.organization_id.is_some() {
            settings.organization_id = config.organization_id;
        }

        let mut res = App {
            layout: Layout {
                row_height: 22.0,
                indent_width: 14.0,
                label_width: 420.0,
                bar_height: 14.0,
            },
            settings,
            auth_token: config.auth_token,
            related_errors_config: RelatedErrorsConfig {
                narrow_by_transaction: !config.no_transaction_filter,
                time_padding_secs: config.time_padding_secs,
            },
            interface: None,
            search_text: String::new(),
            related_errors_receiver: None,
            load_error: None,
        };

        if let Some(path) = config.file {
            tracing::info!("Trying to open file: {}", path.display());
            res.open_file(&path, None);
        }

        res
    }

    fn open_file(&mut self, path: &Path, ctx: Option<&egui::Context>) {
        match self.load_file(path) {
            Ok(()) => {
                tracing::info!("File loaded successfully.");
                self.load_error = None;
                self.settings.last_opened_file = Some(path.to_path_buf());
                self.save_persistent_data();
                self.start_related_errors_fetch(ctx);
            }
            Err(e) => {
                tracing::warn!("Error loading file: {e:#}");
                self.load_error = Some(format!("Error loading {}: {e:#}", path.display()));
            }
        }
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let file_bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let event: RawEvent =
            serde_json::from_slice(&file_bytes).context("file is not a transaction event")?;

        match &mut self.interface {
            Some(interface) => interface.set_event(event)?,
            None => {
                let mut interface = SpansInterface::new(
                    self.settings.org_slug.clone().unwrap_or_default(),
                    event,
                    self.related_errors_config.clone(),
                )?;
                interface.handle_span_filter(&self.search_text);
                self.interface = Some(interface);
            }
        }
        Ok(())
    }

    /// Runs the related errors query on a worker thread, the result is picked up in
    /// [App::poll_related_errors]. A result for a previously opened event is dropped together
    /// with its receiver.
    fn start_related_errors_fetch(&mut self, ctx: Option<&egui::Context>) {
        let Some(interface) = &mut self.interface else {
            return;
        };
        let org_slug = interface.org_slug().to_string();
        let Some(api_url) = self
            .settings
            .api_url
            .clone()
            .filter(|_| !org_slug.is_empty())
        else {
            tracing::info!("No API url or organization configured, not fetching related errors");
            interface.set_related_errors(ErrorEventsSnapshot::Failed);
            self.related_errors_receiver = None;
            return;
        };

        let query = interface.related_errors_query();
        let auth_token = self.auth_token.clone();
        let ctx = ctx.cloned();
        let (sender, receiver) = channel();
        std::thread::spawn(move || {
            let result = ReqwestTransport::new(&api_url, auth_token.as_deref())
                .and_then(|transport| fetch_related_errors(&transport, &org_slug, &query));
            let snapshot = match result {
                Ok(errors) => ErrorEventsSnapshot::Loaded(errors),
                Err(e) => {
                    tracing::warn!("Failed to fetch related errors: {e:#}");
                    ErrorEventsSnapshot::Failed
                }
            };
            // The receiver is gone if another event was opened in the meantime.
            let _ = sender.send(snapshot);
            if let Some(ctx) = ctx {
                ctx.request_repaint();
            }
        });
        self.related_errors_receiver = Some(receiver);
    }

    fn poll_related_errors(&mut self) {
        let Some(snapshot) = self
            .related_errors_receiver
            .as_ref()
            .and_then(|receiver| receiver.try_recv().ok())
        else {
            return;
        };
        self.related_errors_receiver = None;
        if let Some(interface) = &mut self.interface {
            interface.set_related_errors(snapshot);
        }
    }

    fn hide_prompt(&mut self, feature: &str, status: PromptStatus) {
        self.settings.hidden_prompts.push(feature.to_string());
        self.save_persistent_data();

        let (Some(api_url), Some(organization_id)) = (
            self.settings.api_url.clone(),
            self.settings.organization_id.clone(),
        ) else {
            return;
        };
        let params = PromptsUpdateParams {
            organization_id,
            project_id: self
                .interface
                .as_ref()
                .and_then(|interface| interface.event().project_id.clone()),
            feature: feature.to_string(),
            status,
        };
        let auth_token = self.auth_token.clone();
        std::thread::spawn(move || {
            let result = ReqwestTransport::new(&api_url, auth_token.as_deref())
                .and_then(|transport| prompts_update(&transport, &params));
            if let Err(e) = result {
                tracing::warn!("Failed to update prompt {}: {e:#}", params.feature);
            }
        });
    }

    fn save_persistent_data(&self) {
        if let Err(e) = persistent::save_persistent_data(&self.settings) {
            tracing::warn!("Failed to save persistent data: {e:#}");
        }
    }

    fn draw_top_bar(&mut self, ui: &mut Ui, ctx: &egui::Context) {
        ui.horizontal(|ui| {
            if ui.button("Open file").clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .add_filter("Transaction event", &["json"])
                    .pick_file()
                {
                    tracing::info!("Loading file: {}...", path.display());
                    self.open_file(&path, Some(ctx));
                }
            }

            let can_reload = self.interface.is_some() && self.settings.last_opened_file.is_some();
            if ui.add_enabled(can_reload, Button::new("Reload")).clicked() {
                if let Some(path) = self.settings.last_opened_file.clone() {
                    self.open_file(&path, Some(ctx));
                }
            }

            if let Some(interface) = &self.interface {
                let event = interface.event();
                ui.separator();
                ui.label(event.title.as_deref().unwrap_or("<untitled transaction>"));
                ui.label(
                    RichText::new(format!("event {}", event.event_id)).color(colors::GRAY_180),
                );
            }
        });
    }

    fn draw_search_hint(&mut self, ui: &mut Ui) {
        if self
            .settings
            .hidden_prompts
            .iter()
            .any(|feature| feature == SEARCH_HINT_FEATURE)
        {
            return;
        }

        let mut hide_with = None;
        egui::Frame::new()
            .fill(colors::VERY_LIGHT_BLUE)
            .show(ui, |ui| {
                ui.horizontal(|ui| {
                    ui.label(
                        RichText::new(
                            "Tip: the search matches span operations and descriptions, ignoring case.",
                        )
                        .color(colors::GRAY_40),
                    );
                    if ui.button("Snooze").clicked() {
                        hide_with = Some(PromptStatus::Snoozed);
                    }
                    if ui.button("Dismiss").clicked() {
                        hide_with = Some(PromptStatus::Dismissed);
                    }
                });
            });
        if let Some(status) = hide_with {
            self.hide_prompt(SEARCH_HINT_FEATURE, status);
        }
    }

    fn draw_central_panel(&mut self, ui: &mut Ui) {
        if let Some(error) = &self.load_error {
            ui.colored_label(colors::MILD_RED, error.as_str());
        }

        let Some(interface) = &mut self.interface else {
            ui.label("Open a transaction event file to see its spans.");
            return;
        };

        // Alert, then the search bar, then the trace.
        if let Some(alert) = interface.render().alert {
            egui::Frame::new()
                .fill(colors::VERY_LIGHT_YELLOW)
                .stroke(egui::Stroke::new(1.0, colors::DARK_YELLOW))
                .show(ui, |ui| {
                    ui.set_width(ui.available_width());
                    ui.label(RichText::new(alert).color(colors::GRAY_40));
                });
        }

        let search = ui.add(
            TextEdit::singleline(&mut self.search_text)
                .hint_text(spans_interface::SEARCH_PLACEHOLDER)
                .desired_width(f32::INFINITY),
        );
        if search.changed() {
            interface.handle_span_filter(&self.search_text);
        }

        self.draw_search_hint(ui);

        if let Some(interface) = &self.interface {
            draw_trace(ui, &interface.render(), &self.layout);
        }
    }
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_related_errors();

        egui::TopBottomPanel::top("top bar").show(ctx, |ui| {
            self.draw_top_bar(ui, ctx);
        });
        egui::CentralPanel::default().show(ctx, |ui| {
            self.draw_central_panel(ui);
        });

        // If Ctrl+Q clicked, quit the app
        if ctx.input(|i| i.key_down(Key::Q) && i.modifiers.ctrl) {
            std::process::exit(0);
        }
    }
}

fn draw_trace(ui: &mut Ui, view: &SpansView, layout: &Layout) {
    let trace = view.trace;
    ui.horizontal(|ui| {
        ui.label(RichText::new(trace.op.as_str()).strong());
        if let Some(description) = &trace.description {
            ui.label(description.as_str());
        }
        ui.label(
            RichText::new(format!(
                "trace {} | {} | {:.2}ms | showing {} of {} spans",
                trace.trace_id,
                time_point_to_utc_string(trace.trace_start_timestamp),
                trace.duration() * MILLISECONDS_PER_SECOND,
                view.spans.len(),
                trace.num_of_spans(),
            ))
            .color(colors::GRAY_180),
        );
    });
    ui.separator();

    if view.spans.is_empty() {
        if view.search_query.is_empty() {
            ui.label("This transaction has no child spans.");
        } else {
            ui.label(format!("No spans match \"{}\".", view.search_query));
        }
        return;
    }

    ScrollArea::vertical().auto_shrink([false, false]).show_rows(
        ui,
        layout.row_height,
        view.rows.len(),
        |ui, row_range| {
            for row in &view.rows[row_range] {
                let span = row.span;
                let depth = row.depth;
                ui.horizontal(|ui| {
                    let (label_rect, _) = ui.allocate_exact_size(
                        Vec2::new(layout.label_width, layout.row_height),
                        Sense::hover(),
                    );
                    let text_pos = Pos2::new(
                        label_rect.min.x + depth as f32 * layout.indent_width,
                        label_rect.center().y,
                    );
                    ui.painter().with_clip_rect(label_rect).text(
                        text_pos,
                        egui::Align2::LEFT_CENTER,
                        span.label(),
                        egui::FontId::monospace(12.0),
                        ui.visuals().text_color(),
                    );

                    let (bar_area, response) = ui.allocate_exact_size(
                        Vec2::new(ui.available_width(), layout.row_height),
                        Sense::hover(),
                    );
                    ui.painter().rect_filled(bar_area, 0.0, colors::GRAY_230);
                    let start_x = time_to_screen(
                        span.start_time,
                        bar_area.min.x,
                        bar_area.max.x,
                        trace.trace_start_timestamp,
                        trace.trace_end_timestamp,
                    );
                    let end_x = time_to_screen(
                        span.end_time,
                        bar_area.min.x,
                        bar_area.max.x,
                        trace.trace_start_timestamp,
                        trace.trace_end_timestamp,
                    )
                    .max(start_x + 1.0);
                    let bar = Rect::from_min_max(
                        Pos2::new(start_x, bar_area.center().y - layout.bar_height / 2.0),
                        Pos2::new(end_x, bar_area.center().y + layout.bar_height / 2.0),
                    );
                    ui.painter()
                        .rect_filled(bar, 2.0, colors::span_color(span.status.as_deref()));
                    response.on_hover_text(format!(
                        "{}\nspan {}\nstart: {}\nduration: {:.3}ms\nstatus: {}",
                        span.label(),
                        span.span_id,
                        time_point_to_utc_string(span.start_time),
                        span.duration() * MILLISECONDS_PER_SECOND,
                        span.status.as_deref().unwrap_or("unknown"),
                    ));
                });
            }
        },
    );
}

fn time_to_screen(
    time: TimePoint,
    start_x: f32,
    end_x: f32,
    start_time: TimePoint,
    end_time: TimePoint,
) -> f32 {
    if end_time <= start_time {
        return start_x;
    }
    start_x + ((time - start_time) / (end_time - start_time)) as f32 * (end_x - start_x)
}

#[test]
fn test_time_to_screen() {
    assert_eq!(time_to_screen(5.0, 0.0, 100.0, 0.0, 10.0), 50.0);
    assert_eq!(time_to_screen(5.0, 0.0, 100.0, 5.0, 5.0), 0.0);
}
