//! # Debrief Chart Module
//!
//! Offline rendering of a finished session log into the PNG shown to the
//! participant during the debrief interview.
//!
//! ## Steps
//! 1. Keep only rows whose phase is one of the four experimental stages
//! 2. Smooth the signal column with a trailing moving average
//! 3. Optionally negate it so that "up" reads as more activation
//! 4. Draw phase-coloured background bands, the smoothed line and a legend
//!
//! ## Output Contract
//! The image is written to `<output_dir>/<participant_id>_grafico.png`, where
//! the participant id is the log's file name without `_bio.csv`. The web front
//! end looks the file up by exactly that name.

use crate::config::ChartConfig;
use crate::error::ChartError;
use plotters::backend::BitMapBackend;
use plotters::chart::{ChartBuilder, SeriesLabelPosition};
use plotters::drawing::IntoDrawingArea;
use plotters::element::{PathElement, Rectangle};
use plotters::series::LineSeries;
use plotters::style::{Color, FontStyle, RGBColor, BLACK, WHITE};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const IMAGE_SIZE: (u32, u32) = (1200, 600);
const BAND_OPACITY: f64 = 0.7;
const LOG_SUFFIX: &str = "_bio.csv";
const DEFAULT_SIGNAL_COLUMNS: [&str; 2] = ["gsr", "eda_raw"];

const FONT_CANDIDATES: [&str; 6] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentPhase {
    Baseline,
    Stroop,
    Relaxation,
    Final,
}

impl ExperimentPhase {
    /// Map a logged phase label to its stage. Both the short stage names and
    /// the control event names that start each stage are accepted.
    pub fn recognize(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "baseline" | "inicio_baseline" => Some(Self::Baseline),
            "stroop" | "inicio_stroop" | "inicio_stroop_test" => Some(Self::Stroop),
            "relaxation" | "inicio_relajacion" | "activar_aroma" | "desactivar_aroma" => {
                Some(Self::Relaxation)
            }
            "final" | "inicio_final_measurement" => Some(Self::Final),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Baseline => "Baseline",
            Self::Stroop => "Stroop",
            Self::Relaxation => "Relaxation",
            Self::Final => "Final",
        }
    }

    pub fn color(&self) -> RGBColor {
        match self {
            Self::Baseline => RGBColor(0xD6, 0xEA, 0xF8),
            Self::Stroop => RGBColor(0xFA, 0xDB, 0xD8),
            Self::Relaxation => RGBColor(0xD5, 0xF5, 0xE3),
            Self::Final => RGBColor(0xFE, 0xF9, 0xE7),
        }
    }
}

/// One log row that survived filtering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartRow {
    /// Zero-based data row position in the original log
    pub index: usize,
    pub phase: ExperimentPhase,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalRows {
    pub column: String,
    pub rows: Vec<ChartRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSpan {
    pub phase: ExperimentPhase,
    pub start: usize,
    pub end: usize,
}

pub fn participant_id_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(LOG_SUFFIX) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "participant".to_string()),
    }
}

/// Read the experimental rows of a session log
pub fn load_rows(path: &Path, signal_column: Option<&str>) -> Result<SignalRows, ChartError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let phase_idx =
        position("phase").ok_or_else(|| ChartError::MissingColumn("phase".to_string()))?;
    let (column, signal_idx) = match signal_column {
        Some(name) => (
            name.to_string(),
            position(name).ok_or_else(|| ChartError::MissingColumn(name.to_string()))?,
        ),
        None => DEFAULT_SIGNAL_COLUMNS
            .iter()
            .copied()
            .find_map(|name| position(name).map(|idx| (name.to_string(), idx)))
            .ok_or_else(|| ChartError::MissingColumn(DEFAULT_SIGNAL_COLUMNS.join(" or ")))?,
    };

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let Some(phase) = record.get(phase_idx).and_then(ExperimentPhase::recognize) else {
            continue;
        };
        let Some(value) = record
            .get(signal_idx)
            .and_then(|cell| cell.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
        else {
            continue;
        };
        rows.push(ChartRow { index, phase, value });
    }

    Ok(SignalRows { column, rows })
}

/// Trailing mean over up to `window` values; the first values average
/// whatever is available so far.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut sum = 0.0;
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            sum += value;
            if i >= window {
                sum -= values[i - window];
            }
            sum / (i + 1).min(window) as f64
        })
        .collect()
}

/// First and last row index of each stage, in order of first appearance
pub fn phase_spans(rows: &[ChartRow]) -> Vec<PhaseSpan> {
    let mut spans: Vec<PhaseSpan> = Vec::new();
    for row in rows {
        match spans.iter_mut().find(|s| s.phase == row.phase) {
            Some(span) => {
                span.start = span.start.min(row.index);
                span.end = span.end.max(row.index);
            }
            None => spans.push(PhaseSpan {
                phase: row.phase,
                start: row.index,
                end: row.index,
            }),
        }
    }
    spans
}

/// Render the debrief chart for one session log and return the image path
pub fn generate(csv_path: &Path, config: &ChartConfig) -> Result<PathBuf, ChartError> {
    if !csv_path.is_file() {
        return Err(ChartError::MissingInput(csv_path.to_path_buf()));
    }

    let participant = participant_id_from_path(csv_path);
    let data = load_rows(csv_path, config.signal_column.as_deref())?;
    if data.rows.is_empty() {
        return Err(ChartError::NoExperimentalData);
    }

    let values: Vec<f64> = data.rows.iter().map(|r| r.value).collect();
    let sign = if config.invert_signal { -1.0 } else { 1.0 };
    let points: Vec<(f64, f64)> = data
        .rows
        .iter()
        .zip(moving_average(&values, config.moving_average_window))
        .map(|(row, smoothed)| (row.index as f64, sign * smoothed))
        .collect();
    let spans = phase_spans(&data.rows);

    fs::create_dir_all(&config.output_dir).map_err(|source| ChartError::CreateDir {
        path: config.output_dir.clone(),
        source,
    })?;
    let output = config.output_dir.join(format!("{}_grafico.png", participant));

    let series_label = if config.invert_signal {
        format!("Activation ({} smoothed, inverted)", data.column)
    } else {
        format!("{} (smoothed)", data.column)
    };
    let with_text = register_font(config.font_path.as_deref());
    render(&output, &participant, &series_label, &points, &spans, with_text)?;

    log::info!(
        "Debrief chart for '{}' written to {} ({} rows)",
        participant,
        output.display(),
        points.len()
    );
    Ok(output)
}

/// Make a TrueType font available as "sans-serif". Returns false when none
/// could be loaded, in which case charts are drawn without text.
fn register_font(configured: Option<&Path>) -> bool {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    *REGISTERED.get_or_init(|| {
        let candidates = configured
            .map(Path::to_path_buf)
            .into_iter()
            .chain(FONT_CANDIDATES.iter().map(PathBuf::from));

        for path in candidates {
            let Ok(bytes) = fs::read(&path) else {
                continue;
            };
            // the font registry only holds 'static data; loaded once per process
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if plotters::style::register_font("sans-serif", FontStyle::Normal, bytes).is_ok() {
                log::debug!("Chart font: {}", path.display());
                return true;
            }
        }
        log::warn!("No usable TrueType font found; chart text will be omitted");
        false
    })
}

fn render_error<E: std::fmt::Debug>(e: E) -> ChartError {
    ChartError::Render(format!("{:?}", e))
}

fn render(
    output: &Path,
    participant: &str,
    series_label: &str,
    points: &[(f64, f64)],
    spans: &[PhaseSpan],
    with_text: bool,
) -> Result<(), ChartError> {
    let root = BitMapBackend::new(output, IMAGE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let x_min = points.first().map(|p| p.0).unwrap_or(0.0);
    let x_max = points.last().map(|p| p.0).unwrap_or(1.0).max(x_min + 1.0);
    let (y_lo, y_hi) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        (lo.min(p.1), hi.max(p.1))
    });
    let pad = ((y_hi - y_lo) * 0.05).max(1e-3);
    let (y_min, y_max) = (y_lo - pad, y_hi + pad);

    let mut builder = ChartBuilder::on(&root);
    builder.margin(20);
    if with_text {
        let title = format!("Physiological response: participant {}", participant);
        builder
            .caption(title, ("sans-serif", 28))
            .x_label_area_size(45)
            .y_label_area_size(70);
    }
    let mut chart = builder
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(render_error)?;

    let mut mesh = chart.configure_mesh();
    mesh.light_line_style(BLACK.mix(0.06));
    if with_text {
        mesh.x_desc("Time (samples)").y_desc("Activation level (arbitrary)");
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw().map_err(render_error)?;

    for span in spans {
        let fill = span.phase.color().mix(BAND_OPACITY);
        let band = Rectangle::new(
            [(span.start as f64, y_min), (span.end as f64, y_max)],
            fill.filled(),
        );
        let series = chart.draw_series(std::iter::once(band)).map_err(render_error)?;
        if with_text {
            series
                .label(format!("Phase: {}", span.phase.title()))
                .legend(move |(x, y)| Rectangle::new([(x, y - 6), (x + 16, y + 6)], fill.filled()));
        }
    }

    let line = chart
        .draw_series(LineSeries::new(points.iter().copied(), BLACK.stroke_width(2)))
        .map_err(render_error)?;
    if with_text {
        line.label(series_label)
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK.stroke_width(2)));

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.85))
            .border_style(BLACK)
            .draw()
            .map_err(render_error)?;
    }

    root.present().map_err(render_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_log(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn chart_config(dir: &Path) -> ChartConfig {
        ChartConfig {
            output_dir: dir.join("feedback_images"),
            ..ChartConfig::default()
        }
    }

    #[test]
    fn test_recognize_phases() {
        assert_eq!(ExperimentPhase::recognize("baseline"), Some(ExperimentPhase::Baseline));
        assert_eq!(ExperimentPhase::recognize("INICIO_BASELINE"), Some(ExperimentPhase::Baseline));
        assert_eq!(ExperimentPhase::recognize("Stroop"), Some(ExperimentPhase::Stroop));
        assert_eq!(ExperimentPhase::recognize("ACTIVAR_AROMA"), Some(ExperimentPhase::Relaxation));
        assert_eq!(
            ExperimentPhase::recognize("INICIO_FINAL_MEASUREMENT"),
            Some(ExperimentPhase::Final)
        );
        assert_eq!(ExperimentPhase::recognize("idle"), None);
        assert_eq!(ExperimentPhase::recognize("practice"), None);
        assert_eq!(ExperimentPhase::recognize("FIN_SESION"), None);
    }

    #[test]
    fn test_participant_id_from_path() {
        assert_eq!(participant_id_from_path(Path::new("bio_data/p01_bio.csv")), "p01");
        assert_eq!(participant_id_from_path(Path::new("Ana L_pez__bio.csv")), "Ana L_pez_");
        assert_eq!(
            participant_id_from_path(Path::new("bio_data/session_20250101_120000.csv")),
            "session_20250101_120000"
        );
    }

    #[test]
    fn test_moving_average_partial_windows() {
        let smoothed = moving_average(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(smoothed, vec![1.0, 1.5, 2.5, 3.5]);

        let short = moving_average(&[2.0, 4.0, 6.0], 20);
        assert_eq!(short, vec![2.0, 3.0, 4.0]);

        assert_eq!(moving_average(&[5.0, 7.0], 0), vec![5.0, 7.0]);
    }

    #[test]
    fn test_load_rows_filters_and_keeps_row_index() {
        let dir = tempdir().unwrap();
        let path = write_log(
            dir.path(),
            "p01_bio.csv",
            "timestamp,datetime,gsr,phase\n\
             1.0,10:00:00,500,idle\n\
             2.0,10:00:01,510,baseline\n\
             3.0,10:00:02,oops,baseline\n\
             4.0,10:00:03,520,INICIO_STROOP\n\
             5.0,10:00:04,530,practice\n\
             6.0,10:00:05,540,final\n",
        );

        let data = load_rows(&path, None).unwrap();
        assert_eq!(data.column, "gsr");
        let indices: Vec<usize> = data.rows.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 3, 5]);
        assert_eq!(data.rows[1].phase, ExperimentPhase::Stroop);
        assert_eq!(data.rows[2].value, 540.0);
    }

    #[test]
    fn test_load_rows_falls_back_to_eda() {
        let dir = tempdir().unwrap();
        let path = write_log(
            dir.path(),
            "p02_bio.csv",
            "timestamp,datetime,eda_raw,ibi_raw,ibi_clean,phase\n\
             1.0,10:00:00,300,800,800,baseline\n",
        );
        let data = load_rows(&path, None).unwrap();
        assert_eq!(data.column, "eda_raw");
        assert_eq!(data.rows.len(), 1);
    }

    #[test]
    fn test_missing_columns() {
        let dir = tempdir().unwrap();
        let no_phase = write_log(dir.path(), "a_bio.csv", "timestamp,gsr\n1.0,2.0\n");
        assert!(matches!(
            load_rows(&no_phase, None),
            Err(ChartError::MissingColumn(c)) if c == "phase"
        ));

        let gyro = write_log(dir.path(), "b_bio.csv", "timestamp,gyro_x,phase\n1.0,2.0,final\n");
        assert!(matches!(load_rows(&gyro, None), Err(ChartError::MissingColumn(_))));
        assert_eq!(load_rows(&gyro, Some("gyro_x")).unwrap().rows.len(), 1);
    }

    #[test]
    fn test_phase_spans_in_first_appearance_order() {
        let row = |index, phase| ChartRow { index, phase, value: 0.0 };
        let rows = [
            row(2, ExperimentPhase::Baseline),
            row(3, ExperimentPhase::Baseline),
            row(7, ExperimentPhase::Stroop),
            row(9, ExperimentPhase::Stroop),
            row(12, ExperimentPhase::Final),
        ];
        let spans = phase_spans(&rows);
        assert_eq!(spans.len(), 3);
        assert_eq!((spans[0].start, spans[0].end), (2, 3));
        assert_eq!((spans[1].phase, spans[1].start, spans[1].end), (ExperimentPhase::Stroop, 7, 9));
        assert_eq!((spans[2].start, spans[2].end), (12, 12));
    }

    #[test]
    fn test_generate_missing_input() {
        let dir = tempdir().unwrap();
        let config = chart_config(dir.path());
        let result = generate(&dir.path().join("nobody_bio.csv"), &config);
        assert!(matches!(result, Err(ChartError::MissingInput(_))));
        assert!(!config.output_dir.exists());
    }

    #[test]
    fn test_generate_without_experimental_rows_writes_nothing() {
        let dir = tempdir().unwrap();
        let config = chart_config(dir.path());
        let path = write_log(
            dir.path(),
            "p03_bio.csv",
            "timestamp,datetime,gsr,phase\n1.0,10:00:00,500,idle\n2.0,10:00:01,501,idle\n",
        );

        assert!(matches!(generate(&path, &config), Err(ChartError::NoExperimentalData)));
        assert!(!config.output_dir.join("p03_grafico.png").exists());
    }

    #[test]
    fn test_generate_writes_png_named_after_participant() {
        let dir = tempdir().unwrap();
        let config = chart_config(dir.path());
        let mut log = String::from("timestamp,datetime,gsr,phase\n");
        let phases = ["idle", "baseline", "stroop", "relaxation", "final"];
        for i in 0..250 {
            let phase = phases[i / 50];
            let gsr = 500.0 + (i as f64 * 0.1).sin() * 20.0;
            log.push_str(&format!("{}.0,10:00:00,{},{}\n", i, gsr, phase));
        }
        let path = write_log(dir.path(), "p04_bio.csv", &log);

        let output = generate(&path, &config).unwrap();
        assert_eq!(output, config.output_dir.join("p04_grafico.png"));
        let bytes = fs::read(&output).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
    }
}
