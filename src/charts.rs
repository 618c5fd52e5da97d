use crate::app::Message;
use crate::hrv::HrvResult;
use crate::timeseries::ValueSliceExt;
use plotters::chart::ChartBuilder;
use plotters::element::Rectangle;
use plotters::series::LineSeries;
use plotters::style::{Color, RGBColor, BLACK, BLUE, CYAN, GREEN, MAGENTA, RED};
use plotters_iced::{Chart, DrawingBackend};

const BACKGROUND: RGBColor = RGBColor(245, 245, 240);
const AXIS: RGBColor = RGBColor(60, 60, 60);

pub const GSR_COLOR: RGBColor = BLUE;
pub const EDA_COLOR: RGBColor = GREEN;
pub const IBI_COLOR: RGBColor = RED;
pub const GYRO_COLORS: [RGBColor; 3] = [GREEN, MAGENTA, CYAN];

/// Y range covering every series, padded so a flat line is still visible
fn value_range(series: &[(&[f64], RGBColor)]) -> (f64, f64) {
    let bounds = series
        .iter()
        .filter_map(|(values, _)| values.min_max())
        .fold(None, |acc: Option<(f64, f64)>, (lo, hi)| match acc {
            None => Some((lo, hi)),
            Some((min, max)) => Some((min.min(lo), max.max(hi))),
        });

    match bounds {
        None => (0.0, 1.0),
        Some((min, max)) => {
            let pad = ((max - min) * 0.05).max(0.5);
            (min - pad, max + pad)
        }
    }
}

/// Scrolling line chart over sample index, one line per series
pub struct StripChart<'a> {
    pub title: String,
    pub series: Vec<(&'a [f64], RGBColor)>,
}

impl<'a> StripChart<'a> {
    pub fn new(title: impl Into<String>, series: Vec<(&'a [f64], RGBColor)>) -> Self {
        Self {
            title: title.into(),
            series,
        }
    }
}

impl Chart<Message> for StripChart<'_> {
    type State = ();

    fn build_chart<DB: DrawingBackend>(&self, _state: &Self::State, mut builder: ChartBuilder<DB>) {
        let len = self.series.iter().map(|(values, _)| values.len()).max().unwrap_or(0);
        let (min_value, max_value) = value_range(&self.series);

        let Ok(mut chart) = builder
            .margin(15)
            .caption(&self.title, ("sans-serif", 18))
            .x_label_area_size(0)
            .y_label_area_size(40)
            .build_cartesian_2d(0..len.max(2), min_value..max_value)
        else {
            return;
        };

        let _ = chart.plotting_area().fill(&BACKGROUND);
        let _ = chart.configure_mesh().axis_style(AXIS).draw();

        for (values, color) in &self.series {
            let line = LineSeries::new(values.iter().copied().enumerate(), color);
            if let Err(e) = chart.draw_series(line) {
                log::debug!("Failed to draw {} series: {:?}", self.title, e);
            }
        }
    }
}

/// Latest HRV result as two bars: RMSSD (ms) and HF power (n.u.)
pub struct HrvBarChart<'a> {
    pub latest: Option<&'a HrvResult>,
}

impl Chart<Message> for HrvBarChart<'_> {
    type State = ();

    fn build_chart<DB: DrawingBackend>(&self, _state: &Self::State, mut builder: ChartBuilder<DB>) {
        let (rmssd, hf_nu) = self
            .latest
            .map(|r| (r.rmssd_ms, r.hf_nu))
            .unwrap_or((0.0, 0.0));
        let top = (rmssd.max(hf_nu) * 1.2).max(100.0);
        let caption = match self.latest {
            Some(r) => format!("RMSSD {:.1} ms | HF {:.1} n.u.", r.rmssd_ms, r.hf_nu),
            None => "HRV: waiting for data".to_string(),
        };

        let Ok(mut chart) = builder
            .margin(15)
            .caption(caption, ("sans-serif", 18))
            .x_label_area_size(0)
            .y_label_area_size(40)
            .build_cartesian_2d(0.0..2.0, 0.0..top)
        else {
            return;
        };

        let _ = chart.plotting_area().fill(&BACKGROUND);
        let _ = chart.configure_mesh().axis_style(AXIS).disable_x_mesh().draw();

        let bars = [(0.0, rmssd, BLUE), (1.0, hf_nu, MAGENTA)];
        let bar = |x: f64, value: f64| [(x + 0.2, 0.0), (x + 0.8, value)];
        let _ = chart.draw_series(
            bars.iter()
                .map(|&(x, value, color)| Rectangle::new(bar(x, value), color.filled())),
        );
        let _ = chart.draw_series(
            bars.iter()
                .map(|&(x, value, _)| Rectangle::new(bar(x, value), BLACK.stroke_width(1))),
        );
    }
}
