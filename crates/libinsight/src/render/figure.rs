//! In-memory figure mutated by sandboxed scripts and rasterised to SVG afterwards.

use std::fmt::Write as _;

use serde::Serialize;

pub const DEFAULT_WIDTH_INCHES: f64 = 6.4;
pub const DEFAULT_HEIGHT_INCHES: f64 = 4.8;
pub const PIXELS_PER_INCH: f64 = 100.0;
const MIN_INCHES: f64 = 1.0;
const MAX_INCHES: f64 = 40.0;
const MAX_TICK_LABEL_CHARS: usize = 14;
const MAX_CATEGORY_LABELS: usize = 30;

const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Bar,
    BarH,
    Line,
    Scatter,
    Pie,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub kind: SeriesKind,
    pub label: Option<String>,
    pub categories: Vec<String>,
    /// `NaN` marks a missing value; it is skipped when drawing.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedImage {
    pub svg: String,
    pub width: u32,
    pub height: u32,
    pub series_count: usize,
}

impl RenderedImage {
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.series_count == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    width_inches: f64,
    height_inches: f64,
    title: Option<String>,
    x_label: Option<String>,
    y_label: Option<String>,
    x_tick_rotation: f64,
    legend: bool,
    grid: bool,
    series: Vec<Series>,
}

impl Default for Figure {
    fn default() -> Self {
        Self {
            width_inches: DEFAULT_WIDTH_INCHES,
            height_inches: DEFAULT_HEIGHT_INCHES,
            title: None,
            x_label: None,
            y_label: None,
            x_tick_rotation: 0.0,
            legend: false,
            grid: false,
            series: Vec::new(),
        }
    }
}

impl Figure {
    /// Starts a fresh figure of the given size, discarding anything drawn so far.
    pub fn reset(&mut self, width_inches: f64, height_inches: f64) {
        *self = Self {
            width_inches: clamp_inches(width_inches, DEFAULT_WIDTH_INCHES),
            height_inches: clamp_inches(height_inches, DEFAULT_HEIGHT_INCHES),
            ..Self::default()
        };
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    pub fn set_x_label(&mut self, label: impl Into<String>) {
        self.x_label = Some(label.into());
    }

    pub fn set_y_label(&mut self, label: impl Into<String>) {
        self.y_label = Some(label.into());
    }

    pub fn set_x_tick_rotation(&mut self, degrees: f64) {
        self.x_tick_rotation = if degrees.is_finite() {
            degrees.clamp(-90.0, 90.0)
        } else {
            0.0
        };
    }

    pub fn enable_legend(&mut self) {
        self.legend = true;
    }

    pub fn set_grid(&mut self, enabled: bool) {
        self.grid = enabled;
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    #[must_use]
    pub fn series(&self) -> &[Series] {
        &self.series
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    #[must_use]
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            (self.width_inches * PIXELS_PER_INCH).round() as u32,
            (self.height_inches * PIXELS_PER_INCH).round() as u32,
        )
    }

    #[must_use]
    pub fn to_image(&self) -> RenderedImage {
        let (width, height) = self.pixel_size();
        let mut canvas = Canvas::new(width, height);

        let frame = self.plot_frame(f64::from(width), f64::from(height));
        if let Some(title) = &self.title {
            canvas.text(
                f64::from(width) / 2.0,
                28.0,
                title,
                TextStyle::centered(16.0).bold(),
            );
        }

        if let Some(pie) = self.series.iter().find(|series| series.kind == SeriesKind::Pie) {
            draw_pie(&mut canvas, &frame, pie);
        } else if !self.series.is_empty() {
            self.draw_cartesian(&mut canvas, &frame);
        }

        if self.legend {
            self.draw_legend(&mut canvas, &frame);
        }

        RenderedImage {
            svg: canvas.finish(),
            width,
            height,
            series_count: self.series.len(),
        }
    }

    fn has_labels(&self) -> bool {
        self.series.iter().any(|series| series.label.is_some())
    }

    fn plot_frame(&self, width: f64, height: f64) -> PlotFrame {
        let top = if self.title.is_some() { 50.0 } else { 24.0 };
        let right = if self.legend && self.has_labels() {
            170.0
        } else {
            24.0
        };
        let bottom = if self.x_tick_rotation.abs() > f64::EPSILON {
            100.0
        } else {
            64.0
        };
        let left = 84.0;

        PlotFrame {
            left,
            top,
            right: (width - right).max(left + 10.0),
            bottom: (height - bottom).max(top + 10.0),
        }
    }

    fn draw_cartesian(&self, canvas: &mut Canvas, frame: &PlotFrame) {
        let horizontal = self
            .series
            .iter()
            .any(|series| series.kind == SeriesKind::BarH);
        let categories = self.category_axis();
        let value_axis = NiceAxis::from_values(
            self.series
                .iter()
                .flat_map(|series| series.values.iter().copied()),
            self.series
                .iter()
                .any(|series| matches!(series.kind, SeriesKind::Bar | SeriesKind::BarH)),
        );

        canvas.rect(frame.left, frame.top, frame.width(), frame.height(), "none", "#333333");
        self.draw_value_ticks(canvas, frame, &value_axis, horizontal);
        self.draw_category_ticks(canvas, frame, &categories, horizontal);

        let bar_series = self
            .series
            .iter()
            .filter(|series| matches!(series.kind, SeriesKind::Bar | SeriesKind::BarH))
            .count()
            .max(1);
        let mut bar_slot = 0_usize;
        for (index, series) in self.series.iter().enumerate() {
            let color = PALETTE[index % PALETTE.len()];
            match series.kind {
                SeriesKind::Bar | SeriesKind::BarH => {
                    draw_bars(
                        canvas,
                        frame,
                        series,
                        &categories,
                        &value_axis,
                        BarLayout {
                            horizontal,
                            slot: bar_slot,
                            slots: bar_series,
                        },
                        color,
                    );
                    bar_slot += 1;
                }
                SeriesKind::Line | SeriesKind::Scatter => {
                    draw_points(canvas, frame, series, &categories, &value_axis, horizontal, color);
                }
                SeriesKind::Pie => {}
            }
        }

        if let Some(label) = &self.x_label {
            canvas.text(
                frame.left + frame.width() / 2.0,
                frame.bottom + if self.x_tick_rotation.abs() > f64::EPSILON { 88.0 } else { 48.0 },
                label,
                TextStyle::centered(13.0),
            );
        }
        if let Some(label) = &self.y_label {
            let x = 20.0;
            let y = frame.top + frame.height() / 2.0;
            canvas.text(x, y, label, TextStyle::centered(13.0).rotated(-90.0));
        }
    }

    fn category_axis(&self) -> Vec<String> {
        let mut categories: Vec<String> = Vec::new();
        for series in &self.series {
            for category in &series.categories {
                if !categories.contains(category) {
                    categories.push(category.clone());
                }
            }
        }
        categories
    }

    fn draw_value_ticks(
        &self,
        canvas: &mut Canvas,
        frame: &PlotFrame,
        axis: &NiceAxis,
        horizontal: bool,
    ) {
        for tick in axis.ticks() {
            let label = format_tick(tick);
            if horizontal {
                let x = frame.left + axis.fraction(tick) * frame.width();
                if self.grid {
                    canvas.line(x, frame.top, x, frame.bottom, "#dddddd", 1.0);
                }
                canvas.line(x, frame.bottom, x, frame.bottom + 5.0, "#333333", 1.0);
                canvas.text(x, frame.bottom + 20.0, &label, TextStyle::centered(11.0));
            } else {
                let y = frame.bottom - axis.fraction(tick) * frame.height();
                if self.grid {
                    canvas.line(frame.left, y, frame.right, y, "#dddddd", 1.0);
                }
                canvas.line(frame.left - 5.0, y, frame.left, y, "#333333", 1.0);
                canvas.text(frame.left - 8.0, y + 4.0, &label, TextStyle::end(11.0));
            }
        }
    }

    fn draw_category_ticks(
        &self,
        canvas: &mut Canvas,
        frame: &PlotFrame,
        categories: &[String],
        horizontal: bool,
    ) {
        if categories.is_empty() {
            return;
        }

        let stride = categories.len().div_ceil(MAX_CATEGORY_LABELS).max(1);
        for (index, category) in categories.iter().enumerate().step_by(stride) {
            let label = truncate_label(category);
            let center = category_center(index, categories.len(), frame, horizontal);
            if horizontal {
                canvas.text(frame.left - 8.0, center + 4.0, &label, TextStyle::end(11.0));
            } else if self.x_tick_rotation.abs() > f64::EPSILON {
                canvas.text(
                    center,
                    frame.bottom + 16.0,
                    &label,
                    TextStyle::end(11.0).rotated(-self.x_tick_rotation),
                );
            } else {
                canvas.text(center, frame.bottom + 20.0, &label, TextStyle::centered(11.0));
            }
        }
    }

    fn draw_legend(&self, canvas: &mut Canvas, frame: &PlotFrame) {
        let mut y = frame.top + 12.0;
        let x = frame.right + 16.0;
        for (index, series) in self.series.iter().enumerate() {
            let Some(label) = &series.label else {
                continue;
            };
            canvas.rect(x, y - 9.0, 12.0, 12.0, PALETTE[index % PALETTE.len()], "none");
            canvas.text(x + 18.0, y + 1.0, &truncate_label(label), TextStyle::start(11.0));
            y += 20.0;
        }
    }
}

fn clamp_inches(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value.clamp(MIN_INCHES, MAX_INCHES)
    } else {
        fallback
    }
}

#[derive(Debug, Clone, Copy)]
struct PlotFrame {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl PlotFrame {
    fn width(&self) -> f64 {
        self.right - self.left
    }

    fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone, Copy)]
struct BarLayout {
    horizontal: bool,
    slot: usize,
    slots: usize,
}

fn category_center(index: usize, count: usize, frame: &PlotFrame, horizontal: bool) -> f64 {
    let count = count.max(1) as f64;
    let fraction = (index as f64 + 0.5) / count;
    if horizontal {
        frame.top + fraction * frame.height()
    } else {
        frame.left + fraction * frame.width()
    }
}

fn draw_bars(
    canvas: &mut Canvas,
    frame: &PlotFrame,
    series: &Series,
    categories: &[String],
    axis: &NiceAxis,
    layout: BarLayout,
    color: &str,
) {
    let span = if layout.horizontal {
        frame.height()
    } else {
        frame.width()
    };
    let band = span / categories.len().max(1) as f64;
    let thickness = band * 0.8 / layout.slots as f64;
    let baseline = axis.fraction(0.0_f64.clamp(axis.min, axis.max));

    for (category, value) in series.categories.iter().zip(&series.values) {
        if !value.is_finite() {
            continue;
        }
        let Some(index) = categories.iter().position(|known| known == category) else {
            continue;
        };
        let center = category_center(index, categories.len(), frame, layout.horizontal);
        let offset = -band * 0.4 + thickness * layout.slot as f64;
        let start = baseline.min(axis.fraction(*value));
        let end = baseline.max(axis.fraction(*value));

        if layout.horizontal {
            let x = frame.left + start * frame.width();
            let length = (end - start) * frame.width();
            canvas.rect(x, center + offset, length, thickness, color, "none");
        } else {
            let y = frame.bottom - end * frame.height();
            let length = (end - start) * frame.height();
            canvas.rect(center + offset, y, thickness, length, color, "none");
        }
    }
}

fn draw_points(
    canvas: &mut Canvas,
    frame: &PlotFrame,
    series: &Series,
    categories: &[String],
    axis: &NiceAxis,
    horizontal: bool,
    color: &str,
) {
    let points = series
        .categories
        .iter()
        .zip(&series.values)
        .filter(|(_, value)| value.is_finite())
        .filter_map(|(category, value)| {
            let index = categories.iter().position(|known| known == category)?;
            let center = category_center(index, categories.len(), frame, horizontal);
            let fraction = axis.fraction(*value);
            Some(if horizontal {
                (frame.left + fraction * frame.width(), center)
            } else {
                (center, frame.bottom - fraction * frame.height())
            })
        })
        .collect::<Vec<_>>();

    if series.kind == SeriesKind::Line && points.len() > 1 {
        canvas.polyline(&points, color);
    }
    let radius = if series.kind == SeriesKind::Scatter { 4.0 } else { 2.5 };
    for (x, y) in points {
        canvas.circle(x, y, radius, color);
    }
}

fn draw_pie(canvas: &mut Canvas, frame: &PlotFrame, series: &Series) {
    let slices = series
        .categories
        .iter()
        .zip(&series.values)
        .filter(|(_, value)| value.is_finite() && **value > 0.0)
        .collect::<Vec<_>>();
    let total: f64 = slices.iter().map(|(_, value)| **value).sum();
    if total <= 0.0 {
        return;
    }

    let cx = frame.left + frame.width() / 2.0;
    let cy = frame.top + frame.height() / 2.0;
    let radius = frame.width().min(frame.height()) * 0.42;

    if slices.len() == 1 {
        canvas.circle(cx, cy, radius, PALETTE[0]);
    }

    let mut angle = -std::f64::consts::FRAC_PI_2;
    for (index, (category, value)) in slices.iter().enumerate() {
        let sweep = **value / total * std::f64::consts::TAU;
        let color = PALETTE[index % PALETTE.len()];
        if slices.len() > 1 {
            canvas.wedge(cx, cy, radius, angle, angle + sweep, color);
        }

        let middle = angle + sweep / 2.0;
        let label_x = cx + radius * 1.15 * middle.cos();
        let label_y = cy + radius * 1.15 * middle.sin();
        let style = if middle.cos() >= 0.0 {
            TextStyle::start(11.0)
        } else {
            TextStyle::end(11.0)
        };
        let label = format!(
            "{} ({:.1}%)",
            truncate_label(category),
            **value / total * 100.0
        );
        canvas.text(label_x, label_y, &label, style);
        angle += sweep;
    }
}

/// Value axis padded out to round tick boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NiceAxis {
    min: f64,
    max: f64,
    step: f64,
}

impl NiceAxis {
    fn from_values(values: impl Iterator<Item = f64>, include_zero: bool) -> Self {
        let (mut low, mut high) = values
            .filter(|value| value.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), value| {
                (low.min(value), high.max(value))
            });
        if !low.is_finite() || !high.is_finite() {
            low = 0.0;
            high = 1.0;
        }
        if include_zero {
            low = low.min(0.0);
            high = high.max(0.0);
        }
        if (high - low).abs() < f64::EPSILON {
            high = low + 1.0;
        }

        let step = nice_step((high - low) / 5.0);
        Self {
            min: (low / step).floor() * step,
            max: (high / step).ceil() * step,
            step,
        }
    }

    fn fraction(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    fn ticks(&self) -> Vec<f64> {
        let count = ((self.max - self.min) / self.step).round() as usize;
        (0..=count.min(50))
            .map(|index| self.min + self.step * index as f64)
            .collect()
    }
}

fn nice_step(raw: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 1.0;
    }
    let magnitude = 10_f64.powf(raw.log10().floor());
    let fraction = raw / magnitude;
    let nice = if fraction <= 1.0 {
        1.0
    } else if fraction <= 2.0 {
        2.0
    } else if fraction <= 5.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

fn format_tick(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        format!("{value:.0}")
    } else {
        let text = format!("{value:.3}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn truncate_label(label: &str) -> String {
    if label.chars().count() <= MAX_TICK_LABEL_CHARS {
        return label.to_string();
    }
    let mut truncated = label
        .chars()
        .take(MAX_TICK_LABEL_CHARS - 1)
        .collect::<String>();
    truncated.push('…');
    truncated
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    Start,
    Middle,
    End,
}

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    anchor: Anchor,
    size: f64,
    bold: bool,
    rotation: f64,
}

impl TextStyle {
    fn new(anchor: Anchor, size: f64) -> Self {
        Self {
            anchor,
            size,
            bold: false,
            rotation: 0.0,
        }
    }

    fn start(size: f64) -> Self {
        Self::new(Anchor::Start, size)
    }

    fn centered(size: f64) -> Self {
        Self::new(Anchor::Middle, size)
    }

    fn end(size: f64) -> Self {
        Self::new(Anchor::End, size)
    }

    fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    fn rotated(mut self, degrees: f64) -> Self {
        self.rotation = degrees;
        self
    }
}

struct Canvas {
    body: String,
    width: u32,
    height: u32,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            body: String::new(),
            width,
            height,
        }
    }

    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64, fill: &str, stroke: &str) {
        let _ = writeln!(
            self.body,
            r#"<rect x="{x:.1}" y="{y:.1}" width="{:.1}" height="{:.1}" fill="{fill}" stroke="{stroke}"/>"#,
            width.max(0.0),
            height.max(0.0)
        );
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, stroke: &str, stroke_width: f64) {
        let _ = writeln!(
            self.body,
            r#"<line x1="{x1:.1}" y1="{y1:.1}" x2="{x2:.1}" y2="{y2:.1}" stroke="{stroke}" stroke-width="{stroke_width:.1}"/>"#
        );
    }

    fn polyline(&mut self, points: &[(f64, f64)], stroke: &str) {
        let points = points
            .iter()
            .map(|(x, y)| format!("{x:.1},{y:.1}"))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            self.body,
            r#"<polyline points="{points}" fill="none" stroke="{stroke}" stroke-width="2"/>"#
        );
    }

    fn circle(&mut self, cx: f64, cy: f64, radius: f64, fill: &str) {
        let _ = writeln!(
            self.body,
            r#"<circle cx="{cx:.1}" cy="{cy:.1}" r="{radius:.1}" fill="{fill}"/>"#
        );
    }

    fn wedge(&mut self, cx: f64, cy: f64, radius: f64, from: f64, to: f64, fill: &str) {
        let (x1, y1) = (cx + radius * from.cos(), cy + radius * from.sin());
        let (x2, y2) = (cx + radius * to.cos(), cy + radius * to.sin());
        let large_arc = u8::from(to - from > std::f64::consts::PI);
        let _ = writeln!(
            self.body,
            r##"<path d="M {cx:.1} {cy:.1} L {x1:.1} {y1:.1} A {radius:.1} {radius:.1} 0 {large_arc} 1 {x2:.1} {y2:.1} Z" fill="{fill}" stroke="#ffffff"/>"##
        );
    }

    fn text(&mut self, x: f64, y: f64, content: &str, style: TextStyle) {
        let anchor = match style.anchor {
            Anchor::Start => "start",
            Anchor::Middle => "middle",
            Anchor::End => "end",
        };
        let weight = if style.bold { "bold" } else { "normal" };
        let transform = if style.rotation.abs() > f64::EPSILON {
            format!(r#" transform="rotate({:.1} {x:.1} {y:.1})""#, style.rotation)
        } else {
            String::new()
        };
        let _ = writeln!(
            self.body,
            r#"<text x="{x:.1}" y="{y:.1}" font-size="{:.0}" font-weight="{weight}" text-anchor="{anchor}"{transform}>{}</text>"#,
            style.size,
            escape_xml(content)
        );
    }

    fn finish(self) -> String {
        format!(
            concat!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif">"#,
                "\n",
                r##"<rect width="100%" height="100%" fill="#ffffff"/>"##,
                "\n{body}</svg>\n"
            ),
            w = self.width,
            h = self.height,
            body = self.body
        )
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{Figure, NiceAxis, Series, SeriesKind, escape_xml, format_tick};

    fn bar_series(values: &[f64]) -> Series {
        Series {
            kind: SeriesKind::Bar,
            label: None,
            categories: (0..values.len()).map(|index| format!("c{index}")).collect(),
            values: values.to_vec(),
        }
    }

    #[test]
    fn empty_figure_renders_blank_svg() {
        let image = Figure::default().to_image();
        assert!(image.is_blank());
        assert_eq!((image.width, image.height), (640, 480));
        assert!(image.svg.starts_with("<svg"));
        assert!(image.svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn reset_applies_size_and_discards_series() {
        let mut figure = Figure::default();
        figure.add_series(bar_series(&[1.0]));
        figure.reset(10.0, 6.0);
        assert!(figure.series().is_empty());
        assert_eq!(figure.pixel_size(), (1000, 600));

        figure.reset(f64::NAN, 500.0);
        assert_eq!(figure.pixel_size(), (640, 4000));
    }

    #[test]
    fn bars_and_titles_appear_in_svg() {
        let mut figure = Figure::default();
        figure.set_title("시도별 <장서>");
        figure.add_series(bar_series(&[3.0, 7.0, f64::NAN]));
        let image = figure.to_image();

        assert_eq!(image.series_count, 1);
        assert!(image.svg.contains("시도별 &lt;장서&gt;"));
        assert_eq!(image.svg.matches("fill=\"#1f77b4\"").count(), 2);
    }

    #[test]
    fn pie_draws_one_wedge_per_positive_slice() {
        let mut figure = Figure::default();
        figure.add_series(Series {
            kind: SeriesKind::Pie,
            label: None,
            categories: vec!["a".into(), "b".into(), "c".into()],
            values: vec![1.0, 3.0, 0.0],
        });
        let image = figure.to_image();
        assert_eq!(image.svg.matches("<path").count(), 2);
        assert!(image.svg.contains("b (75.0%)"));
    }

    #[test]
    fn axis_rounds_to_nice_bounds() {
        let axis = NiceAxis::from_values([3.0, 97.0].into_iter(), true);
        assert_eq!((axis.min, axis.max, axis.step), (0.0, 100.0, 20.0));
        assert_eq!(axis.ticks().len(), 6);
        assert_eq!(format_tick(0.25), "0.25");
        assert_eq!(format_tick(40.0), "40");
    }

    #[test]
    fn xml_special_characters_are_escaped() {
        assert_eq!(escape_xml(r#"a&b"c'"#), "a&amp;b&quot;c&apos;");
    }
}
