//! Figures: the state behind `figure`/`plot`/`hold` and friends, and an SVG
//! renderer for them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use matbridge_core::FigureInfo;

use crate::error::{InterpError, InterpResult};
use crate::format::fmt_g;
use crate::value::Value;

const WIDTH: f64 = 560.0;
const HEIGHT: f64 = 420.0;
const LEFT: f64 = 70.0;
const RIGHT: f64 = 20.0;
const TOP: f64 = 40.0;
const BOTTOM: f64 = 55.0;

/// Default line colour order.
const PALETTE: [&str; 7] = [
    "#0072BD", "#D95319", "#EDB120", "#7E2F8E", "#77AC30", "#4DBEEE", "#A2142F",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
    DashDot,
    None,
}

impl LineStyle {
    fn dasharray(self) -> Option<&'static str> {
        match self {
            LineStyle::Dashed => Some("6,4"),
            LineStyle::Dotted => Some("2,3"),
            LineStyle::DashDot => Some("6,3,2,3"),
            LineStyle::Solid | LineStyle::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub color: Option<String>,
    pub line: LineStyle,
    pub marker: Option<char>,
    pub width: f64,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub id: u32,
    pub revision: u64,
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub hold: bool,
    pub grid: bool,
    pub legend: Option<Vec<String>>,
    pub series: Vec<Series>,
}

impl Figure {
    fn new(id: u32) -> Self {
        Self {
            id,
            revision: 1,
            title: None,
            xlabel: None,
            ylabel: None,
            hold: false,
            grid: false,
            legend: None,
            series: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.revision += 1;
    }

    /// Add plotted lines, replacing existing ones unless hold is on.
    pub fn add_series(&mut self, series: Vec<Series>) {
        if !self.hold {
            self.series.clear();
            self.title = None;
            self.xlabel = None;
            self.ylabel = None;
            self.legend = None;
        }
        self.series.extend(series);
        self.touch();
    }

    /// `clf`: clear content, keep the figure open.
    pub fn clear(&mut self) {
        let revision = self.revision + 1;
        *self = Figure::new(self.id);
        self.revision = revision;
    }
}

/// Open figures of one interpreter.
#[derive(Debug, Default)]
pub struct FigureStore {
    figures: BTreeMap<u32, Figure>,
    current: Option<u32>,
}

impl FigureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `figure`: open a new figure with the lowest free number.
    pub fn create(&mut self) -> u32 {
        let id = (1..)
            .find(|n| !self.figures.contains_key(n))
            .unwrap_or(1);
        self.figures.insert(id, Figure::new(id));
        self.current = Some(id);
        id
    }

    /// `figure(n)`: select figure `n`, opening it if needed.
    pub fn select(&mut self, id: u32) -> InterpResult<u32> {
        if id == 0 {
            return Err(InterpError::runtime(
                "Figure number must be a positive integer.",
            ));
        }
        self.figures.entry(id).or_insert_with(|| Figure::new(id));
        self.current = Some(id);
        Ok(id)
    }

    /// The current figure, opened on demand as `gcf` does.
    pub fn current_mut(&mut self) -> &mut Figure {
        let id = match self.current.filter(|id| self.figures.contains_key(id)) {
            Some(id) => id,
            None => self.create(),
        };
        self.current = Some(id);
        self.figures.entry(id).or_insert_with(|| Figure::new(id))
    }

    pub fn current_id(&mut self) -> u32 {
        self.current_mut().id
    }

    pub fn get(&self, id: u32) -> Option<&Figure> {
        self.figures.get(&id)
    }

    pub fn close(&mut self, id: u32) -> InterpResult<()> {
        if self.figures.remove(&id).is_none() {
            return Err(InterpError::runtime(format!(
                "Invalid figure handle: figure {id} is not open."
            )));
        }
        if self.current == Some(id) {
            self.current = self.figures.keys().next_back().copied();
        }
        Ok(())
    }

    /// `close` with no argument: close the current figure, if any.
    pub fn close_current(&mut self) {
        if let Some(id) = self.current {
            let _ = self.close(id);
        }
    }

    pub fn close_all(&mut self) {
        self.figures.clear();
        self.current = None;
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }

    pub fn infos(&self) -> Vec<FigureInfo> {
        self.figures
            .values()
            .map(|f| FigureInfo {
                id: f.id,
                revision: f.revision,
                title: f.title.clone(),
            })
            .collect()
    }
}

// ── plot argument parsing ─────────────────────────────────────

/// Parse a line specification such as `r--o`.
pub fn parse_style(spec: &str) -> InterpResult<(Option<String>, LineStyle, Option<char>)> {
    let mut color = None;
    let mut line = None;
    let mut marker = None;
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            'r' | 'g' | 'b' | 'c' | 'm' | 'y' | 'k' | 'w' => {
                color = Some(
                    match c {
                        'r' => "#FF0000",
                        'g' => "#00FF00",
                        'b' => "#0000FF",
                        'c' => "#00FFFF",
                        'm' => "#FF00FF",
                        'y' => "#FFFF00",
                        'k' => "#000000",
                        _ => "#FFFFFF",
                    }
                    .to_string(),
                );
            }
            '-' => match chars.get(i + 1) {
                Some('-') => {
                    line = Some(LineStyle::Dashed);
                    i += 1;
                }
                Some('.') => {
                    line = Some(LineStyle::DashDot);
                    i += 1;
                }
                _ => line = Some(LineStyle::Solid),
            },
            ':' => line = Some(LineStyle::Dotted),
            'o' | '.' | 'x' | '+' | '*' | 's' | 'd' | '^' | 'v' => marker = Some(c),
            _ => {
                return Err(InterpError::with_id(
                    "MATLAB:plot:InvalidLineSpec",
                    format!("Invalid line specification '{spec}'."),
                ));
            }
        }
        i += 1;
    }
    let line = match (line, marker) {
        (Some(l), _) => l,
        (None, Some(_)) => LineStyle::None,
        (None, None) => LineStyle::Solid,
    };
    Ok((color, line, marker))
}

fn columns(v: &Value) -> InterpResult<Vec<Vec<f64>>> {
    let a = v.to_f64_array()?;
    if a.is_vector() || a.is_empty() {
        return Ok(vec![a.into_data()]);
    }
    let rows = a.rows();
    Ok(a.data().chunks(rows.max(1)).map(<[f64]>::to_vec).collect())
}

fn pair_series(x: Option<&Value>, y: &Value) -> InterpResult<Vec<Series>> {
    let ys = columns(y)?;
    let xs = match x {
        Some(x) => columns(x)?,
        None => vec![(1..=ys.first().map_or(0, Vec::len)).map(|i| i as f64).collect()],
    };
    let mut out = Vec::with_capacity(ys.len());
    for (k, y) in ys.into_iter().enumerate() {
        let x = xs.get(k).or_else(|| xs.first()).cloned().unwrap_or_default();
        if x.len() != y.len() {
            return Err(InterpError::with_id(
                "MATLAB:plot:XYLengthMismatch",
                "Vectors must be the same length.",
            ));
        }
        out.push(Series {
            x,
            y,
            color: None,
            line: LineStyle::Solid,
            marker: None,
            width: 1.5,
            label: None,
        });
    }
    Ok(out)
}

/// Turn `plot` arguments into series: `plot(y)`, `plot(x, y)`, optional
/// line specs after each pair, repeated pairs, and trailing name/value
/// options (`LineWidth`, `Color`, `DisplayName`).
pub fn plot_series(args: &[Value]) -> InterpResult<Vec<Series>> {
    if args.is_empty() {
        return Err(InterpError::with_id(
            "MATLAB:narginchk:notEnoughInputs",
            "Not enough input arguments.",
        ));
    }
    let mut out: Vec<Series> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if let Some(text) = args[i].as_text() {
            let Some(value) = args.get(i + 1) else {
                return Err(InterpError::runtime(format!(
                    "Invalid parameter/value pair: '{text}' has no value."
                )));
            };
            apply_option(&mut out, &text, value)?;
            i += 2;
            continue;
        }
        let (x, y, next) = match args.get(i + 1) {
            Some(y) if y.as_text().is_none() => (Some(&args[i]), y, i + 2),
            _ => (None, &args[i], i + 1),
        };
        let mut batch = pair_series(x, y)?;
        i = next;
        if let Some(spec) = args.get(i).and_then(Value::as_text) {
            if parse_style(&spec).is_ok() && !is_option_name(&spec) {
                let (color, line, marker) = parse_style(&spec)?;
                for s in &mut batch {
                    s.color = color.clone();
                    s.line = line;
                    s.marker = marker;
                }
                i += 1;
            }
        }
        out.extend(batch);
    }
    Ok(out)
}

fn is_option_name(text: &str) -> bool {
    ["linewidth", "color", "displayname"].contains(&text.to_ascii_lowercase().as_str())
}

fn apply_option(series: &mut [Series], name: &str, value: &Value) -> InterpResult<()> {
    match name.to_ascii_lowercase().as_str() {
        "linewidth" => {
            let w = value.to_scalar("LineWidth")?;
            series.iter_mut().for_each(|s| s.width = w);
        }
        "color" => {
            let color = match value.as_text() {
                Some(spec) => parse_style(&spec)?.0,
                None => {
                    let rgb = value.to_f64_array()?;
                    if rgb.numel() != 3 {
                        return Err(InterpError::runtime("Color must be an RGB triplet."));
                    }
                    let c = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
                    let d = rgb.data();
                    Some(format!("#{:02X}{:02X}{:02X}", c(d[0]), c(d[1]), c(d[2])))
                }
            };
            series.iter_mut().for_each(|s| s.color = color.clone());
        }
        "displayname" => {
            let label = value.expect_text("DisplayName")?;
            series
                .iter_mut()
                .for_each(|s| s.label = Some(label.clone()));
        }
        _ => {
            return Err(InterpError::runtime(format!(
                "Unrecognized property '{name}' for plot."
            )));
        }
    }
    Ok(())
}

// ── SVG ───────────────────────────────────────────────────────

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn nice_step(span: f64) -> f64 {
    let raw = span / 5.0;
    let magnitude = 10f64.powf(raw.log10().floor());
    let norm = raw / magnitude;
    let nice = if norm <= 1.0 {
        1.0
    } else if norm <= 2.0 {
        2.0
    } else if norm <= 5.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

/// Axis limits snapped to tick multiples, and the ticks themselves.
pub fn axis_ticks(lo: f64, hi: f64) -> (f64, f64, Vec<f64>) {
    let (lo, hi) = if lo == hi {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
        (lo - pad, hi + pad)
    } else {
        (lo, hi)
    };
    let step = nice_step(hi - lo);
    let start = (lo / step).floor() * step;
    let end = (hi / step).ceil() * step;
    let count = ((end - start) / step).round() as usize;
    let ticks = (0..=count).map(|k| start + k as f64 * step).collect();
    (start, end, ticks)
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if lo.is_finite() {
        (lo, hi)
    } else {
        (0.0, 1.0)
    }
}

fn tick_label(v: f64) -> String {
    // Snap float noise such as 0.30000000000000004.
    let v = if v.abs() < 1e-12 { 0.0 } else { v };
    fmt_g(v, 6, false)
}

/// Render a figure as a standalone SVG document.
pub fn render_svg(figure: &Figure) -> String {
    let (x_lo, x_hi) = bounds(figure.series.iter().flat_map(|s| s.x.iter().copied()));
    let (y_lo, y_hi) = bounds(figure.series.iter().flat_map(|s| s.y.iter().copied()));
    let (x0, x1, x_ticks) = axis_ticks(x_lo, x_hi);
    let (y0, y1, y_ticks) = axis_ticks(y_lo, y_hi);
    let plot_w = WIDTH - LEFT - RIGHT;
    let plot_h = HEIGHT - TOP - BOTTOM;
    let px = |x: f64| LEFT + (x - x0) / (x1 - x0) * plot_w;
    let py = |y: f64| TOP + plot_h - (y - y0) / (y1 - y0) * plot_h;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="Helvetica, Arial, sans-serif" font-size="11">"#
    );
    let _ = writeln!(svg, r#"<rect width="{WIDTH}" height="{HEIGHT}" fill="white"/>"#);

    for &t in &x_ticks {
        let x = px(t);
        if figure.grid {
            let _ = writeln!(
                svg,
                r##"<line x1="{x:.2}" y1="{TOP}" x2="{x:.2}" y2="{:.2}" stroke="#E0E0E0"/>"##,
                TOP + plot_h
            );
        }
        let _ = writeln!(
            svg,
            r#"<text x="{x:.2}" y="{:.2}" text-anchor="middle">{}</text>"#,
            TOP + plot_h + 16.0,
            escape(&tick_label(t))
        );
    }
    for &t in &y_ticks {
        let y = py(t);
        if figure.grid {
            let _ = writeln!(
                svg,
                r##"<line x1="{LEFT}" y1="{y:.2}" x2="{:.2}" y2="{y:.2}" stroke="#E0E0E0"/>"##,
                LEFT + plot_w
            );
        }
        let _ = writeln!(
            svg,
            r#"<text x="{:.2}" y="{:.2}" text-anchor="end">{}</text>"#,
            LEFT - 6.0,
            y + 4.0,
            escape(&tick_label(t))
        );
    }
    let _ = writeln!(
        svg,
        r#"<rect x="{LEFT}" y="{TOP}" width="{plot_w}" height="{plot_h}" fill="none" stroke="black"/>"#
    );

    for (k, series) in figure.series.iter().enumerate() {
        let color = series
            .color
            .clone()
            .unwrap_or_else(|| PALETTE[k % PALETTE.len()].to_string());
        let points: Vec<(f64, f64)> = series
            .x
            .iter()
            .zip(&series.y)
            .map(|(&x, &y)| (x, y))
            .collect();
        if series.line != LineStyle::None {
            // NaN breaks the line.
            for run in points.split(|(x, y)| !x.is_finite() || !y.is_finite()) {
                if run.len() < 2 {
                    continue;
                }
                let coords: Vec<String> = run
                    .iter()
                    .map(|&(x, y)| format!("{:.2},{:.2}", px(x), py(y)))
                    .collect();
                let dash = series
                    .line
                    .dasharray()
                    .map(|d| format!(r#" stroke-dasharray="{d}""#))
                    .unwrap_or_default();
                let _ = writeln!(
                    svg,
                    r#"<polyline points="{}" fill="none" stroke="{color}" stroke-width="{}"{dash}/>"#,
                    coords.join(" "),
                    series.width
                );
            }
        }
        if let Some(marker) = series.marker {
            for &(x, y) in points.iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
                svg.push_str(&marker_svg(marker, px(x), py(y), &color));
            }
        }
    }

    if let Some(title) = &figure.title {
        let _ = writeln!(
            svg,
            r#"<text x="{:.2}" y="{:.2}" text-anchor="middle" font-size="14" font-weight="bold">{}</text>"#,
            LEFT + plot_w / 2.0,
            TOP - 14.0,
            escape(title)
        );
    }
    if let Some(label) = &figure.xlabel {
        let _ = writeln!(
            svg,
            r#"<text x="{:.2}" y="{:.2}" text-anchor="middle" font-size="12">{}</text>"#,
            LEFT + plot_w / 2.0,
            HEIGHT - 14.0,
            escape(label)
        );
    }
    if let Some(label) = &figure.ylabel {
        let (x, y) = (18.0, TOP + plot_h / 2.0);
        let _ = writeln!(
            svg,
            r#"<text x="{x}" y="{y:.2}" text-anchor="middle" font-size="12" transform="rotate(-90 {x} {y:.2})">{}</text>"#,
            escape(label)
        );
    }
    if let Some(labels) = &figure.legend {
        legend_svg(&mut svg, figure, labels, LEFT + plot_w);
    }
    svg.push_str("</svg>\n");
    svg
}

fn marker_svg(marker: char, x: f64, y: f64, color: &str) -> String {
    match marker {
        '.' => format!(r#"<circle cx="{x:.2}" cy="{y:.2}" r="1.5" fill="{color}"/>"#) + "\n",
        'o' => format!(
            r#"<circle cx="{x:.2}" cy="{y:.2}" r="3" fill="none" stroke="{color}"/>"#
        ) + "\n",
        's' => format!(
            r#"<rect x="{:.2}" y="{:.2}" width="6" height="6" fill="none" stroke="{color}"/>"#,
            x - 3.0,
            y - 3.0
        ) + "\n",
        _ => format!(
            r#"<path d="M{:.2},{y:.2}H{:.2}M{x:.2},{:.2}V{:.2}" stroke="{color}"/>"#,
            x - 3.0,
            x + 3.0,
            y - 3.0,
            y + 3.0
        ) + "\n",
    }
}

fn legend_svg(svg: &mut String, figure: &Figure, labels: &[String], right: f64) {
    let entries: Vec<(usize, &str)> = figure
        .series
        .iter()
        .enumerate()
        .filter_map(|(k, s)| {
            labels
                .get(k)
                .map(String::as_str)
                .or(s.label.as_deref())
                .map(|l| (k, l))
        })
        .collect();
    if entries.is_empty() {
        return;
    }
    let longest = entries.iter().map(|(_, l)| l.chars().count()).max().unwrap_or(0);
    let box_w = 40.0 + longest as f64 * 6.5;
    let box_h = 8.0 + entries.len() as f64 * 16.0;
    let x = right - box_w - 8.0;
    let y = TOP + 8.0;
    let _ = writeln!(
        svg,
        r#"<rect x="{x:.2}" y="{y:.2}" width="{box_w:.2}" height="{box_h:.2}" fill="white" stroke="black"/>"#
    );
    for (row, (k, label)) in entries.iter().enumerate() {
        let color = figure.series[*k]
            .color
            .clone()
            .unwrap_or_else(|| PALETTE[k % PALETTE.len()].to_string());
        let ly = y + 12.0 + row as f64 * 16.0;
        let _ = writeln!(
            svg,
            r#"<line x1="{:.2}" y1="{ly:.2}" x2="{:.2}" y2="{ly:.2}" stroke="{color}" stroke-width="1.5"/>"#,
            x + 6.0,
            x + 28.0
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.2}" y="{:.2}">{}</text>"#,
            x + 34.0,
            ly + 4.0,
            escape(label)
        );
    }
}
