//! Text rendering: statement echo, `disp`, `num2str`, `mat2str` and the
//! `sprintf` format engine.

use std::fmt::Write as _;

use matbridge_core::{Complex, NumericClass};

use crate::error::{InterpError, InterpResult};
use crate::value::{shape_text, Array, Value};

// ── Numbers ───────────────────────────────────────────────────

fn special(v: f64) -> Option<String> {
    if v.is_nan() {
        Some("NaN".to_string())
    } else if v.is_infinite() {
        Some(if v > 0.0 { "Inf" } else { "-Inf" }.to_string())
    } else {
        None
    }
}

fn is_integral(v: f64) -> bool {
    !v.is_finite() || (v.fract() == 0.0 && v.abs() < 1e15)
}

/// `%.{prec}e` with a signed exponent of at least two digits.
pub fn fmt_e(v: f64, prec: usize) -> String {
    if let Some(s) = special(v) {
        return s;
    }
    let raw = format!("{v:.prec$e}");
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

/// `%.{prec}g`. Trailing zeros are removed unless `alt` is set.
pub fn fmt_g(v: f64, prec: usize, alt: bool) -> String {
    if let Some(s) = special(v) {
        return s;
    }
    let p = prec.max(1);
    if v == 0.0 {
        return if alt {
            format!("{:.*}", p - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    let exp_form = fmt_e(v, p - 1);
    let exp: i32 = exp_form
        .rsplit_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let out = if exp < -4 || exp >= p as i32 {
        exp_form
    } else {
        format!("{v:.*}", (p as i32 - 1 - exp) as usize)
    };
    if alt {
        out
    } else {
        strip_zeros(&out)
    }
}

fn strip_zeros(text: &str) -> String {
    let (mantissa, exp) = match text.find('e') {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    };
    if !mantissa.contains('.') {
        return text.to_string();
    }
    let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}{exp}")
}

/// A real number as the default display format shows it.
pub fn format_short(v: f64) -> String {
    if let Some(s) = special(v) {
        return s;
    }
    if is_integral(v) && v.abs() < 1e9 {
        return format!("{}", v as i64);
    }
    let a = v.abs();
    if a >= 1e5 || a < 1e-4 {
        fmt_e(v, 4)
    } else {
        format!("{v:.4}")
    }
}

fn format_complex(z: Complex) -> String {
    let re = format_short(z.re);
    let sign = if z.im < 0.0 || (z.im == 0.0 && z.im.is_sign_negative()) {
        '-'
    } else {
        '+'
    };
    format!("{re} {sign} {}i", format_short(z.im.abs()))
}

/// Shortest text that reads back to the same double, at most 15 digits.
fn compact(v: f64) -> String {
    if let Some(s) = special(v) {
        return s;
    }
    if is_integral(v) {
        return format!("{}", v as i64);
    }
    fmt_g(v, 15, false)
}

// ── Matrix bodies ─────────────────────────────────────────────

/// Column cells rendered with a shared style.
fn real_cells(data: &[f64], integer_class: bool) -> Vec<String> {
    let all_integral = integer_class || data.iter().all(|v| is_integral(*v));
    let max = data
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, |m, v| m.max(v.abs()));
    data.iter()
        .map(|&v| {
            if let Some(s) = special(v) {
                s
            } else if all_integral && max < 1e9 {
                format!("{}", v as i64)
            } else if max >= 1e5 {
                fmt_e(v, 4)
            } else {
                format!("{v:.4}")
            }
        })
        .collect()
}

fn grid(rows: usize, cols: usize, cells: &[String]) -> Vec<String> {
    let width = cells.iter().map(|c| c.chars().count()).max().unwrap_or(0);
    (0..rows)
        .map(|r| {
            let mut line = String::new();
            for c in 0..cols {
                let _ = write!(line, "   {:>width$}", cells[c * rows + r]);
            }
            line
        })
        .collect()
}

/// Split an N-d array into 2-D pages with their `(:,:,k)` labels.
fn pages(shape: &[usize]) -> Vec<(Option<String>, usize)> {
    let page = shape[0] * shape[1];
    if shape.len() <= 2 {
        return vec![(None, 0)];
    }
    let count: usize = shape[2..].iter().product();
    (0..count)
        .map(|p| {
            let mut rest = p;
            let mut subs = Vec::new();
            for &d in &shape[2..] {
                subs.push((rest % d + 1).to_string());
                rest /= d;
            }
            (Some(format!("(:,:,{})", subs.join(","))), p * page)
        })
        .collect()
}

fn cell_summary(v: &Value) -> String {
    match v {
        Value::Char(a) if a.rows() == 1 => format!("{{'{}'}}", a.data().iter().collect::<String>()),
        Value::Func(h) => format!("{{{h}}}"),
        Value::Cell(a) => format!("{{{} cell}}", shape_text(a.shape())),
        other if other.numel() == 1 => match other {
            Value::Complex(a) => format!("{{[{}]}}", format_complex(a.data()[0])),
            Value::Figure(id) => format!("{{Figure ({id})}}"),
            Value::Bool(a) => format!("{{[{}]}}", u8::from(a.data()[0])),
            _ => match other.to_f64_array() {
                Ok(a) => format!("{{[{}]}}", format_short(a.data()[0])),
                Err(_) => format!("{{1x1 {}}}", other.class_name()),
            },
        },
        Value::Num(a) if a.shape() == [0, 0] => "{0x0 double}".to_string(),
        other => format!("{{{} {}}}", shape_text(&other.shape()), other.class_name()),
    }
}

/// Body lines for a non-scalar value; empty for values shown inline.
fn body(v: &Value) -> Vec<String> {
    fn paged<T: Clone>(
        a: &Array<T>,
        render: impl Fn(&[T]) -> Vec<String>,
    ) -> Vec<String> {
        let (rows, cols) = (a.shape()[0], a.shape()[1]);
        let mut out = Vec::new();
        for (label, start) in pages(a.shape()) {
            let slice = &a.data()[start..start + rows * cols];
            if let Some(label) = label {
                out.push(format!("{label} ="));
                out.push(String::new());
            }
            out.extend(grid(rows, cols, &render(slice)));
            out.push(String::new());
        }
        out.pop();
        out
    }
    match v {
        Value::Num(a) => paged(a, |s| real_cells(s, false)),
        Value::Typed(class, a) => {
            let integer = !matches!(class, NumericClass::Single | NumericClass::Double);
            paged(a, |s| real_cells(s, integer))
        }
        Value::Bool(a) => paged(a, |s| s.iter().map(|b| u8::from(*b).to_string()).collect()),
        Value::Complex(a) => paged(a, |s| s.iter().map(|z| format_complex(*z)).collect()),
        Value::Char(a) => {
            let (rows, cols) = (a.rows(), a.cols());
            (0..rows)
                .map(|r| {
                    let line: String = (0..cols).map(|c| a.data()[c * rows + r]).collect();
                    format!("    '{line}'")
                })
                .collect()
        }
        Value::Cell(a) => paged(a, |s| s.iter().map(cell_summary).collect()),
        Value::Func(_) | Value::Figure(_) => Vec::new(),
    }
}

fn inline(v: &Value) -> Option<String> {
    match v {
        Value::Func(h) => Some(h.to_string()),
        Value::Figure(id) => Some(format!("Figure ({id})")),
        Value::Char(a) if a.rows() == 1 || a.shape() == [0, 0] => {
            Some(format!("'{}'", a.data().iter().collect::<String>()))
        }
        Value::Num(a) if a.shape() == [0, 0] => Some("[]".to_string()),
        _ if v.is_empty() => Some(format!(
            "{} empty {} array",
            shape_text(&v.shape()),
            v.class_name()
        )),
        Value::Cell(_) => None,
        _ if v.numel() == 1 => Some(match v {
            Value::Complex(a) => format_complex(a.data()[0]),
            Value::Bool(a) => u8::from(a.data()[0]).to_string(),
            Value::Typed(_, a) | Value::Num(a) => format_short(a.data()[0]),
            _ => String::new(),
        }),
        _ => None,
    }
}

/// Echo for an unsuppressed statement result.
pub fn display(name: &str, v: &Value) -> String {
    if let Some(text) = inline(v) {
        return format!("{name} = {text}\n");
    }
    let mut out = format!("{name} =\n\n");
    if let Value::Cell(a) = v {
        let _ = writeln!(out, "  {} cell array\n", shape_text(a.shape()));
    } else if let Value::Typed(class, a) = v {
        let _ = writeln!(out, "  {} {class} matrix\n", shape_text(a.shape()));
    }
    for line in body(v) {
        out.push_str(&line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// `disp(v)`: the value without its name.
pub fn disp(v: &Value) -> String {
    if v.is_empty() && !matches!(v, Value::Char(_)) {
        return String::new();
    }
    match v {
        Value::Char(a) if a.rows() <= 1 => format!("{}\n", a.data().iter().collect::<String>()),
        Value::Char(a) => {
            let (rows, cols) = (a.rows(), a.cols());
            (0..rows)
                .map(|r| {
                    let line: String = (0..cols).map(|c| a.data()[c * rows + r]).collect();
                    format!("{line}\n")
                })
                .collect()
        }
        _ => match inline(v) {
            Some(text) => format!("{text}\n"),
            None => body(v).into_iter().map(|l| format!("{l}\n")).collect(),
        },
    }
}

// ── num2str / mat2str ─────────────────────────────────────────

fn num2str_scalar(v: f64) -> String {
    if let Some(s) = special(v) {
        return s;
    }
    if is_integral(v) {
        return format!("{}", v as i64);
    }
    let digits = (v.abs().log10().ceil() as i64).max(1) + 4;
    fmt_g(v, digits.max(5) as usize, false)
}

pub fn num2str(v: &Value, arg: Option<&Value>) -> InterpResult<String> {
    if let Value::Char(_) = v {
        return Ok(v.as_text().unwrap_or_default());
    }
    if let Some(arg) = arg {
        if let Some(format) = arg.as_text() {
            return sprintf(&format, std::slice::from_ref(v));
        }
        let precision = arg.to_usize("Precision")?;
        return Ok(rows_text(v, |x| fmt_g(x, precision, false))?.join("\n"));
    }
    if let Value::Complex(a) = v {
        return Ok(a
            .data()
            .iter()
            .map(|z| format_complex(*z).replace(' ', ""))
            .collect::<Vec<_>>()
            .join("  "));
    }
    Ok(rows_text(v, num2str_scalar)?.join("\n"))
}

fn rows_text(v: &Value, f: impl Fn(f64) -> String) -> InterpResult<Vec<String>> {
    let a = v.to_f64_array()?;
    let (rows, cols) = (a.rows(), a.cols());
    let cells: Vec<String> = a.data().iter().map(|x| f(*x)).collect();
    let width = cells.iter().map(String::len).max().unwrap_or(0);
    Ok((0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| format!("{:>width$}", cells[c * rows + r]))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_start()
                .to_string()
        })
        .collect())
}

pub fn mat2str(v: &Value, precision: Option<usize>) -> InterpResult<String> {
    let number = |x: f64| match precision {
        Some(p) => fmt_g(x, p, false),
        None => compact(x),
    };
    let (shape, cells): (Vec<usize>, Vec<String>) = match v {
        Value::Char(a) if a.rows() <= 1 => {
            return Ok(format!("'{}'", a.data().iter().collect::<String>()));
        }
        Value::Bool(a) => (
            a.shape().to_vec(),
            a.data().iter().map(|b| b.to_string()).collect(),
        ),
        Value::Complex(a) => (
            a.shape().to_vec(),
            a.data()
                .iter()
                .map(|z| {
                    let sign = if z.im < 0.0 { "-" } else { "+" };
                    format!("{}{sign}{}i", number(z.re), number(z.im.abs()))
                })
                .collect(),
        ),
        Value::Num(_) | Value::Typed(..) | Value::Char(_) => {
            let a = v.to_f64_array()?;
            (a.shape().to_vec(), a.data().iter().map(|x| number(*x)).collect())
        }
        other => {
            return Err(InterpError::with_id(
                "MATLAB:mat2str:NumericInputExpected",
                format!("Input must be numeric, logical or char, not {}.", other.class_name()),
            ));
        }
    };
    if shape.len() > 2 {
        return Err(InterpError::with_id(
            "MATLAB:mat2str:TwoDInput",
            "Input matrix must be 2-D.",
        ));
    }
    if cells.len() == 1 {
        return Ok(cells[0].clone());
    }
    let (rows, cols) = (shape[0], shape[1]);
    let body = (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| cells[c * rows + r].clone())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join(";");
    Ok(format!("[{body}]"))
}

// ── sprintf ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conv: char,
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Spec(Spec),
}

/// Replace backslash escapes in a format string.
pub fn unescape(format: &str) -> String {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('a') => out.push('\u{7}'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_format(format: &str) -> InterpResult<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let chars: Vec<char> = format.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            text.push(chars[i]);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'%') {
            text.push('%');
            i += 2;
            continue;
        }
        i += 1;
        let mut spec = Spec::default();
        while let Some(&c) = chars.get(i) {
            match c {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '0' => spec.zero = true,
                '#' => spec.alt = true,
                _ => break,
            }
            i += 1;
        }
        let mut digits = String::new();
        while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            digits.push(*c);
            i += 1;
        }
        spec.width = digits.parse().ok();
        if chars.get(i) == Some(&'.') {
            i += 1;
            let mut digits = String::new();
            while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                digits.push(*c);
                i += 1;
            }
            spec.precision = Some(digits.parse().unwrap_or(0));
        }
        // Length modifiers are accepted and ignored.
        while matches!(chars.get(i), Some('l' | 'h')) {
            i += 1;
        }
        match chars.get(i) {
            Some(&c @ ('d' | 'i' | 'u' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 's' | 'c' | 'x'
            | 'X' | 'o')) => {
                spec.conv = c;
                i += 1;
            }
            _ => {
                return Err(InterpError::with_id(
                    "MATLAB:sprintf:invalidFormat",
                    format!("Invalid format specifier in '{format}'."),
                ));
            }
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(std::mem::take(&mut text)));
        }
        pieces.push(Piece::Spec(spec));
    }
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    Ok(pieces)
}

#[derive(Debug, Clone)]
enum Arg {
    Num(f64),
    Text(String),
}

fn flatten(args: &[Value]) -> InterpResult<Vec<Arg>> {
    let mut out = Vec::new();
    for v in args {
        match v {
            Value::Char(a) => out.push(Arg::Text(a.data().iter().collect())),
            Value::Cell(_) => {
                return Err(InterpError::with_id(
                    "MATLAB:sprintf:InvalidInputType",
                    "Function is not defined for 'cell' inputs.",
                ));
            }
            Value::Func(h) => out.push(Arg::Text(h.to_string())),
            Value::Figure(id) => out.push(Arg::Num(f64::from(*id))),
            Value::Complex(a) => out.extend(a.data().iter().map(|z| Arg::Num(z.re))),
            other => out.extend(other.to_f64_array()?.data().iter().map(|x| Arg::Num(*x))),
        }
    }
    Ok(out)
}

fn pad(spec: &Spec, body: String, numeric: bool) -> String {
    let width = spec.width.unwrap_or(0);
    let len = body.chars().count();
    if len >= width {
        return body;
    }
    let fill = width - len;
    if spec.left {
        format!("{body}{}", " ".repeat(fill))
    } else if spec.zero && numeric && !body.ends_with("Inf") && !body.ends_with("NaN") {
        let split = body
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(0);
        let (sign, digits) = body.split_at(split);
        format!("{sign}{}{digits}", "0".repeat(fill))
    } else {
        format!("{}{body}", " ".repeat(fill))
    }
}

fn signed(spec: &Spec, text: String, negative: bool) -> String {
    if negative || text.starts_with('-') {
        text
    } else if spec.plus {
        format!("+{text}")
    } else if spec.space {
        format!(" {text}")
    } else {
        text
    }
}

fn format_number(spec: &Spec, v: f64) -> String {
    let conv = spec.conv;
    let body = match conv {
        'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'c' if !is_integral(v) || v.is_nan() || v.is_infinite() => {
            // Non-integers under an integer conversion print in %e form.
            let mut fallback = spec.clone();
            fallback.conv = 'e';
            return format_number(&fallback, v);
        }
        'd' | 'i' | 'u' => signed(spec, format!("{}", v as i64), v < 0.0),
        'x' => format!("{:x}", v as i64),
        'X' => format!("{:X}", v as i64),
        'o' => format!("{:o}", v as i64),
        'c' => char::from_u32(v as u32).map(String::from).unwrap_or_default(),
        'f' | 'F' => match special(v) {
            Some(s) => signed(spec, s, v < 0.0),
            None => signed(spec, format!("{v:.*}", spec.precision.unwrap_or(6)), v < 0.0),
        },
        'e' | 'E' => {
            let text = signed(spec, fmt_e(v, spec.precision.unwrap_or(6)), v < 0.0);
            if conv == 'E' {
                text.to_uppercase()
            } else {
                text
            }
        }
        'g' | 'G' => {
            let text = signed(spec, fmt_g(v, spec.precision.unwrap_or(6), spec.alt), v < 0.0);
            if conv == 'G' {
                text.to_uppercase()
            } else {
                text
            }
        }
        's' => {
            let text = compact(v);
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        _ => String::new(),
    };
    pad(spec, body, !matches!(conv, 'c' | 's'))
}

fn format_arg(spec: &Spec, arg: &Arg) -> String {
    match (arg, spec.conv) {
        (Arg::Text(s), 's' | 'c') => {
            let text = match spec.precision {
                Some(p) if spec.conv == 's' => s.chars().take(p).collect(),
                _ => s.clone(),
            };
            pad(spec, text, false)
        }
        (Arg::Text(s), _) => s
            .chars()
            .map(|c| format_number(spec, f64::from(c as u32)))
            .collect(),
        (Arg::Num(v), _) => format_number(spec, *v),
    }
}

/// `sprintf(format, args...)` with format recycling.
pub fn sprintf(format: &str, args: &[Value]) -> InterpResult<String> {
    let pieces = parse_format(&unescape(format))?;
    let args = flatten(args)?;
    let spec_count = pieces.iter().filter(|p| matches!(p, Piece::Spec(_))).count();
    let mut out = String::new();
    let mut next = 0;
    loop {
        for piece in &pieces {
            match piece {
                Piece::Text(t) => out.push_str(t),
                Piece::Spec(spec) => match args.get(next) {
                    Some(arg) => {
                        out.push_str(&format_arg(spec, arg));
                        next += 1;
                    }
                    // Out of data: stop at the first unfilled conversion.
                    None => return Ok(out),
                },
            }
        }
        if spec_count == 0 || next >= args.len() {
            return Ok(out);
        }
    }
}
