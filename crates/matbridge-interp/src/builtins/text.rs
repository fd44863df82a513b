//! Character and string builtins.

use regex::{Regex, RegexBuilder};

use super::math::{arg, not_enough};
use crate::error::{InterpError, InterpResult};
use crate::value::{checked_numel, Array, Value};

/// A text argument: one character vector or a cell array of them.
enum Text {
    One(String),
    Many(Vec<usize>, Vec<String>),
}

impl Text {
    fn from_value(v: &Value, what: &str) -> InterpResult<Text> {
        match v {
            Value::Cell(cells) => {
                let items = cells
                    .data()
                    .iter()
                    .map(|c| c.expect_text(what))
                    .collect::<InterpResult<_>>()?;
                Ok(Text::Many(cells.shape().to_vec(), items))
            }
            other => Ok(Text::One(other.expect_text(what)?)),
        }
    }

    fn items(&self) -> Vec<&str> {
        match self {
            Text::One(s) => vec![s.as_str()],
            Text::Many(_, items) => items.iter().map(String::as_str).collect(),
        }
    }

    /// Apply `f` to each text, keeping the container shape.
    fn map(&self, f: impl Fn(&str) -> String) -> InterpResult<Value> {
        match self {
            Text::One(s) => Ok(Value::str(&f(s))),
            Text::Many(shape, items) => Ok(Value::Cell(Array::new(
                shape.clone(),
                items.iter().map(|s| Value::str(&f(s.as_str()))).collect(),
            )?)),
        }
    }

    fn test(&self, f: impl Fn(&str) -> bool) -> InterpResult<Value> {
        match self {
            Text::One(s) => Ok(Value::boolean(f(s))),
            Text::Many(shape, items) => Ok(Value::Bool(Array::new(
                shape.clone(),
                items.iter().map(|s| f(s.as_str())).collect(),
            )?)),
        }
    }
}

/// Rows of equal width as a char matrix; shorter rows are blank padded.
pub(super) fn char_rows(lines: &[String]) -> Value {
    if lines.len() == 1 {
        return Value::str(&lines[0]);
    }
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let rows = lines.len();
    let mut data = vec![' '; rows * width];
    for (r, line) in lines.iter().enumerate() {
        for (c, ch) in line.chars().enumerate() {
            data[c * rows + r] = ch;
        }
    }
    Value::Char(Array::from_parts(vec![rows, width], data))
}

fn is_blank(c: char) -> bool {
    c.is_whitespace() || c == '\0'
}

pub(super) fn case(v: &Value, upper: bool) -> InterpResult<Value> {
    match v {
        Value::Char(a) => Ok(Value::Char(a.map(|c| {
            if upper {
                c.to_uppercase().next().unwrap_or(*c)
            } else {
                c.to_lowercase().next().unwrap_or(*c)
            }
        }))),
        Value::Cell(_) => {
            let text = Text::from_value(v, "Input")?;
            text.map(|s| if upper { s.to_uppercase() } else { s.to_lowercase() })
        }
        other => Ok(other.clone()),
    }
}

pub(super) fn strtrim(v: &Value) -> InterpResult<Value> {
    Text::from_value(v, "Input")?.map(|s| s.trim_matches(is_blank).to_string())
}

pub(super) fn deblank(v: &Value) -> InterpResult<Value> {
    Text::from_value(v, "Input")?.map(|s| s.trim_end_matches(is_blank).to_string())
}

pub(super) fn strcat(args: &[Value]) -> InterpResult<Value> {
    let cell_shape = args.iter().find_map(|a| match a {
        Value::Cell(c) => Some(c.shape().to_vec()),
        _ => None,
    });
    match cell_shape {
        None => {
            let mut out = String::new();
            for a in args {
                out.push_str(a.expect_text("Inputs")?.trim_end_matches(is_blank));
            }
            Ok(Value::str(&out))
        }
        Some(shape) => {
            let numel: usize = shape.iter().product();
            let parts = args
                .iter()
                .map(|a| Text::from_value(a, "Inputs"))
                .collect::<InterpResult<Vec<_>>>()?;
            let mut items = Vec::with_capacity(numel);
            for i in 0..numel {
                let mut s = String::new();
                for part in &parts {
                    match part {
                        Text::One(t) => s.push_str(t),
                        Text::Many(_, many) if many.len() == numel => s.push_str(&many[i]),
                        Text::Many(..) => {
                            return Err(InterpError::runtime(
                                "All cell array inputs must be the same size.",
                            ));
                        }
                    }
                }
                items.push(Value::str(&s));
            }
            Ok(Value::Cell(Array::new(shape, items)?))
        }
    }
}

pub(super) fn strsplit(args: &[Value]) -> InterpResult<Value> {
    let s = arg(args, 0)?.expect_text("First input")?;
    let delimiters: Vec<String> = match args.get(1) {
        Some(d) => Text::from_value(d, "Delimiter")?
            .items()
            .into_iter()
            .map(|d| crate::format::unescape(d))
            .collect(),
        None => vec![" ".to_string()],
    };
    let mut collapse = true;
    let mut rest = args.get(2..).unwrap_or_default().iter();
    while let Some(name) = rest.next() {
        let name = name.expect_text("Option name")?;
        let value = rest.next().ok_or_else(not_enough)?;
        if name.eq_ignore_ascii_case("CollapseDelimiters") {
            collapse = value.is_true()?;
        } else {
            return Err(InterpError::runtime(format!("Unknown strsplit option '{name}'.")));
        }
    }
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    let mut last_was_delim = false;
    while i < s.len() {
        let hit = delimiters
            .iter()
            .filter(|d| !d.is_empty() && s[i..].starts_with(d.as_str()))
            .map(String::len)
            .max();
        match hit {
            Some(len) => {
                if !(collapse && last_was_delim) {
                    parts.push(std::mem::take(&mut current));
                }
                last_was_delim = true;
                i += len;
            }
            None => {
                let ch = s[i..].chars().next().unwrap_or(' ');
                current.push(ch);
                last_was_delim = false;
                i += ch.len_utf8();
            }
        }
    }
    parts.push(current);
    Ok(Value::Cell(Array::row(
        parts.iter().map(|p| Value::str(p)).collect(),
    )))
}

pub(super) fn strjoin(args: &[Value]) -> InterpResult<Value> {
    let text = Text::from_value(arg(args, 0)?, "First input")?;
    let delimiter = match args.get(1) {
        Some(d) => crate::format::unescape(&d.expect_text("Delimiter")?),
        None => " ".to_string(),
    };
    Ok(Value::str(&text.items().join(&delimiter)))
}

pub(super) fn strrep(args: &[Value]) -> InterpResult<Value> {
    let text = Text::from_value(arg(args, 0)?, "First input")?;
    let old = arg(args, 1)?.expect_text("Search text")?;
    let new = arg(args, 2)?.expect_text("Replacement text")?;
    text.map(|s| if old.is_empty() { s.to_string() } else { s.replace(&old, &new) })
}

/// `strcmp`/`strcmpi`: false for non-text operands rather than an error.
pub(super) fn strcmp(a: &Value, b: &Value, ignore_case: bool) -> InterpResult<Value> {
    let eq = |x: &str, y: &str| {
        if ignore_case {
            x.to_lowercase() == y.to_lowercase()
        } else {
            x == y
        }
    };
    let cell_items = |c: &Array<Value>| c.data().iter().map(Value::as_text).collect::<Vec<_>>();
    match (a, b) {
        (Value::Cell(x), Value::Cell(y)) => {
            if x.numel() == 1 || y.numel() == 1 || x.shape() == y.shape() {
                let (xs, ys) = (cell_items(x), cell_items(y));
                let shape = if x.numel() == 1 { y.shape() } else { x.shape() }.to_vec();
                let n = xs.len().max(ys.len());
                let data = (0..n)
                    .map(|i| {
                        let p = &xs[if xs.len() == 1 { 0 } else { i }];
                        let q = &ys[if ys.len() == 1 { 0 } else { i }];
                        matches!((p, q), (Some(p), Some(q)) if eq(p, q))
                    })
                    .collect();
                Ok(Value::Bool(Array::new(shape, data)?))
            } else {
                Err(InterpError::runtime("Inputs must be the same size or either one can be a scalar."))
            }
        }
        (Value::Cell(c), other) | (other, Value::Cell(c)) => {
            let needle = other.as_text();
            Ok(Value::Bool(c.map(|item| {
                matches!((item.as_text(), &needle), (Some(p), Some(q)) if eq(&p, q))
            })))
        }
        _ => Ok(Value::boolean(matches!(
            (a.as_text(), b.as_text()),
            (Some(p), Some(q)) if eq(&p, &q)
        ))),
    }
}

/// `contains`, `startsWith` and `endsWith`.
pub(super) fn text_match(name: &str, args: &[Value]) -> InterpResult<Value> {
    let text = Text::from_value(arg(args, 0)?, "First input")?;
    let patterns = Text::from_value(arg(args, 1)?, "Pattern")?;
    let mut ignore_case = false;
    if let [option, value, ..] = args.get(2..).unwrap_or_default() {
        if option.expect_text("Option name")?.eq_ignore_ascii_case("IgnoreCase") {
            ignore_case = value.is_true()?;
        }
    }
    let fold = |s: &str| if ignore_case { s.to_lowercase() } else { s.to_string() };
    let patterns: Vec<String> = patterns.items().into_iter().map(|p| fold(p)).collect();
    text.test(|s| {
        let s = fold(s);
        patterns.iter().any(|p| match name {
            "startsWith" => s.starts_with(p.as_str()),
            "endsWith" => s.ends_with(p.as_str()),
            _ => s.contains(p.as_str()),
        })
    })
}

pub(super) fn str2double(v: &Value) -> InterpResult<Value> {
    let parse = |s: &str| parse_number(s).unwrap_or(f64::NAN);
    match v {
        Value::Cell(c) => Ok(Value::Num(
            c.map(|item| item.as_text().map_or(f64::NAN, |s| parse(&s))),
        )),
        Value::Char(_) => Ok(Value::scalar(v.as_text().map_or(f64::NAN, |s| parse(&s)))),
        _ => Ok(Value::scalar(f64::NAN)),
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim().replace(',', "");
    let lower = s.to_ascii_lowercase();
    let (sign, body) = match lower.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, lower.strip_prefix('+').unwrap_or(&lower)),
    };
    match body {
        "inf" => Some(sign * f64::INFINITY),
        "nan" => Some(f64::NAN),
        "" => None,
        _ if body.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | '+' | '-')) => {
            body.parse::<f64>().ok().map(|v| sign * v)
        }
        _ => None,
    }
}

pub(super) fn blanks(v: &Value) -> InterpResult<Value> {
    let n = v.to_usize("Number of blanks")?;
    checked_numel(&[1, n])?;
    Ok(Value::str(&" ".repeat(n)))
}

pub(super) fn isspace(v: &Value) -> InterpResult<Value> {
    Ok(Value::Bool(match v {
        Value::Char(a) => a.map(|c| c.is_whitespace()),
        other => Array::filled(other.shape(), false),
    }))
}

// ── Regular expressions ───────────────────────────────────────

struct RegexOptions {
    once: bool,
    ignore_case: bool,
    outputs: Vec<String>,
}

fn regex_options(args: &[Value]) -> InterpResult<RegexOptions> {
    let mut options = RegexOptions {
        once: false,
        ignore_case: false,
        outputs: Vec::new(),
    };
    for a in args {
        let name = a.expect_text("Option")?;
        match name.to_ascii_lowercase().as_str() {
            "once" => options.once = true,
            "ignorecase" => options.ignore_case = true,
            "matchcase" => options.ignore_case = false,
            "match" | "tokens" | "start" | "end" | "split" | "tokenextents" | "names" => {
                options.outputs.push(name.to_ascii_lowercase())
            }
            _ => {
                return Err(InterpError::runtime(format!("Unknown regexp option '{name}'.")));
            }
        }
    }
    Ok(options)
}

fn compile(pattern: &str, ignore_case: bool) -> InterpResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|e| {
            InterpError::with_id(
                "MATLAB:regexp:invalidPattern",
                format!("Invalid regular expression: {e}"),
            )
        })
}

/// `$1` group references become `${1}` so that following text is not read
/// as part of the group name.
fn replacement_template(rep: &str) -> String {
    let mut out = String::with_capacity(rep.len());
    let mut chars = rep.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(char::is_ascii_digit) {
            out.push_str("${");
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                out.push(d);
                chars.next();
            }
            out.push('}');
        } else if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('$') => out.push_str("$$"),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub(super) fn regexprep(args: &[Value]) -> InterpResult<Value> {
    let text = Text::from_value(arg(args, 0)?, "First input")?;
    let pattern = arg(args, 1)?.expect_text("Pattern")?;
    let rep = replacement_template(&arg(args, 2)?.expect_text("Replacement")?);
    let options = regex_options(args.get(3..).unwrap_or_default())?;
    let re = compile(&pattern, options.ignore_case)?;
    text.map(|s| {
        if options.once {
            re.replace(s, rep.as_str()).into_owned()
        } else {
            re.replace_all(s, rep.as_str()).into_owned()
        }
    })
}

fn char_index(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

pub(super) fn regexp(args: &[Value], nargout: usize) -> InterpResult<Vec<Value>> {
    let s = arg(args, 0)?.expect_text("First input")?;
    let pattern = arg(args, 1)?.expect_text("Pattern")?;
    let mut options = regex_options(args.get(2..).unwrap_or_default())?;
    let re = compile(&pattern, options.ignore_case)?;
    if options.outputs.is_empty() {
        options.outputs = ["start", "end", "tokenextents", "match", "tokens", "names", "split"]
            .iter()
            .map(|o| o.to_string())
            .collect();
    }
    let mut found: Vec<regex::Captures> = re.captures_iter(&s).collect();
    if options.once {
        found.truncate(1);
    }
    let groups = re.captures_len() > 1;
    let wrap = |items: Vec<Value>, once: bool| -> Value {
        if once {
            items.into_iter().next().unwrap_or_else(|| Value::str(""))
        } else {
            Value::Cell(Array::row(items))
        }
    };
    let numeric = |items: Vec<f64>, once: bool| -> Value {
        if once {
            items.first().map_or_else(Value::empty, |v| Value::scalar(*v))
        } else {
            Value::row(items)
        }
    };
    let mut out = Vec::new();
    for output in options.outputs.iter().take(nargout.max(1)) {
        let value = match output.as_str() {
            "match" => wrap(
                found.iter().map(|c| Value::str(&c[0])).collect(),
                options.once,
            ),
            "start" => numeric(
                found
                    .iter()
                    .filter_map(|c| c.get(0))
                    .map(|m| (char_index(&s, m.start()) + 1) as f64)
                    .collect(),
                options.once,
            ),
            "end" => numeric(
                found
                    .iter()
                    .filter_map(|c| c.get(0))
                    .map(|m| char_index(&s, m.end()) as f64)
                    .collect(),
                options.once,
            ),
            "tokens" => {
                let tokens = found
                    .iter()
                    .map(|c| {
                        let parts: Vec<Value> = if groups {
                            c.iter()
                                .skip(1)
                                .map(|g| Value::str(g.map_or("", |m| m.as_str())))
                                .collect()
                        } else {
                            vec![Value::str(&c[0])]
                        };
                        Value::Cell(Array::row(parts))
                    })
                    .collect();
                wrap(tokens, options.once)
            }
            "tokenextents" => {
                let extents = found
                    .iter()
                    .map(|c| {
                        let spans: Vec<(f64, f64)> = c
                            .iter()
                            .skip(usize::from(groups))
                            .flatten()
                            .map(|m| {
                                (
                                    (char_index(&s, m.start()) + 1) as f64,
                                    char_index(&s, m.end()) as f64,
                                )
                            })
                            .collect();
                        let n = spans.len();
                        let mut data: Vec<f64> = spans.iter().map(|p| p.0).collect();
                        data.extend(spans.iter().map(|p| p.1));
                        Value::Num(Array::from_parts(vec![n, 2], data))
                    })
                    .collect();
                wrap(extents, options.once)
            }
            "split" => {
                let mut pieces = Vec::new();
                let mut last = 0;
                for c in &found {
                    if let Some(m) = c.get(0) {
                        pieces.push(Value::str(&s[last..m.start()]));
                        last = m.end();
                    }
                }
                pieces.push(Value::str(&s[last..]));
                Value::Cell(Array::row(pieces))
            }
            _ => {
                return Err(InterpError::runtime(
                    "Named token output requires structs, which are not supported.",
                ));
            }
        };
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_texts(v: &Value) -> Vec<String> {
        match v {
            Value::Cell(c) => c.data().iter().map(|x| x.as_text().unwrap()).collect(),
            other => panic!("expected a cell, got {other:?}"),
        }
    }

    #[test]
    fn split_collapses_delimiters() {
        let out = strsplit(&[Value::str("a  b c")]).unwrap();
        assert_eq!(cell_texts(&out), vec!["a", "b", "c"]);
        let out = strsplit(&[
            Value::str("a,,b"),
            Value::str(","),
            Value::str("CollapseDelimiters"),
            Value::boolean(false),
        ])
        .unwrap();
        assert_eq!(cell_texts(&out), vec!["a", "", "b"]);
    }

    #[test]
    fn strcat_trims_trailing_blanks_of_char_inputs() {
        let out = strcat(&[Value::str("a "), Value::str("b")]).unwrap();
        assert_eq!(out, Value::str("ab"));
    }

    #[test]
    fn strcmp_over_cells() {
        let cells = Value::Cell(Array::row(vec![Value::str("x"), Value::str("y")]));
        let out = strcmp(&cells, &Value::str("y"), false).unwrap();
        assert_eq!(out, Value::Bool(Array::row(vec![false, true])));
        assert_eq!(
            strcmp(&Value::scalar(1.0), &Value::str("a"), false).unwrap(),
            Value::boolean(false)
        );
        assert_eq!(
            strcmp(&Value::str("ABC"), &Value::str("abc"), true).unwrap(),
            Value::boolean(true)
        );
    }

    #[test]
    fn regexprep_with_groups() {
        let out = regexprep(&[
            Value::str("2024-01-15"),
            Value::str(r"(\d+)-(\d+)-(\d+)"),
            Value::str("$3/$2/$1"),
        ])
        .unwrap();
        assert_eq!(out, Value::str("15/01/2024"));
    }

    #[test]
    fn regexp_outputs_follow_option_order() {
        let out = regexp(
            &[Value::str("a1b22"), Value::str(r"\d+"), Value::str("match"), Value::str("start")],
            2,
        )
        .unwrap();
        assert_eq!(cell_texts(&out[0]), vec!["1", "22"]);
        assert_eq!(out[1], Value::row(vec![2.0, 4.0]));
        let once = regexp(
            &[Value::str("key=val"), Value::str(r"(\w+)=(\w+)"), Value::str("tokens"), Value::str("once")],
            1,
        )
        .unwrap();
        assert_eq!(cell_texts(&once[0]), vec!["key", "val"]);
    }

    #[test]
    fn str2double_handles_junk() {
        assert_eq!(str2double(&Value::str(" 3.5 ")).unwrap(), Value::scalar(3.5));
        assert_eq!(str2double(&Value::str("-Inf")).unwrap(), Value::scalar(f64::NEG_INFINITY));
        let Value::Num(a) = str2double(&Value::str("abc")).unwrap() else { panic!() };
        assert!(a.data()[0].is_nan());
    }

    #[test]
    fn case_and_trim() {
        assert_eq!(case(&Value::str("MiXed"), true).unwrap(), Value::str("MIXED"));
        assert_eq!(strtrim(&Value::str("  pad \t")).unwrap(), Value::str("pad"));
        assert_eq!(
            text_match("contains", &[Value::str("hello"), Value::str("ell")]).unwrap(),
            Value::boolean(true)
        );
    }
}
