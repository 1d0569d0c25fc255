//! Checkpoint filename templates
//!
//! A template such as `{epoch:03d}-{val_loss:.2f}` is parsed once into
//! literal and placeholder segments. Rendering substitutes every placeholder
//! with `name=<value>`, formatting the value with the placeholder's format
//! spec (`03d`, `.2f`, ...), so the example renders as
//! `epoch=003-val_loss=0.25`.

use std::fmt;

use train_core::{Epoch, Error, MetricValue, Metrics, Result, Step};

/// Value substituted for a placeholder whose metric is missing
pub const MISSING_METRIC_VALUE: MetricValue = MetricValue::Int(0);

/// A parsed filename template
#[derive(Debug, Clone, PartialEq)]
pub struct FilenameTemplate {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder { name: String, spec: FormatSpec },
}

impl FilenameTemplate {
    /// Template used when none is configured
    pub const DEFAULT: &'static str = "{epoch}";

    /// Parse a template; an empty string yields the default template
    pub fn parse(source: &str) -> Result<Self> {
        let source = if source.is_empty() {
            Self::DEFAULT
        } else {
            source
        };

        let invalid = |message: String| Error::InvalidTemplate {
            template: source.to_string(),
            message,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("single '}' encountered".to_string())),
                '{' => {
                    let mut name = String::new();
                    let mut spec = None;
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(':') if spec.is_none() => spec = Some(String::new()),
                            Some(ch) => match spec.as_mut() {
                                Some(s) => s.push(ch),
                                None => name.push(ch),
                            },
                            None => return Err(invalid("unterminated placeholder".to_string())),
                        }
                    }
                    if name.is_empty() {
                        return Err(invalid("placeholder without a name".to_string()));
                    }
                    let spec = FormatSpec::parse(spec.as_deref().unwrap_or(""))
                        .map_err(|e| invalid(format!("placeholder {{{}}}: {}", name, e)))?;

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder { name, spec });
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Template text as given (or the default)
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_placeholders(&self) -> bool {
        self.placeholder_names().next().is_some()
    }

    /// Placeholder names in template order
    pub fn placeholder_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Placeholder names absent from `values`
    pub fn missing_keys<'a>(&'a self, values: &Metrics) -> Vec<&'a str> {
        self.placeholder_names()
            .filter(|name| !values.contains_key(*name))
            .collect()
    }

    /// Render with `values`; missing names render as `0`
    pub fn render(&self, values: &Metrics) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { name, spec } => {
                    let value = values.get(name).copied().unwrap_or(MISSING_METRIC_VALUE);
                    out.push_str(name);
                    out.push('=');
                    out.push_str(&spec.format(value));
                }
            }
        }
        out
    }
}

impl fmt::Display for FilenameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Builds checkpoint filenames from a template, a prefix and a join string
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointNamer {
    template: FilenameTemplate,
    prefix: String,
    join_char: String,
}

impl CheckpointNamer {
    pub fn new(
        template: FilenameTemplate,
        prefix: impl Into<String>,
        join_char: impl Into<String>,
    ) -> Self {
        Self {
            template,
            prefix: prefix.into(),
            join_char: join_char.into(),
        }
    }

    pub fn template(&self) -> &FilenameTemplate {
        &self.template
    }

    /// Values visible to the template: the metrics plus `epoch` and `step`
    pub fn values(epoch: Epoch, step: Step, metrics: &Metrics) -> Metrics {
        let mut values = metrics.clone();
        values.insert("epoch".to_string(), MetricValue::from(epoch));
        values.insert("step".to_string(), MetricValue::from(step));
        values
    }

    /// Filename stem (no extension) for an event
    pub fn format(&self, epoch: Epoch, step: Step, metrics: &Metrics) -> String {
        let rendered = self.template.render(&Self::values(epoch, step, metrics));
        self.join([self.prefix.as_str(), rendered.as_str()])
    }

    /// Append the `vN` disambiguation suffix to a stem
    pub fn versioned(&self, stem: &str, version: u32) -> String {
        self.join([stem, format!("v{}", version).as_str()])
    }

    fn join<'a>(&self, parts: impl IntoIterator<Item = &'a str>) -> String {
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(&self.join_char)
    }
}

/// Format spec: `[[fill]align][sign][#][0][width][.precision][type]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatSpec {
    fill: Option<char>,
    align: Option<Align>,
    sign: Sign,
    alternate: bool,
    zero_pad: bool,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Align {
    Left,
    Right,
    Center,
    AfterSign,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum Sign {
    #[default]
    Minus,
    Plus,
    Space,
}

fn align_of(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

impl FormatSpec {
    pub fn parse(spec: &str) -> std::result::Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut i = 0;

        if chars.len() >= 2 && align_of(chars[1]).is_some() {
            out.fill = Some(chars[0]);
            out.align = align_of(chars[1]);
            i = 2;
        } else if let Some(align) = chars.first().and_then(|c| align_of(*c)) {
            out.align = Some(align);
            i = 1;
        }

        match chars.get(i) {
            Some('+') => {
                out.sign = Sign::Plus;
                i += 1;
            }
            Some('-') => i += 1,
            Some(' ') => {
                out.sign = Sign::Space;
                i += 1;
            }
            _ => {}
        }

        if chars.get(i) == Some(&'#') {
            out.alternate = true;
            i += 1;
        }

        if chars.get(i) == Some(&'0') {
            out.zero_pad = true;
            i += 1;
        }

        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            out.width = chars[start..i]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| "width out of range".to_string())?;
        }

        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            if i == start {
                return Err("missing precision after '.'".to_string());
            }
            out.precision = Some(
                chars[start..i]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .map_err(|_| "precision out of range".to_string())?,
            );
        }

        if let Some(&kind) = chars.get(i) {
            if !"dfFeEgGs%".contains(kind) {
                return Err(format!("unknown format type '{}'", kind));
            }
            out.kind = Some(kind);
            i += 1;
        }

        if i != chars.len() {
            return Err(format!("invalid format spec '{}'", spec));
        }
        Ok(out)
    }

    /// Format a value according to this spec
    pub fn format(&self, value: MetricValue) -> String {
        let (negative, body) = self.format_body(value);
        let sign = match (negative, self.sign) {
            (true, _) => "-",
            (false, Sign::Plus) => "+",
            (false, Sign::Space) => " ",
            (false, Sign::Minus) => "",
        };
        self.pad(sign, &body)
    }

    /// Digits without sign; returns whether the value was negative
    fn format_body(&self, value: MetricValue) -> (bool, String) {
        match (value, self.kind) {
            (MetricValue::Int(v), None | Some('d') | Some('s')) if self.precision.is_none() => {
                (v < 0, v.unsigned_abs().to_string())
            }
            (MetricValue::Float(v), Some('d')) => {
                let rounded = v.round();
                (rounded < 0.0, format!("{}", rounded.abs()))
            }
            (value, kind) => {
                let v = value.as_f64();
                let negative = v.is_sign_negative() && !v.is_nan() && v != 0.0;
                (negative, format_float(v.abs(), kind, self.precision, self.alternate))
            }
        }
    }

    fn pad(&self, sign: &str, body: &str) -> String {
        let len = sign.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{}{}", sign, body);
        }
        let fill_len = self.width - len;

        let (fill, align) = match (self.fill, self.align) {
            (Some(f), Some(a)) => (f, a),
            (None, Some(a)) => (if self.zero_pad { '0' } else { ' ' }, a),
            (_, None) if self.zero_pad => ('0', Align::AfterSign),
            (_, None) => (' ', Align::Right),
        };
        let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();

        match align {
            Align::Left => format!("{}{}{}", sign, body, fill_str(fill_len)),
            Align::Right => format!("{}{}{}", fill_str(fill_len), sign, body),
            Align::AfterSign => format!("{}{}{}", sign, fill_str(fill_len), body),
            Align::Center => {
                let left = fill_len / 2;
                format!(
                    "{}{}{}{}",
                    fill_str(left),
                    sign,
                    body,
                    fill_str(fill_len - left)
                )
            }
        }
    }
}

/// Format a non-negative float; `kind == None` without precision is the
/// shortest round-trip representation
fn format_float(v: f64, kind: Option<char>, precision: Option<usize>, alternate: bool) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return "inf".to_string();
    }

    match kind {
        Some('f') | Some('F') => format!("{:.*}", precision.unwrap_or(6), v),
        Some('e') | Some('E') => {
            let s = exponent(v, precision.unwrap_or(6));
            if kind == Some('E') {
                s.to_uppercase()
            } else {
                s
            }
        }
        Some('%') => format!("{:.*}%", precision.unwrap_or(6), v * 100.0),
        Some('g') | Some('G') => general(v, precision.unwrap_or(6), alternate),
        _ => match precision {
            Some(p) => general(v, p, alternate),
            None => shortest(v),
        },
    }
}

/// Shortest representation that round-trips, `1e-05` style exponents
fn shortest(v: f64) -> String {
    let s = format!("{:?}", v);
    match s.split_once('e') {
        Some((mantissa, exp)) => format!("{}e{}", mantissa, exponent_suffix(exp)),
        None => s,
    }
}

/// Scientific notation with `precision` fractional digits
fn exponent(v: f64, precision: usize) -> String {
    let s = format!("{:.*e}", precision, v);
    match s.split_once('e') {
        Some((mantissa, exp)) => format!("{}e{}", mantissa, exponent_suffix(exp)),
        None => s,
    }
}

/// Signed, at least two digit exponent
fn exponent_suffix(exp: &str) -> String {
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    format!("{}{:0>2}", sign, digits)
}

/// General format: fixed or scientific depending on magnitude
fn general(v: f64, precision: usize, alternate: bool) -> String {
    let p = precision.max(1);
    if v == 0.0 {
        return if alternate {
            format!("{:.*}", p - 1, 0.0)
        } else {
            "0".to_string()
        };
    }

    // Exponent after rounding to `p` significant digits
    let rounded = format!("{:.*e}", p - 1, v);
    let exp: i32 = rounded
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    let s = if exp >= -4 && exp < p as i32 {
        format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, v)
    } else {
        exponent(v, p - 1)
    };

    if alternate {
        return s;
    }
    strip_trailing_zeros(&s)
}

fn strip_trailing_zeros(s: &str) -> String {
    let (mantissa, exp) = match s.split_once('e') {
        Some((m, e)) => (m, Some(e)),
        None => (s, None),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    match exp {
        Some(e) => format!("{}e{}", mantissa, e),
        None => mantissa.to_string(),
    }
}
