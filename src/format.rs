//! Format-spec rendering for f-string fields, `str.format` and `%`.
//!
//! Every entry point takes `cap`, the longest string a program may build.
//! Widths and precisions are checked against it before any text is
//! allocated.

use crate::fault::{Fault, FaultResult};
use crate::table::format_float;
use crate::value::Value;

/// Digits of precision any numeric presentation accepts
pub(crate) const MAX_PRECISION: usize = 1_000;

#[derive(Debug, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    ty: Option<char>,
}

fn too_long(cap: usize) -> Fault {
    Fault::resource_limit(format!("string longer than {} characters", cap))
}

/// Parses a run of digits, failing once the number passes `limit`
fn bounded_number(digits: &[char], limit: usize, what: &str) -> FaultResult<usize> {
    let mut n: usize = 0;
    for d in digits {
        n = n * 10 + d.to_digit(10).unwrap_or(0) as usize;
        if n > limit {
            return Err(Fault::resource_limit(format!(
                "format {} larger than {}",
                what, limit
            )));
        }
    }
    Ok(n)
}

fn parse_spec(spec: &str, cap: usize) -> FaultResult<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|c| is_align(*c)) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.fill.get_or_insert('0');
        out.align.get_or_insert('=');
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    out.width = bounded_number(&chars[start..i], cap, "width")?;
    if matches!(chars.get(i), Some(',' | '_')) {
        out.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i == start {
            return Err(Fault::value_error("Format specifier missing precision"));
        }
        out.precision = Some(bounded_number(
            &chars[start..i],
            cap.min(MAX_PRECISION),
            "precision",
        )?);
    }
    if let Some(&c) = chars.get(i) {
        if !"bcdeEfFgGnosxX%".contains(c) {
            return Err(Fault::value_error(format!(
                "Invalid format specifier '{}'",
                spec
            )));
        }
        out.ty = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(Fault::value_error(format!(
            "Invalid format specifier '{}'",
            spec
        )));
    }
    Ok(out)
}

/// Text assembled piece by piece, refusing to grow past `cap` characters
pub(crate) struct BoundedText {
    text: String,
    chars: usize,
    cap: usize,
}

impl BoundedText {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            cap,
        }
    }

    pub(crate) fn push_str(&mut self, piece: &str) -> FaultResult<()> {
        let added = piece.chars().count();
        if self.chars + added > self.cap {
            return Err(too_long(self.cap));
        }
        self.chars += added;
        self.text.push_str(piece);
        Ok(())
    }

    pub(crate) fn push(&mut self, c: char) -> FaultResult<()> {
        if self.chars + 1 > self.cap {
            return Err(too_long(self.cap));
        }
        self.chars += 1;
        self.text.push(c);
        Ok(())
    }

    pub(crate) fn finish(self) -> String {
        self.text
    }
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find('.') {
        Some(pos) => digits.split_at(pos),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped + rest
}

/// Python-style `e` notation: `1.50e+03`
fn exponent_text(f: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, f);
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => text,
    }
}

/// Renders `value` according to a format spec like `.2f`, `>10`, `,`
pub fn format_value(value: &Value, spec: &str, cap: usize) -> FaultResult<String> {
    if spec.is_empty() {
        return Ok(value.display());
    }
    let spec = parse_spec(spec, cap)?;
    let numeric = match value {
        Value::Int(_) | Value::Float(_) => value.as_f64(),
        Value::Bool(_) if spec.ty.is_some_and(|t| t != 's') => value.as_f64(),
        _ => None,
    };

    let body = match (spec.ty, numeric) {
        (Some('s'), _) | (None, None) => {
            let text = value.display();
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        (Some(ty), None) => {
            return Err(Fault::value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                ty,
                value.type_name()
            )))
        }
        (Some('d'), Some(_)) => match value.as_int() {
            Some(i) => i.unsigned_abs().to_string(),
            None => {
                return Err(Fault::value_error(
                    "Unknown format code 'd' for object of type 'float'",
                ))
            }
        },
        (Some('f' | 'F'), Some(f)) => format!("{:.*}", spec.precision.unwrap_or(6), f.abs()),
        (Some('%'), Some(f)) => format!("{:.*}%", spec.precision.unwrap_or(6), f.abs() * 100.0),
        (Some('e' | 'E'), Some(f)) => exponent_text(f.abs(), spec.precision.unwrap_or(6)),
        (Some(_), Some(f)) | (None, Some(f)) => match (value, spec.precision) {
            (Value::Int(i), None) => i.unsigned_abs().to_string(),
            (_, Some(p)) => {
                let p = p.max(1);
                let magnitude = if f == 0.0 { 0 } else { f.abs().log10().floor() as i32 };
                if magnitude < -4 || magnitude >= p as i32 {
                    exponent_text(f.abs(), p - 1)
                } else {
                    let decimals = (p as i32 - 1 - magnitude).max(0) as usize;
                    let text = format!("{:.*}", decimals, f.abs());
                    if text.contains('.') {
                        text.trim_end_matches('0').trim_end_matches('.').to_string()
                    } else {
                        text
                    }
                }
            }
            (_, None) => format_float(f.abs()),
        },
    };

    let negative = numeric.is_some_and(|f| f.is_sign_negative() && f != 0.0)
        && !matches!(spec.ty, Some('s'))
        && !(spec.ty.is_none() && numeric.is_none());
    let body = if spec.grouping && numeric.is_some() {
        group_thousands(&body)
    } else {
        body
    };
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) if numeric.is_some() => "+",
        (false, Some(' ')) if numeric.is_some() => " ",
        _ => "",
    };

    let content_len = sign.chars().count() + body.chars().count();
    if content_len >= spec.width {
        return Ok(format!("{}{}", sign, body));
    }
    let pad = spec.width - content_len;
    let fill = spec.fill.unwrap_or(' ');
    let padding = |n: usize| fill.to_string().repeat(n);
    let default_align = if numeric.is_some() { '>' } else { '<' };
    Ok(match spec.align.unwrap_or(default_align) {
        '<' => format!("{}{}{}", sign, body, padding(pad)),
        '^' => format!(
            "{}{}{}{}",
            padding(pad / 2),
            sign,
            body,
            padding(pad - pad / 2)
        ),
        '=' => format!("{}{}{}", sign, padding(pad), body),
        _ => format!("{}{}{}", padding(pad), sign, body),
    })
}

/// `"{} of {name:.1f}".format(...)`
pub fn str_format(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    cap: usize,
) -> FaultResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = BoundedText::new(cap);
    let mut auto_index = 0;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{')?;
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}')?;
                i += 2;
            }
            '{' => {
                let close = chars[i..]
                    .iter()
                    .position(|&c| c == '}')
                    .map(|p| p + i)
                    .ok_or_else(|| Fault::value_error("Single '{' encountered in format string"))?;
                let field: String = chars[i + 1..close].iter().collect();
                let (name, spec) = match field.split_once(':') {
                    Some((name, spec)) => (name.to_string(), spec.to_string()),
                    None => (field.clone(), String::new()),
                };
                let name = name.split('!').next().unwrap_or("").to_string();
                let value = if name.is_empty() {
                    let value = args.get(auto_index).ok_or_else(|| {
                        Fault::index_error("Replacement index out of range for positional args tuple")
                    })?;
                    auto_index += 1;
                    value
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index).ok_or_else(|| {
                        Fault::index_error("Replacement index out of range for positional args tuple")
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| v)
                        .ok_or_else(|| Fault::key_error(format!("'{}'", name)))?
                };
                out.push_str(&format_value(value, &spec, cap)?)?;
                i = close + 1;
            }
            '}' => return Err(Fault::value_error("Single '}' encountered in format string")),
            c => {
                out.push(c)?;
                i += 1;
            }
        }
    }
    Ok(out.finish())
}

/// printf-style `"%.2f" % value`, supporting `%s %r %d %i %f %e %g %%`
pub fn percent_format(template: &str, args: &Value, cap: usize) -> FaultResult<String> {
    let values: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let chars: Vec<char> = template.chars().collect();
    let mut out = BoundedText::new(cap);
    let mut next = 0;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i])?;
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut j = start;
        while j < chars.len() && "0123456789.-+ ".contains(chars[j]) {
            j += 1;
        }
        let conversion = *chars
            .get(j)
            .ok_or_else(|| Fault::value_error("incomplete format"))?;
        if conversion == '%' {
            out.push('%')?;
            i = j + 1;
            continue;
        }
        let flags: String = chars[start..j].iter().collect();
        let value = values
            .get(next)
            .ok_or_else(|| Fault::type_error("not enough arguments for format string"))?;
        next += 1;
        let (align, rest) = match flags.strip_prefix('-') {
            Some(rest) => ("<", rest.to_string()),
            None => ("", flags.clone()),
        };
        let text = match conversion {
            's' => format_value(value, &format!("{}{}", align, rest), cap)?,
            'r' => format_value(&Value::str(value.repr()), &format!("{}{}", align, rest), cap)?,
            'd' | 'i' => {
                let int = value
                    .as_f64()
                    .map(|f| Value::Int(f.trunc() as i64))
                    .ok_or_else(|| {
                        Fault::type_error(format!(
                            "%d format: a real number is required, not {}",
                            value.type_name()
                        ))
                    })?;
                format_value(&int, &format!("{}{}d", align, rest), cap)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                format_value(value, &format!("{}{}{}", align, rest, conversion), cap)?
            }
            other => {
                return Err(Fault::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&text)?;
        i = j + 1;
    }
    if next < values.len() {
        return Err(Fault::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;

    const CAP: usize = 1_000;

    #[test]
    fn test_format_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f", CAP).unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(1234567), ",", CAP).unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Float(1234.5), ",.2f", CAP).unwrap(), "1,234.50");
        assert_eq!(format_value(&Value::Float(0.256), ".1%", CAP).unwrap(), "25.6%");
        assert_eq!(format_value(&Value::Int(-42), "05d", CAP).unwrap(), "-0042");
        assert_eq!(format_value(&Value::str("ab"), ">4", CAP).unwrap(), "  ab");
        assert_eq!(format_value(&Value::str("ab"), "*^6", CAP).unwrap(), "**ab**");
        assert_eq!(format_value(&Value::Float(1500.0), ".2e", CAP).unwrap(), "1.50e+03");
        assert!(format_value(&Value::str("ab"), ".2f", CAP).is_err());
    }

    #[test]
    fn test_str_format() {
        let text = str_format(
            "{} sold {n:,} units ({:.1f}%)",
            &[Value::str("North"), Value::Float(12.345)],
            &[("n".to_string(), Value::Int(12000))],
            CAP,
        )
        .unwrap();
        assert_eq!(text, "North sold 12,000 units (12.3%)");
        assert!(str_format("{}", &[], &[], CAP).is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("avg"), Value::Float(2.5)]);
        assert_eq!(percent_format("%s = %.2f%%", &args, CAP).unwrap(), "avg = 2.50%");
        assert_eq!(percent_format("%d items", &Value::Int(3), CAP).unwrap(), "3 items");
        assert!(percent_format("%s %s", &Value::Int(1), CAP).is_err());
    }

    #[test]
    fn test_width_and_precision_are_bounded() {
        let limited = |result: FaultResult<String>| match result {
            Err(fault) => fault.kind == FaultKind::ResourceLimit,
            Ok(_) => false,
        };
        assert!(limited(str_format("{:>40000000000}", &[Value::Int(1)], &[], CAP)));
        assert!(limited(format_value(&Value::Int(1), "999999999d", CAP)));
        assert!(limited(format_value(&Value::Float(1.5), ".40000000000f", CAP)));
        assert!(limited(format_value(&Value::Float(1.5), ".1001f", 1_000_000)));
        assert!(limited(percent_format("%99999999999d", &Value::Int(1), CAP)));
        assert_eq!(format_value(&Value::Int(7), ">1000", CAP).unwrap().len(), 1_000);
        assert_eq!(format_value(&Value::Float(0.5), ".3f", CAP).unwrap(), "0.500");
    }

    #[test]
    fn test_repeated_fields_are_bounded() {
        let template = "{:>600}".repeat(2);
        let result = str_format(&template, &[Value::Int(1), Value::Int(2)], &[], CAP);
        assert_eq!(result.unwrap_err().kind, FaultKind::ResourceLimit);
        assert!(str_format("{:>400}{:>400}", &[Value::Int(1), Value::Int(2)], &[], CAP).is_ok());
    }

    #[test]
    fn test_most_negative_int() {
        let min = Value::Int(i64::MIN);
        assert_eq!(format_value(&min, "d", CAP).unwrap(), "-9223372036854775808");
        assert_eq!(
            format_value(&min, ",", CAP).unwrap(),
            "-9,223,372,036,854,775,808"
        );
        assert_eq!(percent_format("%d", &min, CAP).unwrap(), "-9223372036854775808");
    }
}
