//! String filters.
//!
//! Every filter here coerces its input to a string first, the way output
//! statements render values, so piping a number or undefined through a
//! string filter behaves predictably.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::filters::{FilterCall, FilterRegistry, int_arg, str_arg};
use crate::value::Value;

pub fn register(registry: &mut FilterRegistry) {
    registry.register("append", append);
    registry.register("capitalize", capitalize);
    registry.register("downcase", downcase);
    registry.register("upcase", upcase);
    registry.register("escape", escape);
    registry.register("escape_once", escape_once);
    registry.register("lstrip", lstrip);
    registry.register("rstrip", rstrip);
    registry.register("strip", strip);
    registry.register("newline_to_br", newline_to_br);
    registry.register("prepend", prepend);
    registry.register("remove", remove);
    registry.register("remove_first", remove_first);
    registry.register("replace", replace);
    registry.register("replace_first", replace_first);
    registry.register("slice", slice);
    registry.register("split", split);
    registry.register("strip_html", strip_html);
    registry.register("strip_newlines", strip_newlines);
    registry.register("truncate", truncate);
    registry.register("truncatewords", truncatewords);
    registry.register("url_encode", url_encode);
    registry.register("url_decode", url_decode);
}

fn input(call: &FilterCall<'_>) -> String {
    call.value.render()
}

fn append(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 1)?;
    let mut out = input(&call);
    out.push_str(&str_arg(&call.args[0]));
    Ok(Value::str(out))
}

fn prepend(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 1)?;
    let mut out = str_arg(&call.args[0]);
    out.push_str(&input(&call));
    Ok(Value::str(out))
}

fn capitalize(call: FilterCall<'_>) -> Result<Value> {
    let val = input(&call);
    let mut chars = val.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    Ok(Value::str(out))
}

fn downcase(call: FilterCall<'_>) -> Result<Value> {
    Ok(Value::str(input(&call).to_lowercase()))
}

fn upcase(call: FilterCall<'_>) -> Result<Value> {
    Ok(Value::str(input(&call).to_uppercase()))
}

fn lstrip(call: FilterCall<'_>) -> Result<Value> {
    Ok(Value::str(input(&call).trim_start()))
}

fn rstrip(call: FilterCall<'_>) -> Result<Value> {
    Ok(Value::str(input(&call).trim_end()))
}

fn strip(call: FilterCall<'_>) -> Result<Value> {
    Ok(Value::str(input(&call).trim()))
}

/// Escapes `&`, `<`, `>`, `"` and `'` as HTML entities.
pub(crate) fn html_escape(val: &str) -> String {
    let mut out = String::with_capacity(val.len());
    for c in val.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`html_escape`], including numeric character references.
fn html_unescape(val: &str) -> String {
    let mut out = String::with_capacity(val.len());
    let mut rest = val;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape(call: FilterCall<'_>) -> Result<Value> {
    Ok(Value::str(html_escape(&input(&call))))
}

fn escape_once(call: FilterCall<'_>) -> Result<Value> {
    Ok(Value::str(html_escape(&html_unescape(&input(&call)))))
}

fn newline_to_br(call: FilterCall<'_>) -> Result<Value> {
    let val = input(&call);
    Ok(Value::str(val.replace("\r\n", "<br />\n").replace('\n', "<br />\n")))
}

fn remove(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 1)?;
    Ok(Value::str(input(&call).replace(&str_arg(&call.args[0]), "")))
}

fn remove_first(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 1)?;
    Ok(Value::str(input(&call).replacen(&str_arg(&call.args[0]), "", 1)))
}

fn replace(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(2, 2)?;
    let sub = str_arg(&call.args[1]);
    if call.args[0].is_undefined() {
        return Ok(Value::str(sub));
    }
    Ok(Value::str(input(&call).replace(&str_arg(&call.args[0]), &sub)))
}

fn replace_first(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(2, 2)?;
    let sub = str_arg(&call.args[1]);
    if call.args[0].is_undefined() {
        return Ok(Value::str(sub));
    }
    Ok(Value::str(input(&call).replacen(&str_arg(&call.args[0]), &sub, 1)))
}

/// Resolves a possibly negative slice bound the way Python slicing does.
fn slice_bound(bound: i64, len: usize) -> usize {
    let len = len as i64;
    let resolved = if bound < 0 { (len + bound).max(0) } else { bound.min(len) };
    usize::try_from(resolved).unwrap_or(0)
}

fn slice(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 2)?;
    let val = input(&call);
    if val.is_empty() {
        return Ok(Value::str(""));
    }
    if call.args[0].is_undefined() {
        return Err(Error::filter_argument("slice", "expected an integer, found undefined"));
    }
    let start = int_arg("slice", &call.args[0])?;
    let length = match call.arg(1) {
        Some(value) if !value.is_undefined() => int_arg("slice", value)?,
        _ => 1,
    };

    let chars: Vec<char> = val.chars().collect();
    if start > chars.len() as i64 - 1 {
        return Err(Error::filter_argument("slice", "string index out of range"));
    }
    let begin = slice_bound(start, chars.len());
    let end = slice_bound(start.saturating_add(length), chars.len());
    if end <= begin {
        return Ok(Value::str(""));
    }
    Ok(Value::str(chars[begin..end].iter().collect::<String>()))
}

fn split(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 1)?;
    let val = input(&call);
    let sep = str_arg(&call.args[0]);
    let parts: Vec<Value> = if sep.is_empty() {
        val.chars().map(|c| Value::str(c.to_string())).collect()
    } else {
        val.split(&sep).map(Value::str).collect()
    };
    Ok(Value::array(parts))
}

/// Strips HTML tags, comments and the contents of script/style elements.
fn strip_html(call: FilterCall<'_>) -> Result<Value> {
    let val = input(&call);
    let mut out = String::with_capacity(val.len());
    let mut rest = val.as_str();
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let lower = rest.to_lowercase();
        let skipped = if lower.starts_with("<!--") {
            rest.find("-->").map(|end| end + 3)
        } else if lower.starts_with("<script") {
            lower.find("</script>").map(|end| end + "</script>".len())
        } else if lower.starts_with("<style") {
            lower.find("</style>").map(|end| end + "</style>".len())
        } else {
            rest.find('>').map(|end| end + 1)
        };
        match skipped {
            Some(skip) => rest = &rest[skip..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Ok(Value::str(out))
}

fn strip_newlines(call: FilterCall<'_>) -> Result<Value> {
    let val = input(&call);
    Ok(Value::str(val.replace("\r\n", "").replace('\n', "")))
}

fn truncate(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 2)?;
    if call.args[0].is_undefined() {
        return Err(Error::filter_argument("truncate", "expected an integer, found undefined"));
    }
    let num = usize::try_from(int_arg("truncate", &call.args[0])?).unwrap_or(0);
    let end = call.arg(1).map_or_else(|| "...".to_string(), str_arg);
    let val = input(&call);
    let chars: Vec<char> = val.chars().collect();
    if chars.len() <= num {
        return Ok(Value::str(val));
    }
    let keep = num.saturating_sub(end.chars().count());
    let mut out: String = chars[..keep].iter().collect();
    out.push_str(&end);
    Ok(Value::str(out))
}

fn truncatewords(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 2)?;
    if call.args[0].is_undefined() {
        return Err(Error::filter_argument("truncatewords", "expected an integer, found undefined"));
    }
    let num = int_arg("truncatewords", &call.args[0])?.max(1) as usize;
    let end = call.arg(1).map_or_else(|| "...".to_string(), str_arg);
    let val = input(&call);
    let words: Vec<&str> = val.split_whitespace().collect();
    if words.len() <= num {
        return Ok(Value::str(val));
    }
    let mut out = words[..num].join(" ");
    out.push_str(&end);
    Ok(Value::str(out))
}

/// Characters that survive percent-encoding unescaped.
fn is_url_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b'-' | b'~')
}

fn url_encode(call: FilterCall<'_>) -> Result<Value> {
    let val = input(&call);
    let mut out = String::with_capacity(val.len());
    for byte in val.bytes() {
        if is_url_safe(byte) {
            out.push(byte as char);
        } else if byte == b' ' {
            out.push('+');
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    Ok(Value::str(out))
}

fn url_decode(call: FilterCall<'_>) -> Result<Value> {
    let val = input(&call);
    let mut bytes = Vec::with_capacity(val.len());
    let raw = val.as_bytes();
    let mut pos = 0;
    while pos < raw.len() {
        match raw[pos] {
            b'+' => {
                bytes.push(b' ');
                pos += 1;
            }
            b'%' => {
                match val.get(pos + 1..pos + 3).and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                    Some(byte) => {
                        bytes.push(byte);
                        pos += 3;
                    }
                    None => {
                        bytes.push(b'%');
                        pos += 1;
                    }
                }
            }
            other => {
                bytes.push(other);
                pos += 1;
            }
        }
    }
    Ok(Value::str(String::from_utf8_lossy(&bytes)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn escape_round_trip() {
        assert_eq!(html_escape("<a & 'b'>"), "&lt;a &amp; &#39;b&#39;&gt;");
        assert_eq!(html_unescape("&lt;a &amp; b&gt; &#39;c&#39;"), "<a & b> 'c'");
        // escape_once leaves existing entities alone.
        assert_eq!(html_escape(&html_unescape("&amp;x < y")), "&amp;x &lt; y");
    }

    #[test]
    fn slice_bounds_follow_python_semantics() {
        assert_eq!(slice_bound(-3, 5), 2);
        assert_eq!(slice_bound(7, 5), 5);
        assert_eq!(slice_bound(-9, 5), 0);
    }
}
