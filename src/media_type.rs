//! Media type parsing and formatting.
//!
//! Implements RFC 2045 and RFC 2183 media type handling with RFC 2231
//! parameter continuations, biased towards getting a usable value out of
//! sloppy headers. Defects that could be worked around are reported but do
//! not invalidate the result; [`is_ignorable`] tells the two cases apart.

use crate::error::{Defect, Defects, MediaTypeError};
use crate::grammar;
use std::collections::HashMap;

/// Parses a media type value and any optional parameters, per RFC 1521.
///
/// Media types are the values in Content-Type and Content-Disposition
/// headers (RFC 2183). Returns the media type converted to lowercase and
/// trimmed of white space, and a map from lowercase attribute names to
/// values with case preserved.
///
/// A malformed but salvageable value yields a usable type and map next to
/// a recoverable error; pass the error through [`is_ignorable`] to decide
/// whether to keep the result. Only a value with no recognizable media
/// type at all is fatal, in which case the type is empty.
///
/// # Examples
///
/// ```
/// use yamime::parse_media_type;
///
/// let (media_type, params, err) = parse_media_type("Text/HTML; Charset=\"utf-8\"");
/// assert!(err.is_none());
/// assert_eq!(media_type, "text/html");
/// assert_eq!(params.get("charset"), Some(&"utf-8".to_string()));
/// ```
pub fn parse_media_type(v: &str) -> (String, HashMap<String, String>, Option<MediaTypeError>) {
    let mut defects = Defects::new();
    let head_end = v.find(';').unwrap_or(v.len());
    let head = v[..head_end].trim().to_lowercase();
    let mediatype = check_media_type_disposition(&mut defects, &head, v);
    if defects.fatal().is_some() {
        return (String::new(), HashMap::new(), Some(MediaTypeError::new(defects)));
    }

    let mut params: HashMap<String, String> = HashMap::new();

    // Map of base parameter name -> full parameter name -> value for
    // parameters containing a '*' character.
    let mut continuation: HashMap<String, HashMap<String, String>> = HashMap::new();

    let mut v = &v[head_end..];
    while !v.is_empty() {
        v = v.trim_start();
        if v.is_empty() {
            break;
        }
        let (key, value, rest) = consume_media_param(v);
        if key.is_empty() {
            if v.trim() == ";" {
                // Ignore a trailing semicolon; not an error.
                return finish(mediatype, params, defects);
            }
            if !mediatype.is_empty() {
                defects.add(Defect::InvalidMediaParameter);
                return finish(mediatype, params, defects);
            }
            defects.add_fatal(Defect::InvalidMediaParameter);
            return (String::new(), HashMap::new(), Some(MediaTypeError::new(defects)));
        }

        let pmap = if let Some(idx) = key.find('*') {
            continuation.entry(key[..idx].to_string()).or_default()
        } else {
            &mut params
        };
        if pmap.contains_key(&key) {
            // Keep the first value; later duplicates are bogus.
            defects.add(Defect::DuplicateParameterName);
        } else {
            pmap.insert(key, value);
        }
        v = rest;
    }

    // Stitch together any RFC 2231 continuations ("foo*0", "foo*1", ...)
    // and encoded parameters ("foo*").
    for (base, piece_map) in &continuation {
        let single_part_key = format!("{base}*");
        if let Some(raw) = piece_map.get(&single_part_key) {
            params.insert(base.clone(), decode_2231_enc(raw));
            continue;
        }

        let mut buf = String::new();
        let mut valid = false;
        for n in 0.. {
            let simple_part = format!("{base}*{n}");
            if let Some(raw) = piece_map.get(&simple_part) {
                valid = true;
                buf.push_str(raw);
                continue;
            }
            let encoded_part = format!("{simple_part}*");
            if let Some(raw) = piece_map.get(&encoded_part) {
                valid = true;
                if n == 0 {
                    buf.push_str(&decode_2231_enc(raw));
                } else {
                    buf.push_str(&percent_hex_unescape(raw).unwrap_or_default());
                }
                continue;
            }
            break;
        }
        if valid {
            params.insert(base.clone(), buf);
        }
    }

    finish(mediatype, params, defects)
}

fn finish(
    mediatype: String,
    params: HashMap<String, String>,
    defects: Defects,
) -> (String, HashMap<String, String>, Option<MediaTypeError>) {
    let err = if defects.is_empty() {
        None
    } else {
        Some(MediaTypeError::new(defects))
    };
    (mediatype, params, err)
}

/// Filters the error of [`parse_media_type`]: returns `None` when the
/// error may be ignored and the parsed value used, or the error back when
/// the result is meaningless.
pub fn is_ignorable(err: Option<MediaTypeError>) -> Option<MediaTypeError> {
    match err {
        Some(e) if e.is_ignorable() => None,
        other => other,
    }
}

/// Lossy validation of the `type "/" subtype` head. Salvages what it can,
/// substituting `unknown` for the unusable half, and records how far off
/// the input was. Only an entirely empty value is fatal.
fn check_media_type_disposition(defects: &mut Defects, s: &str, whole: &str) -> String {
    if whole.is_empty() {
        defects.add_fatal(Defect::NoMediaType);
        return String::new();
    }
    let (typ, rest) = consume_token(s);
    if typ.is_empty() {
        defects.add(Defect::NoMediaType);
        return "unknown".to_string();
    }
    if rest.is_empty() {
        return typ.to_string();
    }
    let Some(rest) = rest.strip_prefix('/') else {
        defects.add(Defect::NoSlash);
        return format!("{typ}/unknown");
    };
    let (subtype, rest) = consume_token(rest);
    if subtype.is_empty() {
        defects.add(Defect::NoTokenAfterSlash);
        return format!("{typ}/unknown");
    }
    if !rest.is_empty() {
        defects.add(Defect::UnexpectedContent);
        return format!("{typ}/{subtype}");
    }
    s.to_string()
}

/// Consumes a token from the beginning of the string, per RFC 2045
/// section 5.1 (referenced from 2183). Returns `("", v)` on failure to
/// consume at least one character.
fn consume_token(v: &str) -> (&str, &str) {
    match v.find(grammar::is_not_token_char) {
        None => (v, ""),
        Some(0) => ("", v),
        Some(pos) => v.split_at(pos),
    }
}

/// Consumes a value: either a token or a quoted-string with `\` escapes.
/// CR and LF are not permitted inside a quoted-string. Returns `("", v)`
/// on failure.
fn consume_value(v: &str) -> (String, &str) {
    if v.is_empty() {
        return (String::new(), v);
    }
    if !v.starts_with('"') {
        let (token, rest) = consume_token(v);
        return (token.to_string(), rest);
    }

    let inner = &v[1..];
    let mut buffer = String::new();
    let mut next_is_literal = false;
    for (idx, r) in inner.char_indices() {
        if next_is_literal {
            buffer.push(r);
            next_is_literal = false;
        } else if r == '"' {
            return (buffer, &inner[idx + 1..]);
        } else if r == '\\' {
            next_is_literal = true;
        } else if r != '\r' && r != '\n' {
            buffer.push(r);
        } else {
            return (String::new(), v);
        }
    }
    // Unterminated quoted-string.
    (String::new(), v)
}

/// Consumes `;` attribute `=` value. Returns empty strings and the input
/// unchanged when no well-formed parameter is present.
fn consume_media_param(v: &str) -> (String, String, &str) {
    let rest = v.trim_start();
    let Some(rest) = rest.strip_prefix(';') else {
        return (String::new(), String::new(), v);
    };
    let rest = rest.trim_start();
    let (param, rest) = consume_token(rest);
    let param = param.to_lowercase();
    if param.is_empty() {
        return (String::new(), String::new(), v);
    }
    let rest = rest.trim_start();
    let Some(rest) = rest.strip_prefix('=') else {
        return (String::new(), String::new(), v);
    };
    let rest = rest.trim_start();
    let (value, rest) = consume_value(rest);
    if value.is_empty() {
        return (String::new(), String::new(), v);
    }
    (param, value, rest)
}

/// Decodes an RFC 2231 `charset'language'percent-encoded` value. The
/// language is ignored; anything but `us-ascii` or `utf-8` yields an
/// empty result, as does a malformed percent escape.
fn decode_2231_enc(v: &str) -> String {
    let mut fields = v.splitn(3, '\'');
    let (Some(charset), Some(_lang), Some(value)) = (fields.next(), fields.next(), fields.next())
    else {
        return String::new();
    };
    let charset = charset.to_lowercase();
    if charset != "us-ascii" && charset != "utf-8" {
        return String::new();
    }
    percent_hex_unescape(value).unwrap_or_default()
}

fn percent_hex_unescape(s: &str) -> Result<String, Defect> {
    // Count %, check that they're well-formed.
    let bytes = s.as_bytes();
    let mut percents = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        percents += 1;
        if i + 2 >= bytes.len() || !grammar::is_hex(bytes[i + 1]) || !grammar::is_hex(bytes[i + 2]) {
            let bogus: String = s[i..].chars().take(3).collect();
            return Err(Defect::BogusPercent(bogus));
        }
        i += 3;
    }
    if percents == 0 {
        return Ok(s.to_string());
    }

    let mut t = Vec::with_capacity(bytes.len() - 2 * percents);
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            t.push((grammar::unhex(bytes[i + 1]) << 4) | grammar::unhex(bytes[i + 2]));
            i += 3;
        } else {
            t.push(bytes[i]);
            i += 1;
        }
    }
    Ok(String::from_utf8_lossy(&t).into_owned())
}

/// Serializes the media type `t` and the parameters `params` as a media
/// type conforming to RFC 2045 and RFC 2616. The type and parameter names
/// are written in lower-case; parameters are emitted in sorted attribute
/// order. When any of the arguments result in a standard violation then
/// the empty string is returned.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use yamime::format_media_type;
///
/// let mut params = HashMap::new();
/// params.insert("charset".to_string(), "utf-8".to_string());
/// assert_eq!(
///     format_media_type("text/HTML", &params),
///     "text/html; charset=utf-8"
/// );
/// ```
pub fn format_media_type(t: &str, params: &HashMap<String, String>) -> String {
    let mut b = String::new();
    match t.split_once('/') {
        None => {
            if !grammar::is_token(t) {
                return String::new();
            }
            b.push_str(&t.to_lowercase());
        }
        Some((major, sub)) => {
            if !grammar::is_token(major) || !grammar::is_token(sub) {
                return String::new();
            }
            b.push_str(&major.to_lowercase());
            b.push('/');
            b.push_str(&sub.to_lowercase());
        }
    }

    let mut attrs: Vec<&String> = params.keys().collect();
    attrs.sort();

    for attribute in attrs {
        let value = &params[attribute];
        b.push_str("; ");
        if !grammar::is_token(attribute) {
            return String::new();
        }
        b.push_str(&attribute.to_lowercase());
        b.push('=');
        if grammar::is_token(value) {
            b.push_str(value);
            continue;
        }

        b.push('"');
        for character in value.chars() {
            if (character as u32) & 0x80 != 0 {
                return String::new();
            }
            if character == '"' || character == '\\' {
                b.push('\\');
            }
            b.push(character);
        }
        b.push('"');
    }
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[track_caller]
    fn parse_ok(input: &str) -> (String, HashMap<String, String>) {
        let (mediatype, parsed, err) = parse_media_type(input);
        assert!(err.is_none(), "unexpected error for {input:?}: {err:?}");
        (mediatype, parsed)
    }

    #[track_caller]
    fn parse_lossy(input: &str) -> (String, HashMap<String, String>) {
        let (mediatype, parsed, err) = parse_media_type(input);
        let err = err.expect("expected a recoverable error");
        assert!(err.is_ignorable(), "unexpected fatal error for {input:?}");
        (mediatype, parsed)
    }

    #[test]
    fn plain_types() {
        let (mediatype, parsed) = parse_ok("text/html");
        assert_eq!(mediatype, "text/html");
        assert!(parsed.is_empty());

        // A bare token is accepted as the media type.
        let (mediatype, parsed) = parse_ok("form-data");
        assert_eq!(mediatype, "form-data");
        assert!(parsed.is_empty());
    }

    #[test]
    fn case_folding_and_quoting() {
        let (mediatype, parsed) = parse_ok("Text/HTML; Charset=\"utf-8\"");
        assert_eq!(mediatype, "text/html");
        assert_eq!(parsed, params(&[("charset", "utf-8")]));

        let (mediatype, parsed) = parse_ok("text/html; charset=utf-8");
        assert_eq!(mediatype, "text/html");
        assert_eq!(parsed, params(&[("charset", "utf-8")]));

        let (_, parsed) = parse_ok(r#"attachment; filename="f\"oo.html""#);
        assert_eq!(parsed, params(&[("filename", "f\"oo.html")]));
    }

    #[test]
    fn multiple_params_and_whitespace() {
        let (mediatype, parsed) =
            parse_ok("form-data; name=\"file\"; filename=\"plik.txt\"");
        assert_eq!(mediatype, "form-data");
        assert_eq!(parsed, params(&[("name", "file"), ("filename", "plik.txt")]));

        let (mediatype, parsed) =
            parse_ok("text/plain ;\tcharset = us-ascii ; format=flowed");
        assert_eq!(mediatype, "text/plain");
        assert_eq!(parsed, params(&[("charset", "us-ascii"), ("format", "flowed")]));
    }

    #[test]
    fn trailing_semicolon_is_fine() {
        let (mediatype, parsed) = parse_ok("text/plain;");
        assert_eq!(mediatype, "text/plain");
        assert!(parsed.is_empty());

        let (mediatype, parsed) = parse_ok("text/plain; charset=utf-8 ; ");
        assert_eq!(mediatype, "text/plain");
        assert_eq!(parsed, params(&[("charset", "utf-8")]));
    }

    #[test]
    fn lossy_heads() {
        let (mediatype, _) = parse_lossy("text/");
        assert_eq!(mediatype, "text/unknown");

        let (mediatype, _) = parse_lossy("/html");
        assert_eq!(mediatype, "unknown");

        let (mediatype, _) = parse_lossy("text\\plain");
        assert_eq!(mediatype, "text/unknown");

        let (mediatype, _) = parse_lossy("text/html(comment)");
        assert_eq!(mediatype, "text/html");

        let (mediatype, parsed) = parse_lossy("text/; charset=utf-8");
        assert_eq!(mediatype, "text/unknown");
        assert_eq!(parsed, params(&[("charset", "utf-8")]));
    }

    #[test]
    fn empty_input_is_fatal() {
        let (mediatype, parsed, err) = parse_media_type("");
        assert_eq!(mediatype, "");
        assert!(parsed.is_empty());
        let err = err.unwrap();
        assert!(!err.is_ignorable());
        assert_eq!(err.to_string(), "mime: no media type");
        assert!(is_ignorable(Some(err)).is_some());
    }

    #[test]
    fn malformed_parameter_keeps_head() {
        // CR inside a quoted-string fails the parameter but not the value.
        let (mediatype, parsed, err) = parse_media_type("text/plain; name=\"foo\rbar\"");
        assert_eq!(mediatype, "text/plain");
        assert!(parsed.is_empty());
        let err = err.unwrap();
        assert!(err.is_ignorable());
        assert_eq!(err.to_string(), "mime: invalid media parameter");
        assert!(is_ignorable(Some(err)).is_none());

        // Parameters before the bad one survive.
        let (mediatype, parsed, err) =
            parse_media_type("text/plain; charset=utf-8; name=");
        assert_eq!(mediatype, "text/plain");
        assert_eq!(parsed, params(&[("charset", "utf-8")]));
        assert!(err.unwrap().is_ignorable());
    }

    #[test]
    fn duplicate_parameter_keeps_first() {
        let (mediatype, parsed, err) =
            parse_media_type("text/plain; charset=utf-8; charset=us-ascii");
        assert_eq!(mediatype, "text/plain");
        assert_eq!(parsed, params(&[("charset", "utf-8")]));
        let err = err.unwrap();
        assert!(err.is_ignorable());
        assert_eq!(err.to_string(), "mime: duplicate parameter name");
    }

    #[test]
    fn rfc2231_single_encoded_parameter() {
        let (_, parsed) = parse_ok("attachment; filename*=utf-8''%e2%82%ac%20rates");
        assert_eq!(parsed, params(&[("filename", "€ rates")]));

        let (_, parsed) = parse_ok("attachment; filename*=us-ascii'en-us'internal%20memo.txt");
        assert_eq!(parsed, params(&[("filename", "internal memo.txt")]));

        // Unsupported charsets decode to nothing.
        let (_, parsed) = parse_ok("attachment; filename*=big5''abc");
        assert_eq!(parsed, params(&[("filename", "")]));

        // So do bogus percent escapes.
        let (_, parsed) = parse_ok("attachment; filename*=utf-8''oops%zz");
        assert_eq!(parsed, params(&[("filename", "")]));
    }

    #[test]
    fn rfc2231_continuations() {
        let (_, parsed) = parse_ok("attachment; filename*0*=utf-8''a%20; filename*1=b");
        assert_eq!(parsed, params(&[("filename", "a b")]));

        let (_, parsed) = parse_ok(
            "application/x-stuff; title*0*=us-ascii'en'This%20is%20even%20more%20; \
             title*1*=%2A%2A%2Afun%2A%2A%2A%20; title*2=\"isn't it!\"",
        );
        assert_eq!(
            parsed,
            params(&[("title", "This is even more ***fun*** isn't it!")])
        );

        // Later encoded segments are percent-decoded only.
        let (_, parsed) = parse_ok("attachment; filename*0=\"foo.\"; filename*1*=%e2%82%ac");
        assert_eq!(parsed, params(&[("filename", "foo.€")]));

        // A gap in the numbering stops the stitching.
        let (_, parsed) = parse_ok("attachment; filename*0=foo; filename*2=bar");
        assert_eq!(parsed, params(&[("filename", "foo")]));

        // Continuations and plain parameters coexist.
        let (_, parsed) = parse_ok("form-data; name=file; filename*0=plik; filename*1=.txt");
        assert_eq!(parsed, params(&[("name", "file"), ("filename", "plik.txt")]));
    }

    #[test]
    fn format_simple() {
        assert_eq!(format_media_type("text/html", &params(&[])), "text/html");
        assert_eq!(format_media_type("Text/HTML", &params(&[])), "text/html");
        assert_eq!(format_media_type("form-data", &params(&[])), "form-data");
        assert_eq!(
            format_media_type("text/html", &params(&[("charset", "utf-8")])),
            "text/html; charset=utf-8"
        );
    }

    #[test]
    fn format_sorts_and_quotes() {
        let p = params(&[("zed", "z"), ("name", "hello world"), ("b", "a\"b\\c")]);
        assert_eq!(
            format_media_type("multipart/form-data", &p),
            "multipart/form-data; b=\"a\\\"b\\\\c\"; name=\"hello world\"; zed=z"
        );
    }

    #[test]
    fn format_rejects_invalid() {
        assert_eq!(format_media_type("", &params(&[])), "");
        assert_eq!(format_media_type("text html", &params(&[])), "");
        assert_eq!(format_media_type("text/ht ml", &params(&[])), "");
        assert_eq!(format_media_type("text/html", &params(&[("na me", "x")])), "");
        assert_eq!(format_media_type("text/html", &params(&[("name", "smörgås")])), "");
    }

    #[test]
    fn format_parse_round_trip() {
        let cases: &[(&str, &[(&str, &str)])] = &[
            ("text/html", &[("charset", "utf-8")]),
            ("Multipart/Form-Data", &[("boundary", "----WebKit123"), ("x", "a b c")]),
            ("attachment", &[("filename", "report (final).txt")]),
        ];
        for (t, p) in cases {
            let p = params(p);
            let formatted = format_media_type(t, &p);
            assert!(!formatted.is_empty());
            let (mediatype, parsed, err) = parse_media_type(&formatted);
            assert!(err.is_none(), "round trip error for {formatted:?}: {err:?}");
            assert_eq!(mediatype, t.to_lowercase());
            assert_eq!(parsed, p);
        }
    }
}
