//! Table-driven HTML entity decoding.
//!
//! Decodes one level of named and numeric character references, the same way
//! an HTML parser would when assigning `innerHTML`. Pattern checks run on the
//! decoded text so `&lt;script&gt;` is treated exactly like `<script>`.

use std::borrow::Cow;

const REPLACEMENT_CHAR: char = '\u{FFFD}';

const NAMED_ENTITIES: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", '\u{00A0}'),
    ("Tab", '\t'),
    ("NewLine", '\n'),
    ("excl", '!'),
    ("num", '#'),
    ("dollar", '$'),
    ("percnt", '%'),
    ("lpar", '('),
    ("rpar", ')'),
    ("ast", '*'),
    ("plus", '+'),
    ("comma", ','),
    ("period", '.'),
    ("sol", '/'),
    ("bsol", '\\'),
    ("colon", ':'),
    ("semi", ';'),
    ("equals", '='),
    ("quest", '?'),
    ("commat", '@'),
    ("lsqb", '['),
    ("rsqb", ']'),
    ("lcub", '{'),
    ("rcub", '}'),
    ("lowbar", '_'),
    ("grave", '`'),
    ("Hat", '^'),
    ("verbar", '|'),
    ("copy", '\u{00A9}'),
    ("reg", '\u{00AE}'),
    ("trade", '\u{2122}'),
    ("deg", '\u{00B0}'),
    ("middot", '\u{00B7}'),
    ("bull", '\u{2022}'),
    ("hellip", '\u{2026}'),
    ("ndash", '\u{2013}'),
    ("mdash", '\u{2014}'),
    ("lsquo", '\u{2018}'),
    ("rsquo", '\u{2019}'),
    ("ldquo", '\u{201C}'),
    ("rdquo", '\u{201D}'),
    ("laquo", '\u{00AB}'),
    ("raquo", '\u{00BB}'),
    ("times", '\u{00D7}'),
    ("divide", '\u{00F7}'),
    ("cent", '\u{00A2}'),
    ("pound", '\u{00A3}'),
    ("euro", '\u{20AC}'),
    ("yen", '\u{00A5}'),
    ("sect", '\u{00A7}'),
    ("para", '\u{00B6}'),
];

/// Decodes named and numeric HTML entities.
///
/// Rules:
/// - Named references require a trailing `;` and are case-sensitive.
/// - Numeric references (`&#106;`, `&#x6A;`) accept a missing `;`.
/// - Numeric references to NUL, surrogates or out-of-range values decode to
///   U+FFFD.
/// - Unknown references are left untouched.
///
/// Every decoded reference is shorter than its source text, so decoding never
/// grows the input.
pub fn decode_html_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match decode_reference(tail) {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Decodes one reference at the start of `tail` (which begins with `&`).
///
/// Returns the decoded char and the number of bytes consumed.
fn decode_reference(tail: &str) -> Option<(char, usize)> {
    let body = &tail[1..];

    if let Some(numeric) = body.strip_prefix('#') {
        let (radix, prefix_len) = match numeric.as_bytes().first() {
            Some(b'x') | Some(b'X') => (16, 1),
            _ => (10, 0),
        };
        let digits = &numeric[prefix_len..];
        let digit_len = digits
            .bytes()
            .take_while(|b| (*b as char).is_digit(radix))
            .count();
        if digit_len == 0 {
            return None;
        }

        let ch = u32::from_str_radix(&digits[..digit_len], radix)
            .ok()
            .and_then(char::from_u32)
            .filter(|c| *c != '\0')
            .unwrap_or(REPLACEMENT_CHAR);

        let mut consumed = 2 + prefix_len + digit_len;
        if digits[digit_len..].starts_with(';') {
            consumed += 1;
        }
        return Some((ch, consumed));
    }

    let name_len = body.bytes().take_while(u8::is_ascii_alphanumeric).count();
    if name_len == 0 || !body[name_len..].starts_with(';') {
        return None;
    }
    let name = &body[..name_len];
    NAMED_ENTITIES
        .iter()
        .find(|(entity, _)| *entity == name)
        .map(|(_, ch)| (*ch, name_len + 2))
}
