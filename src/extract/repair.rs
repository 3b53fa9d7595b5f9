//! Escape-aware repair of near-JSON model output.
//!
//! Two failure modes show up constantly in model replies: typographic quote
//! glyphs where ASCII quotes belong, and raw newlines or tabs inside string
//! literals. This is a character scanner that fixes exactly those and leaves
//! every other character alone. It does not validate structure.

/// Scanner state.
#[derive(Debug, Default, Clone, Copy)]
struct ScanState {
    in_string: bool,
    escape_pending: bool,
}

/// Map typographic quotes to their ASCII equivalents.
fn normalize_quote(ch: char) -> char {
    match ch {
        '\u{201C}' | '\u{201D}' => '"',
        '\u{2018}' | '\u{2019}' => '\'',
        other => other,
    }
}

/// Repair `input` so a strict JSON parser has a chance.
///
/// Always produces output; never grows beyond one extra byte per raw
/// newline or tab inside a string. Repairing repaired text is a no-op.
pub fn repair_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 16);
    let mut state = ScanState::default();

    for raw in input.chars() {
        let ch = normalize_quote(raw);

        if state.escape_pending {
            out.push(ch);
            state.escape_pending = false;
            continue;
        }

        match ch {
            '\\' => {
                out.push(ch);
                state.escape_pending = true;
            }
            '"' => {
                out.push(ch);
                state.in_string = !state.in_string;
            }
            '\n' if state.in_string => out.push_str("\\n"),
            '\t' if state.in_string => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }

    out
}
