//! Post-processing: deterministic cleanup of VLM output between stages.
//!
//! Two independent rule sets live here:
//!
//! - [`clean_fragment`] runs on every Stage 1 response before the fragments
//!   are joined. It undoes transport quirks (fences, CRLF, zero-width
//!   characters) and then applies [`fix_malformed_rows`].
//! - [`remove_parentheses_around_numbers`] runs once on the joined Markdown
//!   before Stage 2, so `(1 234)` reaches the extraction model as `1234`.
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised so the fence
//! regex sees the raw response; invisible characters are removed before the
//! table-row rule so a row made only of zero-width spaces counts as empty.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one Stage 1 response. Returns an empty string for blank output.
///
/// Rules (applied in order):
/// 1. Trim surrounding whitespace
/// 2. Strip outer markdown fences
/// 3. Normalise line endings (CRLF → LF)
/// 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 5. Trim trailing whitespace per line
/// 6. Drop table rows whose every cell is empty, trim trailing blank lines
pub fn clean_fragment(raw: &str) -> String {
    let s = strip_markdown_fences(raw.trim());
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = fix_malformed_rows(&s);
    s.trim_start_matches('\n').to_string()
}

// ── Rule 2: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n?```$")
        .expect("fence regex is valid")
});

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 4: Strip invisible Unicode ──────────────────────────────────────────

static RE_INVISIBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[\u{200B}\u{200C}\u{200D}\u{2060}\u{FEFF}\u{00AD}]")
        .expect("invisible-char regex is valid")
});

fn remove_invisible_chars(input: &str) -> String {
    RE_INVISIBLE.replace_all(input, "").into_owned()
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Malformed table rows ─────────────────────────────────────────────

/// Remove `|`-delimited lines whose cells are all blank, then trailing blank
/// lines.
///
/// Separator rows (`|---|---|`) have non-empty cells and are kept. The
/// function is idempotent.
pub fn fix_malformed_rows(markdown: &str) -> String {
    let mut kept: Vec<&str> = markdown
        .lines()
        .filter(|line| !is_blank_table_row(line))
        .collect();

    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }

    kept.join("\n")
}

fn is_blank_table_row(line: &str) -> bool {
    let row = line.trim();
    if !(row.starts_with('|') && row.ends_with('|')) {
        return false;
    }
    // A lone "|" both opens and closes the row; it has no cells at all.
    let inner = if row.len() == 1 { "" } else { &row[1..row.len() - 1] };
    inner.split('|').all(|cell| cell.trim().is_empty())
}

// ── Stage 2 input: digit groups in parentheses ───────────────────────────────

static RE_PARENTHESISED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^)]+)\)").expect("parenthesis regex is valid"));

static RE_DIGIT_GROUPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d\s]+$").expect("digit-group regex is valid"));

/// Replace `(1 234)` by `1234`; leave any other parenthesised text alone.
///
/// Scanned balance sheets print negative amounts and footnote figures in
/// parentheses with space-separated thousands. The extraction model reads
/// the bare digit group far more reliably.
pub fn remove_parentheses_around_numbers(text: &str) -> String {
    RE_PARENTHESISED
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let inner = &caps[1];
            if RE_DIGIT_GROUPS.is_match(inner.trim()) {
                inner.chars().filter(|c| !c.is_whitespace()).collect()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn blank_rows_are_removed() {
        let md = "| Статья | Код |\n|---|---|\n| | |\n| Запасы | 1210 |\n|  |";
        assert_eq!(
            fix_malformed_rows(md),
            "| Статья | Код |\n|---|---|\n| Запасы | 1210 |"
        );
    }

    #[test]
    fn lone_pipe_is_a_blank_row() {
        assert_eq!(fix_malformed_rows("text\n|\nmore"), "text\nmore");
        assert_eq!(fix_malformed_rows("||"), "");
    }

    #[test]
    fn trailing_blank_lines_trimmed() {
        assert_eq!(fix_malformed_rows("a\n\nb\n\n   \n"), "a\n\nb");
    }

    #[test]
    fn half_open_rows_are_kept() {
        assert_eq!(fix_malformed_rows("| | x\n| a"), "| | x\n| a");
    }

    #[test]
    fn clean_fragment_of_blank_table_is_empty() {
        assert_eq!(clean_fragment("| | |"), "");
        assert_eq!(clean_fragment("   \n\n"), "");
        assert_eq!(clean_fragment(""), "");
    }

    #[test]
    fn clean_fragment_strips_fences_and_crlf() {
        let raw = "```markdown\r\n# Баланс\r\n| A | 1 |\r\n| | |\r\n```";
        assert_eq!(clean_fragment(raw), "# Баланс\n| A | 1 |");
    }

    #[test]
    fn clean_fragment_removes_zero_width_rows() {
        assert_eq!(clean_fragment("text\n|\u{200B}|\u{FEFF}|"), "text");
    }

    #[test]
    fn digit_groups_lose_parentheses() {
        assert_eq!(remove_parentheses_around_numbers("(1 234)"), "1234");
        assert_eq!(remove_parentheses_around_numbers("(12)"), "12");
        assert_eq!(
            remove_parentheses_around_numbers("| Прибыль | (15 000) | (2 500) |"),
            "| Прибыль | 15000 | 2500 |"
        );
    }

    #[test]
    fn non_numeric_parentheses_untouched() {
        assert_eq!(remove_parentheses_around_numbers("(abc)"), "(abc)");
        assert_eq!(remove_parentheses_around_numbers("(12a)"), "(12a)");
        assert_eq!(remove_parentheses_around_numbers("( )"), "( )");
        assert_eq!(remove_parentheses_around_numbers("()"), "()");
        assert_eq!(
            remove_parentheses_around_numbers("Итого (стр. 1100 + 1200)"),
            "Итого (стр. 1100 + 1200)"
        );
    }

    #[test]
    fn padded_digit_groups_are_compacted() {
        assert_eq!(remove_parentheses_around_numbers("( 1 234 )"), "1234");
        assert_eq!(remove_parentheses_around_numbers("(1\u{00A0}234)"), "1234");
    }

    proptest! {
        #[test]
        fn fix_malformed_rows_is_idempotent(lines in prop::collection::vec(
            prop_oneof![
                Just("|".to_string()),
                Just("| | |".to_string()),
                Just("|---|---|".to_string()),
                Just("".to_string()),
                Just("   ".to_string()),
                "[a-z| ]{0,12}",
            ],
            0..12,
        )) {
            let md = lines.join("\n");
            let once = fix_malformed_rows(&md);
            prop_assert_eq!(fix_malformed_rows(&once), once);
        }

        #[test]
        fn non_numeric_text_is_unchanged(s in "[a-zA-Zа-я .,()]{0,40}") {
            prop_assert_eq!(remove_parentheses_around_numbers(&s), s);
        }
    }
}
