//! Inbound email cleanup: raw HTML or plain-text bodies become plain-text
//! ticket content with signatures, quoted reply chains, and boilerplate
//! removed.
//!
//! Line classification is an ordered list of stop/skip rules, each a single
//! regex, evaluated top to bottom per line. This is a best-effort heuristic,
//! not a parser; a legitimate body line that looks like a salutation will be
//! treated as one.

use std::sync::OnceLock;

use regex::Regex;

fn signature_delimiter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(--|__)\s*$").unwrap())
}

fn closing_salutation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(best regards|kind regards|warm regards|warmest regards|regards|best wishes|best|thanks|thank you|many thanks|thanks in advance|cheers|sincerely|sincerely yours|yours sincerely|yours truly|respectfully|take care)\s*,?\s*$",
        )
        .unwrap()
    })
}

// "On <date> ... wrote:" reply headers, in the three date shapes that show
// up in practice: natural language, M/D/YY, and ISO.

fn reply_header_natural_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^on\s+[a-z]{3,9},?\s+.*wrote:\s*$").unwrap())
}

fn reply_header_slash_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^on\s+\d{1,2}/\d{1,2}/\d{2,4}.*wrote:\s*$").unwrap())
}

fn reply_header_iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^on\s+\d{4}-\d{2}-\d{2}.*wrote:\s*$").unwrap())
}

fn disclaimer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(confidential|disclaimer|this email|the information contained)").unwrap()
    })
}

fn mobile_signature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^sent from my (iphone|ipad|android|samsung|mobile)").unwrap()
    })
}

/// Stop rules in evaluation order. The first match discards the line and
/// everything after it.
fn stop_rules() -> [&'static Regex; 7] {
    [
        signature_delimiter_re(),
        closing_salutation_re(),
        reply_header_natural_re(),
        reply_header_slash_date_re(),
        reply_header_iso_date_re(),
        disclaimer_re(),
        mobile_signature_re(),
    ]
}

#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    Keep,
    Skip,
    Stop,
}

fn classify_line(line: &str, seen_content: bool) -> LineAction {
    let t = line.trim();
    if t.is_empty() {
        // Leading blank lines are noise; interior blanks preserve paragraphs.
        return if seen_content { LineAction::Keep } else { LineAction::Skip };
    }
    if t.starts_with('>') {
        return LineAction::Skip;
    }
    if stop_rules().iter().any(|re| re.is_match(t)) {
        return LineAction::Stop;
    }
    LineAction::Keep
}

/// Clean a raw email body into plain-text ticket content.
///
/// HTML bodies are flattened to text first; then lines are processed in
/// order until a stop rule fires, and the survivors are whitespace-normalized.
/// An empty result is valid: a body that is nothing but signature is
/// cleaned to nothing.
pub fn clean_email_content(content: &str, is_html: bool) -> String {
    if content.is_empty() {
        return String::new();
    }

    let text = if is_html {
        html_to_text(content)
    } else {
        content.to_string()
    };

    let mut kept: Vec<&str> = Vec::new();
    let mut seen_content = false;
    for line in text.lines() {
        match classify_line(line, seen_content) {
            LineAction::Stop => break,
            LineAction::Skip => continue,
            LineAction::Keep => {
                if !line.trim().is_empty() {
                    seen_content = true;
                }
                kept.push(line);
            }
        }
    }

    normalize_whitespace(&kept.join("\n"))
}

/// Strip a leading `Re:`/`Fwd:`/`Fw:` chain from a subject line.
pub fn clean_subject(subject: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^(\s*(re|fwd?)\s*:\s*)+").unwrap());
    re.replace(subject, "").trim().to_string()
}

fn html_to_text(html: &str) -> String {
    static STYLE_RE: OnceLock<Regex> = OnceLock::new();
    static SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
    static BR_RE: OnceLock<Regex> = OnceLock::new();
    static P_CLOSE_RE: OnceLock<Regex> = OnceLock::new();
    static TAG_RE: OnceLock<Regex> = OnceLock::new();

    let style = STYLE_RE.get_or_init(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap());
    let script = SCRIPT_RE.get_or_init(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
    let br = BR_RE.get_or_init(|| Regex::new(r"(?i)<br\s*/?\s*>").unwrap());
    let p_close = P_CLOSE_RE.get_or_init(|| Regex::new(r"(?i)</p\s*>").unwrap());
    let tag = TAG_RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap());

    let text = style.replace_all(html, "");
    let text = script.replace_all(&text, "");
    let text = br.replace_all(&text, "\n");
    let text = p_close.replace_all(&text, "\n\n");
    let text = tag.replace_all(&text, "");
    decode_entities(&text)
}

/// Decode the HTML entities that actually occur in email bodies. `&amp;`
/// goes last so `&amp;lt;` decodes to `&lt;` and stops there.
fn decode_entities(text: &str) -> String {
    static DEC_RE: OnceLock<Regex> = OnceLock::new();
    static HEX_RE: OnceLock<Regex> = OnceLock::new();

    let dec = DEC_RE.get_or_init(|| Regex::new(r"&#(\d+);").unwrap());
    let hex = HEX_RE.get_or_init(|| Regex::new(r"&#x([0-9a-fA-F]+);").unwrap());

    let text = hex.replace_all(text, |caps: &regex::Captures| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    let text = dec.replace_all(&text, |caps: &regex::Captures| {
        caps[1]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}")
        .replace("&hellip;", "\u{2026}")
        .replace("&amp;", "&")
}

/// Collapse 3+ newlines to exactly 2, runs of 2+ spaces/tabs to one space,
/// and trim the ends.
fn normalize_whitespace(text: &str) -> String {
    static NEWLINES_RE: OnceLock<Regex> = OnceLock::new();
    static SPACES_RE: OnceLock<Regex> = OnceLock::new();

    let newlines = NEWLINES_RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap());
    let spaces = SPACES_RE.get_or_init(|| Regex::new(r"[ \t]{2,}").unwrap());

    let text = newlines.replace_all(text, "\n\n");
    let text = spaces.replace_all(&text, " ");
    text.trim().to_string()
}
