/// Stateless scanners over raw text
///
/// Everything here is a pure function of its input slice: character
/// classification, HTML tag grammars, autolink recognition, link
/// destination/title/label scanning, entity decoding, and the static tables
/// behind them. The block and inline parsers call into these; none of them
/// touch parser state.

/// Tags whose presence after `<` or `</` opens an HTML block of kind 6.
const BLOCK_TAGS: [&str; 62] = [
    "address",
    "article",
    "aside",
    "base",
    "basefont",
    "blockquote",
    "body",
    "caption",
    "center",
    "col",
    "colgroup",
    "dd",
    "details",
    "dialog",
    "dir",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figcaption",
    "figure",
    "footer",
    "form",
    "frame",
    "frameset",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "head",
    "header",
    "hr",
    "html",
    "iframe",
    "legend",
    "li",
    "link",
    "main",
    "menu",
    "menuitem",
    "nav",
    "noframes",
    "ol",
    "optgroup",
    "option",
    "p",
    "param",
    "search",
    "section",
    "summary",
    "table",
    "tbody",
    "td",
    "tfoot",
    "th",
    "thead",
    "title",
    "tr",
    "track",
    "ul",
];

/// Tags that open a kind-1 HTML block and end it with their closing tag.
const VERBATIM_TAGS: [&str; 4] = ["pre", "script", "style", "textarea"];

/// URI schemes recognized in `<scheme:...>` autolinks. Sorted for binary
/// search; candidates are lowercased before the lookup.
static AUTOLINK_SCHEMES: [&str; 164] = [
    "aaa",
    "aaas",
    "about",
    "acap",
    "adiumxtra",
    "afp",
    "afs",
    "aim",
    "apt",
    "attachment",
    "aw",
    "beshare",
    "bitcoin",
    "bolo",
    "callto",
    "cap",
    "chrome",
    "chrome-extension",
    "cid",
    "coap",
    "com-eventbrite-attendees",
    "content",
    "crid",
    "cvs",
    "data",
    "dav",
    "dict",
    "dlna-playcontainer",
    "dlna-playsingle",
    "dns",
    "doi",
    "dtn",
    "dvb",
    "ed2k",
    "facetime",
    "feed",
    "file",
    "finger",
    "fish",
    "ftp",
    "geo",
    "gg",
    "git",
    "gizmoproject",
    "go",
    "gopher",
    "gtalk",
    "h323",
    "hcp",
    "http",
    "https",
    "iax",
    "icap",
    "icon",
    "im",
    "imap",
    "info",
    "ipn",
    "ipp",
    "irc",
    "irc6",
    "ircs",
    "iris",
    "iris.beep",
    "iris.lwz",
    "iris.xpc",
    "iris.xpcs",
    "itms",
    "jar",
    "javascript",
    "jms",
    "keyparc",
    "lastfm",
    "ldap",
    "ldaps",
    "magnet",
    "mailto",
    "maps",
    "market",
    "message",
    "mid",
    "mms",
    "ms-help",
    "msnim",
    "msrp",
    "msrps",
    "mtqp",
    "mumble",
    "mupdate",
    "mvn",
    "news",
    "nfs",
    "ni",
    "nih",
    "nntp",
    "notes",
    "oid",
    "opaquelocktoken",
    "palm",
    "paparazzi",
    "platform",
    "pop",
    "pres",
    "proxy",
    "psyc",
    "query",
    "res",
    "resource",
    "rmi",
    "rsync",
    "rtmp",
    "rtsp",
    "secondlife",
    "service",
    "session",
    "sftp",
    "sgn",
    "shttp",
    "sieve",
    "sip",
    "sips",
    "skype",
    "smb",
    "sms",
    "snmp",
    "soap.beep",
    "soap.beeps",
    "soldat",
    "spotify",
    "ssh",
    "steam",
    "svn",
    "tag",
    "teamspeak",
    "tel",
    "telnet",
    "tftp",
    "things",
    "thismessage",
    "tip",
    "tn3270",
    "tv",
    "udp",
    "unreal",
    "urn",
    "ut2004",
    "vemmi",
    "ventrilo",
    "view-source",
    "webcal",
    "ws",
    "wss",
    "wtai",
    "wyciwyg",
    "xcon",
    "xcon-userid",
    "xfire",
    "xmlrpc.beep",
    "xmlrpc.beeps",
    "xmpp",
    "xri",
    "ymsgr",
    "z39.50r",
    "z39.50s",
];

pub fn is_space_or_tab(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

pub fn is_line_end_char(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}

/// Whether the rest of the line (which may still carry its line ending)
/// holds nothing but spaces and tabs.
pub fn is_blank_line(s: &str) -> bool {
    for &b in s.as_bytes() {
        if is_line_end_char(b) {
            return true;
        }
        if !is_space_or_tab(b) {
            return false;
        }
    }
    true
}

/// Check if a character is Unicode punctuation (for emphasis flanking rules)
/// Per CommonMark spec: characters in Unicode P (punctuation) or S (symbol) categories
pub fn is_unicode_punctuation(c: char) -> bool {
    // Fast path for ASCII
    if c.is_ascii_punctuation() {
        return true;
    }

    // For non-ASCII, check the common P and S ranges
    let code = c as u32;
    matches!(code,
        // Latin-1 Supplement punctuation and symbols
        0x00A1..=0x00BF | 0x00D7 | 0x00F7 |
        // Currency symbols
        0x20A0..=0x20CF |
        // General Punctuation
        0x2000..=0x206F |
        // Supplemental Punctuation
        0x2E00..=0x2E7F |
        // Mathematical Operators
        0x2200..=0x22FF |
        // Arrows
        0x2190..=0x21FF |
        // Miscellaneous Technical
        0x2300..=0x23FF |
        // Box Drawing, Block Elements, Geometric Shapes
        0x2500..=0x25FF |
        // Miscellaneous Symbols
        0x2600..=0x26FF |
        // Dingbats
        0x2700..=0x27BF |
        // Miscellaneous Mathematical Symbols-A/B
        0x27C0..=0x27EF | 0x2980..=0x29FF |
        // Supplemental Arrows-A/B
        0x27F0..=0x27FF | 0x2900..=0x297F |
        // Miscellaneous Symbols and Arrows
        0x2B00..=0x2BFF |
        // CJK Symbols and Punctuation
        0x3000..=0x303F
    )
}

pub fn is_unicode_whitespace(c: char) -> bool {
    c.is_whitespace()
}

/// Decode HTML5 named entities
/// This is a subset of HTML5 entities - add more as needed
fn lookup_named_entity(name: &str) -> Option<&'static str> {
    let decoded = match name {
        "nbsp" => "\u{00A0}",
        "amp" => "&",
        "AMP" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "copy" => "©",
        "reg" => "®",
        "AElig" => "Æ",
        "Dcaron" => "Ď",
        "frac34" => "¾",
        "HilbertSpace" => "ℋ",
        "DifferentialD" => "ⅆ",
        "ClockwiseContourIntegral" => "∲",
        "ngE" => "≧̸",
        "ouml" => "ö",
        "auml" => "ä",
        "eacute" => "é",
        "agrave" => "à",
        "atilde" => "ã",
        "ccedil" => "ç",
        "Eacute" => "É",
        "uuml" => "ü",
        "szlig" => "ß",
        "hellip" => "…",
        "mdash" => "—",
        "ndash" => "–",
        "trade" => "™",
        "deg" => "°",
        "plusmn" => "±",
        "middot" => "·",
        "laquo" => "«",
        "raquo" => "»",
        "sect" => "§",
        "para" => "¶",
        "frac12" => "½",
        "frac14" => "¼",
        "iexcl" => "¡",
        "iquest" => "¿",
        "cent" => "¢",
        "pound" => "£",
        "curren" => "¤",
        "yen" => "¥",
        "euro" => "€",
        "micro" => "µ",
        "times" => "×",
        "divide" => "÷",
        "not" => "¬",
        "shy" => "\u{00AD}",
        "sup1" => "¹",
        "sup2" => "²",
        "sup3" => "³",
        "ordf" => "ª",
        "ordm" => "º",
        "dagger" => "†",
        "Dagger" => "‡",
        "bull" => "•",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201C}",
        "rdquo" => "\u{201D}",
        "sbquo" => "‚",
        "bdquo" => "„",
        "prime" => "′",
        "Prime" => "″",
        "permil" => "‰",
        "minus" => "−",
        "infin" => "∞",
        "ne" => "≠",
        "le" => "≤",
        "ge" => "≥",
        "rarr" => "→",
        "larr" => "←",
        "uarr" => "↑",
        "darr" => "↓",
        "harr" => "↔",
        _ => return None,
    };

    Some(decoded)
}

/// Scan an entity or numeric character reference starting at `pos` (which
/// must hold `&`). Returns the decoded text and the number of bytes
/// consumed, including the `&` and the `;`.
pub fn scan_entity(s: &str, pos: usize) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    if pos >= bytes.len() || bytes[pos] != b'&' {
        return None;
    }

    let mut i = pos + 1;

    if i < bytes.len() && bytes[i] == b'#' {
        i += 1;

        // Hexadecimal reference: &#x or &#X
        if i < bytes.len() && (bytes[i] == b'x' || bytes[i] == b'X') {
            i += 1;
            let hex_start = i;
            while i < bytes.len() && i - hex_start < 6 && bytes[i].is_ascii_hexdigit() {
                i += 1;
            }
            if i > hex_start && i < bytes.len() && bytes[i] == b';' {
                let code_point = u32::from_str_radix(&s[hex_start..i], 16).ok()?;
                return Some((decode_code_point(code_point), i + 1 - pos));
            }
        }
        // Decimal reference
        else {
            let dec_start = i;
            while i < bytes.len() && i - dec_start < 7 && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > dec_start && i < bytes.len() && bytes[i] == b';' {
                let code_point: u32 = s[dec_start..i].parse().ok()?;
                return Some((decode_code_point(code_point), i + 1 - pos));
            }
        }
    }
    // Named entity
    else {
        let name_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
            i += 1;
        }
        if i > name_start && i < bytes.len() && bytes[i] == b';' {
            if let Some(decoded) = lookup_named_entity(&s[name_start..i]) {
                return Some((decoded.to_string(), i + 1 - pos));
            }
        }
    }

    None
}

fn decode_code_point(code_point: u32) -> String {
    // NUL and out-of-range references become the replacement character
    let ch = if code_point == 0 {
        '\u{FFFD}'
    } else {
        char::from_u32(code_point).unwrap_or('\u{FFFD}')
    };
    ch.to_string()
}

/// Replace entity and numeric character references with the characters
/// they stand for. Unrecognized references pass through untouched.
pub fn unescape_entities(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'&' {
            if let Some((decoded, len)) = scan_entity(s, i) {
                out.push_str(&decoded);
                i += len;
                continue;
            }
        }
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&s[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// Drop the backslash from backslash-escaped ASCII punctuation.
pub fn unescape_backslashes(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_punctuation() {
            i += 1;
        }
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&s[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// Resolve entity references, then backslash escapes. Used for link
/// destinations, titles, info strings and reference definitions; inline
/// text is handled character by character instead.
pub fn unescape_string(s: &str) -> String {
    unescape_backslashes(&unescape_entities(s))
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

/// Percent-encode a URL for an `href`/`src` attribute. Safe characters pass
/// through, `&` and `'` become entities, everything else (including all
/// non-ASCII bytes) becomes `%XX`.
pub fn encode_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for &b in url.as_bytes() {
        match b {
            b'&' => out.push_str("&amp;"),
            b'\'' => out.push_str("&#x27;"),
            _ if b.is_ascii_alphanumeric() => out.push(b as char),
            b'!' | b'#' | b'$' | b'%' | b'(' | b')' | b'*' | b'+' | b',' | b'-' | b'.' | b'/'
            | b':' | b';' | b'=' | b'?' | b'@' | b'_' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// ATX heading opener: 1-6 `#` followed by space, tab or end of line.
/// Returns the number of bytes through the marker and any one following
/// space/tab.
pub fn atx_heading_start(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut level = 0;
    while level < bytes.len() && bytes[level] == b'#' {
        level += 1;
    }
    if level == 0 || level > 6 {
        return None;
    }
    if level >= bytes.len() || is_line_end_char(bytes[level]) {
        return Some(level);
    }
    if is_space_or_tab(bytes[level]) {
        return Some(level + 1);
    }
    None
}

/// Opening code fence: 3+ backticks or tildes. Backtick fences reject info
/// strings containing a backtick. Returns the fence length.
pub fn open_code_fence(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || (bytes[0] != b'`' && bytes[0] != b'~') {
        return None;
    }
    let fence_char = bytes[0];
    let mut len = 0;
    while len < bytes.len() && bytes[len] == fence_char {
        len += 1;
    }
    if len < 3 {
        return None;
    }
    // Rest of the line is the info string
    if fence_char == b'`' && s[len..].bytes().any(|b| b == b'`') {
        return None;
    }
    Some(len)
}

/// Closing code fence: a run of the fence character with nothing after it
/// but spaces. Returns the run length for the caller to compare against the
/// opening fence.
pub fn close_code_fence(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || (bytes[0] != b'`' && bytes[0] != b'~') {
        return None;
    }
    let fence_char = bytes[0];
    let mut len = 0;
    while len < bytes.len() && bytes[len] == fence_char {
        len += 1;
    }
    if len < 3 {
        return None;
    }
    let mut i = len;
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    if i >= bytes.len() || is_line_end_char(bytes[i]) {
        Some(len)
    } else {
        None
    }
}

/// Setext underline: a run of `=` (level 1) or `-` (level 2) with only
/// trailing spaces/tabs.
pub fn setext_heading_line(s: &str) -> Option<u8> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return None;
    }
    let (ch, level) = match bytes[0] {
        b'=' => (b'=', 1),
        b'-' => (b'-', 2),
        _ => return None,
    };
    let mut i = 0;
    while i < bytes.len() && bytes[i] == ch {
        i += 1;
    }
    while i < bytes.len() && is_space_or_tab(bytes[i]) {
        i += 1;
    }
    if i >= bytes.len() || is_line_end_char(bytes[i]) {
        Some(level)
    } else {
        None
    }
}

fn tag_name_len(bytes: &[u8]) -> usize {
    if bytes.is_empty() || !bytes[0].is_ascii_alphabetic() {
        return 0;
    }
    let mut i = 1;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        i += 1;
    }
    i
}

/// HTML block opener, kinds 1 through 6. `s` starts at the `<`.
pub fn html_block_start(s: &str) -> Option<u8> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes[0] != b'<' {
        return None;
    }

    // Kind 2: comment
    if s.starts_with("<!--") {
        return Some(2);
    }
    // Kind 3: processing instruction
    if s.starts_with("<?") {
        return Some(3);
    }
    // Kind 5: CDATA
    if s.starts_with("<![CDATA[") {
        return Some(5);
    }
    // Kind 4: declaration
    if bytes.len() > 2 && bytes[1] == b'!' && bytes[2].is_ascii_alphabetic() {
        return Some(4);
    }

    let (rest, closing) = if bytes.len() > 1 && bytes[1] == b'/' {
        (&bytes[2..], true)
    } else {
        (&bytes[1..], false)
    };
    let name_len = tag_name_len(rest);
    if name_len == 0 {
        return None;
    }
    let name = std::str::from_utf8(&rest[..name_len]).ok()?;
    let after = &rest[name_len..];

    // Kind 1: pre, script, style, textarea followed by space, tab, `>` or
    // end of line
    if !closing
        && VERBATIM_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name))
        && (after.is_empty()
            || is_space_or_tab(after[0])
            || is_line_end_char(after[0])
            || after[0] == b'>')
    {
        return Some(1);
    }

    // Kind 6: known block tag, open or closing
    if BLOCK_TAGS
        .iter()
        .any(|t| t.eq_ignore_ascii_case(name))
    {
        let ok = after.is_empty()
            || is_space_or_tab(after[0])
            || is_line_end_char(after[0])
            || after[0] == b'>'
            || (!closing && after.len() > 1 && after[0] == b'/' && after[1] == b'>');
        if ok {
            return Some(6);
        }
    }

    None
}

/// HTML block opener of kind 7: a complete open or closing tag alone on the
/// line. Never interrupts a paragraph; the caller enforces that.
pub fn html_block_start_7(s: &str) -> Option<u8> {
    let len = scan_open_tag(s).or_else(|| scan_close_tag(s))?;
    if is_blank_line(&s[len..]) { Some(7) } else { None }
}

/// End-of-block test for HTML kinds 1-5, applied to each appended line
/// (including the opening one). Kinds 6 and 7 end on a blank line instead.
pub fn html_block_end(kind: u8, line: &str) -> bool {
    match kind {
        1 => {
            let lower = line.to_ascii_lowercase();
            lower.contains("</pre>")
                || lower.contains("</script>")
                || lower.contains("</style>")
                || lower.contains("</textarea>")
        }
        2 => line.contains("-->"),
        3 => line.contains("?>"),
        4 => line.contains('>'),
        5 => line.contains("]]>"),
        _ => false,
    }
}

/// Spaces and tabs with at most one line ending, the whitespace allowed
/// inside inline HTML tags and between the parts of a reference
/// definition. Returns bytes consumed.
pub(crate) fn scan_spnl(bytes: &[u8]) -> usize {
    let mut i = 0;
    let mut seen_newline = false;
    while i < bytes.len() {
        if is_space_or_tab(bytes[i]) {
            i += 1;
        } else if bytes[i] == b'\n' && !seen_newline {
            seen_newline = true;
            i += 1;
        } else {
            break;
        }
    }
    i
}

fn scan_attribute(bytes: &[u8]) -> Option<usize> {
    // attribute name
    if bytes.is_empty() || !(bytes[0].is_ascii_alphabetic() || bytes[0] == b'_' || bytes[0] == b':')
    {
        return None;
    }
    let mut i = 1;
    while i < bytes.len()
        && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'.' | b':' | b'-'))
    {
        i += 1;
    }

    // optional value
    let mut j = i + scan_spnl(&bytes[i..]);
    if j < bytes.len() && bytes[j] == b'=' {
        j += 1;
        j += scan_spnl(&bytes[j..]);
        if j >= bytes.len() {
            return None;
        }
        match bytes[j] {
            b'"' | b'\'' => {
                let quote = bytes[j];
                j += 1;
                while j < bytes.len() && bytes[j] != quote {
                    j += 1;
                }
                if j >= bytes.len() {
                    return None;
                }
                i = j + 1;
            }
            _ => {
                let start = j;
                while j < bytes.len()
                    && !is_space_or_tab(bytes[j])
                    && !is_line_end_char(bytes[j])
                    && !matches!(bytes[j], b'"' | b'\'' | b'=' | b'<' | b'>' | b'`')
                {
                    j += 1;
                }
                if j == start {
                    return None;
                }
                i = j;
            }
        }
    }

    Some(i)
}

/// A complete open tag starting at `<`, attributes included. Returns the
/// total length.
pub fn scan_open_tag(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'<' {
        return None;
    }
    let name_len = tag_name_len(&bytes[1..]);
    if name_len == 0 {
        return None;
    }
    let mut i = 1 + name_len;

    loop {
        let ws = scan_spnl(&bytes[i..]);
        if ws == 0 {
            break;
        }
        match scan_attribute(&bytes[i + ws..]) {
            Some(attr_len) => i += ws + attr_len,
            None => {
                i += ws;
                break;
            }
        }
    }

    if i < bytes.len() && bytes[i] == b'/' {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'>' {
        Some(i + 1)
    } else {
        None
    }
}

/// A complete closing tag starting at `</`.
pub fn scan_close_tag(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.len() < 3 || bytes[0] != b'<' || bytes[1] != b'/' {
        return None;
    }
    let name_len = tag_name_len(&bytes[2..]);
    if name_len == 0 {
        return None;
    }
    let mut i = 2 + name_len;
    i += scan_spnl(&bytes[i..]);
    if i < bytes.len() && bytes[i] == b'>' {
        Some(i + 1)
    } else {
        None
    }
}

fn scan_comment(s: &str) -> Option<usize> {
    if !s.starts_with("<!--") {
        return None;
    }
    // Degenerate forms
    if s.starts_with("<!-->") {
        return Some(5);
    }
    if s.starts_with("<!--->") {
        return Some(6);
    }
    let close = s[4..].find("-->")?;
    Some(4 + close + 3)
}

fn scan_processing_instruction(s: &str) -> Option<usize> {
    if !s.starts_with("<?") {
        return None;
    }
    let close = s[2..].find("?>")?;
    Some(2 + close + 2)
}

fn scan_declaration(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.len() < 3 || bytes[0] != b'<' || bytes[1] != b'!' || !bytes[2].is_ascii_alphabetic() {
        return None;
    }
    let close = s[2..].find('>')?;
    Some(2 + close + 1)
}

fn scan_cdata(s: &str) -> Option<usize> {
    if !s.starts_with("<![CDATA[") {
        return None;
    }
    let close = s[9..].find("]]>")?;
    Some(9 + close + 3)
}

/// Any of the seven inline HTML grammars starting at `<`: open tag, closing
/// tag, comment, processing instruction, declaration, CDATA. Returns the
/// matched length.
pub fn scan_html_tag(s: &str) -> Option<usize> {
    scan_comment(s)
        .or_else(|| scan_cdata(s))
        .or_else(|| scan_processing_instruction(s))
        .or_else(|| scan_declaration(s))
        .or_else(|| scan_close_tag(s))
        .or_else(|| scan_open_tag(s))
}

fn is_allowed_scheme(scheme: &str) -> bool {
    let lower = scheme.to_ascii_lowercase();
    AUTOLINK_SCHEMES.binary_search(&lower.as_str()).is_ok()
}

/// URI autolink starting at `<`: an allow-listed scheme, a colon, then any
/// characters other than whitespace, controls, `<` and `>`, closed by `>`.
/// Returns the total length including the angle brackets.
pub fn scan_autolink_uri(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes[0] != b'<' {
        return None;
    }

    let mut i = 1;
    let scheme_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'+' | b'.' | b'-'))
    {
        i += 1;
    }
    if i == scheme_start || i >= bytes.len() || bytes[i] != b':' {
        return None;
    }
    if !bytes[scheme_start].is_ascii_alphabetic() || !is_allowed_scheme(&s[scheme_start..i]) {
        return None;
    }
    i += 1;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'>' {
            return Some(i + 1);
        }
        if b <= 0x20 || b == 0x7F || b == b'<' {
            return None;
        }
        i += 1;
    }
    None
}

fn is_email_local_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'.' | b'!'
                | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'/'
                | b'='
                | b'?'
                | b'^'
                | b'_'
                | b'`'
                | b'{'
                | b'|'
                | b'}'
                | b'~'
                | b'-'
        )
}

fn scan_email_domain_label(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() || !bytes[0].is_ascii_alphanumeric() {
        return None;
    }
    let mut i = 1;
    let mut last_alnum = 0;
    while i < bytes.len() && i <= 62 && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        if bytes[i].is_ascii_alphanumeric() {
            last_alnum = i;
        }
        i += 1;
    }
    // A label cannot end with a hyphen
    Some(last_alnum + 1)
}

/// Email autolink starting at `<`. Returns the total length including the
/// angle brackets.
pub fn scan_autolink_email(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes[0] != b'<' {
        return None;
    }

    let mut i = 1;
    let local_start = i;
    while i < bytes.len() && is_email_local_char(bytes[i]) {
        i += 1;
    }
    if i == local_start || i >= bytes.len() || bytes[i] != b'@' {
        return None;
    }
    i += 1;

    loop {
        let label_len = scan_email_domain_label(&bytes[i..])?;
        i += label_len;
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
        } else {
            break;
        }
    }

    if i < bytes.len() && bytes[i] == b'>' {
        Some(i + 1)
    } else {
        None
    }
}

/// Link destination: either `<...>` with no unescaped `<`, `>` or line
/// endings inside, or a bare destination with balanced parentheses (nesting
/// depth capped at 32) and no spaces or controls. Returns the unescaped
/// destination and the bytes consumed.
pub fn scan_link_destination(s: &str) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    if bytes[0] == b'<' {
        let mut i = 1;
        while i < bytes.len() {
            match bytes[i] {
                b'>' => return Some((unescape_string(&s[1..i]), i + 1)),
                b'<' | b'\n' | b'\r' => return None,
                b'\\' if i + 1 < bytes.len() && bytes[i + 1].is_ascii_punctuation() => i += 2,
                _ => i += 1,
            }
        }
        return None;
    }

    let mut i = 0;
    let mut nesting = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() && bytes[i + 1].is_ascii_punctuation() => i += 2,
            b'(' => {
                nesting += 1;
                if nesting > 32 {
                    return None;
                }
                i += 1;
            }
            b')' => {
                if nesting == 0 {
                    break;
                }
                nesting -= 1;
                i += 1;
            }
            b if b <= 0x20 || b == 0x7F => break,
            _ => i += 1,
        }
    }
    if nesting != 0 {
        return None;
    }
    Some((unescape_string(&s[..i]), i))
}

/// Link title in `"..."`, `'...'` or `(...)`. May span line endings but
/// not a blank line. Returns the unescaped title and the bytes consumed.
pub fn scan_link_title(s: &str) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return None;
    }
    let (open, close) = match bytes[0] {
        b'"' => (b'"', b'"'),
        b'\'' => (b'\'', b'\''),
        b'(' => (b'(', b')'),
        _ => return None,
    };

    let mut i = 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == close {
            return Some((unescape_string(&s[1..i]), i + 1));
        }
        // A paren-delimited title cannot hold an unescaped opener
        if b == open {
            return None;
        }
        if b == b'\n' {
            let mut j = i + 1;
            while j < bytes.len() && is_space_or_tab(bytes[j]) {
                j += 1;
            }
            if j >= bytes.len() || bytes[j] == b'\n' {
                return None;
            }
        }
        if b == b'\\' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_punctuation() {
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}

/// Longest interior a link label may have.
pub const MAX_LINK_LABEL_LENGTH: usize = 1000;

/// Link label starting at `[`: up to 999 interior characters, no unescaped
/// brackets. Returns the raw interior text and the bytes consumed including
/// both brackets.
pub fn scan_link_label(s: &str) -> Option<(&str, usize)> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes[0] != b'[' {
        return None;
    }
    let mut i = 1;
    while i < bytes.len() && i <= MAX_LINK_LABEL_LENGTH {
        match bytes[i] {
            b']' => return Some((&s[1..i], i + 1)),
            b'[' => return None,
            b'\\' if i + 1 < bytes.len() && bytes[i + 1].is_ascii_punctuation() => i += 2,
            _ => i += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemes_table_is_sorted() {
        for pair in AUTOLINK_SCHEMES.windows(2) {
            assert!(pair[0] < pair[1], "{} >= {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_autolink_uri() {
        assert_eq!(scan_autolink_uri("<http://foo.bar.baz>"), Some(20));
        assert_eq!(scan_autolink_uri("<MAILTO:FOO@BAR.BAZ>"), Some(20));
        assert_eq!(scan_autolink_uri("<irc://foo.bar:2233/baz>"), Some(24));
        // Unlisted scheme
        assert_eq!(scan_autolink_uri("<heidiho:/22/b>"), None);
        // Spaces are not allowed
        assert_eq!(scan_autolink_uri("<http://foo bar>"), None);
        // No closing bracket
        assert_eq!(scan_autolink_uri("<http://foo.bar"), None);
    }

    #[test]
    fn test_autolink_email() {
        assert_eq!(scan_autolink_email("<foo@bar.example.com>"), Some(21));
        assert_eq!(scan_autolink_email("<foo+special@Bar.baz-bar0.com>"), Some(30));
        assert_eq!(scan_autolink_email("<foo@bar>"), Some(9));
        assert_eq!(scan_autolink_email("<foo@-bar.com>"), None);
        assert_eq!(scan_autolink_email("<@bar.com>"), None);
    }

    #[test]
    fn test_entities() {
        assert_eq!(scan_entity("&amp;", 0), Some(("&".to_string(), 5)));
        assert_eq!(scan_entity("&#35;", 0), Some(("#".to_string(), 5)));
        assert_eq!(scan_entity("&#x22;", 0), Some(("\"".to_string(), 6)));
        assert_eq!(scan_entity("&#0;", 0), Some(("\u{FFFD}".to_string(), 4)));
        assert_eq!(scan_entity("&nosuch;", 0), None);
        assert_eq!(scan_entity("&amp", 0), None);
    }

    #[test]
    fn test_common_named_entities() {
        assert_eq!(scan_entity("&frac12;", 0), Some(("½".to_string(), 8)));
        assert_eq!(scan_entity("&sect;", 0), Some(("§".to_string(), 6)));
        assert_eq!(scan_entity("&euro;", 0), Some(("€".to_string(), 6)));
        assert_eq!(scan_entity("&rarr;", 0), Some(("→".to_string(), 6)));
        assert_eq!(
            scan_entity("&rsquo;", 0),
            Some(("\u{2019}".to_string(), 7))
        );
    }

    #[test]
    fn test_unescape_string() {
        assert_eq!(unescape_string("&amp;"), "&");
        assert_eq!(unescape_string(r"foo\*bar"), "foo*bar");
        assert_eq!(unescape_string(r"\A"), r"\A");
        assert_eq!(unescape_string("f&ouml;&ouml;"), "föö");
    }

    #[test]
    fn test_html_block_kinds() {
        assert_eq!(html_block_start("<pre>"), Some(1));
        assert_eq!(html_block_start("<script src=\"x\">"), Some(1));
        assert_eq!(html_block_start("<!-- comment"), Some(2));
        assert_eq!(html_block_start("<?php"), Some(3));
        assert_eq!(html_block_start("<!DOCTYPE html>"), Some(4));
        assert_eq!(html_block_start("<![CDATA["), Some(5));
        assert_eq!(html_block_start("<div class=\"x\""), Some(6));
        assert_eq!(html_block_start("</div>"), Some(6));
        assert_eq!(html_block_start("<madeuptag>"), None);
        assert_eq!(html_block_start_7("<a href=\"x\">\n"), Some(7));
        assert_eq!(html_block_start_7("<a href=\"x\">text\n"), None);
    }

    #[test]
    fn test_html_block_end_conditions() {
        assert!(html_block_end(1, "ok </script> done"));
        assert!(html_block_end(2, "x --> y"));
        assert!(html_block_end(3, "x ?> y"));
        assert!(html_block_end(4, "x > y"));
        assert!(html_block_end(5, "x ]]> y"));
        assert!(!html_block_end(2, "no close"));
    }

    #[test]
    fn test_scan_open_tag() {
        assert_eq!(scan_open_tag("<a>"), Some(3));
        assert_eq!(scan_open_tag("<a/>"), Some(4));
        assert_eq!(
            scan_open_tag("<a foo=\"bar\" bam = 'baz <em>\"</em>'\n_boolean zoop:33=zoop:33 />"),
            Some(63)
        );
        assert_eq!(scan_open_tag("<33>"), None);
        assert_eq!(scan_open_tag("<a h*ref=\"b\">"), None);
        assert_eq!(scan_open_tag("<a href=\"foo\"bar\">"), None);
    }

    #[test]
    fn test_scan_comment() {
        assert_eq!(scan_html_tag("<!---->"), Some(7));
        assert_eq!(scan_html_tag("<!-- foo -->"), Some(12));
        assert_eq!(scan_html_tag("<!-->"), Some(5));
        assert_eq!(scan_html_tag("<!--->"), Some(6));
    }

    #[test]
    fn test_link_destination() {
        assert_eq!(
            scan_link_destination("/uri \"title\")"),
            Some(("/uri".to_string(), 4))
        );
        assert_eq!(scan_link_destination("<b)c>)"), Some(("b)c".to_string(), 5)));
        assert_eq!(
            scan_link_destination("foo(and(bar)))"),
            Some(("foo(and(bar))".to_string(), 13))
        );
        assert_eq!(scan_link_destination("(foo"), None);
        assert_eq!(scan_link_destination("<foo\nbar>"), None);
    }

    #[test]
    fn test_link_title() {
        assert_eq!(
            scan_link_title("\"title\")"),
            Some(("title".to_string(), 7))
        );
        assert_eq!(
            scan_link_title("'ti\\'tle')"),
            Some(("ti'tle".to_string(), 9))
        );
        assert_eq!(
            scan_link_title("(title))"),
            Some(("title".to_string(), 7))
        );
        assert_eq!(scan_link_title("(not(ok))"), None);
        assert_eq!(scan_link_title("\"unterminated"), None);
    }

    #[test]
    fn test_link_label() {
        assert_eq!(scan_link_label("[foo]"), Some(("foo", 5)));
        assert_eq!(scan_link_label("[f\\]oo]"), Some(("f\\]oo", 7)));
        assert_eq!(scan_link_label("[foo"), None);
        assert_eq!(scan_link_label("[fo[o]"), None);
    }

    #[test]
    fn test_encode_url() {
        assert_eq!(encode_url("/my uri"), "/my%20uri");
        assert_eq!(encode_url("/φου"), "/%CF%86%CE%BF%CF%85");
        assert_eq!(encode_url("foo?a=b&c=d"), "foo?a=b&amp;c=d");
        assert_eq!(encode_url("/url\\*"), "/url%5C*");
    }

    #[test]
    fn test_setext_heading_line() {
        assert_eq!(setext_heading_line("===\n"), Some(1));
        assert_eq!(setext_heading_line("-  \n"), Some(2));
        assert_eq!(setext_heading_line("= =\n"), None);
    }

    #[test]
    fn test_code_fences() {
        assert_eq!(open_code_fence("```rust\n"), Some(3));
        assert_eq!(open_code_fence("~~~~\n"), Some(4));
        assert_eq!(open_code_fence("``\n"), None);
        assert_eq!(open_code_fence("```a`b`\n"), None);
        assert_eq!(close_code_fence("````   \n"), Some(4));
        assert_eq!(close_code_fence("``` x\n"), None);
    }
}
