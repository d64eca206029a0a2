use once_cell::sync::Lazy;
use regex::Regex;

/// Base-64 alphabet of the article identification system. The order matters;
/// it is the remote service's, not RFC 4648's.
const ENCODE: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://www\.ptt\.cc/bbs/(.+)/(.+)\.html").unwrap());
static FN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.)\.(\d+)\.A\.([0-9A-F]{3})$").unwrap());

/// A thread's identity as carried in its canonical URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleId {
    pub board: String,
    pub filename: String,
    /// 8-character compact form; used as the archive file name.
    pub compact: String,
}

impl ArticleId {
    pub fn from_url(url: &str) -> Option<Self> {
        let (board, filename) = board_and_filename(url)?;
        let compact = compact_id(&filename)?;
        Some(Self {
            board,
            filename,
            compact,
        })
    }
}

/// Split a canonical thread URL into (board, article filename).
pub fn board_and_filename(url: &str) -> Option<(String, String)> {
    let caps = URL_RE.captures(url)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Compress an article filename (`M.1181801925.A.86E`) into the 8-character
/// compact ID. The filename packs a mailbox bit, a 32-bit timestamp and a
/// 12-bit serial; the compact form is that 44-bit value in the service's
/// base-64 alphabet.
pub fn compact_id(filename: &str) -> Option<String> {
    let caps = FN_RE.captures(filename)?;
    let m: u64 = if &caps[1] == "M" { 0 } else { 1 };
    let hi: u64 = caps[2].parse::<u64>().ok()? & 0xffff_ffff;
    let lo: u64 = u64::from_str_radix(&caps[3], 16).ok()? & 0xfff;

    let mut out = String::with_capacity(8);
    out.push(ENCODE[((m << 2) | (hi >> 30)) as usize] as char);
    out.push(ENCODE[((hi >> 24) & 0x3f) as usize] as char);
    out.push(ENCODE[((hi >> 18) & 0x3f) as usize] as char);
    out.push(ENCODE[((hi >> 12) & 0x3f) as usize] as char);
    out.push(ENCODE[((hi >> 6) & 0x3f) as usize] as char);
    out.push(ENCODE[(hi & 0x3f) as usize] as char);
    out.push(ENCODE[(lo >> 6) as usize] as char);
    out.push(ENCODE[(lo & 0x3f) as usize] as char);
    Some(out)
}
