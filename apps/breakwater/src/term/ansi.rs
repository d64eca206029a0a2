//! Tiny ANSI byte builders for text injected into the client's screen.

use crate::proto::{AnsiColor, ClientContext};

use super::encode_big5;

/// `CUP` to a 1-based position.
pub fn goto(row: u16, col: u16) -> Vec<u8> {
    format!("\x1b[{row};{col}H").into_bytes()
}

/// `SGR 0`.
pub fn reset() -> Vec<u8> {
    b"\x1b[m".to_vec()
}

fn rendition(fg: Option<AnsiColor>, bg: Option<AnsiColor>, bold: bool) -> Vec<u8> {
    let mut params = Vec::new();
    if bold {
        params.push("1".to_string());
    }
    if let Some(fg) = fg {
        params.push(fg.fg_code().to_string());
    }
    if let Some(bg) = bg {
        params.push(bg.bg_code().to_string());
    }
    if params.is_empty() {
        return Vec::new();
    }
    format!("\x1b[0;{}m", params.join(";")).into_bytes()
}

/// Render one draw context into client-bound bytes: position, rendition,
/// Big5-encoded text.
pub fn draw(ctx: &ClientContext, screen_rows: u16) -> Vec<u8> {
    let row = if ctx.row >= 0 {
        ctx.row as u16
    } else {
        (screen_rows as i32 + 1 + ctx.row).max(1) as u16
    };
    let mut out = Vec::new();
    if ctx.col > 0 {
        out.extend_from_slice(&goto(row, ctx.col));
    }
    out.extend_from_slice(&rendition(ctx.fg, ctx.bg, ctx.bold));
    if let Some(text) = &ctx.text {
        out.extend_from_slice(&encode_big5(text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goto_is_one_based() {
        assert_eq!(goto(24, 61), b"\x1b[24;61H");
    }

    #[test]
    fn draw_resolves_bottom_relative_rows() {
        let ctx = ClientContext::text(-1, 1, "Command:").styled(
            AnsiColor::White,
            AnsiColor::Black,
            false,
        );
        let bytes = draw(&ctx, 24);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("\x1b[24;1H"));
        assert!(text.contains("\x1b[0;37;40m"));
        assert!(text.ends_with("Command:"));
    }

    #[test]
    fn draw_without_style_or_text_is_just_a_move() {
        let bytes = draw(&ClientContext::at(3, 5), 24);
        assert_eq!(bytes, b"\x1b[3;5H");
    }
}
