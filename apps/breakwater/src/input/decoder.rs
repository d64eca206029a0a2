use tracing::debug;

use super::ClientEvent;

// Telnet command bytes that can appear inside a client chunk.
const IAC: u8 = 0xff;
const SUB_BEGIN: u8 = 0xfa;
const SUB_END: u8 = 0xf0;
const NOP: u8 = 0xf1;
const OPT_NAWS: u8 = 0x1f;

/// VT function-key names, indexed by `ESC [ n ~` number minus one.
const VT_KEYS: [&str; 8] = [
    "Home", "Insert", "Delete", "End", "PgUp", "PgDn", "Home", "End",
];

/// One decoded unit of client input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputToken {
    Key(DecodedKey),
    /// A VT function key that has no symbolic `ClientEvent` (e.g. Delete).
    VtFunction(u16),
    /// Telnet NAWS sub-negotiation, consumed internally by the session to
    /// resize the emulator; never surfaced as a `ClientEvent`.
    Resize { cols: u16, rows: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedKey {
    pub event: ClientEvent,
    /// Up/Down arrow followed by a carriage return within the same chunk:
    /// the local cursor moves immediately so pattern matching stays
    /// consistent before the remote confirms.
    pub uncommitted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Esc,
    Csi,
    Num,
    Iac,
    IacSub,
}

/// Left-to-right scanner over client byte chunks.
///
/// By default an escape or Telnet sequence cut off at a chunk boundary is
/// dropped, mirroring the original proxy; `carry_partial` keeps the tail and
/// prepends it to the next chunk instead.
pub struct InputDecoder {
    carry_partial: bool,
    pending: Vec<u8>,
}

impl Default for InputDecoder {
    fn default() -> Self {
        Self::new(false)
    }
}

impl InputDecoder {
    pub fn new(carry_partial: bool) -> Self {
        Self {
            carry_partial,
            pending: Vec::new(),
        }
    }

    /// Decode one client chunk into tokens.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<InputToken> {
        let owned;
        let content: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(chunk);
            owned = joined;
            &owned
        };

        let uncommitted = content.len() > 1 && content.last() == Some(&b'\r');

        let mut tokens = Vec::new();
        let mut state = State::Idle;
        let mut number = 0u16;
        let mut seq_start = 0usize;
        let mut n = 0usize;
        while n < content.len() {
            let b = content[n];
            match state {
                State::Idle => {
                    seq_start = n;
                    match b {
                        0x1b => state = State::Esc,
                        0x08 => tokens.push(key(ClientEvent::Backspace)),
                        b'\t' => tokens.push(key(ClientEvent::Tab)),
                        b'\r' => tokens.push(key(ClientEvent::Enter)),
                        IAC => state = State::Iac,
                        0x01..=0x1a => tokens.push(key(ClientEvent::Ctrl(b - 1 + b'A'))),
                        _ if ClientEvent::is_viewable_byte(b) => {
                            tokens.push(key(ClientEvent::Byte(b)));
                        }
                        _ => tokens.push(key(ClientEvent::Unknown)),
                    }
                }
                State::Esc => {
                    state = if b == b'[' { State::Csi } else { State::Idle };
                }
                State::Csi => match b {
                    b'A' => {
                        tokens.push(arrow(ClientEvent::Up, uncommitted));
                        state = State::Idle;
                    }
                    b'B' => {
                        tokens.push(arrow(ClientEvent::Down, uncommitted));
                        state = State::Idle;
                    }
                    b'C' => {
                        tokens.push(key(ClientEvent::Right));
                        state = State::Idle;
                    }
                    b'D' => {
                        tokens.push(key(ClientEvent::Left));
                        state = State::Idle;
                    }
                    b'F' => {
                        tokens.push(key(ClientEvent::End));
                        state = State::Idle;
                    }
                    b'H' => {
                        tokens.push(key(ClientEvent::Home));
                        state = State::Idle;
                    }
                    b'E' | b'G' => {
                        // xterm-specific; nothing in the menu machine wants it
                        debug!(target: "breakwater::input", key = %(b as char), "xterm key");
                        state = State::Idle;
                    }
                    b'0'..=b'9' => {
                        number = (b - b'0') as u16;
                        state = State::Num;
                    }
                    _ => state = State::Idle,
                },
                State::Num => match b {
                    b'0'..=b'9' => {
                        number = number.saturating_mul(10) + (b - b'0') as u16;
                    }
                    b'~' => {
                        tokens.push(vt_token(number, uncommitted));
                        state = State::Idle;
                    }
                    _ => state = State::Idle,
                },
                State::Iac => {
                    if (SUB_BEGIN..IAC).contains(&b) {
                        state = State::IacSub;
                    } else if b == SUB_END || b == NOP {
                        state = State::Idle;
                    } else {
                        break; // command we do not track
                    }
                }
                State::IacSub => {
                    if b == OPT_NAWS {
                        if n + 4 < content.len() {
                            let cols = u16::from_be_bytes([content[n + 1], content[n + 2]]);
                            let rows = u16::from_be_bytes([content[n + 3], content[n + 4]]);
                            tokens.push(InputToken::Resize { cols, rows });
                            n += 4;
                            state = State::Idle;
                        } else {
                            break; // truncated sub-negotiation
                        }
                    } else if b <= 3 {
                        state = State::Idle;
                    } else {
                        break;
                    }
                }
            }
            n += 1;
        }

        if state != State::Idle && self.carry_partial {
            self.pending = content[seq_start..].to_vec();
        }

        tokens
    }
}

fn key(event: ClientEvent) -> InputToken {
    InputToken::Key(DecodedKey {
        event,
        uncommitted: false,
    })
}

fn arrow(event: ClientEvent, uncommitted: bool) -> InputToken {
    InputToken::Key(DecodedKey { event, uncommitted })
}

fn vt_token(number: u16, _uncommitted: bool) -> InputToken {
    let event = match number {
        5 => ClientEvent::PgUp,
        6 => ClientEvent::PgDn,
        1 | 7 => ClientEvent::Home,
        4 | 8 => ClientEvent::End,
        _ => {
            if let Some(name) = VT_KEYS.get((number as usize).wrapping_sub(1)) {
                debug!(target: "breakwater::input", key = name, "vt key");
            }
            return InputToken::VtFunction(number);
        }
    };
    key(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(tokens: &[InputToken]) -> Vec<ClientEvent> {
        tokens
            .iter()
            .filter_map(|t| match t {
                InputToken::Key(k) => Some(k.event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn arrows_and_named_keys() {
        let mut dec = InputDecoder::default();
        assert_eq!(events(&dec.decode(b"\x1b[A")), vec![ClientEvent::Up]);
        assert_eq!(events(&dec.decode(b"\x1b[D")), vec![ClientEvent::Left]);
        assert_eq!(events(&dec.decode(b"\x1b[H")), vec![ClientEvent::Home]);
        assert_eq!(events(&dec.decode(b"\r")), vec![ClientEvent::Enter]);
        assert_eq!(events(&dec.decode(b"\x1b[5~")), vec![ClientEvent::PgUp]);
        assert_eq!(events(&dec.decode(b"\x1b[8~")), vec![ClientEvent::End]);
    }

    #[test]
    fn delete_is_a_vt_function_not_a_client_event() {
        let mut dec = InputDecoder::default();
        let tokens = dec.decode(b"\x1b[3~");
        assert_eq!(tokens, vec![InputToken::VtFunction(3)]);
    }

    #[test]
    fn viewable_and_control_bytes() {
        let mut dec = InputDecoder::default();
        assert_eq!(events(&dec.decode(b"q")), vec![ClientEvent::Byte(b'q')]);
        assert_eq!(events(&dec.decode(&[0x1a])), vec![ClientEvent::Ctrl(b'Z')]);
        assert_eq!(events(&dec.decode(&[0x08])), vec![ClientEvent::Backspace]);
    }

    #[test]
    fn naws_resizes_without_emitting_a_key() {
        let mut dec = InputDecoder::default();
        let tokens = dec.decode(&[IAC, SUB_BEGIN, OPT_NAWS, 0x00, 0x50, 0x00, 0x20, IAC, SUB_END]);
        assert_eq!(tokens, vec![InputToken::Resize { cols: 80, rows: 32 }]);
    }

    #[test]
    fn trailing_cr_marks_arrows_uncommitted() {
        let mut dec = InputDecoder::default();
        let tokens = dec.decode(b"\x1b[B\r");
        assert_eq!(
            tokens,
            vec![
                InputToken::Key(DecodedKey {
                    event: ClientEvent::Down,
                    uncommitted: true
                }),
                InputToken::Key(DecodedKey {
                    event: ClientEvent::Enter,
                    uncommitted: false
                }),
            ]
        );
    }

    #[test]
    fn partial_escape_dropped_by_default() {
        let mut dec = InputDecoder::default();
        assert!(dec.decode(b"\x1b[").is_empty());
        // the next chunk starts fresh; a bare 'A' is a viewable byte
        assert_eq!(events(&dec.decode(b"A")), vec![ClientEvent::Byte(b'A')]);
    }

    #[test]
    fn partial_escape_carried_when_enabled() {
        let mut dec = InputDecoder::new(true);
        assert!(dec.decode(b"\x1b[").is_empty());
        assert_eq!(events(&dec.decode(b"A")), vec![ClientEvent::Up]);
    }

    #[test]
    fn mixed_chunk_keeps_order() {
        let mut dec = InputDecoder::default();
        let tokens = dec.decode(b"ab\x1b[A\r");
        assert_eq!(
            events(&tokens),
            vec![
                ClientEvent::Byte(b'a'),
                ClientEvent::Byte(b'b'),
                ClientEvent::Up,
                ClientEvent::Enter
            ]
        );
    }
}
