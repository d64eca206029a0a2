//! Symbolic client input: the closed event vocabulary and the byte-stream
//! decoder that produces it.

mod decoder;

pub use decoder::{DecodedKey, InputDecoder, InputToken};

/// A single keystroke as seen by the menu machine. Closed set; anything the
/// decoder cannot classify arrives as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    Unknown,
    /// A viewable ASCII byte, 0x20..=0x7e.
    Byte(u8),
    /// Ctrl+A..Ctrl+Z, stored as the uppercase letter.
    Ctrl(u8),
    Backspace,
    Tab,
    Enter,
    Up,
    Down,
    Right,
    Left,
    PgUp,
    PgDn,
    Home,
    End,
}

impl ClientEvent {
    pub fn is_viewable_byte(byte: u8) -> bool {
        (0x20..=0x7e).contains(&byte)
    }

    /// The raw bytes this event would occupy on the wire toward the server.
    pub fn wire_bytes(self) -> Vec<u8> {
        match self {
            ClientEvent::Byte(b) => vec![b],
            ClientEvent::Ctrl(letter) => vec![letter - b'A' + 1],
            ClientEvent::Backspace => vec![0x08],
            ClientEvent::Tab => vec![b'\t'],
            ClientEvent::Enter => vec![b'\r'],
            ClientEvent::Up => b"\x1b[A".to_vec(),
            ClientEvent::Down => b"\x1b[B".to_vec(),
            ClientEvent::Right => b"\x1b[C".to_vec(),
            ClientEvent::Left => b"\x1b[D".to_vec(),
            ClientEvent::PgUp => b"\x1b[5~".to_vec(),
            ClientEvent::PgDn => b"\x1b[6~".to_vec(),
            ClientEvent::Home => b"\x1b[1~".to_vec(),
            ClientEvent::End => b"\x1b[4~".to_vec(),
            ClientEvent::Unknown => Vec::new(),
        }
    }

    /// Log-friendly name.
    pub fn name(self) -> String {
        match self {
            ClientEvent::Byte(b) => format!("'{}'", b as char),
            ClientEvent::Ctrl(letter) => format!("Ctrl-{}", letter as char),
            other => format!("{other:?}"),
        }
    }
}
