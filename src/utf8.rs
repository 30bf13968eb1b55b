//! Incremental UTF-8 validation for text payloads.
//!
//! Text messages may be fragmented at arbitrary byte boundaries, including
//! in the middle of a multi-byte code point, so validity has to be tracked
//! across `validate` calls. This is the classic table-driven automaton: each
//! byte is mapped to a character class, and the (state, class) pair indexes
//! the transition table. The reject state is sticky until `reset`.
//!
//! Overlong encodings, the surrogate range U+D800..U+DFFF and code points
//! above U+10FFFF never reach the accept state.

const UTF8_ACCEPT: u8 = 0;
const UTF8_REJECT: u8 = 12;

#[rustfmt::skip]
const UTF8_CLASS: [u8; 256] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x00..0x0f
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x10..0x1f
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x20..0x2f
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x30..0x3f
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x40..0x4f
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x50..0x5f
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x60..0x6f
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x70..0x7f
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 0x80..0x8f
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, // 0x90..0x9f
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, // 0xa0..0xaf
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, // 0xb0..0xbf
    8, 8, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, // 0xc0..0xcf
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, // 0xd0..0xdf
   10, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 4, 3, 3, // 0xe0..0xef
   11, 6, 6, 6, 5, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, // 0xf0..0xff
];

// One row of 12 classes per state; states are premultiplied by 12 so the
// lookup is a single addition.
#[rustfmt::skip]
const UTF8_TRANSITIONS: [u8; 108] = [
     0, 12, 24, 36, 60, 96, 84, 12, 12, 12, 48, 72, // accept
    12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, // reject
    12,  0, 12, 12, 12, 12, 12,  0, 12,  0, 12, 12, // one continuation left
    12, 24, 12, 12, 12, 12, 12, 24, 12, 24, 12, 12, // two continuations left
    12, 12, 12, 12, 12, 12, 12, 24, 12, 12, 12, 12, // after E0 (no overlongs)
    12, 24, 12, 12, 12, 12, 12, 12, 12, 24, 12, 12, // after ED (no surrogates)
    12, 12, 12, 12, 12, 12, 12, 36, 12, 36, 12, 12, // after F0 (no overlongs)
    12, 36, 12, 12, 12, 12, 12, 36, 12, 36, 12, 12, // after F1..F3
    12, 36, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, // after F4 (<= U+10FFFF)
];

pub struct Utf8Validator {
    state: u8,
}

impl Default for Utf8Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Utf8Validator {
    pub fn new() -> Self {
        Self { state: UTF8_ACCEPT }
    }

    /// Runs `data` through the automaton, returning whether the sequence so
    /// far is still valid and whether the last byte landed on a code-point
    /// boundary. The second flag is what tells a fragment that merely ends
    /// mid-code-point apart from a message that ends truncated.
    pub fn validate(&mut self, data: &[u8]) -> (bool, bool) {
        for &byte in data {
            if self.state == UTF8_REJECT {
                break;
            }
            let class = UTF8_CLASS[byte as usize];
            self.state = UTF8_TRANSITIONS[(self.state + class) as usize];
        }
        (self.state != UTF8_REJECT, self.state == UTF8_ACCEPT)
    }

    /// Back to the initial state, called whenever a message completes.
    pub fn reset(&mut self) {
        self.state = UTF8_ACCEPT;
    }
}
