//! ToUnicode CMap parsing.

use std::collections::HashMap;

/// Character code to Unicode mapping read from a `/ToUnicode` stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToUnicodeMap {
    map: HashMap<u32, String>,
    /// Byte width of source codes, taken from the first mapping seen.
    code_width: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Hex(Vec<u8>),
    Word(String),
    ArrayStart,
    ArrayEnd,
}

impl ToUnicodeMap {
    /// Parse `bfchar` and `bfrange` sections of a CMap program.
    pub fn parse(data: &[u8]) -> Self {
        let tokens = tokenize(data);
        let mut cmap = ToUnicodeMap::default();
        let mut i = 0;

        while i < tokens.len() {
            match &tokens[i] {
                Token::Word(w) if w == "beginbfchar" => {
                    i += 1;
                    while i + 1 < tokens.len() {
                        match (&tokens[i], &tokens[i + 1]) {
                            (Token::Hex(src), Token::Hex(dst)) => {
                                cmap.insert(src, decode_utf16be(dst));
                                i += 2;
                            }
                            _ => break,
                        }
                    }
                }
                Token::Word(w) if w == "beginbfrange" => {
                    i += 1;
                    i = cmap.parse_ranges(&tokens, i);
                }
                _ => i += 1,
            }
        }
        cmap
    }

    fn parse_ranges(&mut self, tokens: &[Token], mut i: usize) -> usize {
        while i + 2 < tokens.len() {
            let (Token::Hex(lo), Token::Hex(hi)) = (&tokens[i], &tokens[i + 1]) else {
                break;
            };
            let (lo_code, hi_code) = (code_of(lo), code_of(hi));
            if hi_code < lo_code || hi_code - lo_code > 0xFFFF {
                return i + 3;
            }

            match &tokens[i + 2] {
                Token::Hex(dst) => {
                    // Increment the last UTF-16 unit of the destination.
                    let mut units = utf16_units(dst);
                    for code in lo_code..=hi_code {
                        self.insert_code(code, lo.len(), String::from_utf16_lossy(&units));
                        if let Some(last) = units.last_mut() {
                            *last = last.wrapping_add(1);
                        }
                    }
                    i += 3;
                }
                Token::ArrayStart => {
                    let mut j = i + 3;
                    let mut next = Some(lo_code);
                    while let Some(Token::Hex(dst)) = tokens.get(j) {
                        if let Some(code) = next.filter(|&code| code <= hi_code) {
                            self.insert_code(code, lo.len(), decode_utf16be(dst));
                        }
                        next = next.and_then(|code| code.checked_add(1));
                        j += 1;
                    }
                    // Skip the closing bracket.
                    i = if matches!(tokens.get(j), Some(Token::ArrayEnd)) {
                        j + 1
                    } else {
                        j
                    };
                }
                _ => break,
            }
        }
        i
    }

    fn insert(&mut self, src: &[u8], text: String) {
        self.insert_code(code_of(src), src.len(), text);
    }

    fn insert_code(&mut self, code: u32, width: usize, text: String) {
        self.code_width.get_or_insert(width.clamp(1, 4));
        self.map.insert(code, text);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Byte width of character codes, when known.
    pub fn code_width(&self) -> Option<usize> {
        self.code_width
    }

    /// Look up a single character code.
    pub fn get(&self, code: u32) -> Option<&str> {
        self.map.get(&code).map(String::as_str)
    }
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => *single as u16,
            _ => 0,
        })
        .collect()
}

/// Decode UTF-16BE, replacing unpaired surrogates.
pub fn decode_utf16be(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&utf16_units(bytes))
}

fn tokenize(data: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
            }
            b'<' if data.get(i + 1) == Some(&b'<') => i += 2,
            b'>' if data.get(i + 1) == Some(&b'>') => i += 2,
            b'<' => {
                let start = i + 1;
                let end = data[start..]
                    .iter()
                    .position(|&b| b == b'>')
                    .map_or(data.len(), |p| start + p);
                tokens.push(Token::Hex(parse_hex(&data[start..end])));
                i = end + 1;
            }
            b'[' => {
                tokens.push(Token::ArrayStart);
                i += 1;
            }
            b']' => {
                tokens.push(Token::ArrayEnd);
                i += 1;
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                while i < data.len() && !is_delimiter(data[i]) {
                    i += 1;
                }
                if i == start {
                    i += 1;
                    continue;
                }
                tokens.push(Token::Word(
                    String::from_utf8_lossy(&data[start..i]).into_owned(),
                ));
            }
        }
    }
    tokens
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'<' | b'>' | b'[' | b']' | b'%' | b'(' | b')' | b'/')
}

fn parse_hex(digits: &[u8]) -> Vec<u8> {
    let nibbles: Vec<u8> = digits
        .iter()
        .filter_map(|&c| (c as char).to_digit(16).map(|d| d as u8))
        .collect();
    nibbles
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => hi << 4 | lo,
            [hi] => hi << 4,
            _ => 0,
        })
        .collect()
}
