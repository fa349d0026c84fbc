// Text string decoding: ToUnicode CMaps first, then UTF-16BE and Latin-1 fallbacks
use super::lopdf_helper::{get, get_name, get_number, get_u32, resolve, resolve_dict, resolve_stream, stream_bytes};
use lopdf::{Dictionary, Document, Object};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

// bfrange entries wider than this are treated as corrupt.
const MAX_RANGE_LEN: u32 = 0x1_0000;
// Glyph width in thousandths of an em when the font does not say.
const DEFAULT_GLYPH_WIDTH: f32 = 500.0;
// `/DW` default for composite fonts.
const DEFAULT_CID_WIDTH: f32 = 1000.0;

/// Code-to-text mapping parsed from a font's `/ToUnicode` stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToUnicodeCMap {
    code_bytes: usize,
    map: BTreeMap<u32, String>,
}

impl ToUnicodeCMap {
    pub fn parse(source: &str) -> Self {
        let mut cmap = ToUnicodeCMap { code_bytes: 1, map: BTreeMap::new() };

        for section in sections(source, "begincodespacerange", "endcodespacerange") {
            for token in tokens(section) {
                if let Token::Hex(hex) = token {
                    cmap.code_bytes = cmap.code_bytes.max((hex.len() + 1) / 2);
                }
            }
        }

        for section in sections(source, "beginbfchar", "endbfchar") {
            let hexes: Vec<String> = tokens(section)
                .into_iter()
                .filter_map(|t| match t {
                    Token::Hex(h) => Some(h),
                    _ => None,
                })
                .collect();
            for pair in hexes.chunks_exact(2) {
                if let Some(code) = hex_code(&pair[0]) {
                    cmap.code_bytes = cmap.code_bytes.max((pair[0].len() + 1) / 2);
                    cmap.map.insert(code, utf16_hex(&pair[1]));
                }
            }
        }

        for section in sections(source, "beginbfrange", "endbfrange") {
            let toks = tokens(section);
            let mut i = 0;
            while i + 2 < toks.len() {
                let (lo, hi) = match (&toks[i], &toks[i + 1]) {
                    (Token::Hex(lo), Token::Hex(hi)) => {
                        cmap.code_bytes = cmap.code_bytes.max((lo.len() + 1) / 2);
                        (hex_code(lo), hex_code(hi))
                    }
                    _ => {
                        i += 1;
                        continue;
                    }
                };
                match &toks[i + 2] {
                    Token::Hex(dst) => {
                        if let (Some(lo), Some(hi)) = (lo, hi) {
                            cmap.insert_range(lo, hi, dst);
                        }
                        i += 3;
                    }
                    Token::ArrayStart => {
                        let mut j = i + 3;
                        let mut offset = 0;
                        while j < toks.len() && toks[j] != Token::ArrayEnd {
                            if let (Token::Hex(dst), Some(lo)) = (&toks[j], lo) {
                                let Some(code) = lo.checked_add(offset) else {
                                    break;
                                };
                                cmap.map.insert(code, utf16_hex(dst));
                                offset += 1;
                            }
                            j += 1;
                        }
                        i = j + 1;
                    }
                    Token::ArrayEnd => i += 3,
                }
            }
        }

        cmap
    }

    fn insert_range(&mut self, lo: u32, hi: u32, dst: &str) {
        if hi < lo || hi - lo > MAX_RANGE_LEN {
            return;
        }
        let mut units = utf16_units(dst);
        if units.is_empty() {
            return;
        }
        for code in lo..=hi {
            self.map.insert(code, String::from_utf16_lossy(&units));
            if let Some(last) = units.last_mut() {
                *last = last.wrapping_add(1);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        let mut text = String::new();
        for chunk in bytes.chunks(self.code_bytes.max(1)) {
            let code = chunk.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
            match self.map.get(&code) {
                Some(mapped) => text.push_str(mapped),
                None if self.code_bytes == 1 => text.push(*chunk.first().unwrap_or(&b'?') as char),
                None => {}
            }
        }
        text
    }
}

/// One shown glyph: its advance in thousandths of an em, and whether word spacing applies.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Glyph {
    pub width: f32,
    pub word_space: bool,
}

// Advance widths per character code, from `/Widths` or a descendant's `/W`.
#[derive(Debug, Clone, PartialEq)]
struct GlyphWidths {
    widths: BTreeMap<u32, f32>,
    default: f32,
}

impl Default for GlyphWidths {
    fn default() -> Self {
        Self { widths: BTreeMap::new(), default: DEFAULT_GLYPH_WIDTH }
    }
}

impl GlyphWidths {
    fn simple(document: &Document, font: &Dictionary) -> Self {
        let mut widths = BTreeMap::new();
        let first = get_u32(document, font, b"FirstChar").unwrap_or(0);
        if let Some(Object::Array(values)) = get(document, font, b"Widths") {
            for (i, value) in values.iter().enumerate() {
                let (Some(code), Some(width)) = (
                    u32::try_from(i).ok().and_then(|i| first.checked_add(i)),
                    get_number(resolve(document, value)),
                ) else {
                    continue;
                };
                widths.insert(code, width);
            }
        }
        let default = get(document, font, b"FontDescriptor")
            .and_then(|d| resolve_dict(document, d))
            .and_then(|d| get(document, d, b"MissingWidth"))
            .and_then(get_number)
            .filter(|w| *w > 0.0)
            .unwrap_or(DEFAULT_GLYPH_WIDTH);
        Self { widths, default }
    }

    fn composite(document: &Document, font: &Dictionary) -> Self {
        let descendant = match get(document, font, b"DescendantFonts") {
            Some(Object::Array(fonts)) => fonts.first().and_then(|f| resolve_dict(document, f)),
            _ => None,
        };
        let Some(descendant) = descendant else {
            return Self { widths: BTreeMap::new(), default: DEFAULT_CID_WIDTH };
        };
        let default = get(document, descendant, b"DW").and_then(get_number).unwrap_or(DEFAULT_CID_WIDTH);
        let mut widths = BTreeMap::new();
        if let Some(Object::Array(entries)) = get(document, descendant, b"W") {
            let entries: Vec<&Object> = entries.iter().map(|e| resolve(document, e)).collect();
            let mut i = 0;
            while i + 1 < entries.len() {
                let Some(first) = get_number(entries[i]).map(|c| c as u32) else {
                    i += 1;
                    continue;
                };
                match entries[i + 1] {
                    // c [w1 w2 ...]
                    Object::Array(run) => {
                        for (offset, width) in run.iter().enumerate() {
                            let code = u32::try_from(offset).ok().and_then(|o| first.checked_add(o));
                            if let (Some(code), Some(width)) = (code, get_number(resolve(document, width))) {
                                widths.insert(code, width);
                            }
                        }
                        i += 2;
                    }
                    // c_first c_last w
                    last => {
                        let last = get_number(last).map(|c| c as u32);
                        let width = entries.get(i + 2).and_then(|w| get_number(w));
                        if let (Some(last), Some(width)) = (last, width) {
                            if last >= first && last - first <= MAX_RANGE_LEN {
                                for code in first..=last {
                                    widths.insert(code, width);
                                }
                            }
                        }
                        i += 3;
                    }
                }
            }
        }
        Self { widths, default }
    }

    fn get(&self, code: u32) -> f32 {
        self.widths.get(&code).copied().unwrap_or(self.default)
    }
}

/// How to turn the bytes of one font's text strings into text and glyph advances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FontDecoder {
    cmap: Option<ToUnicodeCMap>,
    two_byte: bool,
    widths: GlyphWidths,
}

impl FontDecoder {
    pub fn from_font(document: &Document, font: &Dictionary) -> Self {
        let two_byte = get_name(document, font, b"Subtype") == Some(b"Type0".as_slice());
        let cmap = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|object| resolve_stream(document, object))
            .and_then(|stream| stream_bytes(stream).ok())
            .map(|bytes| ToUnicodeCMap::parse(&String::from_utf8_lossy(&bytes)))
            .filter(|cmap| !cmap.is_empty());
        if cmap.is_none() && get(document, font, b"ToUnicode").is_some() {
            log::debug!("[reader] font has an unusable ToUnicode map, falling back");
        }
        let widths = if two_byte {
            GlyphWidths::composite(document, font)
        } else {
            GlyphWidths::simple(document, font)
        };
        Self { cmap, two_byte, widths }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match &self.cmap {
            Some(cmap) => cmap.decode(bytes),
            None if self.two_byte && !has_utf16_bom(bytes) => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            None => decode_fallback(bytes),
        }
    }

    /// The glyphs a string paints, in order.
    pub fn glyphs(&self, bytes: &[u8]) -> Vec<Glyph> {
        if self.cmap.is_none() && has_utf16_bom(bytes) {
            return bytes[2..]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]) as u32)
                .map(|unit| Glyph { width: self.widths.get(unit), word_space: unit == 0x20 })
                .collect();
        }
        let code_bytes = if self.two_byte { 2 } else { 1 };
        bytes
            .chunks(code_bytes)
            .map(|chunk| chunk.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
            .map(|code| Glyph { width: self.widths.get(code), word_space: code_bytes == 1 && code == 0x20 })
            .collect()
    }
}

/// Decode a string without font information: UTF-16BE with a BOM, else Latin-1.
pub fn decode_fallback(bytes: &[u8]) -> String {
    if has_utf16_bom(bytes) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn has_utf16_bom(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Hex(String),
    ArrayStart,
    ArrayEnd,
}

fn token_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"<([0-9A-Fa-f\s]*)>|(\[)|(\])").ok())
        .as_ref()
}

fn tokens(section: &str) -> Vec<Token> {
    let Some(pattern) = token_pattern() else {
        log::warn!("[reader] CMap tokenizer unavailable, ignoring ToUnicode map");
        return Vec::new();
    };
    pattern
        .captures_iter(section)
        .filter_map(|caps| {
            if let Some(hex) = caps.get(1) {
                let cleaned: String = hex.as_str().chars().filter(|c| !c.is_whitespace()).collect();
                Some(Token::Hex(cleaned))
            } else if caps.get(2).is_some() {
                Some(Token::ArrayStart)
            } else if caps.get(3).is_some() {
                Some(Token::ArrayEnd)
            } else {
                None
            }
        })
        .collect()
}

fn sections<'a>(source: &'a str, begin: &str, end: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut rest = source;
    while let Some(start) = rest.find(begin) {
        let after = &rest[start + begin.len()..];
        match after.find(end) {
            Some(stop) => {
                found.push(&after[..stop]);
                rest = &after[stop + end.len()..];
            }
            None => break,
        }
    }
    found
}

fn hex_code(hex: &str) -> Option<u32> {
    if hex.is_empty() || hex.len() > 8 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

fn utf16_units(hex: &str) -> Vec<u16> {
    let bytes: Vec<u8> = hex
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .filter_map(|pair| u8::from_str_radix(pair, 16).ok())
        .collect();
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => *single as u16,
            _ => 0,
        })
        .collect()
}

fn utf16_hex(hex: &str) -> String {
    String::from_utf16_lossy(&utf16_units(hex))
}
