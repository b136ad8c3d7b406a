//! Per-character classification used on every hot path of the parser.
//!
//! The BMP is tabulated once per process into a flag byte per code unit.
//! Characters above the BMP are answered by range checks since the XML
//! productions treat those planes uniformly.

use std::ops::BitOr;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CharFlags(u8);

impl CharFlags {
    pub const NONE: CharFlags = CharFlags(0);
    /// [2] Char
    pub const XML_CHAR: CharFlags = CharFlags(0x01);
    /// [3] S
    pub const WHITESPACE: CharFlags = CharFlags(0x02);
    /// [4] NameStartChar
    pub const BASE_NAME: CharFlags = CharFlags(0x04);
    /// [4a] NameChar
    pub const NAME: CharFlags = CharFlags(0x08);
    pub const LETTER: CharFlags = CharFlags(0x10);
    /// Can follow `<` to open a start tag.
    pub const START_TAG: CharFlags = CharFlags(0x20);
    /// Delimiters the markup scanners test for.
    pub const MARKUP_TEST: CharFlags = CharFlags(0x40);
    /// Ends a plain run of character data.
    pub const SPECIAL_CHAR_DATA: CharFlags = CharFlags(0x80);

    pub fn contains(self, other: CharFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for CharFlags {
    type Output = CharFlags;
    fn bitor(self, rhs: CharFlags) -> CharFlags {
        CharFlags(self.0 | rhs.0)
    }
}

const NAME_START_RANGES: &[(u32, u32)] = &[
    (0x3A, 0x3A),
    (0x41, 0x5A),
    (0x5F, 0x5F),
    (0x61, 0x7A),
    (0xC0, 0xD6),
    (0xD8, 0xF6),
    (0xF8, 0x2FF),
    (0x370, 0x37D),
    (0x37F, 0x1FFF),
    (0x200C, 0x200D),
    (0x2070, 0x218F),
    (0x2C00, 0x2FEF),
    (0x3001, 0xD7FF),
    (0xF900, 0xFDCF),
    (0xFDF0, 0xFFFD),
];

const NAME_EXTRA_RANGES: &[(u32, u32)] = &[
    (0x2D, 0x2E),
    (0x30, 0x39),
    (0xB7, 0xB7),
    (0x300, 0x36F),
    (0x203F, 0x2040),
];

const MARKUP_CHARS: &[char] = &['<', '>', '&', '%', '\'', '"', '=', '/', '?', '!', '[', ']'];
const SPECIAL_CHAR_DATA_CHARS: &[char] = &['<', '&', ']', '\r'];

static CHAR_TABLE: OnceLock<Box<[u8]>> = OnceLock::new();

fn build_table() -> Box<[u8]> {
    let mut table = vec![0u8; 0x10000];

    table[0x09] |= CharFlags::XML_CHAR.0;
    table[0x0A] |= CharFlags::XML_CHAR.0;
    table[0x0D] |= CharFlags::XML_CHAR.0;
    for c in 0x20..=0xD7FF {
        table[c] |= CharFlags::XML_CHAR.0;
    }
    for c in 0xE000..=0xFFFD {
        table[c] |= CharFlags::XML_CHAR.0;
    }

    for c in [0x20, 0x09, 0x0D, 0x0A] {
        table[c] |= CharFlags::WHITESPACE.0;
    }

    for &(low, high) in NAME_START_RANGES {
        for c in low..=high {
            let flags = CharFlags::BASE_NAME | CharFlags::NAME | CharFlags::START_TAG;
            table[c as usize] |= flags.0;
            if c != 0x3A && c != 0x5F {
                table[c as usize] |= CharFlags::LETTER.0;
            }
        }
    }
    for &(low, high) in NAME_EXTRA_RANGES {
        for c in low..=high {
            table[c as usize] |= CharFlags::NAME.0;
        }
    }

    for &c in MARKUP_CHARS {
        table[c as usize] |= CharFlags::MARKUP_TEST.0;
    }
    for &c in SPECIAL_CHAR_DATA_CHARS {
        table[c as usize] |= CharFlags::SPECIAL_CHAR_DATA.0;
    }

    log::trace!("character classification table built");
    table.into_boxed_slice()
}

#[inline]
fn table() -> &'static [u8] {
    CHAR_TABLE.get_or_init(build_table)
}

/// Flags for one character.
#[inline]
pub fn classify(c: char) -> CharFlags {
    let cp = c as u32;
    if cp < 0x10000 {
        return CharFlags(table()[cp as usize]);
    }
    // Supplementary planes are all legal chars; names stop at #xEFFFF.
    if cp <= 0xEFFFF {
        CharFlags::XML_CHAR
            | CharFlags::BASE_NAME
            | CharFlags::NAME
            | CharFlags::START_TAG
            | CharFlags::LETTER
    } else {
        CharFlags::XML_CHAR
    }
}

#[inline]
pub fn is_xml_char(c: char) -> bool {
    classify(c).contains(CharFlags::XML_CHAR)
}

#[inline]
pub fn is_whitespace(c: char) -> bool {
    classify(c).contains(CharFlags::WHITESPACE)
}

#[inline]
pub fn is_name_start_char(c: char) -> bool {
    classify(c).contains(CharFlags::BASE_NAME)
}

#[inline]
pub fn is_name_char(c: char) -> bool {
    classify(c).contains(CharFlags::NAME)
}

/// True for a character that can follow `<` to open an element.
#[inline]
pub fn is_start_tag_char(c: char) -> bool {
    classify(c).contains(CharFlags::START_TAG)
}

/// `NameStartChar` minus `:` and `_`. An `NCName` starts with a letter or `_`.
#[inline]
pub fn is_letter(c: char) -> bool {
    classify(c).contains(CharFlags::LETTER)
}

// [13] PubidChar ::= #x20 | #xD | #xA | [a-zA-Z0-9] | [-'()+,./:=?;!*#@$_%]
pub fn is_pubid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || " \r\n-'()+,./:=?;!*#@$_%".contains(c)
}

pub fn is_all_whitespace(text: &str) -> bool {
    text.chars().all(is_whitespace)
}

/// A `Name` per production [5].
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_name_start_char(first) => chars.all(is_name_char),
        _ => false,
    }
}

/// A `Nmtoken` per production [7].
pub fn is_valid_nmtoken(token: &str) -> bool {
    !token.is_empty() && token.chars().all(is_name_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Written straight from the productions, independent of the table.
    fn prod_char(cp: u32) -> bool {
        cp == 0x9
            || cp == 0xA
            || cp == 0xD
            || (0x20..=0xD7FF).contains(&cp)
            || (0xE000..=0xFFFD).contains(&cp)
            || (0x10000..=0x10FFFF).contains(&cp)
    }

    fn prod_s(cp: u32) -> bool {
        matches!(cp, 0x20 | 0x9 | 0xD | 0xA)
    }

    fn prod_name_start(cp: u32) -> bool {
        cp == ':' as u32
            || ('A' as u32..='Z' as u32).contains(&cp)
            || cp == '_' as u32
            || ('a' as u32..='z' as u32).contains(&cp)
            || (0xC0..=0xD6).contains(&cp)
            || (0xD8..=0xF6).contains(&cp)
            || (0xF8..=0x2FF).contains(&cp)
            || (0x370..=0x37D).contains(&cp)
            || (0x37F..=0x1FFF).contains(&cp)
            || (0x200C..=0x200D).contains(&cp)
            || (0x2070..=0x218F).contains(&cp)
            || (0x2C00..=0x2FEF).contains(&cp)
            || (0x3001..=0xD7FF).contains(&cp)
            || (0xF900..=0xFDCF).contains(&cp)
            || (0xFDF0..=0xFFFD).contains(&cp)
            || (0x10000..=0xEFFFF).contains(&cp)
    }

    // Listed separately from prod_name_start so the two can disagree.
    fn prod_letter(cp: u32) -> bool {
        (0x41..=0x5A).contains(&cp)
            || (0x61..=0x7A).contains(&cp)
            || (0xC0..=0xD6).contains(&cp)
            || (0xD8..=0xF6).contains(&cp)
            || (0xF8..=0x2FF).contains(&cp)
            || (0x370..=0x37D).contains(&cp)
            || (0x37F..=0x1FFF).contains(&cp)
            || (0x200C..=0x200D).contains(&cp)
            || (0x2070..=0x218F).contains(&cp)
            || (0x2C00..=0x2FEF).contains(&cp)
            || (0x3001..=0xD7FF).contains(&cp)
            || (0xF900..=0xFDCF).contains(&cp)
            || (0xFDF0..=0xFFFD).contains(&cp)
            || (0x10000..=0xEFFFF).contains(&cp)
    }

    fn prod_name_char(cp: u32) -> bool {
        prod_name_start(cp)
            || cp == '-' as u32
            || cp == '.' as u32
            || ('0' as u32..='9' as u32).contains(&cp)
            || cp == 0xB7
            || (0x300..=0x36F).contains(&cp)
            || (0x203F..=0x2040).contains(&cp)
    }

    #[test]
    fn table_matches_productions_for_every_code_point() {
        for cp in 0..=0x10FFFFu32 {
            let Some(c) = char::from_u32(cp) else {
                continue;
            };
            assert_eq!(is_xml_char(c), prod_char(cp), "Char at {:#X}", cp);
            assert_eq!(is_whitespace(c), prod_s(cp), "S at {:#X}", cp);
            assert_eq!(
                is_name_start_char(c),
                prod_name_start(cp),
                "NameStartChar at {:#X}",
                cp
            );
            assert_eq!(is_name_char(c), prod_name_char(cp), "NameChar at {:#X}", cp);
            assert_eq!(is_letter(c), prod_letter(cp), "Letter at {:#X}", cp);
            assert_eq!(is_start_tag_char(c), prod_name_start(cp), "start tag at {:#X}", cp);
        }
    }

    #[test]
    fn letters_are_name_starts_without_colon_and_underscore() {
        let mut only_name_start = Vec::new();
        for cp in 0..=0x10FFFFu32 {
            if prod_name_start(cp) && !prod_letter(cp) {
                only_name_start.push(cp);
            }
            if prod_letter(cp) {
                assert!(prod_name_start(cp), "letter outside NameStartChar at {:#X}", cp);
            }
        }
        assert_eq!(only_name_start, [':' as u32, '_' as u32]);

        for c in ['é', 'Ω', 'ж', '中', 'A', 'z', '\u{10400}'] {
            assert!(is_letter(c), "{:?}", c);
        }
        for c in ['0', '9', '-', '.', '\u{B7}', '\u{301}', '\u{203F}', ':', '_', ' ', '\u{D7}'] {
            assert!(!is_letter(c), "{:?}", c);
        }
    }

    #[test]
    fn start_tag_flag_follows_name_start() {
        assert!(classify('a').contains(CharFlags::START_TAG));
        assert!(classify(':').contains(CharFlags::START_TAG));
        assert!(!classify('/').contains(CharFlags::START_TAG));
        assert!(!classify('!').contains(CharFlags::START_TAG));
        assert!(!classify('1').contains(CharFlags::START_TAG));
    }

    #[test]
    fn special_char_data() {
        for c in ['<', '&', ']', '\r'] {
            assert!(classify(c).contains(CharFlags::SPECIAL_CHAR_DATA));
        }
        assert!(!classify('a').contains(CharFlags::SPECIAL_CHAR_DATA));
        assert!(!classify('>').contains(CharFlags::SPECIAL_CHAR_DATA));
        assert!(classify('>').contains(CharFlags::MARKUP_TEST));
        assert!(!classify('a').contains(CharFlags::MARKUP_TEST));
    }

    #[test]
    fn names_and_tokens() {
        assert!(is_valid_name("a:b-c.d"));
        assert!(is_valid_name("_x"));
        assert!(!is_valid_name("1abc"));
        assert!(!is_valid_name(""));
        assert!(is_valid_nmtoken("1abc"));
        assert!(!is_valid_nmtoken("a b"));
        assert!(is_pubid_char('\''));
        assert!(!is_pubid_char('"'));
    }

    #[test]
    fn table_is_shared_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| is_name_char('\u{3001}')))
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}
