//! Base-encoding auto-sense and the text decoders behind the spooler.
//!
//! The probe only decides the "big family" (unit width and byte order).
//! An `encoding="..."` declaration may then refine the choice inside that
//! family, for example picking a single-byte code page over UTF-8.

use encoding_rs::{CoderResult, DecoderResult, Encoding, UTF_16BE, UTF_16LE, UTF_8};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BaseEncoding {
    Utf8,
    Utf16LE,
    Utf16BE,
    Ucs4LE,
    Ucs4BE,
    Ebcdic,
}

impl BaseEncoding {
    /// Bytes per code unit of the ASCII subset.
    pub fn unit_width(self) -> usize {
        match self {
            BaseEncoding::Utf8 | BaseEncoding::Ebcdic => 1,
            BaseEncoding::Utf16LE | BaseEncoding::Utf16BE => 2,
            BaseEncoding::Ucs4LE | BaseEncoding::Ucs4BE => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BaseEncoding::Utf8 => "UTF-8",
            BaseEncoding::Utf16LE => "UTF-16LE",
            BaseEncoding::Utf16BE => "UTF-16BE",
            BaseEncoding::Ucs4LE => "UCS-4LE",
            BaseEncoding::Ucs4BE => "UCS-4BE",
            BaseEncoding::Ebcdic => "EBCDIC-CP-US",
        }
    }

    /// Decodes one unit of the ASCII subset. Used to read the XML or text
    /// declaration before any decoder exists.
    pub(crate) fn ascii_unit(self, unit: &[u8]) -> Option<char> {
        let cp = match (self, unit) {
            (BaseEncoding::Utf8, [b]) => *b as u32,
            (BaseEncoding::Ebcdic, [b]) => EBCDIC_037[*b as usize] as u32,
            (BaseEncoding::Utf16LE, [lo, 0]) => *lo as u32,
            (BaseEncoding::Utf16BE, [0, lo]) => *lo as u32,
            (BaseEncoding::Ucs4LE, [lo, 0, 0, 0]) => *lo as u32,
            (BaseEncoding::Ucs4BE, [0, 0, 0, lo]) => *lo as u32,
            _ => return None,
        };
        if cp < 0x80 {
            char::from_u32(cp)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Probe {
    pub base: BaseEncoding,
    /// Length of a byte order mark to skip.
    pub bom_len: usize,
}

/// Senses the base encoding from the first bytes of an entity.
pub fn probe(bytes: &[u8]) -> Probe {
    let bom = |base, bom_len| Probe { base, bom_len };
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return bom(BaseEncoding::Utf16BE, 2);
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return bom(BaseEncoding::Utf16LE, 2);
    }
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return bom(BaseEncoding::Utf8, 3);
    }

    // "<?xml " in each family, enough to tell them apart without a BOM.
    const SIGNATURES: &[(&[u8], BaseEncoding)] = &[
        (&[0x00, 0x00, 0x00, 0x3C, 0x00, 0x00], BaseEncoding::Ucs4BE),
        (&[0x00, 0x3C, 0x00, 0x3F, 0x00, 0x78], BaseEncoding::Utf16BE),
        (&[0x3C, 0x00, 0x00, 0x00, 0x3F, 0x00], BaseEncoding::Ucs4LE),
        (&[0x3C, 0x00, 0x3F, 0x00, 0x78, 0x00], BaseEncoding::Utf16LE),
        (&[0x3C, 0x3F, 0x78, 0x6D, 0x6C, 0x20], BaseEncoding::Utf8),
        (&[0x4C, 0x6F, 0xA7, 0x94, 0x93, 0x40], BaseEncoding::Ebcdic),
    ];
    for (signature, base) in SIGNATURES {
        if bytes.starts_with(signature) {
            return bom(*base, 0);
        }
    }
    bom(BaseEncoding::Utf8, 0)
}

/// The family an encoding name belongs to.
#[derive(Clone, Copy, Debug)]
enum NameFamily {
    Utf16(Option<BaseEncoding>),
    Ucs4(Option<BaseEncoding>),
    Ebcdic,
    Other(&'static Encoding),
    Unknown,
}

fn family_of(name: &str) -> NameFamily {
    let upper = name.trim().to_ascii_uppercase();
    match upper.as_str() {
        "UTF-16" | "UTF16" | "ISO-10646-UCS-2" | "UCS-2" | "CSUNICODE" => NameFamily::Utf16(None),
        "UTF-16LE" | "UTF16LE" | "UCS-2LE" => NameFamily::Utf16(Some(BaseEncoding::Utf16LE)),
        "UTF-16BE" | "UTF16BE" | "UCS-2BE" => NameFamily::Utf16(Some(BaseEncoding::Utf16BE)),
        "UCS-4" | "ISO-10646-UCS-4" | "UTF-32" | "UCS4" => NameFamily::Ucs4(None),
        "UCS-4LE" | "UTF-32LE" => NameFamily::Ucs4(Some(BaseEncoding::Ucs4LE)),
        "UCS-4BE" | "UTF-32BE" => NameFamily::Ucs4(Some(BaseEncoding::Ucs4BE)),
        "EBCDIC-CP-US" | "EBCDIC-CP-CA" | "EBCDIC-CP-WT" | "EBCDIC-CP-NL" | "IBM037"
        | "IBM-037" | "CP037" | "CSIBM037" => NameFamily::Ebcdic,
        _ => match Encoding::for_label(upper.as_bytes()) {
            Some(enc) => NameFamily::Other(enc),
            None => NameFamily::Unknown,
        },
    }
}

/// What the spooler should decode with, after reconciling the probe with an
/// encoding name.
#[derive(Debug)]
pub(crate) struct Selection {
    pub base: BaseEncoding,
    pub decoder: TextDecoder,
    pub name: String,
    /// Set when the declared name disagreed with the probe and was overruled.
    pub mismatch: bool,
}

impl Selection {
    fn keep(base: BaseEncoding, mismatch: bool) -> Selection {
        Selection {
            base,
            decoder: TextDecoder::for_base(base),
            name: base.name().to_string(),
            mismatch,
        }
    }
}

/// Reconciles a probed base with an optional declared name.
///
/// An unknown name is an error only where it would have to be honoured,
/// that is inside the 8-bit ASCII-compatible family.
pub(crate) fn select(base: BaseEncoding, declared: Option<&str>) -> Result<Selection, String> {
    let Some(declared) = declared else {
        return Ok(Selection::keep(base, false));
    };
    let family = family_of(declared);
    match base {
        BaseEncoding::Utf8 => match family {
            NameFamily::Other(enc) if enc == UTF_8 => Ok(Selection::keep(base, false)),
            NameFamily::Other(enc) if enc.is_ascii_compatible() => Ok(Selection {
                base,
                decoder: TextDecoder::Standard(enc.new_decoder_without_bom_handling()),
                name: enc.name().to_string(),
                mismatch: false,
            }),
            NameFamily::Unknown => Err(format!("unsupported encoding '{}'", declared)),
            _ => Ok(Selection::keep(base, true)),
        },
        BaseEncoding::Utf16LE | BaseEncoding::Utf16BE => match family {
            NameFamily::Utf16(None) => Ok(Selection::keep(base, false)),
            NameFamily::Utf16(Some(order)) => Ok(Selection::keep(base, order != base)),
            _ => Ok(Selection::keep(base, true)),
        },
        BaseEncoding::Ucs4LE | BaseEncoding::Ucs4BE => match family {
            NameFamily::Ucs4(None) => Ok(Selection::keep(base, false)),
            NameFamily::Ucs4(Some(order)) => Ok(Selection::keep(base, order != base)),
            _ => Ok(Selection::keep(base, true)),
        },
        BaseEncoding::Ebcdic => match family {
            NameFamily::Ebcdic => Ok(Selection::keep(base, false)),
            _ => Ok(Selection::keep(base, true)),
        },
    }
}

/// Picks the decoder for a caller-forced encoding, skipping auto-sense.
///
/// A byte order mark still decides the order of an order-less UTF-16 or
/// UCS-4 name.
pub(crate) fn select_forced(name: &str, sensed: Probe) -> Result<Selection, String> {
    let base = match family_of(name) {
        NameFamily::Utf16(Some(order)) | NameFamily::Ucs4(Some(order)) => order,
        NameFamily::Utf16(None) => match sensed.base {
            BaseEncoding::Utf16LE => BaseEncoding::Utf16LE,
            _ => BaseEncoding::Utf16BE,
        },
        NameFamily::Ucs4(None) => match sensed.base {
            BaseEncoding::Ucs4LE => BaseEncoding::Ucs4LE,
            _ => BaseEncoding::Ucs4BE,
        },
        NameFamily::Ebcdic => BaseEncoding::Ebcdic,
        NameFamily::Other(enc) if enc == UTF_16LE => BaseEncoding::Utf16LE,
        NameFamily::Other(enc) if enc == UTF_16BE => BaseEncoding::Utf16BE,
        NameFamily::Other(enc) => {
            return Ok(Selection {
                base: BaseEncoding::Utf8,
                decoder: TextDecoder::Standard(enc.new_decoder_without_bom_handling()),
                name: enc.name().to_string(),
                mismatch: false,
            })
        }
        NameFamily::Unknown => return Err(format!("unsupported encoding '{}'", name)),
    };
    Ok(Selection::keep(base, false))
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Decoded {
    pub consumed: usize,
    pub replaced: bool,
}

/// Byte offset into the decoded slice where an illegal sequence starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct IllegalSequence(pub usize);

pub(crate) enum TextDecoder {
    Standard(encoding_rs::Decoder),
    Ucs4 { little_endian: bool },
    Ebcdic037,
}

impl std::fmt::Debug for TextDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextDecoder::Standard(d) => write!(f, "Standard({})", d.encoding().name()),
            TextDecoder::Ucs4 { little_endian } => write!(f, "Ucs4(le={})", little_endian),
            TextDecoder::Ebcdic037 => write!(f, "Ebcdic037"),
        }
    }
}

impl TextDecoder {
    pub(crate) fn for_base(base: BaseEncoding) -> TextDecoder {
        match base {
            BaseEncoding::Utf8 => TextDecoder::Standard(UTF_8.new_decoder_without_bom_handling()),
            BaseEncoding::Utf16LE => {
                TextDecoder::Standard(UTF_16LE.new_decoder_without_bom_handling())
            }
            BaseEncoding::Utf16BE => {
                TextDecoder::Standard(UTF_16BE.new_decoder_without_bom_handling())
            }
            BaseEncoding::Ucs4LE => TextDecoder::Ucs4 {
                little_endian: true,
            },
            BaseEncoding::Ucs4BE => TextDecoder::Ucs4 {
                little_endian: false,
            },
            BaseEncoding::Ebcdic => TextDecoder::Ebcdic037,
        }
    }

    /// Decodes as much of `src` as possible into `out`.
    ///
    /// Incomplete trailing units are left unconsumed unless `last` is set.
    /// With `replace` set, illegal sequences become U+FFFD instead of failing.
    pub(crate) fn decode(
        &mut self,
        src: &[u8],
        last: bool,
        replace: bool,
        out: &mut String,
    ) -> Result<Decoded, IllegalSequence> {
        match self {
            TextDecoder::Standard(decoder) => decode_standard(decoder, src, last, replace, out),
            TextDecoder::Ucs4 { little_endian } => {
                let mut decoded = Decoded::default();
                for unit in src.chunks_exact(4) {
                    let bytes = [unit[0], unit[1], unit[2], unit[3]];
                    let cp = if *little_endian {
                        u32::from_le_bytes(bytes)
                    } else {
                        u32::from_be_bytes(bytes)
                    };
                    match char::from_u32(cp) {
                        Some(c) => out.push(c),
                        None if replace => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            decoded.replaced = true;
                        }
                        None => return Err(IllegalSequence(decoded.consumed)),
                    }
                    decoded.consumed += 4;
                }
                let rest = src.len() - decoded.consumed;
                if last && rest > 0 {
                    if !replace {
                        return Err(IllegalSequence(decoded.consumed));
                    }
                    out.push(char::REPLACEMENT_CHARACTER);
                    decoded.replaced = true;
                    decoded.consumed = src.len();
                }
                Ok(decoded)
            }
            TextDecoder::Ebcdic037 => {
                out.extend(src.iter().map(|&b| match b {
                    // NEL is the EBCDIC line terminator.
                    0x15 => '\n',
                    _ => EBCDIC_037[b as usize],
                }));
                Ok(Decoded {
                    consumed: src.len(),
                    replaced: false,
                })
            }
        }
    }
}

fn decode_standard(
    decoder: &mut encoding_rs::Decoder,
    src: &[u8],
    last: bool,
    replace: bool,
    out: &mut String,
) -> Result<Decoded, IllegalSequence> {
    let mut decoded = Decoded::default();
    loop {
        let remaining = &src[decoded.consumed..];
        if replace {
            let needed = decoder
                .max_utf8_buffer_length(remaining.len())
                .unwrap_or(remaining.len() * 3 + 16);
            out.reserve(needed);
            let (result, read, replaced) = decoder.decode_to_string(remaining, out, last);
            decoded.consumed += read;
            decoded.replaced |= replaced;
            if let CoderResult::InputEmpty = result {
                return Ok(decoded);
            }
        } else {
            let needed = decoder
                .max_utf8_buffer_length_without_replacement(remaining.len())
                .unwrap_or(remaining.len() * 3 + 16);
            out.reserve(needed);
            let (result, read) =
                decoder.decode_to_string_without_replacement(remaining, out, last);
            decoded.consumed += read;
            match result {
                DecoderResult::InputEmpty => return Ok(decoded),
                DecoderResult::OutputFull => {}
                DecoderResult::Malformed(bad, extra) => {
                    let at = decoded.consumed.saturating_sub(bad as usize + extra as usize);
                    return Err(IllegalSequence(at));
                }
            }
        }
    }
}

/// IBM code page 037 (EBCDIC US/Canada) to Unicode.
#[rustfmt::skip]
static EBCDIC_037: [char; 256] = [
    '\u{00}', '\u{01}', '\u{02}', '\u{03}', '\u{9C}', '\u{09}', '\u{86}', '\u{7F}',
    '\u{97}', '\u{8D}', '\u{8E}', '\u{0B}', '\u{0C}', '\u{0D}', '\u{0E}', '\u{0F}',
    '\u{10}', '\u{11}', '\u{12}', '\u{13}', '\u{9D}', '\u{85}', '\u{08}', '\u{87}',
    '\u{18}', '\u{19}', '\u{92}', '\u{8F}', '\u{1C}', '\u{1D}', '\u{1E}', '\u{1F}',
    '\u{80}', '\u{81}', '\u{82}', '\u{83}', '\u{84}', '\u{0A}', '\u{17}', '\u{1B}',
    '\u{88}', '\u{89}', '\u{8A}', '\u{8B}', '\u{8C}', '\u{05}', '\u{06}', '\u{07}',
    '\u{90}', '\u{91}', '\u{16}', '\u{93}', '\u{94}', '\u{95}', '\u{96}', '\u{04}',
    '\u{98}', '\u{99}', '\u{9A}', '\u{9B}', '\u{14}', '\u{15}', '\u{9E}', '\u{1A}',
    ' ',      '\u{A0}', '\u{E2}', '\u{E4}', '\u{E0}', '\u{E1}', '\u{E3}', '\u{E5}',
    '\u{E7}', '\u{F1}', '\u{A2}', '.',      '<',      '(',      '+',      '|',
    '&',      '\u{E9}', '\u{EA}', '\u{EB}', '\u{E8}', '\u{ED}', '\u{EE}', '\u{EF}',
    '\u{EC}', '\u{DF}', '!',      '$',      '*',      ')',      ';',      '\u{AC}',
    '-',      '/',      '\u{C2}', '\u{C4}', '\u{C0}', '\u{C1}', '\u{C3}', '\u{C5}',
    '\u{C7}', '\u{D1}', '\u{A6}', ',',      '%',      '_',      '>',      '?',
    '\u{F8}', '\u{C9}', '\u{CA}', '\u{CB}', '\u{C8}', '\u{CD}', '\u{CE}', '\u{CF}',
    '\u{CC}', '`',      ':',      '#',      '@',      '\'',     '=',      '"',
    '\u{D8}', 'a',      'b',      'c',      'd',      'e',      'f',      'g',
    'h',      'i',      '\u{AB}', '\u{BB}', '\u{F0}', '\u{FD}', '\u{FE}', '\u{B1}',
    '\u{B0}', 'j',      'k',      'l',      'm',      'n',      'o',      'p',
    'q',      'r',      '\u{AA}', '\u{BA}', '\u{E6}', '\u{B8}', '\u{C6}', '\u{A4}',
    '\u{B5}', '~',      's',      't',      'u',      'v',      'w',      'x',
    'y',      'z',      '\u{A1}', '\u{BF}', '\u{D0}', '\u{DD}', '\u{DE}', '\u{AE}',
    '^',      '\u{A3}', '\u{A5}', '\u{B7}', '\u{A9}', '\u{A7}', '\u{B6}', '\u{BC}',
    '\u{BD}', '\u{BE}', '[',      ']',      '\u{AF}', '\u{A8}', '\u{B4}', '\u{D7}',
    '{',      'A',      'B',      'C',      'D',      'E',      'F',      'G',
    'H',      'I',      '\u{AD}', '\u{F4}', '\u{F6}', '\u{F2}', '\u{F3}', '\u{F5}',
    '}',      'J',      'K',      'L',      'M',      'N',      'O',      'P',
    'Q',      'R',      '\u{B9}', '\u{FB}', '\u{FC}', '\u{F9}', '\u{FA}', '\u{FF}',
    '\\',     '\u{F7}', 'S',      'T',      'U',      'V',      'W',      'X',
    'Y',      'Z',      '\u{B2}', '\u{D4}', '\u{D6}', '\u{D2}', '\u{D3}', '\u{D5}',
    '0',      '1',      '2',      '3',      '4',      '5',      '6',      '7',
    '8',      '9',      '\u{B3}', '\u{DB}', '\u{DC}', '\u{D9}', '\u{DA}', '\u{9F}',
];
