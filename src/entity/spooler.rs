use std::{
    io::{self, Read},
    sync::atomic::{AtomicU32, Ordering},
};

use super::{
    encoding::{self, BaseEncoding, IllegalSequence, TextDecoder},
    source::EntitySourceRef,
};
use crate::error::{Error, ErrorCode, XmlResult};

/// Bytes pulled from the underlying stream per read.
pub const RAW_CHUNK_SIZE: usize = 32 * 1024;
/// Upper bound of raw bytes decoded per refill of the character buffer.
pub const CHAR_CHUNK_SIZE: usize = 4096;

static NEXT_SPOOLER_ID: AtomicU32 = AtomicU32::new(1);

fn next_spooler_id() -> u32 {
    NEXT_SPOOLER_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Debug, Default)]
pub(crate) struct SpoolerOptions {
    pub forced_encoding: Option<String>,
    pub ignore_bad_chars: bool,
    pub is_parameter: bool,
    /// Surround the replacement text with one space on each side.
    pub pad: bool,
}

/// Something the spooler noticed that the parser should report as a warning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct SpoolerNote {
    pub code: ErrorCode,
    pub message: String,
    pub line: u32,
    pub column: u32,
}

struct StreamInput {
    reader: Box<dyn Read>,
    raw: Vec<u8>,
    raw_pos: usize,
    eof: bool,
    finished: bool,
    decoder: Option<TextDecoder>,
    declared: Option<String>,
    forced: bool,
}

impl StreamInput {
    fn read_chunk(&mut self) -> io::Result<()> {
        if self.raw_pos > 0 {
            self.raw.drain(..self.raw_pos);
            self.raw_pos = 0;
        }
        let start = self.raw.len();
        self.raw.resize(start + RAW_CHUNK_SIZE, 0);
        let read = loop {
            match self.reader.read(&mut self.raw[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.raw.truncate(start);
                    return Err(e);
                }
            }
        };
        self.raw.truncate(start + read);
        if read == 0 {
            self.eof = true;
        }
        Ok(())
    }

    /// Reads until at least `want` bytes are buffered or the stream ends.
    fn fill_to(&mut self, want: usize) -> io::Result<()> {
        while self.raw.len() - self.raw_pos < want && !self.eof {
            self.read_chunk()?;
        }
        Ok(())
    }
}

enum Input {
    Stream(Box<StreamInput>),
    /// Replacement text of an internal entity, already fully in `chars`.
    Text,
}

/// Turns one entity's bytes into a pull stream of decoded characters.
pub(crate) struct Spooler {
    id: u32,
    system_id: String,
    input: Input,
    base: BaseEncoding,
    encoding_name: String,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    pending_cr: bool,
    trailing_space: bool,
    is_parameter: bool,
    ignore_bad_chars: bool,
    notes: Vec<SpoolerNote>,
}

impl Spooler {
    /// Opens an external entity, senses its encoding and pre-decodes an
    /// XML or text declaration if one is present.
    pub(crate) fn open(source: &EntitySourceRef, options: SpoolerOptions) -> XmlResult<Spooler> {
        log::debug!(
            "opening '{}' (public id {:?})",
            source.system_id(),
            source.public_id()
        );
        let reader = source.open()?;
        let mut stream = Box::new(StreamInput {
            reader,
            raw: Vec::with_capacity(RAW_CHUNK_SIZE),
            raw_pos: 0,
            eof: false,
            finished: false,
            decoder: None,
            declared: None,
            forced: false,
        });
        stream.fill_to(512)?;

        let sensed = encoding::probe(&stream.raw);
        let forced = options
            .forced_encoding
            .clone()
            .or_else(|| source.forced_encoding().map(str::to_string));

        let mut spooler = Spooler::empty(source.system_id().to_string(), &options);

        match forced {
            Some(name) => {
                let selection =
                    encoding::select_forced(&name, sensed).map_err(Error::UnsupportedEncoding)?;
                if sensed.bom_len > 0 && sensed.base == selection.base {
                    stream.raw_pos = sensed.bom_len;
                }
                spooler.base = selection.base;
                spooler.encoding_name = selection.name;
                stream.decoder = Some(selection.decoder);
                stream.forced = true;
                log::debug!(
                    "entity '{}' forced to {}",
                    spooler.system_id,
                    spooler.encoding_name
                );
            }
            None => {
                stream.raw_pos = sensed.bom_len;
                spooler.base = sensed.base;
                spooler.encoding_name = sensed.base.name().to_string();
                log::debug!(
                    "entity '{}' sensed as {}",
                    spooler.system_id,
                    spooler.encoding_name
                );
            }
        }

        if !stream.forced {
            spooler.predecode_decl(&mut stream);
        }
        spooler.input = Input::Stream(stream);
        Ok(spooler)
    }

    /// Builds a spooler over the replacement text of an internal entity.
    pub(crate) fn from_text(system_id: String, text: &str, options: SpoolerOptions) -> Spooler {
        let mut spooler = Spooler::empty(system_id, &options);
        spooler.chars.extend(text.chars());
        spooler
    }

    fn empty(system_id: String, options: &SpoolerOptions) -> Spooler {
        let mut chars = Vec::with_capacity(CHAR_CHUNK_SIZE);
        if options.pad {
            chars.push(' ');
        }
        Spooler {
            id: next_spooler_id(),
            system_id,
            input: Input::Text,
            base: BaseEncoding::Utf8,
            encoding_name: BaseEncoding::Utf8.name().to_string(),
            chars,
            pos: 0,
            line: 1,
            column: 1,
            pending_cr: false,
            trailing_space: options.pad,
            is_parameter: options.is_parameter,
            ignore_bad_chars: options.ignore_bad_chars,
            notes: Vec::new(),
        }
    }

    /// Copies a leading `<?xml ...>` into the char buffer unit by unit, so the
    /// declaration can be parsed before a decoder is chosen.
    fn predecode_decl(&mut self, stream: &mut StreamInput) {
        let width = self.base.unit_width();
        let available = &stream.raw[stream.raw_pos..];
        let opens_decl = available
            .chunks_exact(width)
            .take(5)
            .map(|unit| self.base.ascii_unit(unit))
            .eq("<?xml".chars().map(Some));
        if !opens_decl {
            return;
        }
        let mut consumed = 0;
        for unit in available.chunks_exact(width) {
            let Some(c) = self.base.ascii_unit(unit) else {
                break;
            };
            consumed += width;
            self.push_normalized(c);
            if c == '>' {
                break;
            }
        }
        stream.raw_pos += consumed;
    }

    /// Surrounds the unread text with one space on each side. Used for
    /// external parameter entities once their text declaration is read.
    pub(crate) fn add_padding(&mut self) {
        self.chars.insert(self.pos, ' ');
        self.trailing_space = true;
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn system_id(&self) -> &str {
        &self.system_id
    }

    pub(crate) fn line(&self) -> u32 {
        self.line
    }

    pub(crate) fn column(&self) -> u32 {
        self.column
    }

    pub(crate) fn is_parameter(&self) -> bool {
        self.is_parameter
    }

    pub(crate) fn is_external(&self) -> bool {
        matches!(self.input, Input::Stream(_))
    }

    pub(crate) fn take_notes(&mut self) -> Vec<SpoolerNote> {
        std::mem::take(&mut self.notes)
    }

    fn note(&mut self, code: ErrorCode, message: String) {
        self.notes.push(SpoolerNote {
            code,
            message,
            line: self.line,
            column: self.column,
        });
    }

    /// Applies the `encoding` pseudo-attribute of an XML or text declaration.
    ///
    /// A name that disagrees with the sensed family is noted as a warning and
    /// the sensed encoding stays in effect.
    pub(crate) fn set_decl_encoding(&mut self, name: &str) -> XmlResult<()> {
        let Input::Stream(stream) = &mut self.input else {
            return Ok(());
        };
        if stream.forced {
            return Ok(());
        }
        stream.declared = Some(name.to_string());
        if stream.decoder.is_some() {
            log::debug!(
                "declared encoding '{}' arrived after decoding started in '{}'",
                name,
                self.system_id
            );
            return Ok(());
        }
        let selection =
            encoding::select(self.base, Some(name)).map_err(Error::UnsupportedEncoding)?;
        stream.decoder = Some(selection.decoder);
        let mismatch = selection.mismatch;
        self.encoding_name = selection.name;
        if mismatch {
            let message = format!(
                "declared encoding '{}' conflicts with the sensed {}, using {}",
                name,
                self.base.name(),
                self.encoding_name
            );
            log::warn!("{}: {}", self.system_id, message);
            self.note(ErrorCode::EncodingMismatch, message);
        }
        Ok(())
    }

    fn push_normalized(&mut self, c: char) {
        if self.pending_cr {
            self.pending_cr = false;
            if c == '\n' {
                return;
            }
        }
        if c == '\r' {
            self.pending_cr = true;
            self.chars.push('\n');
        } else {
            self.chars.push(c);
        }
    }

    /// Appends the next decoded chunk. Returns false once the entity has no
    /// more characters.
    fn refill(&mut self) -> XmlResult<bool> {
        if self.pos > 0 {
            self.chars.drain(..self.pos);
            self.pos = 0;
        }
        loop {
            let Input::Stream(stream) = &mut self.input else {
                return Ok(false);
            };
            if stream.finished {
                return Ok(false);
            }
            if stream.raw_pos >= stream.raw.len() && !stream.eof {
                stream.read_chunk()?;
            }

            let mut mismatch = None;
            if stream.decoder.is_none() {
                let selection = encoding::select(self.base, stream.declared.as_deref())
                    .map_err(Error::UnsupportedEncoding)?;
                if selection.mismatch {
                    mismatch = stream.declared.clone();
                }
                self.encoding_name = selection.name;
                stream.decoder = Some(selection.decoder);
            }
            let Some(decoder) = stream.decoder.as_mut() else {
                return Ok(false);
            };

            let pending = &stream.raw[stream.raw_pos..];
            let take = pending.len().min(CHAR_CHUNK_SIZE);
            let last = stream.eof && take == pending.len();
            let mut text = String::with_capacity(take);
            let decoded = decoder
                .decode(&pending[..take], last, self.ignore_bad_chars, &mut text)
                .map_err(|IllegalSequence(at)| Error::Encoding {
                    encoding: self.encoding_name.clone(),
                    message: format!(
                        "illegal byte sequence at byte {}",
                        stream.raw_pos + at
                    ),
                })?;
            stream.raw_pos += decoded.consumed;
            if last && stream.raw_pos >= stream.raw.len() {
                stream.finished = true;
            }
            let stalled = decoded.consumed == 0 && !stream.eof;
            if stalled {
                stream.read_chunk()?;
            }

            if let Some(declared) = mismatch {
                let message = format!(
                    "declared encoding '{}' conflicts with the sensed {}",
                    declared,
                    self.base.name()
                );
                self.note(ErrorCode::EncodingMismatch, message);
            }
            if decoded.replaced {
                self.note(
                    ErrorCode::IllegalByteSequence,
                    format!("illegal bytes in {} replaced", self.encoding_name),
                );
            }
            if !text.is_empty() {
                for c in text.chars() {
                    self.push_normalized(c);
                }
                return Ok(true);
            }
        }
    }

    /// True if `chars[pos + n]` is available after refilling.
    fn ensure(&mut self, n: usize) -> XmlResult<bool> {
        while self.pos + n >= self.chars.len() {
            if !self.refill()? {
                if self.trailing_space {
                    self.trailing_space = false;
                    self.chars.push(' ');
                    continue;
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn next_char(&mut self) -> XmlResult<Option<char>> {
        if !self.ensure(0)? {
            return Ok(None);
        }
        let c = self.chars[self.pos];
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Ok(Some(c))
    }

    /// The character `n` positions ahead, without consuming anything.
    pub(crate) fn peek_ahead(&mut self, n: usize) -> XmlResult<Option<char>> {
        if self.ensure(n)? {
            Ok(Some(self.chars[self.pos + n]))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn peek_char(&mut self) -> XmlResult<Option<char>> {
        self.peek_ahead(0)
    }

    /// True once every character has been handed out.
    pub(crate) fn at_end(&mut self) -> XmlResult<bool> {
        Ok(!self.ensure(0)?)
    }

    pub(crate) fn skip_if(&mut self, expected: char) -> XmlResult<bool> {
        if self.peek_char()? == Some(expected) {
            self.next_char()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn skip_string(&mut self, expected: &str) -> XmlResult<bool> {
        for (i, c) in expected.chars().enumerate() {
            if self.peek_ahead(i)? != Some(c) {
                return Ok(false);
            }
        }
        for _ in expected.chars() {
            self.next_char()?;
        }
        Ok(true)
    }
}
