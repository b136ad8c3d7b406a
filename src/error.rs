use std::fmt;

use thiserror::Error;

pub type XmlResult<T> = Result<T, Error>;

/// Every distinct condition the parser reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    // Input and entities
    UnexpectedEof,
    IoFailure,
    EncodingProbeFailed,
    IllegalByteSequence,
    EncodingMismatch,
    UnsupportedEncoding,
    CircularEntityReference,
    PartialMarkupInEntity,
    UndeclaredEntity,
    UnparsedEntityReference,
    ExternalEntityInAttr,
    EntityNotExpected,

    // Well-formedness
    IllegalChar,
    ExpectedName,
    ExpectedWhitespace,
    ExpectedEquals,
    ExpectedQuote,
    ExpectedMarkup,
    UnterminatedMarkup,
    MismatchedEndTag,
    UnbalancedEndTag,
    DuplicateAttribute,
    LessThanInAttrValue,
    BadCharRef,
    CDataEndInContent,
    DoubleHyphenInComment,
    ReservedPITarget,
    BadXmlDecl,
    MisplacedXmlDecl,
    MisplacedDocType,
    TextAfterRoot,
    NoRootElement,
    MultipleRootElements,
    BadNamespacePrefix,
    BadContentSpec,
    BadAttrType,
    BadDefaultDecl,
    BadConditionalSection,
    BadPubidChar,

    // Validity
    UndeclaredElement,
    UndeclaredAttribute,
    WrongRootElement,
    NoDocType,
    ContentModelMismatch,
    EmptyElementHasContent,
    TextNotAllowed,
    RequiredAttrMissing,
    FixedAttrMismatch,
    AttrValueNotInEnum,
    BadAttrValue,
    DuplicateId,
    UnmatchedIdRef,
    MultipleIdAttrs,
    IdAttrDefault,
    UndeclaredNotation,
    NotUnparsedEntity,
    ElementRedeclared,
    StandaloneViolation,

    TooManyErrors,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How bad a reported condition is.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Severity {
    Warning,
    Error,
    Validation,
    /// A well-formedness or I/O failure that ended the parse.
    Fatal,
}

/// One reported condition, stamped with where it happened.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub system_id: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({}:{}) {:?} {}: {}",
            self.system_id, self.line, self.column, self.severity, self.code, self.message
        )
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Unexpected end of input")]
    UnexpectedEof,

    #[error("Circular reference to entity: {0}")]
    CircularEntityReference(String),

    #[error("Encoding error ({encoding}): {message}")]
    Encoding { encoding: String, message: String },

    #[error("{0}")]
    UnsupportedEncoding(String),

    #[error("{0}")]
    Fatal(Box<Diagnostic>),

    #[error("Error limit of {0} reached, parse aborted")]
    TooManyErrors(usize),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Io(_) => ErrorCode::IoFailure,
            Error::UnexpectedEof => ErrorCode::UnexpectedEof,
            Error::CircularEntityReference(_) => ErrorCode::CircularEntityReference,
            Error::Encoding { .. } => ErrorCode::IllegalByteSequence,
            Error::UnsupportedEncoding(_) => ErrorCode::UnsupportedEncoding,
            Error::Fatal(diag) => diag.code,
            Error::TooManyErrors(_) => ErrorCode::TooManyErrors,
        }
    }

    /// The positioned diagnostic, if this error already went through the parser's reporting.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Error::Fatal(diag) => Some(diag),
            _ => None,
        }
    }
}
